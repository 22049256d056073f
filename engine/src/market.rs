use std::fmt::Display;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Stablecoin collateral units. Spot trades exchange one against the other;
/// futures positions are margined in whichever the order names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "currency")]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
  #[sqlx(rename = "USDT")]
  Usdt,
  #[sqlx(rename = "USDC")]
  Usdc,
}

impl Currency {
  pub fn as_str(&self) -> &'static str {
    match self {
      Currency::Usdt => "USDT",
      Currency::Usdc => "USDC",
    }
  }
}

impl Display for Currency {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Currency {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "USDT" => Ok(Currency::Usdt),
      "USDC" => Ok(Currency::Usdc),
      other => Err(EngineError::validation(format!("unknown currency: {}", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
  Spot,
  Futures,
}

/// The three colocated markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pair")]
pub enum Pair {
  #[sqlx(rename = "USDT-USDC")]
  #[serde(rename = "USDT-USDC")]
  UsdtUsdc,
  #[sqlx(rename = "XAU-PERP")]
  #[serde(rename = "XAU-PERP")]
  XauPerp,
  #[sqlx(rename = "XAG-PERP")]
  #[serde(rename = "XAG-PERP")]
  XagPerp,
}

impl Pair {
  pub const ALL: [Pair; 3] = [Pair::UsdtUsdc, Pair::XauPerp, Pair::XagPerp];
  /// The perpetual contracts, for funding and liquidation sweeps.
  pub const CONTRACTS: [Pair; 2] = [Pair::XauPerp, Pair::XagPerp];

  pub const fn params(&self) -> &'static MarketParams {
    match self {
      Pair::UsdtUsdc => &USDT_USDC,
      Pair::XauPerp => &XAU_PERP,
      Pair::XagPerp => &XAG_PERP,
    }
  }

  pub fn kind(&self) -> MarketKind {
    self.params().kind
  }

  pub fn is_futures(&self) -> bool {
    matches!(self.kind(), MarketKind::Futures)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Pair::UsdtUsdc => "USDT-USDC",
      Pair::XauPerp => "XAU-PERP",
      Pair::XagPerp => "XAG-PERP",
    }
  }

  /// Wallet legs of the spot market: (base, quote).
  pub fn spot_legs(&self) -> Option<(Currency, Currency)> {
    match self {
      Pair::UsdtUsdc => Some((Currency::Usdt, Currency::Usdc)),
      _ => None,
    }
  }
}

impl Display for Pair {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Pair {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "USDT-USDC" => Ok(Pair::UsdtUsdc),
      "XAU-PERP" => Ok(Pair::XauPerp),
      "XAG-PERP" => Ok(Pair::XagPerp),
      other => Err(EngineError::validation(format!("unknown pair: {}", other))),
    }
  }
}

/// Static per-pair configuration, immutable at runtime. Futures-only fields
/// are zero on the spot row and must not be read for it.
#[derive(Debug, Clone)]
pub struct MarketParams {
  pub pair: Pair,
  pub kind: MarketKind,
  pub tick: Decimal,
  pub min_qty: Decimal,
  pub maker_fee_rate: Decimal,
  pub taker_fee_rate: Decimal,
  pub contract_size: Decimal,
  pub max_leverage: Decimal,
  pub initial_margin_rate: Decimal,
  pub maintenance_margin_rate: Decimal,
}

pub const USDT_USDC: MarketParams = MarketParams {
  pair: Pair::UsdtUsdc,
  kind: MarketKind::Spot,
  tick: dec!(0.0001),
  min_qty: dec!(0.01),
  maker_fee_rate: dec!(0.0001),
  taker_fee_rate: dec!(0.0003),
  contract_size: dec!(0),
  max_leverage: dec!(0),
  initial_margin_rate: dec!(0),
  maintenance_margin_rate: dec!(0),
};

pub const XAU_PERP: MarketParams = MarketParams {
  pair: Pair::XauPerp,
  kind: MarketKind::Futures,
  tick: dec!(0.01),
  min_qty: dec!(1),
  maker_fee_rate: dec!(0.0002),
  taker_fee_rate: dec!(0.0005),
  contract_size: dec!(0.001),
  max_leverage: dec!(50),
  initial_margin_rate: dec!(0.02),
  maintenance_margin_rate: dec!(0.01),
};

pub const XAG_PERP: MarketParams = MarketParams {
  pair: Pair::XagPerp,
  kind: MarketKind::Futures,
  tick: dec!(0.001),
  min_qty: dec!(1),
  maker_fee_rate: dec!(0.0002),
  taker_fee_rate: dec!(0.0005),
  contract_size: dec!(0.1),
  max_leverage: dec!(50),
  initial_margin_rate: dec!(0.02),
  maintenance_margin_rate: dec!(0.01),
};
