use rust_decimal::Decimal;

use crate::{EngineError, EngineResult, PositionSide, MONEY_SCALE};

/// Round to the internal 8-decimal money scale, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
  common::quantize!(value, MONEY_SCALE)
}

/// Strict conversion from external string form. Values that would lose
/// precision are rejected rather than silently rounded.
pub fn parse_money(s: &str) -> EngineResult<Decimal> {
  Decimal::from_str_exact(s)
    .map_err(|e| EngineError::validation(format!("bad decimal {:?}: {}", s, e)))
}

/// True when `value` sits on the pair's tick grid.
pub fn aligned_to_tick(value: Decimal, tick: Decimal) -> bool {
  (value % tick).is_zero()
}

/// Position value in quote currency.
pub fn notional(qty: Decimal, contract_size: Decimal, price: Decimal) -> Decimal {
  qty * contract_size * price
}

pub fn initial_margin(
  qty: Decimal,
  contract_size: Decimal,
  price: Decimal,
  leverage: Decimal,
) -> Decimal {
  round_money(notional(qty, contract_size, price) / leverage)
}

pub fn maintenance_margin(
  qty: Decimal,
  contract_size: Decimal,
  mark: Decimal,
  maintenance_rate: Decimal,
) -> Decimal {
  round_money(notional(qty, contract_size, mark) * maintenance_rate)
}

/// The mark at which equity falls below maintenance margin:
/// long `entry * (1 - (1/lev - mmr))`, short `entry * (1 + (1/lev - mmr))`.
pub fn liquidation_price(
  side: PositionSide,
  entry: Decimal,
  leverage: Decimal,
  maintenance_rate: Decimal,
) -> Decimal {
  let buffer = Decimal::ONE / leverage - maintenance_rate;
  let price = match side {
    PositionSide::Long => entry * (Decimal::ONE - buffer),
    PositionSide::Short => entry * (Decimal::ONE + buffer),
  };
  round_money(price)
}

pub fn unrealized_pnl(
  side: PositionSide,
  entry: Decimal,
  mark: Decimal,
  qty: Decimal,
  contract_size: Decimal,
) -> Decimal {
  round_money(side.sign() * (mark - entry) * qty * contract_size)
}

pub fn is_liquidatable(margin: Decimal, upnl: Decimal, maintenance: Decimal) -> bool {
  margin + upnl < maintenance
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  #[test]
  fn rounds_half_away_from_zero() {
    assert_eq!(round_money(dec!(0.000000005)), dec!(0.00000001));
    assert_eq!(round_money(dec!(-0.000000005)), dec!(-0.00000001));
    assert_eq!(round_money(dec!(0.000000004)), dec!(0));
  }

  #[test]
  fn strict_parse_rejects_precision_loss() {
    assert_eq!(parse_money("2850.00").unwrap(), dec!(2850.00));
    assert!(parse_money("1e999").is_err());
    assert!(parse_money("not a number").is_err());
  }

  #[test]
  fn tick_alignment() {
    assert!(aligned_to_tick(dec!(1.0010), dec!(0.0001)));
    assert!(!aligned_to_tick(dec!(1.00105), dec!(0.0001)));
    assert!(aligned_to_tick(dec!(2850.00), dec!(0.01)));
  }

  #[test]
  fn margin_for_leveraged_gold_long() {
    // 100 contracts of 0.001 oz at 2850 with 10x
    assert_eq!(
      initial_margin(dec!(100), dec!(0.001), dec!(2850.00), dec!(10)),
      dec!(28.50)
    );
    assert_eq!(
      liquidation_price(PositionSide::Long, dec!(2850.00), dec!(10), dec!(0.01)),
      dec!(2593.50)
    );
    assert_eq!(
      liquidation_price(PositionSide::Short, dec!(2850.00), dec!(10), dec!(0.01)),
      dec!(3106.50)
    );
  }

  #[test]
  fn liquidation_check_at_depressed_mark() {
    let upnl = unrealized_pnl(
      PositionSide::Long,
      dec!(2850.00),
      dec!(2580.00),
      dec!(100),
      dec!(0.001),
    );
    assert_eq!(upnl, dec!(-27.00));
    let maintenance = maintenance_margin(dec!(100), dec!(0.001), dec!(2580.00), dec!(0.01));
    assert_eq!(maintenance, dec!(2.58));
    assert!(is_liquidatable(dec!(28.50), upnl, maintenance));
    // at entry the position is comfortably above maintenance
    assert!(!is_liquidatable(dec!(28.50), dec!(0), dec!(2.85)));
  }

  #[test]
  fn short_pnl_mirrors_long() {
    let long = unrealized_pnl(
      PositionSide::Long,
      dec!(2855.00),
      dec!(2870.00),
      dec!(50),
      dec!(0.001),
    );
    let short = unrealized_pnl(
      PositionSide::Short,
      dec!(2855.00),
      dec!(2870.00),
      dec!(50),
      dec!(0.001),
    );
    assert_eq!(long, dec!(0.75));
    assert_eq!(short, dec!(-0.75));
  }
}
