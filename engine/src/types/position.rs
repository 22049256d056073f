use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Currency, Pair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "position_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
  Long,
  Short,
}

impl PositionSide {
  pub fn opposite(&self) -> PositionSide {
    match self {
      PositionSide::Long => PositionSide::Short,
      PositionSide::Short => PositionSide::Long,
    }
  }

  /// +1 for long, -1 for short. PnL = sign * (mark - entry) * qty * cs.
  pub fn sign(&self) -> Decimal {
    match self {
      PositionSide::Long => Decimal::ONE,
      PositionSide::Short => Decimal::NEGATIVE_ONE,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "position_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
  Open,
  Closed,
  Liquidated,
}

/// A perpetual futures holding. Mutated by fills on the same contract,
/// funding and liquidation; terminal at closed/liquidated with zero quantity.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Position {
  pub id: Uuid,
  pub user_id: Uuid,
  pub contract: Pair,
  pub side: PositionSide,
  pub entry_price: Decimal,
  pub quantity: Decimal,
  pub margin: Decimal,
  pub collateral_currency: Currency,
  pub leverage: Decimal,
  pub liquidation_price: Decimal,
  pub realized_pnl: Decimal,
  pub last_funding_at: Option<DateTime<Utc>>,
  pub status: PositionStatus,
  pub created_at: DateTime<Utc>,
}

impl Position {
  pub fn is_open(&self) -> bool {
    matches!(self.status, PositionStatus::Open)
  }
}
