use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Currency, Pair, PositionSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
  Buy,
  Sell,
}

impl Side {
  pub fn opposite(&self) -> Side {
    match self {
      Side::Buy => Side::Sell,
      Side::Sell => Side::Buy,
    }
  }

  /// The position side a fill on this order side opens.
  pub fn position_side(&self) -> PositionSide {
    match self {
      Side::Buy => PositionSide::Long,
      Side::Sell => PositionSide::Short,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
  Limit,
  Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  Open,
  Partial,
  Filled,
  Cancelled,
}

impl OrderStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
  }

  /// Resting orders participate in matching and depth.
  pub fn rests(&self) -> bool {
    matches!(self, OrderStatus::Open | OrderStatus::Partial)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
  pub id: Uuid,
  pub user_id: Uuid,
  pub pair: Pair,
  pub side: Side,
  pub order_type: OrderType,
  pub price: Option<Decimal>,
  pub quantity: Decimal,
  pub filled_quantity: Decimal,
  pub status: OrderStatus,
  pub collateral_currency: Option<Currency>,
  pub leverage: Option<Decimal>,
  pub created_at: DateTime<Utc>,
}

impl Order {
  pub fn remaining(&self) -> Decimal {
    self.quantity - self.filled_quantity
  }
}
