use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Pair;

/// Immutable fill record. The maker is the resting side, the taker the
/// incoming crossing order; execution price is always the maker's.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trade {
  pub id: Uuid,
  pub pair: Pair,
  pub maker_order_id: Uuid,
  pub taker_order_id: Uuid,
  pub maker_user_id: Uuid,
  pub taker_user_id: Uuid,
  pub price: Decimal,
  pub quantity: Decimal,
  pub maker_fee: Decimal,
  pub taker_fee: Decimal,
  pub created_at: DateTime<Utc>,
}
