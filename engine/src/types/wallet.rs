use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Currency;

/// Per-(user, currency) balance. `balance` is everything the user owns,
/// `available` the part not locked behind resting orders.
/// Invariant: `0 <= available <= balance`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
  pub id: Uuid,
  pub user_id: Uuid,
  pub currency: Currency,
  pub balance: Decimal,
  pub available: Decimal,
  pub created_at: DateTime<Utc>,
}

impl Wallet {
  pub fn locked(&self) -> Decimal {
    self.balance - self.available
  }
}

/// Why a ledger row exists. Locks and releases do not appear here; they move
/// `available` only and leave `balance` untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
  Deposit,
  Withdrawal,
  WithdrawalFee,
  TradeDebit,
  TradeCredit,
  Fee,
  MarginLock,
  MarginRelease,
  Liquidation,
  Funding,
}

/// Append-only record of a balance delta. For every wallet the sum of its
/// `amount` entries equals the wallet's `balance`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
  pub id: Uuid,
  pub wallet_id: Uuid,
  pub amount: Decimal,
  pub balance_after: Decimal,
  pub kind: LedgerKind,
  pub reference_id: Option<Uuid>,
  pub description: Option<String>,
  pub created_at: DateTime<Utc>,
}
