use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{EngineError, EngineResult, Currency, LedgerEntry, LedgerKind, Wallet};

pub type DbTx<'t> = sqlx::Transaction<'t, sqlx::Postgres>;

impl Wallet {
  /// Fetch the wallet for `(user, currency)` and lock its row for the rest
  /// of the transaction, creating it (and the user stub) with zero balances
  /// on first access. Must be called before any balance delta on it.
  pub async fn get_or_create(
    tx: &mut DbTx<'_>,
    user_id: Uuid,
    currency: Currency,
  ) -> EngineResult<Wallet> {
    sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
      .bind(user_id)
      .execute(&mut **tx)
      .await?;
    sqlx::query(
      "INSERT INTO wallets (user_id, currency) VALUES ($1, $2)
       ON CONFLICT (user_id, currency) DO NOTHING",
    )
    .bind(user_id)
    .bind(currency)
    .execute(&mut **tx)
    .await?;
    let wallet = sqlx::query_as::<_, Wallet>(
      "SELECT * FROM wallets WHERE user_id = $1 AND currency = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(currency)
    .fetch_one(&mut **tx)
    .await?;
    Ok(wallet)
  }

  /// Reserve `amount` of free funds. Adjusts `available` only; no ledger row.
  pub async fn lock_funds(
    tx: &mut DbTx<'_>,
    wallet_id: Uuid,
    amount: Decimal,
  ) -> EngineResult<()> {
    if amount.is_zero() {
      return Ok(());
    }
    let updated = sqlx::query(
      "UPDATE wallets SET available = available - $2
       WHERE id = $1 AND available >= $2",
    )
    .bind(wallet_id)
    .bind(amount)
    .execute(&mut **tx)
    .await?;
    if updated.rows_affected() == 0 {
      let available: Decimal =
        sqlx::query_scalar("SELECT available FROM wallets WHERE id = $1")
          .bind(wallet_id)
          .fetch_optional(&mut **tx)
          .await?
          .ok_or_else(|| EngineError::not_found(format!("wallet {}", wallet_id)))?;
      return Err(EngineError::InsufficientFunds {
        required: amount,
        available,
      });
    }
    Ok(())
  }

  /// Return previously locked funds to `available`. The paired inverse of
  /// `lock_funds`. Per-fill slices are rounded independently of the original
  /// lock, so the release is clamped at `balance` rather than failing on a
  /// dust overshoot.
  pub async fn release_funds(
    tx: &mut DbTx<'_>,
    wallet_id: Uuid,
    amount: Decimal,
  ) -> EngineResult<()> {
    if amount.is_zero() {
      return Ok(());
    }
    let updated = sqlx::query(
      "UPDATE wallets SET available = LEAST(balance, available + $2) WHERE id = $1",
    )
    .bind(wallet_id)
    .bind(amount)
    .execute(&mut **tx)
    .await?;
    if updated.rows_affected() == 0 {
      return Err(EngineError::not_found(format!("wallet {}", wallet_id)));
    }
    Ok(())
  }

  /// Apply a signed balance delta and append the ledger row recording it.
  /// Negative amounts debit, positive credit; both `balance` and `available`
  /// move together, so debits of locked funds must be preceded by a release.
  pub async fn apply(
    tx: &mut DbTx<'_>,
    wallet_id: Uuid,
    amount: Decimal,
    kind: LedgerKind,
    reference_id: Option<Uuid>,
    description: impl Into<String>,
  ) -> EngineResult<LedgerEntry> {
    let balance_after: Option<Decimal> = sqlx::query_scalar(
      "UPDATE wallets SET balance = balance + $2, available = available + $2
       WHERE id = $1 AND balance + $2 >= 0 AND available + $2 >= 0
       RETURNING balance",
    )
    .bind(wallet_id)
    .bind(amount)
    .fetch_optional(&mut **tx)
    .await?;

    let balance_after = match balance_after {
      Some(b) => b,
      None => {
        let available: Decimal =
          sqlx::query_scalar("SELECT available FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("wallet {}", wallet_id)))?;
        return Err(EngineError::InsufficientFunds {
          required: -amount,
          available,
        });
      }
    };

    let entry = sqlx::query_as::<_, LedgerEntry>(
      "INSERT INTO transactions (wallet_id, amount, balance_after, kind, reference_id, description)
       VALUES ($1, $2, $3, $4, $5, $6)
       RETURNING *",
    )
    .bind(wallet_id)
    .bind(amount)
    .bind(balance_after)
    .bind(kind)
    .bind(reference_id)
    .bind(description.into())
    .fetch_one(&mut **tx)
    .await?;
    Ok(entry)
  }

  pub async fn history(
    pool: &sqlx::PgPool,
    wallet_id: Uuid,
    limit: i64,
  ) -> EngineResult<Vec<LedgerEntry>> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
      "SELECT * FROM transactions WHERE wallet_id = $1
       ORDER BY created_at DESC LIMIT $2",
    )
    .bind(wallet_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(entries)
  }
}
