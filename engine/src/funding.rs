use chrono::{DateTime, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
  notional, round_money, DbTx, EngineResult, LedgerKind, Pair, Position, PositionSide, Wallet,
};

/// Signed wallet delta of one funding application. A positive rate means
/// longs pay and shorts receive; a negative rate the reverse.
pub fn funding_payment(side: PositionSide, notional_at_mark: Decimal, rate: Decimal) -> Decimal {
  round_money(-side.sign() * notional_at_mark * rate)
}

/// Charge or credit one interval of funding to a position, once. The
/// position row must be locked by the caller. Returns false when the
/// position was already funded for the interval starting at `boundary`;
/// the timestamp advances even when the rate is zero.
pub async fn apply_pending(
  tx: &mut DbTx<'_>,
  position: &Position,
  mark: Decimal,
  rate: Decimal,
  boundary: DateTime<Utc>,
) -> EngineResult<bool> {
  if !position.is_open() {
    return Ok(false);
  }
  if let Some(last) = position.last_funding_at {
    if last >= boundary {
      return Ok(false);
    }
  }

  let params = position.contract.params();
  let payment = funding_payment(
    position.side,
    notional(position.quantity, params.contract_size, mark),
    rate,
  );
  if !payment.is_zero() {
    let wallet = Wallet::get_or_create(tx, position.user_id, position.collateral_currency).await?;
    Wallet::apply(
      tx,
      wallet.id,
      payment,
      LedgerKind::Funding,
      Some(position.id),
      format!("funding {} @ rate {}", position.contract, rate),
    )
    .await?;
  }
  sqlx::query("UPDATE positions SET last_funding_at = $2 WHERE id = $1")
    .bind(position.id)
    .bind(boundary)
    .execute(&mut **tx)
    .await?;
  Ok(true)
}

/// Sweep every open position on a contract for the current interval. Each
/// position is funded in its own transaction; individual failures are
/// logged and skipped so one bad wallet cannot stall the sweep.
pub async fn distribute(
  pool: &PgPool,
  contract: Pair,
  mark: Decimal,
  rate: Decimal,
  boundary: DateTime<Utc>,
) -> EngineResult<u64> {
  let ids: Vec<Uuid> = sqlx::query_scalar(
    "SELECT id FROM positions WHERE contract = $1 AND status = 'open'",
  )
  .bind(contract)
  .fetch_all(pool)
  .await?;

  let mut processed = 0u64;
  for id in ids {
    match fund_one(pool, id, mark, rate, boundary).await {
      Ok(true) => processed += 1,
      Ok(false) => {}
      Err(e) => warn!("funding skipped for position {}: {}", id, e),
    }
  }
  debug!(
    "funding distributed on {}: rate {}, {} positions",
    contract, rate, processed
  );
  Ok(processed)
}

async fn fund_one(
  pool: &PgPool,
  id: Uuid,
  mark: Decimal,
  rate: Decimal,
  boundary: DateTime<Utc>,
) -> EngineResult<bool> {
  let mut tx = pool.begin().await?;
  let position = sqlx::query_as::<_, Position>(
    "SELECT * FROM positions WHERE id = $1 AND status = 'open' FOR UPDATE",
  )
  .bind(id)
  .fetch_optional(&mut *tx)
  .await?;
  let applied = match position {
    Some(position) => apply_pending(&mut tx, &position, mark, rate, boundary).await?,
    None => false,
  };
  tx.commit().await?;
  Ok(applied)
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  #[test]
  fn positive_rate_longs_pay_shorts_receive() {
    // notional 287.00 at a clamped 0.2% rate
    assert_eq!(
      funding_payment(PositionSide::Long, dec!(287.00), dec!(0.002)),
      dec!(-0.574)
    );
    assert_eq!(
      funding_payment(PositionSide::Short, dec!(287.00), dec!(0.002)),
      dec!(0.574)
    );
  }

  #[test]
  fn negative_rate_reverses_direction() {
    assert_eq!(
      funding_payment(PositionSide::Long, dec!(287.00), dec!(-0.002)),
      dec!(0.574)
    );
    assert_eq!(
      funding_payment(PositionSide::Short, dec!(287.00), dec!(-0.002)),
      dec!(-0.574)
    );
  }

  #[test]
  fn zero_rate_moves_no_money() {
    assert_eq!(
      funding_payment(PositionSide::Long, dec!(287.00), dec!(0)),
      dec!(0)
    );
  }
}
