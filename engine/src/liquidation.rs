use log::{info, warn};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
  is_liquidatable, maintenance_margin, unrealized_pnl, EngineResult, LedgerKind, Pair, Position,
  Wallet,
};

/// Sweep a contract for positions underwater at `mark`. Each liquidation
/// runs in its own transaction; failures are logged and skipped.
pub async fn check_liquidations(
  pool: &PgPool,
  contract: Pair,
  mark: Decimal,
) -> EngineResult<Vec<Uuid>> {
  let ids: Vec<Uuid> = sqlx::query_scalar(
    "SELECT id FROM positions WHERE contract = $1 AND status = 'open'",
  )
  .bind(contract)
  .fetch_all(pool)
  .await?;

  let mut liquidated = vec![];
  for id in ids {
    match liquidate_if_underwater(pool, id, mark).await {
      Ok(true) => liquidated.push(id),
      Ok(false) => {}
      Err(e) => warn!("liquidation skipped for position {}: {}", id, e),
    }
  }
  Ok(liquidated)
}

async fn liquidate_if_underwater(pool: &PgPool, id: Uuid, mark: Decimal) -> EngineResult<bool> {
  let mut tx = pool.begin().await?;
  let position = match sqlx::query_as::<_, Position>(
    "SELECT * FROM positions WHERE id = $1 AND status = 'open' FOR UPDATE",
  )
  .bind(id)
  .fetch_optional(&mut *tx)
  .await?
  {
    Some(p) => p,
    None => return Ok(false),
  };

  let params = position.contract.params();
  let upnl = unrealized_pnl(
    position.side,
    position.entry_price,
    mark,
    position.quantity,
    params.contract_size,
  );
  let maintenance = maintenance_margin(
    position.quantity,
    params.contract_size,
    mark,
    params.maintenance_margin_rate,
  );
  if !is_liquidatable(position.margin, upnl, maintenance) {
    return Ok(false);
  }

  sqlx::query(
    "UPDATE positions
     SET status = 'liquidated', quantity = 0, margin = 0, realized_pnl = realized_pnl + $2
     WHERE id = $1",
  )
  .bind(position.id)
  .bind(upnl)
  .execute(&mut *tx)
  .await?;

  // equity floored at zero; any deficit falls to the insurance fund. The
  // ledger row records the credit or its absence either way.
  let refund = (position.margin + upnl).max(Decimal::ZERO);
  let wallet = Wallet::get_or_create(&mut tx, position.user_id, position.collateral_currency).await?;
  Wallet::apply(
    &mut tx,
    wallet.id,
    refund,
    LedgerKind::Liquidation,
    Some(position.id),
    format!("liquidation of {} at mark {}", position.contract, mark),
  )
  .await?;

  tx.commit().await?;
  info!(
    "liquidated position {} on {} at mark {}, refund {}",
    position.id, position.contract, mark, refund
  );
  Ok(true)
}
