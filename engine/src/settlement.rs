use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
  initial_margin, liquidation_price, round_money, DbTx, EngineError, EngineResult, Currency,
  LedgerKind, Order, OrderType, Pair, PlannedFill, Position, PositionSide, PositionStatus, Side,
  Trade, Wallet, DUST,
};

/// A participant's view of one futures fill.
#[derive(Debug, Clone)]
pub struct FuturesFill {
  pub contract: Pair,
  pub side: Side,
  pub price: Decimal,
  pub quantity: Decimal,
  pub leverage: Decimal,
  pub collateral: Currency,
}

/// Planned changes to a participant's positions for one fill. Produced by
/// the pure reducer and persisted in a single pass.
#[derive(Debug, Clone)]
pub enum PositionMutation {
  Reduce {
    id: Uuid,
    new_quantity: Decimal,
    new_margin: Decimal,
    realized_pnl_delta: Decimal,
    close: bool,
  },
  AverageIn {
    id: Uuid,
    new_quantity: Decimal,
    new_entry: Decimal,
    new_margin: Decimal,
    new_liquidation: Decimal,
  },
  Open {
    side: PositionSide,
    entry: Decimal,
    quantity: Decimal,
    margin: Decimal,
    liquidation: Decimal,
  },
}

#[derive(Debug, Clone, Default)]
pub struct PositionOutcome {
  pub mutations: Vec<PositionMutation>,
  /// Margin returned plus realized PnL; credited with kind `margin_release`.
  pub wallet_credit: Decimal,
  /// Fresh margin to move out of the wallet; debited with kind `margin_lock`.
  pub margin_debit: Decimal,
  pub realized_pnl: Decimal,
}

/// Reduce a participant's open positions against one fill: an opposing
/// position is reduced first, any leftover opens a same-side position; with
/// no opposing position the fill averages into, or opens, the same side.
/// Pure; the caller persists the mutations and wallet deltas.
pub fn reduce_futures_fill(existing: &[Position], fill: &FuturesFill) -> PositionOutcome {
  let params = fill.contract.params();
  let cs = params.contract_size;
  let fill_side = fill.side.position_side();

  let mut outcome = PositionOutcome::default();
  let mut quantity = fill.quantity;

  if let Some(opposing) = existing
    .iter()
    .find(|p| p.is_open() && p.side == fill_side.opposite())
  {
    let closed = quantity.min(opposing.quantity);
    let pnl = round_money(opposing.side.sign() * (fill.price - opposing.entry_price) * closed * cs);
    let release = round_money(closed / opposing.quantity * opposing.margin);
    let residual = opposing.quantity - closed;

    outcome.mutations.push(PositionMutation::Reduce {
      id: opposing.id,
      new_quantity: residual,
      new_margin: opposing.margin - release,
      realized_pnl_delta: pnl,
      close: residual < DUST,
    });
    outcome.wallet_credit += release + pnl;
    outcome.realized_pnl += pnl;
    quantity -= closed;
  } else if let Some(same) = existing
    .iter()
    .find(|p| p.is_open() && p.side == fill_side)
  {
    let added_margin = initial_margin(quantity, cs, fill.price, fill.leverage);
    let new_quantity = same.quantity + quantity;
    let new_entry = round_money(
      (same.quantity * same.entry_price + quantity * fill.price) / new_quantity,
    );
    outcome.mutations.push(PositionMutation::AverageIn {
      id: same.id,
      new_quantity,
      new_entry,
      new_margin: same.margin + added_margin,
      new_liquidation: liquidation_price(
        same.side,
        new_entry,
        same.leverage,
        params.maintenance_margin_rate,
      ),
    });
    outcome.margin_debit += added_margin;
    return outcome;
  }

  if quantity >= DUST {
    let margin = initial_margin(quantity, cs, fill.price, fill.leverage);
    outcome.mutations.push(PositionMutation::Open {
      side: fill_side,
      entry: fill.price,
      quantity,
      margin,
      liquidation: liquidation_price(
        fill_side,
        fill.price,
        fill.leverage,
        params.maintenance_margin_rate,
      ),
    });
    outcome.margin_debit += margin;
  }

  outcome
}

impl Position {
  /// Lock and load the participant's open positions on a contract, oldest
  /// first. Locks are taken before any of them is mutated.
  pub async fn open_for_update(
    tx: &mut DbTx<'_>,
    user_id: Uuid,
    contract: Pair,
  ) -> EngineResult<Vec<Position>> {
    let positions = sqlx::query_as::<_, Position>(
      "SELECT * FROM positions
       WHERE user_id = $1 AND contract = $2 AND status = 'open'
       ORDER BY created_at ASC
       FOR UPDATE",
    )
    .bind(user_id)
    .bind(contract)
    .fetch_all(&mut **tx)
    .await?;
    Ok(positions)
  }

  pub async fn apply_mutation(
    tx: &mut DbTx<'_>,
    user_id: Uuid,
    fill: &FuturesFill,
    mutation: &PositionMutation,
  ) -> EngineResult<Position> {
    let position = match mutation {
      PositionMutation::Reduce {
        id,
        new_quantity,
        new_margin,
        realized_pnl_delta,
        close,
      } => {
        let status = if *close {
          PositionStatus::Closed
        } else {
          PositionStatus::Open
        };
        sqlx::query_as::<_, Position>(
          "UPDATE positions
           SET quantity = $2, margin = $3, realized_pnl = realized_pnl + $4, status = $5
           WHERE id = $1
           RETURNING *",
        )
        .bind(id)
        .bind(new_quantity)
        .bind(new_margin)
        .bind(realized_pnl_delta)
        .bind(status)
        .fetch_one(&mut **tx)
        .await?
      }
      PositionMutation::AverageIn {
        id,
        new_quantity,
        new_entry,
        new_margin,
        new_liquidation,
      } => {
        sqlx::query_as::<_, Position>(
          "UPDATE positions
           SET quantity = $2, entry_price = $3, margin = $4, liquidation_price = $5
           WHERE id = $1
           RETURNING *",
        )
        .bind(id)
        .bind(new_quantity)
        .bind(new_entry)
        .bind(new_margin)
        .bind(new_liquidation)
        .fetch_one(&mut **tx)
        .await?
      }
      PositionMutation::Open {
        side,
        entry,
        quantity,
        margin,
        liquidation,
      } => {
        // funding for a position opened mid-interval starts at the next
        // boundary
        sqlx::query_as::<_, Position>(
          "INSERT INTO positions
             (user_id, contract, side, entry_price, quantity, margin,
              collateral_currency, leverage, liquidation_price, last_funding_at, status)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'open')
           RETURNING *",
        )
        .bind(user_id)
        .bind(fill.contract)
        .bind(side)
        .bind(entry)
        .bind(quantity)
        .bind(margin)
        .bind(fill.collateral)
        .bind(fill.leverage)
        .bind(liquidation)
        .bind(common::funding_boundary(chrono::Utc::now()))
        .fetch_one(&mut **tx)
        .await?
      }
    };
    Ok(position)
  }
}

/// Record the immutable fill row.
pub async fn record_trade(
  tx: &mut DbTx<'_>,
  taker: &Order,
  fill: &PlannedFill,
) -> EngineResult<Trade> {
  let trade = sqlx::query_as::<_, Trade>(
    "INSERT INTO trades
       (pair, maker_order_id, taker_order_id, maker_user_id, taker_user_id,
        price, quantity, maker_fee, taker_fee)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
     RETURNING *",
  )
  .bind(taker.pair)
  .bind(fill.maker_order_id)
  .bind(taker.id)
  .bind(fill.maker_user_id)
  .bind(taker.user_id)
  .bind(fill.price)
  .bind(fill.quantity)
  .bind(fill.maker_fee)
  .bind(fill.taker_fee)
  .fetch_one(&mut **tx)
  .await?;
  Ok(trade)
}

/// Move the two legs of a spot fill between the participants' stablecoin
/// wallets. Fees come off the credited leg of each side.
pub async fn settle_spot_fill(
  tx: &mut DbTx<'_>,
  taker: &Order,
  maker: &Order,
  fill: &PlannedFill,
) -> EngineResult<()> {
  let (buyer, buyer_fee, seller, seller_fee) = match taker.side {
    Side::Buy => (taker, fill.taker_fee, maker, fill.maker_fee),
    Side::Sell => (maker, fill.maker_fee, taker, fill.taker_fee),
  };
  let quote_amount = round_money(fill.quantity * fill.price);

  settle_spot_buyer(tx, buyer, buyer_fee, quote_amount, fill, taker.id).await?;
  settle_spot_seller(tx, seller, seller_fee, quote_amount, fill, taker.id).await?;
  Ok(())
}

async fn settle_spot_buyer(
  tx: &mut DbTx<'_>,
  order: &Order,
  fee: Decimal,
  quote_amount: Decimal,
  fill: &PlannedFill,
  taker_order_id: Uuid,
) -> EngineResult<()> {
  let (base, quote) = order
    .pair
    .spot_legs()
    .ok_or_else(|| EngineError::Internal("spot settlement on a futures pair".into()))?;

  let quote_wallet = Wallet::get_or_create(tx, order.user_id, quote).await?;
  if order.order_type == OrderType::Limit {
    // admission locked the slice at the order's own limit price
    let limit = order
      .price
      .ok_or_else(|| EngineError::Internal("limit order without price".into()))?;
    Wallet::release_funds(tx, quote_wallet.id, round_money(fill.quantity * limit)).await?;
  }
  Wallet::apply(
    tx,
    quote_wallet.id,
    -quote_amount,
    LedgerKind::TradeDebit,
    Some(taker_order_id),
    format!("buy {} {} @ {}", fill.quantity, base, fill.price),
  )
  .await?;

  let base_wallet = Wallet::get_or_create(tx, order.user_id, base).await?;
  Wallet::apply(
    tx,
    base_wallet.id,
    fill.quantity,
    LedgerKind::TradeCredit,
    Some(taker_order_id),
    format!("receive {} {}", fill.quantity, base),
  )
  .await?;
  Wallet::apply(
    tx,
    base_wallet.id,
    -fee,
    LedgerKind::Fee,
    Some(taker_order_id),
    format!("trade fee {} {}", fee, base),
  )
  .await?;
  Ok(())
}

async fn settle_spot_seller(
  tx: &mut DbTx<'_>,
  order: &Order,
  fee: Decimal,
  quote_amount: Decimal,
  fill: &PlannedFill,
  taker_order_id: Uuid,
) -> EngineResult<()> {
  let (base, quote) = order
    .pair
    .spot_legs()
    .ok_or_else(|| EngineError::Internal("spot settlement on a futures pair".into()))?;

  let base_wallet = Wallet::get_or_create(tx, order.user_id, base).await?;
  if order.order_type == OrderType::Limit {
    Wallet::release_funds(tx, base_wallet.id, fill.quantity).await?;
  }
  Wallet::apply(
    tx,
    base_wallet.id,
    -fill.quantity,
    LedgerKind::TradeDebit,
    Some(taker_order_id),
    format!("sell {} {} @ {}", fill.quantity, base, fill.price),
  )
  .await?;

  let quote_wallet = Wallet::get_or_create(tx, order.user_id, quote).await?;
  Wallet::apply(
    tx,
    quote_wallet.id,
    quote_amount,
    LedgerKind::TradeCredit,
    Some(taker_order_id),
    format!("receive {} {}", quote_amount, quote),
  )
  .await?;
  Wallet::apply(
    tx,
    quote_wallet.id,
    -fee,
    LedgerKind::Fee,
    Some(taker_order_id),
    format!("trade fee {} {}", fee, quote),
  )
  .await?;
  Ok(())
}

/// Settle one futures fill for both participants independently. The maker's
/// collateral currency and leverage come from the resting maker order.
pub async fn settle_futures_fill(
  tx: &mut DbTx<'_>,
  taker: &Order,
  maker: &Order,
  fill: &PlannedFill,
) -> EngineResult<Decimal> {
  settle_futures_participant(tx, maker, fill.maker_fee, fill).await?;
  let taker_pnl = settle_futures_participant(tx, taker, fill.taker_fee, fill).await?;
  Ok(taker_pnl)
}

async fn settle_futures_participant(
  tx: &mut DbTx<'_>,
  order: &Order,
  fee: Decimal,
  fill: &PlannedFill,
) -> EngineResult<Decimal> {
  let params = order.pair.params();
  let collateral = order
    .collateral_currency
    .ok_or_else(|| EngineError::Internal("futures order without collateral currency".into()))?;
  let leverage = order
    .leverage
    .ok_or_else(|| EngineError::Internal("futures order without leverage".into()))?;

  let wallet = Wallet::get_or_create(tx, order.user_id, collateral).await?;

  if order.order_type == OrderType::Limit {
    // pro-rata slice of the admission lock: margin plus the conservative
    // taker-rate fee estimate, both at the order's own price
    let limit = order
      .price
      .ok_or_else(|| EngineError::Internal("limit order without price".into()))?;
    let unit = params.contract_size
      * limit
      * (Decimal::ONE / leverage + params.taker_fee_rate);
    Wallet::release_funds(tx, wallet.id, round_money(fill.quantity * unit)).await?;
  }

  let existing = Position::open_for_update(tx, order.user_id, order.pair).await?;
  let participant_fill = FuturesFill {
    contract: order.pair,
    side: order.side,
    price: fill.price,
    quantity: fill.quantity,
    leverage,
    collateral,
  };
  let outcome = reduce_futures_fill(&existing, &participant_fill);

  for mutation in &outcome.mutations {
    Position::apply_mutation(tx, order.user_id, &participant_fill, mutation).await?;
  }

  // credit released margin and pnl before taking fresh margin, so a
  // reduce-then-flip fill funds itself
  if !outcome.wallet_credit.is_zero() {
    Wallet::apply(
      tx,
      wallet.id,
      outcome.wallet_credit,
      LedgerKind::MarginRelease,
      Some(order.id),
      format!("margin release + pnl on {}", order.pair),
    )
    .await?;
  }
  if !outcome.margin_debit.is_zero() {
    Wallet::apply(
      tx,
      wallet.id,
      -outcome.margin_debit,
      LedgerKind::MarginLock,
      Some(order.id),
      format!("margin for {} {} @ {}", fill.quantity, order.pair, fill.price),
    )
    .await?;
  }
  if !fee.is_zero() {
    Wallet::apply(
      tx,
      wallet.id,
      -fee,
      LedgerKind::Fee,
      Some(order.id),
      format!("trade fee {} {}", fee, collateral),
    )
    .await?;
  }

  Ok(outcome.realized_pnl)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use rust_decimal_macros::dec;

  fn fill(side: Side, price: Decimal, quantity: Decimal) -> FuturesFill {
    FuturesFill {
      contract: Pair::XauPerp,
      side,
      price,
      quantity,
      leverage: dec!(10),
      collateral: Currency::Usdt,
    }
  }

  fn position(side: PositionSide, entry: Decimal, quantity: Decimal, margin: Decimal) -> Position {
    Position {
      id: Uuid::new_v4(),
      user_id: Uuid::new_v4(),
      contract: Pair::XauPerp,
      side,
      entry_price: entry,
      quantity,
      margin,
      collateral_currency: Currency::Usdt,
      leverage: dec!(10),
      liquidation_price: dec!(0),
      realized_pnl: dec!(0),
      last_funding_at: None,
      status: PositionStatus::Open,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn opens_a_position_with_initial_margin() {
    let outcome = reduce_futures_fill(&[], &fill(Side::Buy, dec!(2850.00), dec!(100)));

    assert_eq!(outcome.margin_debit, dec!(28.50));
    assert_eq!(outcome.wallet_credit, dec!(0));
    assert_eq!(outcome.mutations.len(), 1);
    match &outcome.mutations[0] {
      PositionMutation::Open {
        side,
        entry,
        quantity,
        margin,
        liquidation,
      } => {
        assert_eq!(*side, PositionSide::Long);
        assert_eq!(*entry, dec!(2850.00));
        assert_eq!(*quantity, dec!(100));
        assert_eq!(*margin, dec!(28.50));
        assert_eq!(*liquidation, dec!(2593.50));
      }
      other => panic!("expected open, got {:?}", other),
    }
  }

  #[test]
  fn averages_into_a_same_side_position() {
    let long = position(PositionSide::Long, dec!(2850.00), dec!(100), dec!(28.50));
    let outcome = reduce_futures_fill(
      std::slice::from_ref(&long),
      &fill(Side::Buy, dec!(2860.00), dec!(100)),
    );

    assert_eq!(outcome.margin_debit, dec!(28.60));
    match &outcome.mutations[0] {
      PositionMutation::AverageIn {
        new_quantity,
        new_entry,
        new_margin,
        new_liquidation,
        ..
      } => {
        assert_eq!(*new_quantity, dec!(200));
        assert_eq!(*new_entry, dec!(2855.00));
        assert_eq!(*new_margin, dec!(57.10));
        assert_eq!(*new_liquidation, dec!(2598.05));
      }
      other => panic!("expected average-in, got {:?}", other),
    }
  }

  #[test]
  fn reduces_an_opposing_position_and_releases_margin() {
    let long = position(PositionSide::Long, dec!(2855.00), dec!(200), dec!(57.10));
    let outcome = reduce_futures_fill(
      std::slice::from_ref(&long),
      &fill(Side::Sell, dec!(2870.00), dec!(50)),
    );

    assert_eq!(outcome.realized_pnl, dec!(0.75));
    assert_eq!(outcome.wallet_credit, dec!(15.025));
    assert_eq!(outcome.margin_debit, dec!(0));
    match &outcome.mutations[0] {
      PositionMutation::Reduce {
        new_quantity,
        new_margin,
        realized_pnl_delta,
        close,
        ..
      } => {
        assert_eq!(*new_quantity, dec!(150));
        assert_eq!(*new_margin, dec!(42.825));
        assert_eq!(*realized_pnl_delta, dec!(0.75));
        assert!(!close);
      }
      other => panic!("expected reduce, got {:?}", other),
    }
  }

  #[test]
  fn closing_exactly_marks_the_position_closed() {
    let long = position(PositionSide::Long, dec!(2850.00), dec!(100), dec!(28.50));
    let outcome = reduce_futures_fill(
      std::slice::from_ref(&long),
      &fill(Side::Sell, dec!(2840.00), dec!(100)),
    );

    // full margin back, minus the 1.00 loss
    assert_eq!(outcome.wallet_credit, dec!(27.50));
    assert_eq!(outcome.realized_pnl, dec!(-1.00));
    match &outcome.mutations[0] {
      PositionMutation::Reduce { close, new_quantity, .. } => {
        assert!(close);
        assert_eq!(*new_quantity, dec!(0));
      }
      other => panic!("expected reduce, got {:?}", other),
    }
  }

  #[test]
  fn oversized_reduce_flips_into_a_new_position() {
    let long = position(PositionSide::Long, dec!(2850.00), dec!(100), dec!(28.50));
    let outcome = reduce_futures_fill(
      std::slice::from_ref(&long),
      &fill(Side::Sell, dec!(2860.00), dec!(150)),
    );

    assert_eq!(outcome.mutations.len(), 2);
    assert_eq!(outcome.realized_pnl, dec!(1.00));
    // closed leg returns margin + pnl; leftover 50 opens a short
    assert_eq!(outcome.wallet_credit, dec!(29.50));
    assert_eq!(outcome.margin_debit, dec!(14.30));
    match &outcome.mutations[1] {
      PositionMutation::Open { side, quantity, .. } => {
        assert_eq!(*side, PositionSide::Short);
        assert_eq!(*quantity, dec!(50));
      }
      other => panic!("expected open, got {:?}", other),
    }
  }

  #[test]
  fn short_reduce_realizes_negated_pnl() {
    let short = position(PositionSide::Short, dec!(2850.00), dec!(100), dec!(28.50));
    let outcome = reduce_futures_fill(
      std::slice::from_ref(&short),
      &fill(Side::Buy, dec!(2840.00), dec!(100)),
    );
    // short closed below entry gains
    assert_eq!(outcome.realized_pnl, dec!(1.00));
    assert_eq!(outcome.wallet_credit, dec!(29.50));
  }
}
