use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
  aligned_to_tick, book_mid, funding, funding_rate, liquidation, load_resting, maker_status_after,
  mark_price, order_book, plan_match, recent_trades, record_trade, round_money, settle_futures_fill,
  settle_spot_fill, DbTx, EngineError, EngineResult, Currency, IncomingOrder, MarketKind, Order,
  OrderBook, OrderStatus, OrderType, Pair, Position, PositionStatus, Pricing, RestingOrder, Side,
  Trade, Wallet, LedgerKind,
};

/// Inbound order as the API collaborator hands it over, already
/// authenticated to `user_id`.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
  pub user_id: Uuid,
  pub pair: Pair,
  pub side: Side,
  pub order_type: OrderType,
  pub price: Option<Decimal>,
  pub quantity: Decimal,
  pub collateral_currency: Option<Currency>,
  pub leverage: Option<Decimal>,
}

#[derive(Debug)]
pub struct PlacedOrder {
  pub order: Order,
  pub trades: Vec<Trade>,
  /// PnL realized by the taker across the fills of this submission.
  pub realized_pnl: Decimal,
}

#[derive(Debug)]
pub struct ClosedPosition {
  pub position: Position,
  pub realized_pnl: Decimal,
  pub filled_quantity: Decimal,
}

/// An open position enriched with live mark data for display.
#[derive(Debug, Serialize)]
pub struct PositionView {
  #[serde(flatten)]
  pub position: Position,
  pub mark_price: Decimal,
  pub unrealized_pnl: Decimal,
  pub maintenance_margin: Decimal,
  pub margin_ratio: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundingOutcome {
  pub processed: u64,
  pub rate: Decimal,
}

/// The trade engine. One instance per process; every public operation runs
/// inside a single database transaction, and index prices are always
/// resolved before the first row lock.
pub struct Engine {
  pool: PgPool,
  pricing: Pricing,
}

impl Engine {
  pub fn new(pool: PgPool, pricing: Pricing) -> Self {
    Self { pool, pricing }
  }

  pub async fn migrate(&self) -> EngineResult<()> {
    sqlx::migrate!("./migrations")
      .run(&self.pool)
      .await
      .map_err(|e| EngineError::Internal(e.to_string()))
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }

  pub fn pricing(&self) -> &Pricing {
    &self.pricing
  }

  // ---- ledger primitives ----

  pub async fn deposit(
    &self,
    user_id: Uuid,
    currency: Currency,
    amount: Decimal,
  ) -> EngineResult<Wallet> {
    if amount <= Decimal::ZERO {
      return Err(EngineError::validation("deposit amount must be positive"));
    }
    let amount = round_money(amount);
    let mut tx = self.pool.begin().await?;
    let wallet = Wallet::get_or_create(&mut tx, user_id, currency).await?;
    Wallet::apply(
      &mut tx,
      wallet.id,
      amount,
      LedgerKind::Deposit,
      None,
      format!("deposit {} {}", amount, currency),
    )
    .await?;
    let wallet = Wallet::get_or_create(&mut tx, user_id, currency).await?;
    tx.commit().await?;
    Ok(wallet)
  }

  /// Debit a withdrawal and its fee, as computed by the withdrawal rule
  /// surface upstream. Fails when `available` cannot cover both.
  pub async fn withdraw(
    &self,
    user_id: Uuid,
    currency: Currency,
    amount: Decimal,
    fee: Decimal,
  ) -> EngineResult<Wallet> {
    if amount <= Decimal::ZERO {
      return Err(EngineError::validation("withdrawal amount must be positive"));
    }
    if fee < Decimal::ZERO {
      return Err(EngineError::validation("withdrawal fee cannot be negative"));
    }
    let amount = round_money(amount);
    let fee = round_money(fee);
    let mut tx = self.pool.begin().await?;
    let wallet = Wallet::get_or_create(&mut tx, user_id, currency).await?;
    Wallet::apply(
      &mut tx,
      wallet.id,
      -amount,
      LedgerKind::Withdrawal,
      None,
      format!("withdraw {} {}", amount, currency),
    )
    .await?;
    if !fee.is_zero() {
      Wallet::apply(
        &mut tx,
        wallet.id,
        -fee,
        LedgerKind::WithdrawalFee,
        None,
        format!("withdrawal fee {} {}", fee, currency),
      )
      .await?;
    }
    let wallet = Wallet::get_or_create(&mut tx, user_id, currency).await?;
    tx.commit().await?;
    Ok(wallet)
  }

  pub async fn get_wallets(&self, user_id: Uuid) -> EngineResult<Vec<Wallet>> {
    let mut tx = self.pool.begin().await?;
    let usdt = Wallet::get_or_create(&mut tx, user_id, Currency::Usdt).await?;
    let usdc = Wallet::get_or_create(&mut tx, user_id, Currency::Usdc).await?;
    tx.commit().await?;
    Ok(vec![usdt, usdc])
  }

  // ---- orders ----

  /// Validate, pre-lock, match and settle one order atomically.
  pub async fn place_order(&self, req: PlaceOrder) -> EngineResult<PlacedOrder> {
    let incoming = validate_order(&req)?;
    let mut tx = self.pool.begin().await?;
    let placed = execute_order(&mut tx, &req, &incoming).await?;
    tx.commit().await?;
    Ok(placed)
  }

  /// Cancel an open or partial limit order and release its residual lock.
  pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> EngineResult<Order> {
    let mut tx = self.pool.begin().await?;
    let order = sqlx::query_as::<_, Order>(
      "SELECT * FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(order_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EngineError::not_found(format!("order {}", order_id)))?;

    if order.status.is_terminal() {
      return Err(EngineError::validation(format!(
        "order {} is already {:?}",
        order.id, order.status
      )));
    }

    let residual = residual_lock(&order)?;
    if let Some((currency, amount)) = residual {
      let wallet = Wallet::get_or_create(&mut tx, user_id, currency).await?;
      Wallet::release_funds(&mut tx, wallet.id, amount).await?;
    }

    let order = sqlx::query_as::<_, Order>(
      "UPDATE orders SET status = 'cancelled' WHERE id = $1 RETURNING *",
    )
    .bind(order.id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(order)
  }

  pub async fn get_open_orders(
    &self,
    user_id: Uuid,
    pair: Option<Pair>,
  ) -> EngineResult<Vec<Order>> {
    let orders = match pair {
      Some(pair) => {
        sqlx::query_as::<_, Order>(
          "SELECT * FROM orders
           WHERE user_id = $1 AND pair = $2 AND status IN ('open', 'partial')
           ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(pair)
        .fetch_all(&self.pool)
        .await?
      }
      None => {
        sqlx::query_as::<_, Order>(
          "SELECT * FROM orders
           WHERE user_id = $1 AND status IN ('open', 'partial')
           ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
      }
    };
    Ok(orders)
  }

  pub async fn get_order_book(&self, pair: Pair, depth: Option<i64>) -> EngineResult<OrderBook> {
    order_book(&self.pool, pair, depth).await
  }

  pub async fn recent_trades(&self, pair: Pair, limit: i64) -> EngineResult<Vec<Trade>> {
    recent_trades(&self.pool, pair, limit).await
  }

  // ---- positions ----

  /// Close up to `quantity` of a position by emitting a market order on the
  /// opposite side. The position row stays locked from the moment the close
  /// quantity is sized until the fill settles, so concurrent closes of the
  /// same position serialize instead of flipping it on stale state.
  pub async fn close_position(
    &self,
    user_id: Uuid,
    position_id: Uuid,
    quantity: Option<Decimal>,
  ) -> EngineResult<ClosedPosition> {
    let mut tx = self.pool.begin().await?;
    let position = sqlx::query_as::<_, Position>(
      "SELECT * FROM positions WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(position_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EngineError::not_found(format!("position {}", position_id)))?;
    if !position.is_open() {
      return Err(EngineError::validation(format!(
        "position {} is {:?}",
        position.id, position.status
      )));
    }

    let quantity = match quantity {
      Some(q) if q <= Decimal::ZERO => {
        return Err(EngineError::validation("close quantity must be positive"));
      }
      Some(q) => q.min(position.quantity),
      None => position.quantity,
    };

    let req = PlaceOrder {
      user_id,
      pair: position.contract,
      side: match position.side {
        crate::PositionSide::Long => Side::Sell,
        crate::PositionSide::Short => Side::Buy,
      },
      order_type: OrderType::Market,
      price: None,
      quantity,
      collateral_currency: Some(position.collateral_currency),
      leverage: Some(position.leverage),
    };
    let incoming = validate_order(&req)?;
    let placed = execute_order(&mut tx, &req, &incoming).await?;

    let position = sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = $1")
      .bind(position_id)
      .fetch_one(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(ClosedPosition {
      position,
      realized_pnl: placed.realized_pnl,
      filled_quantity: placed.order.filled_quantity,
    })
  }

  /// A user's positions, with pending funding applied lazily and live mark
  /// data attached.
  pub async fn get_positions(
    &self,
    user_id: Uuid,
    status: PositionStatus,
  ) -> EngineResult<Vec<PositionView>> {
    // prices resolve before any row lock
    let index = self.pricing.index_prices().await?;
    let mut marks = std::collections::HashMap::new();
    for contract in Pair::CONTRACTS {
      let mid = book_mid(&self.pool, contract).await?;
      let contract_index = index.for_contract(contract);
      marks.insert(
        contract,
        (mark_price(contract_index, mid), funding_rate(contract_index, mid)),
      );
    }
    let boundary = common::funding_boundary(Utc::now());

    let mut tx = self.pool.begin().await?;
    let positions = sqlx::query_as::<_, Position>(
      "SELECT * FROM positions WHERE user_id = $1 AND status = $2
       ORDER BY created_at ASC
       FOR UPDATE",
    )
    .bind(user_id)
    .bind(status)
    .fetch_all(&mut *tx)
    .await?;

    let mut views = vec![];
    for position in positions {
      let params = position.contract.params();
      let (mark, rate) = *marks
        .get(&position.contract)
        .ok_or_else(|| EngineError::Internal(format!("no mark for {}", position.contract)))?;
      let position = if position.is_open() {
        funding::apply_pending(&mut tx, &position, mark, rate, boundary).await?;
        sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = $1")
          .bind(position.id)
          .fetch_one(&mut *tx)
          .await?
      } else {
        position
      };

      let upnl = crate::unrealized_pnl(
        position.side,
        position.entry_price,
        mark,
        position.quantity,
        params.contract_size,
      );
      let maintenance = crate::maintenance_margin(
        position.quantity,
        params.contract_size,
        mark,
        params.maintenance_margin_rate,
      );
      let margin_ratio = if maintenance.is_zero() {
        None
      } else {
        Some(round_money((position.margin + upnl) / maintenance))
      };
      views.push(PositionView {
        position,
        mark_price: mark,
        unrealized_pnl: upnl,
        maintenance_margin: maintenance,
        margin_ratio,
      });
    }
    tx.commit().await?;
    Ok(views)
  }

  // ---- sweeps ----

  pub async fn distribute_funding(&self, contract: Pair) -> EngineResult<FundingOutcome> {
    let (mark, rate) = self.contract_mark(contract).await?;
    let boundary = common::funding_boundary(Utc::now());
    let processed = funding::distribute(&self.pool, contract, mark, rate, boundary).await?;
    Ok(FundingOutcome { processed, rate })
  }

  pub async fn check_liquidations(&self, contract: Pair) -> EngineResult<Vec<Uuid>> {
    let (mark, _) = self.contract_mark(contract).await?;
    liquidation::check_liquidations(&self.pool, contract, mark).await
  }

  /// Current mark price and funding rate of a contract. A degraded oracle
  /// never fails this; it falls back to the flagged index.
  pub async fn contract_mark(&self, contract: Pair) -> EngineResult<(Decimal, Decimal)> {
    let index = self.pricing.index_prices().await?;
    let mid = book_mid(&self.pool, contract).await?;
    let contract_index = index.for_contract(contract);
    Ok((
      mark_price(contract_index, mid),
      funding_rate(contract_index, mid),
    ))
  }
}

/// Pre-lock, match and settle one validated order inside the caller's
/// transaction. `close_position` runs this with the position row already
/// locked; `place_order` wraps it in its own transaction.
async fn execute_order(
  tx: &mut DbTx<'_>,
  req: &PlaceOrder,
  incoming: &IncomingOrder,
) -> EngineResult<PlacedOrder> {
  // pre-lock resting limit orders; market orders settle in real time
  if req.order_type == OrderType::Limit {
    let (currency, amount) = prelock_amount(req)?;
    let wallet = Wallet::get_or_create(tx, req.user_id, currency).await?;
    Wallet::lock_funds(tx, wallet.id, amount).await?;
  }

  let order = insert_order(tx, req).await?;

  let resting = load_resting(tx, req.pair, req.side).await?;
  let plan = plan_match(
    incoming,
    &resting.iter().map(RestingOrder::from).collect::<Vec<_>>(),
  );

  let mut trades = vec![];
  let mut realized_pnl = Decimal::ZERO;
  for fill in &plan.fills {
    let maker = resting
      .iter()
      .find(|o| o.id == fill.maker_order_id)
      .ok_or_else(|| EngineError::Internal("fill against unknown maker".into()))?;

    trades.push(record_trade(tx, &order, fill).await?);
    match req.pair.kind() {
      MarketKind::Spot => settle_spot_fill(tx, &order, maker, fill).await?,
      MarketKind::Futures => {
        realized_pnl += settle_futures_fill(tx, &order, maker, fill).await?;
      }
    }

    let maker_filled = maker.filled_quantity + fill.quantity;
    update_order_fill(
      tx,
      maker.id,
      maker_filled,
      maker_status_after(maker.quantity, maker_filled),
    )
    .await?;
  }

  let taker_filled = req.quantity - plan.remaining;
  let order = update_order_fill(tx, order.id, taker_filled, plan.status).await?;

  Ok(PlacedOrder {
    order,
    trades,
    realized_pnl,
  })
}

/// Shape checks that run before any state is touched.
fn validate_order(req: &PlaceOrder) -> EngineResult<IncomingOrder> {
  let params = req.pair.params();

  match req.order_type {
    OrderType::Limit => {
      let price = req
        .price
        .ok_or_else(|| EngineError::validation("limit order requires a price"))?;
      if price <= Decimal::ZERO {
        return Err(EngineError::validation("price must be positive"));
      }
      if !aligned_to_tick(price, params.tick) {
        return Err(EngineError::validation(format!(
          "price {} violates tick {}",
          price, params.tick
        )));
      }
    }
    OrderType::Market => {
      if req.price.is_some() {
        return Err(EngineError::validation("market order must not carry a price"));
      }
    }
  }

  if req.quantity < params.min_qty {
    return Err(EngineError::validation(format!(
      "quantity {} below minimum {}",
      req.quantity, params.min_qty
    )));
  }
  if req.quantity != round_money(req.quantity) {
    return Err(EngineError::validation(
      "quantity carries more than 8 decimal places",
    ));
  }

  match req.pair.kind() {
    MarketKind::Futures => {
      if req.collateral_currency.is_none() {
        return Err(EngineError::validation(
          "futures order requires a collateral currency",
        ));
      }
      let leverage = req
        .leverage
        .ok_or_else(|| EngineError::validation("futures order requires leverage"))?;
      if leverage < Decimal::ONE || leverage > params.max_leverage {
        return Err(EngineError::validation(format!(
          "leverage {} outside [1, {}]",
          leverage, params.max_leverage
        )));
      }
    }
    MarketKind::Spot => {
      if req.collateral_currency.is_some() || req.leverage.is_some() {
        return Err(EngineError::validation(
          "spot order does not take collateral or leverage",
        ));
      }
    }
  }

  Ok(IncomingOrder {
    user_id: req.user_id,
    pair: req.pair,
    side: req.side,
    order_type: req.order_type,
    price: req.price,
    quantity: req.quantity,
  })
}

/// What admission locks for a resting limit order, and in which currency.
fn prelock_amount(req: &PlaceOrder) -> EngineResult<(Currency, Decimal)> {
  let params = req.pair.params();
  let price = req
    .price
    .ok_or_else(|| EngineError::validation("limit order requires a price"))?;
  match req.pair.kind() {
    MarketKind::Spot => {
      let (base, quote) = req
        .pair
        .spot_legs()
        .ok_or_else(|| EngineError::Internal("spot pair without legs".into()))?;
      Ok(match req.side {
        Side::Sell => (base, req.quantity),
        Side::Buy => (quote, round_money(req.quantity * price)),
      })
    }
    MarketKind::Futures => {
      let collateral = req
        .collateral_currency
        .ok_or_else(|| EngineError::validation("futures order requires collateral"))?;
      let leverage = req
        .leverage
        .ok_or_else(|| EngineError::validation("futures order requires leverage"))?;
      // margin plus a conservative taker-rate fee estimate
      let unit = params.contract_size * price * (Decimal::ONE / leverage + params.taker_fee_rate);
      Ok((collateral, round_money(req.quantity * unit)))
    }
  }
}

/// The still-locked amount behind an open or partial limit order, computed
/// with the same formula admission used, over the unfilled quantity.
fn residual_lock(order: &Order) -> EngineResult<Option<(Currency, Decimal)>> {
  if order.order_type == OrderType::Market {
    return Ok(None);
  }
  let remaining = order.remaining();
  if remaining <= Decimal::ZERO {
    return Ok(None);
  }
  let req = PlaceOrder {
    user_id: order.user_id,
    pair: order.pair,
    side: order.side,
    order_type: order.order_type,
    price: order.price,
    quantity: remaining,
    collateral_currency: order.collateral_currency,
    leverage: order.leverage,
  };
  prelock_amount(&req).map(Some)
}

async fn insert_order(tx: &mut DbTx<'_>, req: &PlaceOrder) -> EngineResult<Order> {
  let order = sqlx::query_as::<_, Order>(
    "INSERT INTO orders
       (id, user_id, pair, side, order_type, price, quantity, filled_quantity,
        status, collateral_currency, leverage)
     VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 'open', $8, $9)
     RETURNING *",
  )
  .bind(Uuid::new_v4())
  .bind(req.user_id)
  .bind(req.pair)
  .bind(req.side)
  .bind(req.order_type)
  .bind(req.price)
  .bind(req.quantity)
  .bind(req.collateral_currency)
  .bind(req.leverage)
  .fetch_one(&mut **tx)
  .await?;
  Ok(order)
}

async fn update_order_fill(
  tx: &mut DbTx<'_>,
  order_id: Uuid,
  filled_quantity: Decimal,
  status: OrderStatus,
) -> EngineResult<Order> {
  let order = sqlx::query_as::<_, Order>(
    "UPDATE orders SET filled_quantity = $2, status = $3 WHERE id = $1 RETURNING *",
  )
  .bind(order_id)
  .bind(filled_quantity)
  .bind(status)
  .fetch_one(&mut **tx)
  .await?;
  Ok(order)
}
