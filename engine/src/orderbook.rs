use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::{EngineResult, Pair, Side, Trade, DEFAULT_BOOK_DEPTH, MAX_BOOK_DEPTH};

/// One aggregated price level of resting interest.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookLevel {
  pub price: Decimal,
  pub quantity: Decimal,
  pub orders: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderBook {
  pub bids: Vec<BookLevel>,
  pub asks: Vec<BookLevel>,
}

async fn levels(pool: &PgPool, pair: Pair, side: Side, depth: i64) -> EngineResult<Vec<BookLevel>> {
  let order = match side {
    Side::Buy => "DESC",
    Side::Sell => "ASC",
  };
  let sql = format!(
    "SELECT price, SUM(quantity - filled_quantity) AS quantity, COUNT(*) AS orders
     FROM orders
     WHERE pair = $1 AND side = $2 AND status IN ('open', 'partial')
     GROUP BY price
     ORDER BY price {}
     LIMIT $3",
    order
  );
  let rows = sqlx::query_as::<_, BookLevel>(&sql)
    .bind(pair)
    .bind(side)
    .bind(depth)
    .fetch_all(pool)
    .await?;
  Ok(rows)
}

/// Aggregated depth, bids descending and asks ascending.
pub async fn order_book(pool: &PgPool, pair: Pair, depth: Option<i64>) -> EngineResult<OrderBook> {
  let depth = depth.unwrap_or(DEFAULT_BOOK_DEPTH).clamp(1, MAX_BOOK_DEPTH);
  let bids = levels(pool, pair, Side::Buy, depth).await?;
  let asks = levels(pool, pair, Side::Sell, depth).await?;
  Ok(OrderBook { bids, asks })
}

pub async fn best_bid(pool: &PgPool, pair: Pair) -> EngineResult<Option<Decimal>> {
  let price: Option<Decimal> = sqlx::query_scalar(
    "SELECT MAX(price) FROM orders
     WHERE pair = $1 AND side = 'buy' AND status IN ('open', 'partial')",
  )
  .bind(pair)
  .fetch_one(pool)
  .await?;
  Ok(price)
}

pub async fn best_ask(pool: &PgPool, pair: Pair) -> EngineResult<Option<Decimal>> {
  let price: Option<Decimal> = sqlx::query_scalar(
    "SELECT MIN(price) FROM orders
     WHERE pair = $1 AND side = 'sell' AND status IN ('open', 'partial')",
  )
  .bind(pair)
  .fetch_one(pool)
  .await?;
  Ok(price)
}

/// Midpoint of best bid and best ask, when both sides exist.
pub async fn book_mid(pool: &PgPool, pair: Pair) -> EngineResult<Option<Decimal>> {
  let (bid, ask) = (best_bid(pool, pair).await?, best_ask(pool, pair).await?);
  Ok(match (bid, ask) {
    (Some(bid), Some(ask)) => Some((bid + ask) / rust_decimal::Decimal::TWO),
    _ => None,
  })
}

pub async fn recent_trades(pool: &PgPool, pair: Pair, limit: i64) -> EngineResult<Vec<Trade>> {
  let trades = sqlx::query_as::<_, Trade>(
    "SELECT * FROM trades WHERE pair = $1 ORDER BY created_at DESC LIMIT $2",
  )
  .bind(pair)
  .bind(limit)
  .fetch_all(pool)
  .await?;
  Ok(trades)
}
