use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
  round_money, DbTx, EngineResult, MarketKind, Order, OrderStatus, OrderType, Pair, Side, DUST,
};

/// The slice of a resting order the planner needs.
#[derive(Debug, Clone)]
pub struct RestingOrder {
  pub id: Uuid,
  pub user_id: Uuid,
  pub price: Decimal,
  pub remaining: Decimal,
}

impl From<&Order> for RestingOrder {
  fn from(o: &Order) -> Self {
    Self {
      id: o.id,
      user_id: o.user_id,
      // resting orders always carry a price; market residue never rests
      price: o.price.unwrap_or_default(),
      remaining: o.remaining(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct IncomingOrder {
  pub user_id: Uuid,
  pub pair: Pair,
  pub side: Side,
  pub order_type: OrderType,
  pub price: Option<Decimal>,
  pub quantity: Decimal,
}

/// One planned execution against a resting maker, at the maker's price.
#[derive(Debug, Clone)]
pub struct PlannedFill {
  pub maker_order_id: Uuid,
  pub maker_user_id: Uuid,
  pub price: Decimal,
  pub quantity: Decimal,
  pub maker_fee: Decimal,
  pub taker_fee: Decimal,
}

#[derive(Debug, Clone)]
pub struct MatchPlan {
  pub fills: Vec<PlannedFill>,
  pub remaining: Decimal,
  /// Terminal status of the incoming order after settlement.
  pub status: OrderStatus,
}

/// Walk the opposite side of the book in strict price-time priority and plan
/// the executions for `incoming`. `resting` must already be sorted the way
/// the book is scanned (best price first, oldest first within a level) and
/// row-locked by the caller; the planner itself touches no storage.
pub fn plan_match(incoming: &IncomingOrder, resting: &[RestingOrder]) -> MatchPlan {
  let params = incoming.pair.params();
  let fee_unit = match params.kind {
    MarketKind::Spot => Decimal::ONE,
    MarketKind::Futures => params.contract_size,
  };

  let mut remaining = incoming.quantity;
  let mut fills: Vec<PlannedFill> = vec![];

  for maker in resting {
    if remaining < DUST {
      break;
    }
    // self-trade prevention: skip, not a stop
    if maker.user_id == incoming.user_id {
      continue;
    }
    if let Some(limit) = incoming.price {
      let crossed = match incoming.side {
        Side::Buy => maker.price <= limit,
        Side::Sell => maker.price >= limit,
      };
      if !crossed {
        break;
      }
    }
    if maker.remaining < DUST {
      continue;
    }

    let quantity = remaining.min(maker.remaining);
    let fee_base = quantity * fee_unit * maker.price;
    fills.push(PlannedFill {
      maker_order_id: maker.id,
      maker_user_id: maker.user_id,
      price: maker.price,
      quantity,
      maker_fee: round_money(fee_base * params.maker_fee_rate),
      taker_fee: round_money(fee_base * params.taker_fee_rate),
    });
    remaining -= quantity;
  }

  let status = if remaining < DUST {
    OrderStatus::Filled
  } else {
    match incoming.order_type {
      // a limit with residue rests; untouched limits rest whole
      OrderType::Limit => {
        if fills.is_empty() {
          OrderStatus::Open
        } else {
          OrderStatus::Partial
        }
      }
      // market residue never rests
      OrderType::Market => OrderStatus::Cancelled,
    }
  };

  MatchPlan {
    fills,
    remaining,
    status,
  }
}

/// Status of a resting maker after a fill advanced its `filled_quantity`.
pub fn maker_status_after(quantity: Decimal, filled: Decimal) -> OrderStatus {
  if quantity - filled < DUST {
    OrderStatus::Filled
  } else {
    OrderStatus::Partial
  }
}

/// Lock and load the side of the book an incoming order executes against,
/// in the exact order the matcher walks it. Row locks are taken here, in
/// iteration order, before any of the rows is mutated.
pub async fn load_resting(tx: &mut DbTx<'_>, pair: Pair, taker_side: Side) -> EngineResult<Vec<Order>> {
  let sql = match taker_side {
    // a buy consumes asks from the cheapest up
    Side::Buy => {
      "SELECT * FROM orders
       WHERE pair = $1 AND side = 'sell' AND status IN ('open', 'partial')
       ORDER BY price ASC, created_at ASC
       FOR UPDATE"
    }
    // a sell consumes bids from the dearest down
    Side::Sell => {
      "SELECT * FROM orders
       WHERE pair = $1 AND side = 'buy' AND status IN ('open', 'partial')
       ORDER BY price DESC, created_at ASC
       FOR UPDATE"
    }
  };
  let orders = sqlx::query_as::<_, Order>(sql)
    .bind(pair)
    .fetch_all(&mut **tx)
    .await?;
  Ok(orders)
}
