//! Replays fixed order sequences through the pure matching core and checks
//! the book, fills and statuses come out the same every run.

use ::engine::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Minimal in-memory book over the planner, resting residue like admission
/// does: limit leftovers rest, market leftovers never do.
#[derive(Default)]
struct Book {
  next_seq: u64,
  resting: Vec<(u64, Side, RestingOrder)>,
}

impl Book {
  fn submit(&mut self, incoming: &IncomingOrder) -> MatchPlan {
    let mut opposite: Vec<(u64, Side, RestingOrder)> = self
      .resting
      .iter()
      .filter(|(_, side, _)| *side == incoming.side.opposite())
      .cloned()
      .collect();
    opposite.sort_by(|a, b| {
      let by_price = match incoming.side {
        Side::Buy => a.2.price.cmp(&b.2.price),
        Side::Sell => b.2.price.cmp(&a.2.price),
      };
      by_price.then(a.0.cmp(&b.0))
    });
    let resting: Vec<RestingOrder> = opposite.into_iter().map(|(_, _, r)| r).collect();

    let plan = plan_match(incoming, &resting);

    for fill in &plan.fills {
      if let Some(entry) = self
        .resting
        .iter_mut()
        .find(|(_, _, r)| r.id == fill.maker_order_id)
      {
        entry.2.remaining -= fill.quantity;
      }
    }
    self.resting.retain(|(_, _, r)| r.remaining >= DUST);

    if plan.status.rests() && plan.remaining >= DUST {
      let seq = self.next_seq;
      self.next_seq += 1;
      self.resting.push((
        seq,
        incoming.side,
        RestingOrder {
          id: Uuid::from_u128(1_000_000 + seq as u128),
          user_id: incoming.user_id,
          price: incoming.price.expect("only limits rest"),
          remaining: plan.remaining,
        },
      ));
    }
    plan
  }

  fn snapshot(&self) -> Vec<(Side, Decimal, Decimal)> {
    self
      .resting
      .iter()
      .map(|(_, side, r)| (*side, r.price, r.remaining))
      .collect()
  }
}

fn user(n: u128) -> Uuid {
  Uuid::from_u128(n)
}

fn limit(user_id: Uuid, side: Side, price: Decimal, quantity: Decimal) -> IncomingOrder {
  IncomingOrder {
    user_id,
    pair: Pair::UsdtUsdc,
    side,
    order_type: OrderType::Limit,
    price: Some(price),
    quantity,
  }
}

fn market(user_id: Uuid, side: Side, quantity: Decimal) -> IncomingOrder {
  IncomingOrder {
    user_id,
    pair: Pair::UsdtUsdc,
    side,
    order_type: OrderType::Market,
    price: None,
    quantity,
  }
}

fn fixed_sequence() -> Vec<IncomingOrder> {
  vec![
    limit(user(1), Side::Sell, dec!(1.0012), dec!(8)),
    limit(user(2), Side::Sell, dec!(1.0010), dec!(5)),
    limit(user(3), Side::Buy, dec!(1.0008), dec!(10)),
    limit(user(4), Side::Buy, dec!(1.0011), dec!(7)),
    market(user(1), Side::Buy, dec!(4)),
    limit(user(2), Side::Sell, dec!(1.0008), dec!(12)),
    market(user(3), Side::Sell, dec!(20)),
  ]
}

#[test]
fn replaying_a_sequence_is_deterministic() {
  let run = || {
    let mut book = Book::default();
    let mut all_fills = vec![];
    for incoming in fixed_sequence() {
      let plan = book.submit(&incoming);
      for fill in plan.fills {
        all_fills.push((fill.price, fill.quantity, fill.maker_fee, fill.taker_fee));
      }
    }
    (book.snapshot(), all_fills)
  };

  let (book_a, fills_a) = run();
  let (book_b, fills_b) = run();
  assert_eq!(book_a, book_b);
  assert_eq!(fills_a, fills_b);
  assert!(!fills_a.is_empty());
}

#[test]
fn fills_never_violate_the_taker_limit() {
  let mut book = Book::default();
  for incoming in fixed_sequence() {
    let plan = book.submit(&incoming);
    if let Some(limit) = incoming.price {
      for fill in &plan.fills {
        match incoming.side {
          Side::Buy => assert!(fill.price <= limit),
          Side::Sell => assert!(fill.price >= limit),
        }
      }
    }
  }
}

#[test]
fn a_user_never_trades_with_themselves() {
  let mut book = Book::default();

  // user C rests an ask then immediately crosses it with their own bid
  let c = user(7);
  let rested = book.submit(&limit(c, Side::Sell, dec!(1.0000), dec!(10)));
  assert_eq!(rested.status, OrderStatus::Open);

  let buy = book.submit(&limit(c, Side::Buy, dec!(1.0000), dec!(10)));
  assert!(buy.fills.is_empty());
  // the limit rests alongside their own ask
  assert_eq!(buy.status, OrderStatus::Open);
  assert_eq!(book.snapshot().len(), 2);

  // a market buy from the same user dies without a trade
  let market_buy = book.submit(&market(c, Side::Buy, dec!(5)));
  assert!(market_buy.fills.is_empty());
  assert_eq!(market_buy.status, OrderStatus::Cancelled);

  // somebody else still crosses the resting ask normally
  let d = user(8);
  let cross = book.submit(&market(d, Side::Buy, dec!(10)));
  assert_eq!(cross.fills.len(), 1);
  assert_ne!(cross.fills[0].maker_user_id, d);
}

#[test]
fn spot_fee_conservation_across_a_fill() {
  // one trade at 1.0010 for 10 USDT; the two participants' combined
  // USDT+USDC delta must be exactly -(maker_fee + taker_fee)
  let mut book = Book::default();
  book.submit(&limit(user(1), Side::Sell, dec!(1.0010), dec!(10)));
  let plan = book.submit(&limit(user(2), Side::Buy, dec!(1.0010), dec!(10)));
  let fill = &plan.fills[0];

  let quote = fill.quantity * fill.price;
  // buyer: -quote USDC, +qty USDT, -taker fee (credited leg)
  let buyer_delta = -quote + fill.quantity - fill.taker_fee;
  // seller: -qty USDT, +quote USDC, -maker fee (credited leg)
  let seller_delta = -fill.quantity + quote - fill.maker_fee;

  assert_eq!(fill.maker_fee, dec!(0.001001));
  assert_eq!(fill.taker_fee, dec!(0.003003));
  assert_eq!(buyer_delta + seller_delta, -(fill.maker_fee + fill.taker_fee));
}
