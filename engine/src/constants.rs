use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Internal scale for quantities, balances, fees and PnL.
pub const MONEY_SCALE: u32 = 8;

/// Fills smaller than this are treated as zero.
pub const DUST: Decimal = dec!(0.00000001);

/// Mark price = index * 0.7 + book mid * 0.3 when the book has a mid.
pub const MARK_INDEX_WEIGHT: Decimal = dec!(0.7);
pub const MARK_BOOK_WEIGHT: Decimal = dec!(0.3);

/// Funding rate is clamped to +-1% per interval.
pub const FUNDING_CLAMP: Decimal = dec!(0.01);

/// Index prices older than this are refetched from the provider.
pub const INDEX_TTL_SECS: i64 = 30 * 60;

// Served only on a cold start when the provider is down.
pub const FALLBACK_GOLD: Decimal = dec!(2900.00);
pub const FALLBACK_SILVER: Decimal = dec!(33.000);

pub const DEFAULT_BOOK_DEPTH: i64 = 20;
pub const MAX_BOOK_DEPTH: i64 = 50;
