use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use log::warn;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
  EngineResult, Pair, FALLBACK_GOLD, FALLBACK_SILVER, FUNDING_CLAMP, INDEX_TTL_SECS,
  MARK_BOOK_WEIGHT, MARK_INDEX_WEIGHT,
};

pub use common::{funding_boundary, next_funding_at};

/// A single read from the external metals provider.
#[derive(Debug, Clone, Deserialize)]
pub struct MetalQuote {
  pub gold: Decimal,
  pub silver: Decimal,
  pub timestamp: DateTime<Utc>,
}

/// Index prices as served to the engine. `stale` is set when the provider
/// could not be reached and a cached or compiled-in value is being served.
#[derive(Debug, Clone)]
pub struct IndexPrices {
  pub gold: Decimal,
  pub silver: Decimal,
  pub timestamp: DateTime<Utc>,
  pub stale: bool,
}

impl IndexPrices {
  pub fn for_contract(&self, contract: Pair) -> Decimal {
    match contract {
      Pair::XagPerp => self.silver,
      _ => self.gold,
    }
  }
}

/// Pluggable metals price source.
pub trait MetalSource: Send + Sync {
  fn fetch(&self) -> BoxFuture<'_, anyhow::Result<MetalQuote>>;
}

/// Production source: one GET against a JSON endpoint shaped like
/// `{"gold": "2850.00", "silver": "33.000", "timestamp": "..."}`.
pub struct HttpMetalSource {
  client: reqwest::Client,
  url: String,
}

impl HttpMetalSource {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      url: url.into(),
    }
  }
}

impl MetalSource for HttpMetalSource {
  fn fetch(&self) -> BoxFuture<'_, anyhow::Result<MetalQuote>> {
    Box::pin(async move {
      let quote = self
        .client
        .get(&self.url)
        .send()
        .await?
        .error_for_status()?
        .json::<MetalQuote>()
        .await?;
      Ok(quote)
    })
  }
}

/// Fixed source for tests and offline runs.
pub struct FixedMetalSource {
  pub gold: Decimal,
  pub silver: Decimal,
}

impl MetalSource for FixedMetalSource {
  fn fetch(&self) -> BoxFuture<'_, anyhow::Result<MetalQuote>> {
    let quote = MetalQuote {
      gold: self.gold,
      silver: self.silver,
      timestamp: Utc::now(),
    };
    Box::pin(async move { Ok(quote) })
  }
}

struct InnerPriceCache {
  quote: Option<MetalQuote>,
  fetched_at: Option<DateTime<Utc>>,
}

/// Process-wide index price cache. The only non-transactional shared state
/// in the engine; the mutex is held only to read or swap the cached value,
/// never across the provider call.
pub struct PriceCache {
  inner: Arc<Mutex<InnerPriceCache>>,
}

impl Clone for PriceCache {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl Default for PriceCache {
  fn default() -> Self {
    Self {
      inner: Arc::new(Mutex::new(InnerPriceCache {
        quote: None,
        fetched_at: None,
      })),
    }
  }
}

impl PriceCache {
  async fn read(&self) -> MutexGuard<'_, InnerPriceCache> {
    self.inner.lock().await
  }
}

/// Index price service. Must be consulted before any database row lock is
/// acquired; no engine transaction ever spans a provider call.
pub struct Pricing {
  source: Arc<dyn MetalSource>,
  cache: PriceCache,
  ttl: Duration,
}

impl Clone for Pricing {
  fn clone(&self) -> Self {
    Self {
      source: self.source.clone(),
      cache: self.cache.clone(),
      ttl: self.ttl,
    }
  }
}

impl Pricing {
  pub fn new(source: Arc<dyn MetalSource>) -> Self {
    Self {
      source,
      cache: PriceCache::default(),
      ttl: Duration::seconds(INDEX_TTL_SECS),
    }
  }

  #[cfg(test)]
  pub fn with_ttl(source: Arc<dyn MetalSource>, ttl: Duration) -> Self {
    Self {
      source,
      cache: PriceCache::default(),
      ttl,
    }
  }

  /// Gold and silver index prices, cached for the TTL. Provider failure
  /// serves the last cached value; a cold start without cache serves the
  /// compiled-in fallback. Both degraded paths are flagged `stale`.
  pub async fn index_prices(&self) -> EngineResult<IndexPrices> {
    let now = Utc::now();
    {
      let cache = self.cache.read().await;
      if let (Some(quote), Some(fetched_at)) = (&cache.quote, cache.fetched_at) {
        if now - fetched_at < self.ttl {
          return Ok(IndexPrices {
            gold: quote.gold,
            silver: quote.silver,
            timestamp: quote.timestamp,
            stale: false,
          });
        }
      }
    }

    match self.source.fetch().await {
      Ok(quote) => {
        let mut cache = self.cache.read().await;
        cache.quote = Some(quote.clone());
        cache.fetched_at = Some(now);
        Ok(IndexPrices {
          gold: quote.gold,
          silver: quote.silver,
          timestamp: quote.timestamp,
          stale: false,
        })
      }
      Err(e) => {
        warn!("metals provider unavailable, serving stale index: {}", e);
        let cache = self.cache.read().await;
        Ok(match &cache.quote {
          Some(quote) => IndexPrices {
            gold: quote.gold,
            silver: quote.silver,
            timestamp: quote.timestamp,
            stale: true,
          },
          None => IndexPrices {
            gold: FALLBACK_GOLD,
            silver: FALLBACK_SILVER,
            timestamp: now,
            stale: true,
          },
        })
      }
    }
  }
}

/// Mark = index * 0.7 + book mid * 0.3 when the book has a mid, else index.
pub fn mark_price(index: Decimal, book_mid: Option<Decimal>) -> Decimal {
  match book_mid {
    Some(mid) => index * MARK_INDEX_WEIGHT + mid * MARK_BOOK_WEIGHT,
    None => index,
  }
}

/// Premium of the book over the index, clamped to +-1%. Zero without a mid.
pub fn funding_rate(index: Decimal, book_mid: Option<Decimal>) -> Decimal {
  match book_mid {
    Some(mid) if !index.is_zero() => {
      ((mid - index) / index).clamp(-FUNDING_CLAMP, FUNDING_CLAMP)
    }
    _ => Decimal::ZERO,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  #[test]
  fn mark_blends_index_and_book() {
    assert_eq!(mark_price(dec!(2850), Some(dec!(2860))), dec!(2853.0));
    assert_eq!(mark_price(dec!(2850), None), dec!(2850));
  }

  #[test]
  fn funding_rate_clamps_at_one_percent() {
    // +0.2% premium passes through
    assert_eq!(funding_rate(dec!(1000), Some(dec!(1002))), dec!(0.002));
    // +5% premium clamps
    assert_eq!(funding_rate(dec!(1000), Some(dec!(1050))), dec!(0.01));
    assert_eq!(funding_rate(dec!(1000), Some(dec!(950))), dec!(-0.01));
    assert_eq!(funding_rate(dec!(1000), None), dec!(0));
  }

  #[tokio::test]
  async fn cold_start_without_provider_serves_flagged_fallback() {
    struct DownSource;
    impl MetalSource for DownSource {
      fn fetch(&self) -> BoxFuture<'_, anyhow::Result<MetalQuote>> {
        Box::pin(async { Err(anyhow::anyhow!("connection refused")) })
      }
    }

    let pricing = Pricing::new(Arc::new(DownSource));
    let prices = pricing.index_prices().await.unwrap();
    assert!(prices.stale);
    assert_eq!(prices.gold, FALLBACK_GOLD);
    assert_eq!(prices.silver, FALLBACK_SILVER);
  }

  #[tokio::test]
  async fn cached_quote_survives_provider_outage() {
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakySource {
      down: AtomicBool,
    }
    impl MetalSource for FlakySource {
      fn fetch(&self) -> BoxFuture<'_, anyhow::Result<MetalQuote>> {
        let down = self.down.load(Ordering::SeqCst);
        Box::pin(async move {
          if down {
            Err(anyhow::anyhow!("timeout"))
          } else {
            Ok(MetalQuote {
              gold: dec!(2850.00),
              silver: dec!(33.000),
              timestamp: Utc::now(),
            })
          }
        })
      }
    }

    let source = Arc::new(FlakySource {
      down: AtomicBool::new(false),
    });
    // zero ttl so the second read goes back to the provider
    let pricing = Pricing::with_ttl(source.clone(), Duration::seconds(0));
    let fresh = pricing.index_prices().await.unwrap();
    assert!(!fresh.stale);

    source.down.store(true, Ordering::SeqCst);
    let degraded = pricing.index_prices().await.unwrap();
    assert!(degraded.stale);
    assert_eq!(degraded.gold, dec!(2850.00));
  }
}
