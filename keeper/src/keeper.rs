use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use sqlx::postgres::PgPoolOptions;

use crate::config::KeeperConfig;
use engine::{Engine, HttpMetalSource, Pair, Pricing};

/// Periodic sweeps over the venue: warm the index cache, distribute funding
/// once per interval, liquidate underwater positions. Funding application is
/// idempotent per boundary, so ticking more often than the interval is safe.
pub struct Keeper {
  engine: Engine,
  tick: Duration,
}

impl Keeper {
  pub async fn new() -> anyhow::Result<Self> {
    let KeeperConfig {
      tick_secs,
      database_url,
      metals_url,
    } = KeeperConfig::read()?;

    let pool = PgPoolOptions::new()
      .max_connections(4)
      .connect(&database_url)
      .await?;
    let pricing = Pricing::new(Arc::new(HttpMetalSource::new(metals_url)));
    let engine = Engine::new(pool, pricing);
    engine.migrate().await?;

    Ok(Self {
      engine,
      tick: Duration::from_secs(tick_secs),
    })
  }

  pub async fn start(&mut self) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(self.tick);
    loop {
      interval.tick().await;
      self.run_once().await;
    }
  }

  /// One bounded pass. Per-contract failures are logged and skipped so a
  /// degraded oracle or a conflicting transaction never stalls the loop.
  pub async fn run_once(&self) {
    if let Err(e) = self.engine.pricing().index_prices().await {
      error!("index refresh failed: {}", e);
    }

    for contract in Pair::CONTRACTS {
      match self.engine.distribute_funding(contract).await {
        Ok(outcome) if outcome.processed > 0 => {
          info!(
            "funding on {}: rate {}, {} positions",
            contract, outcome.rate, outcome.processed
          );
        }
        Ok(_) => {}
        Err(e) => error!("funding sweep failed on {}: {}", contract, e),
      }

      match self.engine.check_liquidations(contract).await {
        Ok(ids) if !ids.is_empty() => {
          info!("liquidated {} positions on {}", ids.len(), contract);
        }
        Ok(_) => {}
        Err(e) => error!("liquidation sweep failed on {}: {}", contract, e),
      }
    }
  }
}
