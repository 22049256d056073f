use std::{path::PathBuf, str::FromStr};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct KeeperConfig {
  pub tick_secs: u64,
  pub database_url: String,
  pub metals_url: String,
}

#[derive(Debug, Deserialize)]
struct YamlConfig {
  pub tick_secs: u64,
}

impl KeeperConfig {
  /// Tunables from `config.yaml` beside the manifest, secrets from the
  /// environment.
  pub fn read() -> anyhow::Result<Self> {
    let dir = env!("CARGO_MANIFEST_DIR").to_string();
    let path = PathBuf::from_str(&format!("{}/config.yaml", dir))?;
    let contents = String::from_utf8(std::fs::read(path)?)?;
    let yaml: YamlConfig = serde_yaml::from_str(&contents)?;
    let database_url = std::env::var("DATABASE_URL")?;
    let metals_url = std::env::var("METALS_URL")?;
    Ok(Self {
      tick_secs: yaml.tick_secs,
      database_url,
      metals_url,
    })
  }
}
