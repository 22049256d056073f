use common::init_logger;

pub use keeper::*;

mod config;
mod keeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenv::dotenv().ok();
  init_logger();

  let mut keeper = Keeper::new().await?;
  keeper.start().await
}
