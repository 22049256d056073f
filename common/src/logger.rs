use log::*;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

pub fn init_logger() {
  init_logger_with(LevelFilter::Info);
}

pub fn init_logger_with(level: LevelFilter) {
  TermLogger::init(
    level,
    Config::default(),
    TerminalMode::Mixed,
    ColorChoice::Auto,
  )
  .expect("Failed to initialize logger");
}
