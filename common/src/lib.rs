pub use logger::*;
pub use time::*;

pub mod logger;
pub mod macros;
pub mod time;
