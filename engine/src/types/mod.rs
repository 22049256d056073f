pub use order::*;
pub use position::*;
pub use trade::*;
pub use wallet::*;

pub mod order;
pub mod position;
pub mod trade;
pub mod wallet;
