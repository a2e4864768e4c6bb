pub mod candle;
pub mod trade;

pub use candle::{Candle, PriceLevel};
pub use trade::{Instrument, Market, Trade};
