pub mod aggregate;
pub mod engine;
pub mod interval;

pub use aggregate::{build_candles, Aggregator};
pub use engine::CandleEngine;
pub use interval::Interval;
