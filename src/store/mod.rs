mod candles;
mod duck;
mod trades;

pub use candles::candle_table_name;
pub use duck::TickStore;
