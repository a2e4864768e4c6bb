pub mod archive;
pub mod rest;
pub mod types;
pub mod ws;

pub use archive::{ArchiveSource, BinanceArchiveClient};
pub use rest::MarketDataClient;
pub use ws::AggTradeStream;
