//! Tick-level trade archive: historical backfill + live streaming ingestion
//! into deduplicated per-instrument DuckDB logs, with volume-profile candle
//! aggregation on top.

pub mod binance;
pub mod candles;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod sync;
