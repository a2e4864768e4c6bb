use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::model::trade::{Instrument, Market};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub binance: BinanceConfig,
    pub sync: SyncConfig,
    pub candles: CandlesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub db_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    pub spot_rest_base_url: String,
    pub futures_rest_base_url: String,
    pub spot_ws_base_url: String,
    pub futures_ws_base_url: String,
    pub archive_base_url: String,
    #[serde(default)]
    pub spot_symbols: Vec<String>,
    #[serde(default)]
    pub futures_symbols: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// First calendar day the backfill worker will ever request.
    pub epoch_start: NaiveDate,
    pub day_throttle_ms: u64,
    pub sweep_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub restart_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandlesConfig {
    pub default_tick_size: f64,
    /// Per-symbol price-level granularity overrides, keyed by upper-case
    /// symbol.
    #[serde(default)]
    pub tick_sizes: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_file() -> String {
    "tickvault.log".to_string()
}

impl BinanceConfig {
    /// All tracked instruments, spot first, deduplicated per market.
    pub fn tracked_instruments(&self) -> Result<Vec<Instrument>> {
        let mut out: Vec<Instrument> = Vec::new();
        for (market, symbols) in [
            (Market::BinanceSpot, &self.spot_symbols),
            (Market::BinanceFutures, &self.futures_symbols),
        ] {
            for sym in symbols {
                let inst = Instrument::new(market, sym)
                    .with_context(|| format!("invalid {} symbol '{}'", market, sym))?;
                if !out.contains(&inst) {
                    out.push(inst);
                }
            }
        }
        Ok(out)
    }

    pub fn rest_base_url(&self, market: Market) -> &str {
        match market {
            Market::BinanceSpot => &self.spot_rest_base_url,
            Market::BinanceFutures => &self.futures_rest_base_url,
        }
    }

    pub fn ws_base_url(&self, market: Market) -> &str {
        match market {
            Market::BinanceSpot => &self.spot_ws_base_url,
            Market::BinanceFutures => &self.futures_ws_base_url,
        }
    }
}

impl CandlesConfig {
    /// Tick size for a symbol, falling back to the global default.
    pub fn tick_size_for(&self, symbol: &str) -> f64 {
        self.tick_sizes
            .get(&symbol.trim().to_ascii_uppercase())
            .copied()
            .unwrap_or(self.default_tick_size)
    }
}

impl Config {
    /// Load from `TICKVAULT_CONFIG` (default `config/default.toml`), after
    /// sourcing `.env`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var("TICKVAULT_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let instruments = self.binance.tracked_instruments()?;
        if instruments.is_empty() {
            bail!("no instruments configured: binance.spot_symbols and binance.futures_symbols are both empty");
        }
        if !(self.candles.default_tick_size.is_finite() && self.candles.default_tick_size > 0.0) {
            bail!(
                "candles.default_tick_size must be a finite positive number, got {}",
                self.candles.default_tick_size
            );
        }
        for (symbol, tick) in &self.candles.tick_sizes {
            if !(tick.is_finite() && *tick > 0.0) {
                bail!(
                    "candles.tick_sizes.{} must be a finite positive number, got {}",
                    symbol,
                    tick
                );
            }
        }
        if self.sync.sweep_interval_secs == 0 {
            bail!("sync.sweep_interval_secs must be > 0");
        }
        if self.sync.fetch_timeout_secs == 0 {
            bail!("sync.fetch_timeout_secs must be > 0");
        }
        if self.store.db_path.trim().is_empty() {
            bail!("store.db_path must not be empty");
        }
        Ok(())
    }
}
