use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Venue a trade log belongs to. The variant name doubles as the table-name
/// prefix for that venue's partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    BinanceSpot,
    BinanceFutures,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::BinanceSpot => "binance_spot",
            Market::BinanceFutures => "binance_futures",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "binance_spot" => Ok(Market::BinanceSpot),
            "binance_futures" => Ok(Market::BinanceFutures),
            other => Err(AppError::UnknownMarket(other.to_string())),
        }
    }

    pub fn is_futures(&self) -> bool {
        matches!(self, Market::BinanceFutures)
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked (market, symbol) pair.
///
/// Symbols are restricted to 1-20 ASCII alphanumerics and stored uppercase.
/// Every SQL identifier in the store is derived from a validated `Instrument`
/// plus enum-valued parts, so raw caller input never reaches an identifier
/// position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    market: Market,
    symbol: String,
}

impl Instrument {
    pub fn new(market: Market, symbol: &str) -> Result<Self> {
        let symbol = symbol.trim();
        if symbol.is_empty()
            || symbol.len() > 20
            || !symbol.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(AppError::InvalidSymbol(symbol.to_string()));
        }
        Ok(Self {
            market,
            symbol: symbol.to_ascii_uppercase(),
        })
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Lower-case symbol as used in stream names and table identifiers.
    pub fn symbol_lower(&self) -> String {
        self.symbol.to_ascii_lowercase()
    }

    /// Name of this instrument's trade log, e.g. `binance_spot_btcusdt`.
    pub fn trade_table(&self) -> String {
        format!("{}_{}", self.market.as_str(), self.symbol_lower())
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.market, self.symbol)
    }
}

/// One executed aggregate trade as stored in a partition log.
///
/// `id` is unique within its partition; re-inserting an existing id is a
/// no-op at the store layer. `time_ms` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub price: f64,
    pub qty: f64,
    pub time_ms: i64,
    pub is_buyer_maker: bool,
}
