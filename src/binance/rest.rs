use std::time::Duration;

use anyhow::{Context, Result};

use crate::model::trade::{Instrument, Market, Trade};

use super::types::AggTradeEvent;

/// Public market-data REST client. Only used for gap catch-up after a
/// stream reconnect, so it speaks just the aggTrades endpoints.
#[derive(Clone)]
pub struct MarketDataClient {
    http: reqwest::Client,
    spot_base_url: String,
    futures_base_url: String,
}

impl MarketDataClient {
    /// Page size for aggTrades requests; a shorter page signals the end of
    /// the available range.
    pub const PAGE_LIMIT: usize = 1000;

    pub fn new(spot_base_url: &str, futures_base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("HTTP client build failed")?;
        Ok(Self {
            http,
            spot_base_url: spot_base_url.trim_end_matches('/').to_string(),
            futures_base_url: futures_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// One page of aggregate trades with id >= `from_id`, oldest first.
    pub async fn agg_trades_from(&self, instrument: &Instrument, from_id: i64) -> Result<Vec<Trade>> {
        let (base, path) = match instrument.market() {
            Market::BinanceSpot => (&self.spot_base_url, "/api/v3/aggTrades"),
            Market::BinanceFutures => (&self.futures_base_url, "/fapi/v1/aggTrades"),
        };
        let url = format!(
            "{}{}?symbol={}&fromId={}&limit={}",
            base,
            path,
            instrument.symbol(),
            from_id,
            Self::PAGE_LIMIT
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("aggTrades request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("aggTrades returned {status}: {body}");
        }
        let events: Vec<AggTradeEvent> = resp
            .json()
            .await
            .context("aggTrades response decode failed")?;
        Ok(events.into_iter().map(AggTradeEvent::into_trade).collect())
    }
}
