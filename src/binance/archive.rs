use std::future::Future;
use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use url::Url;

use crate::error::{AppError, Result};
use crate::model::trade::{Instrument, Market, Trade};

/// Source of daily historical trade archives.
///
/// The backfill worker only needs "all trades for this instrument on this
/// UTC day". `Ok(None)` means no archive exists for the day, a valid
/// zero-trade outcome.
pub trait ArchiveSource: Send + Sync {
    fn fetch_day(
        &self,
        instrument: &Instrument,
        date: NaiveDate,
    ) -> impl Future<Output = anyhow::Result<Option<Vec<Trade>>>> + Send;
}

/// Downloads daily aggTrades zip archives from data.binance.vision.
#[derive(Clone)]
pub struct BinanceArchiveClient {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceArchiveClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the daily archive zip for one instrument and day.
    pub fn archive_url(&self, instrument: &Instrument, date: NaiveDate) -> Result<Url> {
        let symbol = instrument.symbol();
        let day = date.format("%Y-%m-%d");
        let path = match instrument.market() {
            Market::BinanceSpot => {
                format!("data/spot/daily/aggTrades/{symbol}/{symbol}-aggTrades-{day}.zip")
            }
            Market::BinanceFutures => {
                format!("data/futures/um/daily/aggTrades/{symbol}/{symbol}-aggTrades-{day}.zip")
            }
        };
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| AppError::Archive(format!("invalid archive url: {e}")))
    }
}

impl ArchiveSource for BinanceArchiveClient {
    async fn fetch_day(
        &self,
        instrument: &Instrument,
        date: NaiveDate,
    ) -> anyhow::Result<Option<Vec<Trade>>> {
        let url = self.archive_url(instrument, date)?;
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("archive fetch failed: {url}"))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("archive fetch returned {} for {url}", resp.status());
        }
        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("archive body read failed: {url}"))?;
        let trades = decode_archive(&bytes)?;
        Ok(Some(trades))
    }
}

/// Unzip a daily archive and decode its single CSV member.
pub fn decode_archive(bytes: &[u8]) -> Result<Vec<Trade>> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)?;
    if archive.is_empty() {
        return Err(AppError::Archive("zip archive has no members".to_string()));
    }
    let mut member = archive.by_index(0)?;
    let mut csv = String::new();
    member.read_to_string(&mut csv)?;
    decode_csv(&csv)
}

/// Decode aggTrades CSV rows into trades.
///
/// Columns: agg_trade_id, price, quantity, first_trade_id, last_trade_id,
/// transact_time, is_buyer_maker, was_best_match. Spot archives may start
/// with a header row; futures archives report transact_time in microseconds.
pub fn decode_csv(csv: &str) -> Result<Vec<Trade>> {
    let mut trades = Vec::new();
    for (idx, raw_line) in csv.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 7 {
            return Err(malformed_row(idx, line));
        }
        if idx == 0 && fields[0].parse::<i64>().is_err() {
            // header row
            continue;
        }
        let id: i64 = parse_csv_field(fields[0], idx, line)?;
        let price: f64 = parse_csv_field(fields[1], idx, line)?;
        let qty: f64 = parse_csv_field(fields[2], idx, line)?;
        let time: i64 = parse_csv_field(fields[5], idx, line)?;
        let is_buyer_maker = match fields[6].to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => return Err(malformed_row(idx, line)),
        };
        trades.push(Trade {
            id,
            price,
            qty,
            time_ms: normalize_time_ms(time),
            is_buyer_maker,
        });
    }
    Ok(trades)
}

/// Archives report milliseconds on spot and microseconds on futures; fold
/// everything to milliseconds.
fn normalize_time_ms(time: i64) -> i64 {
    if time >= 100_000_000_000_000 {
        time / 1_000
    } else {
        time
    }
}

fn parse_csv_field<T: FromStr>(field: &str, idx: usize, line: &str) -> Result<T> {
    field.parse::<T>().map_err(|_| malformed_row(idx, line))
}

fn malformed_row(idx: usize, line: &str) -> AppError {
    AppError::Archive(format!("malformed archive row {}: '{}'", idx + 1, line))
}
