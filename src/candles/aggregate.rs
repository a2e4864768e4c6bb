use std::cmp::Reverse;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use crate::error::{AppError, Result};
use crate::model::candle::{Candle, PriceLevel};
use crate::model::trade::Trade;

use super::interval::Interval;

/// Folds raw trades into per-bucket OHLCV + volume-profile state.
///
/// Trades may arrive in any order; open/close selection is tie-broken by
/// `(time_ms, id)`, so the result is a pure function of the trade set. CVD is
/// assigned in `finish()` as a running sum over buckets ordered by open time.
#[derive(Debug)]
pub struct Aggregator {
    interval: Interval,
    tick_size: f64,
    buckets: BTreeMap<i64, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    first: (i64, i64),
    last: (i64, i64),
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    delta: f64,
    levels: HashMap<i64, LevelAccum>,
}

#[derive(Debug, Default)]
struct LevelAccum {
    volume: f64,
    ask: f64,
    bid: f64,
}

impl Aggregator {
    pub fn new(interval: Interval, tick_size: f64) -> Result<Self> {
        if !(tick_size.is_finite() && tick_size > 0.0) {
            return Err(AppError::InvalidTickSize(tick_size));
        }
        Ok(Self {
            interval,
            tick_size,
            buckets: BTreeMap::new(),
        })
    }

    pub fn push(&mut self, trade: &Trade) {
        let open_time = self.interval.bucket_open(trade.time_ms);
        let level = level_index(trade.price, self.tick_size);
        match self.buckets.entry(open_time) {
            Entry::Vacant(slot) => {
                slot.insert(Bucket::from_trade(trade, level));
            }
            Entry::Occupied(mut slot) => slot.get_mut().merge(trade, level),
        }
    }

    /// Emit candles ordered by open time, computing CVD across buckets and
    /// sorting each bucket's price levels descending.
    pub fn finish(self) -> Vec<Candle> {
        let tick_size = self.tick_size;
        let mut cvd = 0.0;
        self.buckets
            .into_iter()
            .map(|(open_time, bucket)| {
                cvd += bucket.delta;
                let mut entries: Vec<(i64, LevelAccum)> = bucket.levels.into_iter().collect();
                entries.sort_unstable_by_key(|(index, _)| Reverse(*index));
                let levels = entries
                    .into_iter()
                    .map(|(index, accum)| PriceLevel {
                        price: index as f64 * tick_size,
                        volume: accum.volume,
                        ask: accum.ask,
                        bid: accum.bid,
                        delta: accum.ask - accum.bid,
                    })
                    .collect();
                Candle {
                    open_time,
                    open: bucket.open,
                    high: bucket.high,
                    low: bucket.low,
                    close: bucket.close,
                    volume: bucket.volume,
                    delta: bucket.delta,
                    cvd,
                    levels,
                }
            })
            .collect()
    }
}

impl Bucket {
    fn from_trade(trade: &Trade, level: i64) -> Self {
        let order = (trade.time_ms, trade.id);
        let mut levels = HashMap::new();
        let mut accum = LevelAccum::default();
        accum.add(trade);
        levels.insert(level, accum);
        Self {
            first: order,
            last: order,
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.qty,
            delta: signed_qty(trade),
            levels,
        }
    }

    fn merge(&mut self, trade: &Trade, level: i64) {
        let order = (trade.time_ms, trade.id);
        if order < self.first {
            self.first = order;
            self.open = trade.price;
        }
        if order > self.last {
            self.last = order;
            self.close = trade.price;
        }
        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.volume += trade.qty;
        self.delta += signed_qty(trade);
        self.levels.entry(level).or_default().add(trade);
    }
}

impl LevelAccum {
    fn add(&mut self, trade: &Trade) {
        self.volume += trade.qty;
        if trade.is_buyer_maker {
            self.bid += trade.qty;
        } else {
            self.ask += trade.qty;
        }
    }
}

fn signed_qty(trade: &Trade) -> f64 {
    if trade.is_buyer_maker {
        -trade.qty
    } else {
        trade.qty
    }
}

/// Price rounded to the nearest multiple of the tick size, expressed as an
/// integer index so levels hash and sort exactly.
fn level_index(price: f64, tick_size: f64) -> i64 {
    (price / tick_size).round() as i64
}

/// One-shot aggregation of a trade sequence.
pub fn build_candles<'a, I>(trades: I, interval: Interval, tick_size: f64) -> Result<Vec<Candle>>
where
    I: IntoIterator<Item = &'a Trade>,
{
    let mut aggregator = Aggregator::new(interval, tick_size)?;
    for trade in trades {
        aggregator.push(trade);
    }
    Ok(aggregator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(id: i64, price: f64, qty: f64, time_ms: i64, maker: bool) -> Trade {
        Trade {
            id,
            price,
            qty,
            time_ms,
            is_buyer_maker: maker,
        }
    }

    #[test]
    fn rejects_invalid_tick_size() {
        assert!(matches!(
            Aggregator::new(Interval::M1, 0.0),
            Err(AppError::InvalidTickSize(_))
        ));
        assert!(Aggregator::new(Interval::M1, -0.5).is_err());
        assert!(Aggregator::new(Interval::M1, f64::NAN).is_err());
        assert!(Aggregator::new(Interval::M1, f64::INFINITY).is_err());
    }

    #[test]
    fn level_index_rounds_to_nearest_tick() {
        assert_eq!(level_index(100.0, 1.0), 100);
        assert_eq!(level_index(100.4, 1.0), 100);
        assert_eq!(level_index(100.5, 1.0), 101);
        assert_eq!(level_index(42_000.12, 0.1), 420_001);
    }

    #[test]
    fn open_close_tie_break_is_by_time_then_id() {
        // Same bucket, pushed out of time order.
        let trades = vec![
            trade(3, 103.0, 1.0, 40_000, false),
            trade(1, 101.0, 1.0, 10_000, false),
            trade(2, 102.0, 1.0, 10_000, false),
        ];
        let candles = build_candles(&trades, Interval::M1, 1.0).unwrap();
        assert_eq!(candles.len(), 1);
        // id 1 and id 2 share a timestamp; the lower id opens.
        assert!((candles[0].open - 101.0).abs() < f64::EPSILON);
        assert!((candles[0].close - 103.0).abs() < f64::EPSILON);
    }
}
