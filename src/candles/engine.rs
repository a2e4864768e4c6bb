use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::Result;
use crate::model::trade::Instrument;
use crate::store::TickStore;

use super::aggregate::Aggregator;
use super::interval::Interval;

/// Rebuilds materialized candle tables from raw trade logs.
///
/// Rebuild requests for the same (instrument, interval) are serialized
/// through a per-key lock; distinct keys rebuild in parallel. A rebuild that
/// fails leaves the previously materialized table untouched.
pub struct CandleEngine {
    store: TickStore,
    rebuild_locks: Mutex<HashMap<(Instrument, Interval), Arc<Mutex<()>>>>,
}

impl CandleEngine {
    pub fn new(store: TickStore) -> Self {
        Self {
            store,
            rebuild_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Recompute and atomically replace the candle table for one
    /// instrument/interval. Returns the number of candle rows written.
    /// An empty or absent trade partition materializes an empty table.
    pub fn rebuild(
        &self,
        instrument: &Instrument,
        interval: Interval,
        tick_size: f64,
    ) -> Result<usize> {
        let key_lock = self.lock_for(instrument, interval);
        let _guard = key_lock.lock().unwrap();

        let started = Instant::now();
        let mut aggregator = Aggregator::new(interval, tick_size)?;
        if self.store.table_exists(&instrument.trade_table())? {
            self.store
                .scan_trades(instrument, |trade| aggregator.push(&trade))?;
        }
        let candles = aggregator.finish();
        self.store.write_candles(instrument, interval, &candles)?;
        tracing::info!(
            instrument = %instrument,
            interval = %interval,
            rows = candles.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Candle table rebuilt"
        );
        Ok(candles.len())
    }

    fn lock_for(&self, instrument: &Instrument, interval: Interval) -> Arc<Mutex<()>> {
        let mut locks = self.rebuild_locks.lock().unwrap();
        locks
            .entry((instrument.clone(), interval))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
