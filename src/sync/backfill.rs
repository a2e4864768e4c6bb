use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Days, NaiveDate, Utc};
use tokio::sync::watch;

use crate::binance::ArchiveSource;
use crate::error::AppError;
use crate::model::trade::Instrument;
use crate::store::TickStore;

use super::ExponentialBackoff;

/// Schedule for re-attempting a failed archive day.
const RETRY_BASE: Duration = Duration::from_secs(5 * 60);
const RETRY_CAP: Duration = Duration::from_secs(4 * 60 * 60);
const RETRY_FACTOR: f64 = 2.0;

/// First day the next sweep should request: the day after the last stored
/// trade, or the configured epoch for an empty partition.
pub fn resume_date(last_trade_time_ms: Option<i64>, epoch_start: NaiveDate) -> NaiveDate {
    last_trade_time_ms
        .and_then(DateTime::from_timestamp_millis)
        .map(|last| last.date_naive() + Days::new(1))
        .unwrap_or(epoch_start)
}

struct LedgerEntry {
    attempts: u32,
    backoff: ExponentialBackoff,
    next_attempt_at_ms: i64,
    quarantined: bool,
}

impl LedgerEntry {
    fn new() -> Self {
        Self {
            attempts: 0,
            backoff: ExponentialBackoff::new(RETRY_BASE, RETRY_CAP, RETRY_FACTOR),
            next_attempt_at_ms: 0,
            quarantined: false,
        }
    }
}

/// Per-day failure bookkeeping for the backfill walk.
///
/// A failed `(instrument, day)` gets an exponentially growing hold-off
/// before the walk tries it again; a day whose payload cannot be decoded is
/// quarantined and never refetched within this process. State is in-memory
/// only, so a restart starts clean.
#[derive(Default)]
pub struct RetryLedger {
    entries: HashMap<(Instrument, NaiveDate), LedgerEntry>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the walk may attempt this day now.
    pub fn is_eligible(&self, instrument: &Instrument, day: NaiveDate, now_ms: i64) -> bool {
        match self.entries.get(&(instrument.clone(), day)) {
            None => true,
            Some(entry) => !entry.quarantined && now_ms >= entry.next_attempt_at_ms,
        }
    }

    pub fn is_quarantined(&self, instrument: &Instrument, day: NaiveDate) -> bool {
        self.entries
            .get(&(instrument.clone(), day))
            .is_some_and(|entry| entry.quarantined)
    }

    /// Record a transient failure and return the hold-off before the next
    /// attempt.
    pub fn record_failure(
        &mut self,
        instrument: &Instrument,
        day: NaiveDate,
        now_ms: i64,
    ) -> Duration {
        let entry = self
            .entries
            .entry((instrument.clone(), day))
            .or_insert_with(LedgerEntry::new);
        entry.attempts += 1;
        let delay = entry.backoff.next_delay();
        entry.next_attempt_at_ms = now_ms + delay.as_millis() as i64;
        delay
    }

    /// Mark a day as permanently bad for the lifetime of this process.
    pub fn quarantine(&mut self, instrument: &Instrument, day: NaiveDate) {
        self.entries
            .entry((instrument.clone(), day))
            .or_insert_with(LedgerEntry::new)
            .quarantined = true;
    }

    /// Clear any failure state once a day has been handled.
    pub fn record_success(&mut self, instrument: &Instrument, day: NaiveDate) {
        self.entries.remove(&(instrument.clone(), day));
    }
}

/// Walks daily archives forward from each instrument's watermark and folds
/// them into the trade store.
pub struct BackfillWorker<A: ArchiveSource> {
    store: TickStore,
    archive: A,
    instruments: Vec<Instrument>,
    epoch_start: NaiveDate,
    day_throttle: Duration,
    sweep_interval: Duration,
    ledger: Mutex<RetryLedger>,
}

impl<A: ArchiveSource> BackfillWorker<A> {
    pub fn new(
        store: TickStore,
        archive: A,
        instruments: Vec<Instrument>,
        epoch_start: NaiveDate,
        day_throttle: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            archive,
            instruments,
            epoch_start,
            day_throttle,
            sweep_interval,
            ledger: Mutex::new(RetryLedger::new()),
        }
    }

    /// Sweep immediately, then on every tick of the sweep interval, until
    /// shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            self.sweep(&mut shutdown).await;
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// One pass over every instrument. Failures are contained per
    /// instrument so one bad symbol cannot stall the others.
    pub async fn sweep(&self, shutdown: &mut watch::Receiver<bool>) {
        for instrument in &self.instruments {
            if *shutdown.borrow() {
                return;
            }
            if let Err(e) = self.sweep_instrument(instrument, shutdown).await {
                tracing::error!(instrument = %instrument, error = %e, "backfill sweep failed");
            }
        }
    }

    async fn sweep_instrument(
        &self,
        instrument: &Instrument,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let store = self.store.clone();
        let owner = instrument.clone();
        let last_time = tokio::task::spawn_blocking(move || {
            store.ensure_trade_table(&owner)?;
            store.last_trade_time(&owner)
        })
        .await
        .context("watermark lookup task failed")??;

        let mut day = resume_date(last_time, self.epoch_start);
        let today = Utc::now().date_naive();

        // Archives for a day appear only after that day has ended, so the
        // walk stops short of today.
        while day < today {
            if *shutdown.borrow() {
                return Ok(());
            }
            let now_ms = Utc::now().timestamp_millis();
            let eligible = self
                .ledger
                .lock()
                .unwrap()
                .is_eligible(instrument, day, now_ms);
            if !eligible {
                day = day + Days::new(1);
                continue;
            }

            self.ingest_day(instrument, day, now_ms).await?;

            tokio::select! {
                _ = tokio::time::sleep(self.day_throttle) => {}
                _ = shutdown.changed() => return Ok(()),
            }
            day = day + Days::new(1);
        }
        Ok(())
    }

    /// Fetch and store one archive day, updating the retry ledger. Only
    /// store and runtime failures propagate; fetch failures are recorded
    /// and the walk moves on.
    async fn ingest_day(
        &self,
        instrument: &Instrument,
        day: NaiveDate,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        match self.archive.fetch_day(instrument, day).await {
            Ok(Some(trades)) => {
                let rows = trades.len();
                let store = self.store.clone();
                let owner = instrument.clone();
                let inserted =
                    tokio::task::spawn_blocking(move || store.insert_trades(&owner, &trades))
                        .await
                        .context("archive insert task failed")??;
                self.ledger.lock().unwrap().record_success(instrument, day);
                tracing::info!(
                    instrument = %instrument,
                    day = %day,
                    rows,
                    inserted,
                    "archive day ingested"
                );
            }
            Ok(None) => {
                // Not published yet; the next sweep will look again.
                self.ledger.lock().unwrap().record_success(instrument, day);
                tracing::debug!(instrument = %instrument, day = %day, "archive day unavailable");
            }
            Err(e) if is_decode_error(&e) => {
                self.ledger.lock().unwrap().quarantine(instrument, day);
                tracing::error!(
                    instrument = %instrument,
                    day = %day,
                    error = %e,
                    "archive day quarantined"
                );
            }
            Err(e) => {
                let delay = self
                    .ledger
                    .lock()
                    .unwrap()
                    .record_failure(instrument, day, now_ms);
                tracing::warn!(
                    instrument = %instrument,
                    day = %day,
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "archive fetch failed"
                );
            }
        }
        Ok(())
    }
}

/// A payload that decoded badly will decode badly again; everything else is
/// assumed transient.
fn is_decode_error(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<AppError>(),
            Some(AppError::Archive(_) | AppError::Io(_))
        )
    })
}
