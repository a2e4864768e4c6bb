//! Ingestion orchestration.
//!
//! One [`SyncSupervisor`] owns both ingestion paths: a single
//! [`BackfillWorker`] that walks daily archives for every tracked
//! instrument, and one [`StreamWorker`] per instrument for live trades.
//! Each path runs as a supervised unit that is restarted after a crash or
//! an unrecoverable error, so one poisoned instrument cannot take down the
//! rest of the pipeline.

pub mod backfill;
pub mod stream;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::binance::{AggTradeStream, BinanceArchiveClient, MarketDataClient};
use crate::config::Config;
use crate::store::TickStore;

pub use backfill::{resume_date, BackfillWorker, RetryLedger};
pub use stream::StreamWorker;

/// Exponential backoff for retry loops.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    factor: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            current: initial,
            initial,
            max,
            factor,
        }
    }

    /// The delay to apply now; the next call returns a longer one, up to
    /// the configured cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64()),
        );
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Builds and babysits the ingestion workers.
pub struct SyncSupervisor {
    store: TickStore,
    config: Config,
    archive: BinanceArchiveClient,
    rest: MarketDataClient,
}

impl SyncSupervisor {
    pub fn new(store: TickStore, config: Config) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.sync.fetch_timeout_secs);
        let archive = BinanceArchiveClient::new(&config.binance.archive_base_url, timeout)?;
        let rest = MarketDataClient::new(
            &config.binance.spot_rest_base_url,
            &config.binance.futures_rest_base_url,
            timeout,
        )?;
        Ok(Self {
            store,
            config,
            archive,
            rest,
        })
    }

    /// Spawn the supervisor task. It resolves only once every unit has
    /// observed the shutdown signal and stopped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: watch::Receiver<bool>) {
        let instruments = match self.config.binance.tracked_instruments() {
            Ok(instruments) => instruments,
            Err(e) => {
                tracing::error!(error = %e, "no usable instruments, sync disabled");
                return;
            }
        };
        let restart_delay = Duration::from_secs(self.config.sync.restart_delay_secs);
        let mut units = Vec::new();

        let backfill = Arc::new(BackfillWorker::new(
            self.store.clone(),
            self.archive.clone(),
            instruments.clone(),
            self.config.sync.epoch_start,
            Duration::from_millis(self.config.sync.day_throttle_ms),
            Duration::from_secs(self.config.sync.sweep_interval_secs),
        ));
        units.push(tokio::spawn(supervise(
            "backfill".to_string(),
            restart_delay,
            shutdown.clone(),
            move |sd| {
                let worker = backfill.clone();
                async move { worker.run(sd).await }
            },
        )));

        for instrument in instruments {
            let stream = AggTradeStream::new(
                self.config.binance.ws_base_url(instrument.market()),
                instrument.clone(),
            );
            let worker = Arc::new(StreamWorker::new(
                self.store.clone(),
                self.rest.clone(),
                stream,
                instrument.clone(),
            ));
            units.push(tokio::spawn(supervise(
                format!("stream:{instrument}"),
                restart_delay,
                shutdown.clone(),
                move |sd| {
                    let worker = worker.clone();
                    async move { worker.run(sd).await }
                },
            )));
        }

        for unit in units {
            let _ = unit.await;
        }
        tracing::info!("sync supervisor stopped");
    }
}

/// Run one ingestion unit until it stops cleanly, restarting it after
/// failures and panics. Each attempt gets its own task so a panic is
/// contained to that attempt.
async fn supervise<F, Fut>(
    unit: String,
    restart_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    make: F,
) where
    F: Fn(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    loop {
        let attempt = tokio::spawn(make(shutdown.clone()));
        match attempt.await {
            Ok(Ok(())) => {
                tracing::info!(unit = %unit, "sync unit stopped");
                break;
            }
            Ok(Err(e)) => {
                tracing::error!(unit = %unit, error = %e, "sync unit failed");
            }
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "sync unit panicked");
            }
        }
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
}
