use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};

use crate::binance::{AggTradeStream, MarketDataClient};
use crate::model::trade::{Instrument, Trade};
use crate::store::TickStore;

use super::ExponentialBackoff;

const TRADE_CHANNEL_CAPACITY: usize = 1024;
const INSERT_BATCH_MAX: usize = 512;
/// A session that lived at least this long resets the reconnect backoff.
const HEALTHY_SESSION: Duration = Duration::from_secs(60);

/// Live ingestion for one instrument.
///
/// Keeps an `@aggTrade` subscription alive with reconnect backoff, and
/// bridges the id gap left by each disconnection through the REST
/// aggTrades endpoint. Catch-up runs after the new connection is up, so
/// every trade id is covered by either the stream or the catch-up page,
/// with id dedup in the store absorbing the overlap.
pub struct StreamWorker {
    store: TickStore,
    rest: MarketDataClient,
    stream: AggTradeStream,
    instrument: Instrument,
}

impl StreamWorker {
    pub fn new(
        store: TickStore,
        rest: MarketDataClient,
        stream: AggTradeStream,
        instrument: Instrument,
    ) -> Self {
        Self {
            store,
            rest,
            stream,
            instrument,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        {
            let store = self.store.clone();
            let owner = self.instrument.clone();
            tokio::task::spawn_blocking(move || store.ensure_trade_table(&owner))
                .await
                .context("table setup task failed")??;
        }

        let (trade_tx, trade_rx) = mpsc::channel(TRADE_CHANNEL_CAPACITY);
        let inserter = tokio::spawn(insert_loop(
            self.store.clone(),
            self.instrument.clone(),
            trade_rx,
        ));

        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 2.0);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let (connected_tx, mut connected_rx) = watch::channel(false);
            let session_started = Instant::now();

            let result = {
                let mut caught_up = false;
                let session = self
                    .stream
                    .run_once(&trade_tx, &connected_tx, &mut shutdown);
                tokio::pin!(session);
                loop {
                    tokio::select! {
                        res = &mut session => break res,
                        _ = connected_rx.changed(), if !caught_up => {
                            caught_up = true;
                            if let Err(e) = self.catch_up(&trade_tx).await {
                                tracing::warn!(
                                    instrument = %self.instrument,
                                    error = %e,
                                    "gap catch-up failed"
                                );
                            }
                        }
                    }
                }
            };

            match result {
                Ok(()) => break,
                Err(e) => {
                    if session_started.elapsed() >= HEALTHY_SESSION {
                        backoff.reset();
                    }
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        instrument = %self.instrument,
                        error = %e,
                        retry_in_secs = delay.as_secs(),
                        "stream session ended"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        drop(trade_tx);
        let _ = inserter.await;
        Ok(())
    }

    /// Page REST aggTrades from the stored watermark up to the live edge
    /// and feed them through the same channel as stream trades.
    async fn catch_up(&self, trade_tx: &mpsc::Sender<Trade>) -> Result<()> {
        let store = self.store.clone();
        let owner = self.instrument.clone();
        let last_id = tokio::task::spawn_blocking(move || store.last_trade_id(&owner))
            .await
            .context("watermark lookup task failed")??;
        let Some(last_id) = last_id else {
            // Empty partition; history belongs to the backfill worker.
            return Ok(());
        };

        let mut from_id = last_id + 1;
        let mut total = 0usize;
        loop {
            let page = self.rest.agg_trades_from(&self.instrument, from_id).await?;
            let Some(last) = page.last() else { break };
            from_id = last.id + 1;
            total += page.len();
            let full_page = page.len() >= MarketDataClient::PAGE_LIMIT;
            for trade in page {
                if trade_tx.send(trade).await.is_err() {
                    return Ok(());
                }
            }
            if !full_page {
                break;
            }
        }
        if total > 0 {
            tracing::info!(instrument = %self.instrument, rows = total, "gap catch-up complete");
        }
        Ok(())
    }
}

/// Drain the trade channel into the store in batches, off the async
/// worker threads. Failed batches are logged and dropped; the next
/// catch-up re-covers their ids.
async fn insert_loop(
    store: TickStore,
    instrument: Instrument,
    mut trade_rx: mpsc::Receiver<Trade>,
) {
    while let Some(first) = trade_rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < INSERT_BATCH_MAX {
            match trade_rx.try_recv() {
                Ok(trade) => batch.push(trade),
                Err(_) => break,
            }
        }
        let rows = batch.len();
        let store = store.clone();
        let owner = instrument.clone();
        match tokio::task::spawn_blocking(move || store.insert_trades(&owner, &batch)).await {
            Ok(Ok(inserted)) => {
                tracing::debug!(instrument = %instrument, rows, inserted, "live trades stored");
            }
            Ok(Err(e)) => {
                tracing::error!(instrument = %instrument, error = %e, "live trade insert failed");
            }
            Err(e) => {
                tracing::error!(instrument = %instrument, error = %e, "live insert task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::trade::Market;

    fn trade(id: i64) -> Trade {
        Trade {
            id,
            price: 100.0,
            qty: 1.0,
            time_ms: 1_700_000_000_000 + id,
            is_buyer_maker: false,
        }
    }

    #[tokio::test]
    async fn insert_loop_drains_channel_into_store() {
        let store = TickStore::open_in_memory().unwrap();
        let instrument = Instrument::new(Market::BinanceSpot, "BTCUSDT").unwrap();
        store.ensure_trade_table(&instrument).unwrap();

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(insert_loop(store.clone(), instrument.clone(), rx));
        for id in 0..5 {
            tx.send(trade(id)).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(store.count_rows(&instrument.trade_table()).unwrap(), 5);
    }

    #[tokio::test]
    async fn insert_loop_dedups_replayed_ids() {
        let store = TickStore::open_in_memory().unwrap();
        let instrument = Instrument::new(Market::BinanceSpot, "BTCUSDT").unwrap();
        store.ensure_trade_table(&instrument).unwrap();

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(insert_loop(store.clone(), instrument.clone(), rx));
        for id in [7, 8, 7, 9, 8] {
            tx.send(trade(id)).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(store.count_rows(&instrument.trade_table()).unwrap(), 3);
    }
}
