use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use tokio::sync::watch;

use tickvault::binance::ArchiveSource;
use tickvault::error::AppError;
use tickvault::model::{Instrument, Market, Trade};
use tickvault::store::TickStore;
use tickvault::sync::BackfillWorker;

enum FakeDay {
    Trades(Vec<Trade>),
    Missing,
    NetworkError,
    Corrupt,
}

/// Canned archive with a call log, standing in for the CDN.
struct FakeArchive {
    days: HashMap<NaiveDate, FakeDay>,
    calls: Arc<Mutex<Vec<NaiveDate>>>,
}

impl FakeArchive {
    fn new(days: HashMap<NaiveDate, FakeDay>) -> Self {
        Self {
            days,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ArchiveSource for FakeArchive {
    async fn fetch_day(
        &self,
        _instrument: &Instrument,
        date: NaiveDate,
    ) -> anyhow::Result<Option<Vec<Trade>>> {
        self.calls.lock().unwrap().push(date);
        match self.days.get(&date) {
            None | Some(FakeDay::Missing) => Ok(None),
            Some(FakeDay::Trades(trades)) => Ok(Some(trades.clone())),
            Some(FakeDay::NetworkError) => Err(anyhow::anyhow!("connection reset by peer")),
            Some(FakeDay::Corrupt) => {
                Err(AppError::Archive("malformed archive row 3: 'bad'".to_string()).into())
            }
        }
    }
}

fn instrument() -> Instrument {
    Instrument::new(Market::BinanceSpot, "BTCUSDT").expect("valid instrument")
}

fn noon_ms(day: NaiveDate) -> i64 {
    day.and_hms_opt(12, 0, 0)
        .expect("valid time")
        .and_utc()
        .timestamp_millis()
}

fn day_trades(first_id: i64, day: NaiveDate) -> Vec<Trade> {
    vec![
        Trade {
            id: first_id,
            price: 100.0,
            qty: 1.0,
            time_ms: noon_ms(day),
            is_buyer_maker: false,
        },
        Trade {
            id: first_id + 1,
            price: 101.0,
            qty: 2.0,
            time_ms: noon_ms(day) + 1_000,
            is_buyer_maker: true,
        },
    ]
}

fn make_worker(
    store: &TickStore,
    fake: FakeArchive,
    epoch_start: NaiveDate,
) -> BackfillWorker<FakeArchive> {
    BackfillWorker::new(
        store.clone(),
        fake,
        vec![instrument()],
        epoch_start,
        Duration::ZERO,
        Duration::from_secs(3_600),
    )
}

#[tokio::test]
async fn sweep_walks_epoch_to_yesterday_and_ingests() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(3);
    let fake = FakeArchive::new(HashMap::from([
        (epoch, FakeDay::Trades(day_trades(1, epoch))),
        (epoch + Days::new(1), FakeDay::Missing),
        (
            epoch + Days::new(2),
            FakeDay::Trades(day_trades(11, epoch + Days::new(2))),
        ),
    ]));
    let calls = fake.calls.clone();

    let store = TickStore::open_in_memory().expect("store");
    let worker = make_worker(&store, fake, epoch);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    worker.sweep(&mut shutdown).await;

    assert_eq!(
        *calls.lock().unwrap(),
        vec![epoch, epoch + Days::new(1), epoch + Days::new(2)],
        "every day between epoch and yesterday gets one fetch"
    );
    assert_eq!(
        store.count_rows(&instrument().trade_table()).unwrap(),
        4,
        "both published days should be stored"
    );
}

#[tokio::test]
/// A partition whose newest trade is on day D must only request D+1 and
/// later, regardless of the configured epoch.
async fn sweep_resumes_from_the_stored_watermark() {
    let today = Utc::now().date_naive();
    let seeded_day = today - Days::new(2);
    let epoch = today - Days::new(5);

    let store = TickStore::open_in_memory().expect("store");
    let inst = instrument();
    store.ensure_trade_table(&inst).expect("table create");
    store
        .insert_trades(&inst, &day_trades(1, seeded_day))
        .expect("seed insert");

    let fake = FakeArchive::new(HashMap::new());
    let calls = fake.calls.clone();
    let worker = make_worker(&store, fake, epoch);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    worker.sweep(&mut shutdown).await;

    let requested = calls.lock().unwrap().clone();
    assert_eq!(requested, vec![today - Days::new(1)]);
    assert!(
        !requested.contains(&seeded_day),
        "already-covered days must never be refetched"
    );
}

#[tokio::test]
async fn network_failures_get_a_holdoff_before_retry() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(1);
    let fake = FakeArchive::new(HashMap::from([(epoch, FakeDay::NetworkError)]));
    let calls = fake.calls.clone();

    let store = TickStore::open_in_memory().expect("store");
    let worker = make_worker(&store, fake, epoch);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    worker.sweep(&mut shutdown).await;
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(store.count_rows(&instrument().trade_table()).unwrap(), 0);

    // An immediate second sweep is inside the holdoff window.
    worker.sweep(&mut shutdown).await;
    assert_eq!(
        calls.lock().unwrap().len(),
        1,
        "failed day must not be refetched before its holdoff expires"
    );
}

#[tokio::test]
async fn corrupt_days_are_quarantined_for_the_run() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(2);
    let fake = FakeArchive::new(HashMap::from([
        (epoch, FakeDay::Trades(day_trades(1, epoch))),
        (epoch + Days::new(1), FakeDay::Corrupt),
    ]));
    let calls = fake.calls.clone();

    let store = TickStore::open_in_memory().expect("store");
    let worker = make_worker(&store, fake, epoch);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    worker.sweep(&mut shutdown).await;
    assert_eq!(calls.lock().unwrap().len(), 2);
    assert_eq!(store.count_rows(&instrument().trade_table()).unwrap(), 2);

    // The watermark still sits before the corrupt day, but quarantine
    // keeps the walk from refetching it.
    worker.sweep(&mut shutdown).await;
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn decode_failure_does_not_stall_later_days() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(3);
    let fake = FakeArchive::new(HashMap::from([
        (epoch, FakeDay::Corrupt),
        (
            epoch + Days::new(1),
            FakeDay::Trades(day_trades(10, epoch + Days::new(1))),
        ),
        (
            epoch + Days::new(2),
            FakeDay::Trades(day_trades(20, epoch + Days::new(2))),
        ),
    ]));
    let calls = fake.calls.clone();

    let store = TickStore::open_in_memory().expect("store");
    let worker = make_worker(&store, fake, epoch);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    worker.sweep(&mut shutdown).await;

    assert_eq!(calls.lock().unwrap().len(), 3);
    assert_eq!(
        store.count_rows(&instrument().trade_table()).unwrap(),
        4,
        "days after the corrupt one still land"
    );
}

#[tokio::test]
async fn unpublished_days_are_retried_on_the_next_sweep() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(1);
    let fake = FakeArchive::new(HashMap::from([(epoch, FakeDay::Missing)]));
    let calls = fake.calls.clone();

    let store = TickStore::open_in_memory().expect("store");
    let worker = make_worker(&store, fake, epoch);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    worker.sweep(&mut shutdown).await;
    worker.sweep(&mut shutdown).await;

    assert_eq!(
        *calls.lock().unwrap(),
        vec![epoch, epoch],
        "a 404 day carries no holdoff and is re-checked every sweep"
    );
}
