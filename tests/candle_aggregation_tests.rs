use tickvault::candles::{build_candles, Aggregator, Interval};
use tickvault::model::Trade;

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
/// Two trades in one minute bucket: a 1-lot taker buy at 100 and a 2-lot
/// seller-initiated print at 105.
fn one_minute_bucket_with_volume_profile() {
    let trades = vec![
        trade(1, 100.0, 1.0, 10_000, false),
        trade(2, 105.0, 2.0, 40_000, true),
    ];
    let candles = build_candles(&trades, Interval::M1, 1.0).expect("aggregation should succeed");

    assert_eq!(candles.len(), 1);
    let candle = &candles[0];
    assert_eq!(candle.open_time, 0);
    assert!((candle.open - 100.0).abs() < f64::EPSILON);
    assert!((candle.high - 105.0).abs() < f64::EPSILON);
    assert!((candle.low - 100.0).abs() < f64::EPSILON);
    assert!((candle.close - 105.0).abs() < f64::EPSILON);
    assert!((candle.volume - 3.0).abs() < f64::EPSILON);
    assert!((candle.delta + 1.0).abs() < f64::EPSILON);
    assert!((candle.cvd + 1.0).abs() < f64::EPSILON);

    let rows: Vec<[f64; 5]> = candle.levels.iter().map(|l| l.to_row()).collect();
    assert_eq!(rows, vec![[105.0, 2.0, 0.0, 2.0, -2.0], [100.0, 1.0, 1.0, 0.0, 1.0]]);
}

#[test]
fn cvd_accumulates_across_buckets_in_time_order() {
    // Pushed out of time order on purpose.
    let trades = vec![
        trade(4, 99.0, 2.0, 130_000, true),
        trade(1, 100.0, 1.0, 10_000, false),
        trade(3, 101.0, 5.0, 70_000, false),
        trade(2, 105.0, 2.0, 40_000, true),
    ];
    let candles = build_candles(&trades, Interval::M1, 1.0).expect("aggregation should succeed");

    let open_times: Vec<i64> = candles.iter().map(|c| c.open_time).collect();
    assert_eq!(open_times, vec![0, 60_000, 120_000]);

    let mut running = 0.0;
    for candle in &candles {
        running += candle.delta;
        assert!(
            (candle.cvd - running).abs() < f64::EPSILON,
            "cvd must equal the running delta sum at bucket {}",
            candle.open_time
        );
    }
    assert!((candles[0].cvd + 1.0).abs() < f64::EPSILON);
    assert!((candles[1].cvd - 4.0).abs() < f64::EPSILON);
    assert!((candles[2].cvd - 2.0).abs() < f64::EPSILON);
}

#[test]
fn volume_profile_conserves_bucket_volume() {
    let trades = vec![
        trade(1, 100.0, 1.5, 1_000, false),
        trade(2, 100.0, 0.5, 2_000, true),
        trade(3, 101.0, 2.0, 3_000, true),
        trade(4, 102.0, 1.0, 4_000, false),
        trade(5, 101.0, 0.25, 65_000, false),
        trade(6, 99.0, 4.0, 66_000, true),
    ];
    let candles = build_candles(&trades, Interval::M1, 1.0).expect("aggregation should succeed");
    assert_eq!(candles.len(), 2);

    for candle in &candles {
        let level_total: f64 = candle.levels.iter().map(|l| l.volume).sum();
        assert!(
            (level_total - candle.volume).abs() < 1e-9,
            "price levels must account for the whole bucket volume"
        );
        for level in &candle.levels {
            assert!((level.bid + level.ask - level.volume).abs() < 1e-9);
            assert!((level.ask - level.bid - level.delta).abs() < 1e-9);
        }
    }
}

#[test]
fn levels_are_sorted_by_price_descending() {
    let trades = vec![
        trade(1, 100.0, 1.0, 1_000, false),
        trade(2, 103.0, 1.0, 2_000, false),
        trade(3, 101.0, 1.0, 3_000, true),
        trade(4, 102.0, 1.0, 4_000, true),
    ];
    let candles = build_candles(&trades, Interval::M1, 1.0).expect("aggregation should succeed");
    let prices: Vec<f64> = candles[0].levels.iter().map(|l| l.price).collect();
    assert_eq!(prices, vec![103.0, 102.0, 101.0, 100.0]);
}

#[test]
fn nearby_prices_collapse_into_one_level() {
    // 100.04 and 99.96 both round to the 100.0 level at a 0.1 tick.
    let trades = vec![
        trade(1, 100.04, 1.0, 1_000, false),
        trade(2, 99.96, 2.0, 2_000, true),
    ];
    let candles = build_candles(&trades, Interval::M1, 0.1).expect("aggregation should succeed");
    assert_eq!(candles[0].levels.len(), 1);
    let level = &candles[0].levels[0];
    assert!((level.price - 100.0).abs() < 1e-9);
    assert!((level.volume - 3.0).abs() < f64::EPSILON);
    assert!((level.ask - 1.0).abs() < f64::EPSILON);
    assert!((level.bid - 2.0).abs() < f64::EPSILON);
}

#[test]
fn empty_input_produces_no_candles() {
    let candles = build_candles(&[], Interval::M1, 1.0).expect("aggregation should succeed");
    assert!(candles.is_empty());
}

#[test]
fn single_trade_bucket_is_flat() {
    let trades = vec![trade(1, 250.5, 0.4, 61_000, true)];
    let candles = build_candles(&trades, Interval::M1, 0.5).expect("aggregation should succeed");
    assert_eq!(candles.len(), 1);
    let candle = &candles[0];
    assert_eq!(candle.open_time, 60_000);
    assert!((candle.open - 250.5).abs() < f64::EPSILON);
    assert!((candle.high - 250.5).abs() < f64::EPSILON);
    assert!((candle.low - 250.5).abs() < f64::EPSILON);
    assert!((candle.close - 250.5).abs() < f64::EPSILON);
    assert!((candle.delta + 0.4).abs() < f64::EPSILON);
}

#[test]
fn insertion_order_does_not_change_the_result() {
    let mut trades = vec![
        trade(1, 100.0, 1.0, 5_000, false),
        trade(2, 101.0, 2.0, 15_000, true),
        trade(3, 99.5, 0.5, 70_000, false),
        trade(4, 100.5, 1.5, 125_000, true),
        trade(5, 100.0, 3.0, 126_000, false),
    ];
    let forward = build_candles(&trades, Interval::M1, 0.5).expect("aggregation should succeed");
    trades.reverse();
    let backward = build_candles(&trades, Interval::M1, 0.5).expect("aggregation should succeed");
    assert_eq!(forward, backward);
}

#[test]
fn non_positive_tick_sizes_are_rejected() {
    assert!(Aggregator::new(Interval::M1, 0.0).is_err());
    assert!(Aggregator::new(Interval::M1, -1.0).is_err());
    assert!(build_candles(&[], Interval::M5, f64::NAN).is_err());
}
