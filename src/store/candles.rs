use duckdb::params;

use crate::candles::Interval;
use crate::error::Result;
use crate::model::candle::{parse_clusters, Candle};
use crate::model::trade::Instrument;

use super::TickStore;

/// Name of the materialized candle table for an instrument/interval pair,
/// e.g. `binance_spot_btcusdt_candles_15m`.
pub fn candle_table_name(instrument: &Instrument, interval: Interval) -> String {
    format!("{}_candles_{}", instrument.trade_table(), interval)
}

impl TickStore {
    /// Replace the candle table wholesale. The new rows land in a staging
    /// table which is renamed over the destination inside one transaction,
    /// so readers observe either the previous table or the new one in full.
    pub fn write_candles(
        &self,
        instrument: &Instrument,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<()> {
        let table = candle_table_name(instrument, interval);
        let staging = format!("{}_staging", table);
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            tx.execute_batch(&format!(
                r#"
                DROP TABLE IF EXISTS "{staging}";
                CREATE TABLE "{staging}" (
                    open_time BIGINT PRIMARY KEY,
                    open DOUBLE NOT NULL,
                    high DOUBLE NOT NULL,
                    low DOUBLE NOT NULL,
                    close DOUBLE NOT NULL,
                    volume DOUBLE NOT NULL,
                    delta DOUBLE NOT NULL,
                    cvd DOUBLE NOT NULL,
                    clusters VARCHAR NOT NULL
                );
                "#
            ))?;
            let mut stmt = tx.prepare(&format!(
                r#"
                INSERT INTO "{staging}"
                (open_time, open, high, low, close, volume, delta, cvd, clusters)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#
            ))?;
            for candle in candles {
                stmt.execute(params![
                    candle.open_time,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                    candle.delta,
                    candle.cvd,
                    candle.clusters_json()?,
                ])?;
            }
            tx.execute_batch(&format!(
                r#"
                DROP TABLE IF EXISTS "{table}";
                ALTER TABLE "{staging}" RENAME TO "{table}";
                "#
            ))?;
        }
        tx.commit()?;
        Ok(())
    }

    /// All rows of a materialized candle table ordered by open time, with
    /// clusters decoded. An absent table reads as empty.
    pub fn read_candles(&self, instrument: &Instrument, interval: Interval) -> Result<Vec<Candle>> {
        let table = candle_table_name(instrument, interval);
        if !self.table_exists(&table)? {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT open_time, open, high, low, close, volume, delta, cvd, clusters
            FROM "{table}"
            ORDER BY open_time ASC
            "#
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, f64>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;
        let mut candles = Vec::new();
        for row in rows {
            let (open_time, open, high, low, close, volume, delta, cvd, clusters) = row?;
            candles.push(Candle {
                open_time,
                open,
                high,
                low,
                close,
                volume,
                delta,
                cvd,
                levels: parse_clusters(&clusters)?,
            });
        }
        Ok(candles)
    }
}
