use duckdb::params;

use crate::error::Result;
use crate::model::trade::{Instrument, Trade};

use super::TickStore;

impl TickStore {
    /// Idempotently create an instrument's trade log. Safe to call from
    /// multiple workers targeting the same partition.
    pub fn ensure_trade_table(&self, instrument: &Instrument) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                id BIGINT PRIMARY KEY,
                price DOUBLE NOT NULL,
                qty DOUBLE NOT NULL,
                time_ms BIGINT NOT NULL,
                is_buyer_maker BOOLEAN NOT NULL
            );
            "#,
            table = instrument.trade_table()
        ))?;
        Ok(())
    }

    /// Bulk insert with merge semantics: rows whose `id` already exists are
    /// silently skipped, so overlapping writers never conflict. Returns the
    /// number of rows actually inserted; empty input is a no-op.
    pub fn insert_trades(&self, instrument: &Instrument, trades: &[Trade]) -> Result<usize> {
        if trades.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                r#"
                INSERT INTO "{table}" (id, price, qty, time_ms, is_buyer_maker)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (id) DO NOTHING
                "#,
                table = instrument.trade_table()
            ))?;
            for trade in trades {
                inserted += stmt.execute(params![
                    trade.id,
                    trade.price,
                    trade.qty,
                    trade.time_ms,
                    trade.is_buyer_maker,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Maximum stored trade time for the partition, `None` when the
    /// partition is empty or its table has never been created. Drives
    /// backfill resumption.
    pub fn last_trade_time(&self, instrument: &Instrument) -> Result<Option<i64>> {
        self.max_trade_column(instrument, "time_ms")
    }

    /// Maximum stored trade id, `None` for an empty or absent partition.
    /// Drives the stream worker's gap catch-up.
    pub fn last_trade_id(&self, instrument: &Instrument) -> Result<Option<i64>> {
        self.max_trade_column(instrument, "id")
    }

    fn max_trade_column(&self, instrument: &Instrument, column: &str) -> Result<Option<i64>> {
        let table = instrument.trade_table();
        if !self.table_exists(&table)? {
            return Ok(None);
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(r#"SELECT MAX({column}) FROM "{table}""#))?;
        let max = stmt.query_row([], |row| row.get::<_, Option<i64>>(0))?;
        Ok(max)
    }

    /// Stream every stored trade for an instrument through `visit`.
    /// Row order is unspecified; aggregation re-derives time order itself.
    pub fn scan_trades(
        &self,
        instrument: &Instrument,
        mut visit: impl FnMut(Trade),
    ) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            r#"SELECT id, price, qty, time_ms, is_buyer_maker FROM "{table}""#,
            table = instrument.trade_table()
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(Trade {
                id: row.get(0)?,
                price: row.get(1)?,
                qty: row.get(2)?,
                time_ms: row.get(3)?,
                is_buyer_maker: row.get(4)?,
            })
        })?;
        for row in rows {
            visit(row?);
        }
        Ok(())
    }

    /// One page of trades filtered by an optional `[start_ms, end_ms]` time
    /// range, newest first (ties broken by id descending). An absent
    /// partition reads as empty.
    pub fn trades_page(
        &self,
        instrument: &Instrument,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Trade>> {
        let table = instrument.trade_table();
        if !self.table_exists(&table)? {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT id, price, qty, time_ms, is_buyer_maker
            FROM "{table}"
            WHERE time_ms >= COALESCE(?, time_ms) AND time_ms <= COALESCE(?, time_ms)
            ORDER BY time_ms DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        ))?;
        let rows = stmt.query_map(
            params![start_ms, end_ms, limit as i64, offset as i64],
            |row| {
                Ok(Trade {
                    id: row.get(0)?,
                    price: row.get(1)?,
                    qty: row.get(2)?,
                    time_ms: row.get(3)?,
                    is_buyer_maker: row.get(4)?,
                })
            },
        )?;
        let mut trades = Vec::new();
        for row in rows {
            trades.push(row?);
        }
        Ok(trades)
    }

    /// Companion total count for `trades_page` under the same time filter.
    pub fn count_trades(
        &self,
        instrument: &Instrument,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<i64> {
        let table = instrument.trade_table();
        if !self.table_exists(&table)? {
            return Ok(0);
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT count(*)
            FROM "{table}"
            WHERE time_ms >= COALESCE(?, time_ms) AND time_ms <= COALESCE(?, time_ms)
            "#
        ))?;
        let count: i64 = stmt.query_row(params![start_ms, end_ms], |row| row.get(0))?;
        Ok(count)
    }
}
