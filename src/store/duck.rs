use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use duckdb::Connection;

use crate::error::{AppError, Result};

/// Reject any table name not built from validated parts. Derived names only
/// ever contain lower-case alphanumerics and underscores.
pub(crate) fn ensure_identifier(name: &str) -> Result<()> {
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid table name '{}'", name)))
    }
}

/// Handle to the DuckDB database holding every trade log and candle table.
///
/// Cloning shares the underlying connection; each worker receives its own
/// clone at construction, so no global connection state exists. All table
/// identifiers are derived from validated `Instrument`/`Interval` values;
/// row values are always bound as parameters.
#[derive(Clone)]
pub struct TickStore {
    conn: Arc<Mutex<Connection>>,
}

impl TickStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Catalog existence check for any table name.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT count(*) FROM information_schema.tables WHERE table_name = ?")?;
        let count: i64 = stmt.query_row([name], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Total row count of an existing table.
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        ensure_identifier(table)?;
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(r#"SELECT count(*) FROM "{}""#, table))?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count)
    }
}
