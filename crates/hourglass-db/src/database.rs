use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use hourglass_common::{Error, Result};
use hourglass_config::DatabaseConfig;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

/// Shared SQLite handle for the Hourglass database.
///
/// All schema work (introspection, destructive DDL, the additive sync and the
/// migration ledger) goes through this one connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.name.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::open_path(
            &config.name,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    pub fn open_path(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing database without creating it or changing its journal mode.
    pub fn open_read_only(config: &DatabaseConfig) -> Result<Self> {
        let conn = Connection::open_with_flags(
            &config.name,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::Database(format!("failed to open database read-only: {e}")))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }

    /// Run a batch of raw SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(sql)
            .map_err(|e| Error::Database(format!("statement failed: {e}")))
    }
}

/// Quote an SQL identifier, doubling any embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
