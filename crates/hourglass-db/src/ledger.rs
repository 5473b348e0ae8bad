use chrono::{DateTime, Utc};
use hourglass_common::{Error, Result};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database::Database;
use crate::schema::SchemaIntrospector;

pub const LEDGER_TABLE: &str = "schema_migrations";

const CREATE_LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    name TEXT PRIMARY KEY,
    completed_at TEXT NOT NULL
)";

/// Durable record of which migrations have finished.
///
/// Neither operation can fail from the caller's point of view: an unreadable ledger
/// reports "not completed" and a failed write is logged, so the worst case is a
/// migration being attempted again on the next start.
pub trait MigrationLedger {
    fn has_completed(&self, name: &str) -> bool;
    fn mark_completed(&self, name: &str);
}

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub name: String,
    pub completed_at: DateTime<Utc>,
}

/// Ledger stored in the `schema_migrations` table of the migrated database.
pub struct SqliteLedger<'a> {
    db: &'a Database,
}

impl<'a> SqliteLedger<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn record(&self, name: &str) -> Result<Option<MigrationRecord>> {
        if !self.db.table_exists(LEDGER_TABLE)? {
            return Ok(None);
        }
        let conn = self.db.connection()?;
        conn.query_row(
            "SELECT name, completed_at FROM schema_migrations WHERE name = ?1",
            params![name],
            |row| {
                Ok(MigrationRecord {
                    name: row.get(0)?,
                    completed_at: parse_datetime(row.get::<_, String>(1)?),
                })
            },
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to read ledger entry {name}: {e}")))
    }

    /// All recorded migrations, ordered by name.
    pub fn records(&self) -> Result<Vec<MigrationRecord>> {
        if !self.db.table_exists(LEDGER_TABLE)? {
            return Ok(Vec::new());
        }
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare("SELECT name, completed_at FROM schema_migrations ORDER BY name ASC")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(MigrationRecord {
                    name: row.get(0)?,
                    completed_at: parse_datetime(row.get::<_, String>(1)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let record =
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }

    fn write(&self, name: &str) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute_batch(CREATE_LEDGER_SQL)
            .map_err(|e| Error::Database(format!("failed to create ledger table: {e}")))?;
        conn.execute(
            "INSERT INTO schema_migrations (name, completed_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET completed_at = excluded.completed_at",
            params![name, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to record migration: {e}")))?;
        Ok(())
    }
}

impl MigrationLedger for SqliteLedger<'_> {
    fn has_completed(&self, name: &str) -> bool {
        match self.record(name) {
            Ok(record) => record.is_some(),
            Err(e) => {
                warn!("could not read migration ledger for '{name}', assuming not run ({e})");
                false
            }
        }
    }

    fn mark_completed(&self, name: &str) {
        match self.write(name) {
            Ok(()) => debug!("recorded migration '{name}' as completed"),
            Err(e) => warn!("failed to record migration '{name}' as completed ({e})"),
        }
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // Rows written by hand through sqlite3 use datetime('now'): "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}
