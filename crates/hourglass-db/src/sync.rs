//! Additive schema sync: creates missing tables and columns for the current entity
//! definitions. It never drops or alters existing schema; removals are the job of
//! the hand-written migrations.

use hourglass_common::Result;
use tracing::{debug, info};

use crate::database::{Database, quote_ident};
use crate::schema::SchemaIntrospector;

pub trait SchemaSync {
    fn sync(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    /// Type and column constraints, e.g. `TEXT NOT NULL DEFAULT ''`. Anything but the
    /// primary key must be addable with `ALTER TABLE ADD COLUMN`: nullable, or
    /// `NOT NULL` with a constant default.
    pub definition: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct EntitySchema {
    pub table: &'static str,
    pub columns: &'static [ColumnDef],
    /// Table-level constraint clauses, only applied when the table is created.
    pub constraints: &'static [&'static str],
}

const fn col(name: &'static str, definition: &'static str) -> ColumnDef {
    ColumnDef { name, definition }
}

/// Current entity definitions, parents before children.
pub const ENTITIES: &[EntitySchema] = &[
    EntitySchema {
        table: "users",
        columns: &[
            col("id", "TEXT PRIMARY KEY"),
            col("api_key", "TEXT"),
            col("email", "TEXT"),
            col("created_at", "TEXT"),
            col("last_logged_in_at", "TEXT"),
            col("share_leaderboard", "INTEGER NOT NULL DEFAULT 0"),
        ],
        constraints: &[],
    },
    EntitySchema {
        table: "heartbeats",
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("user_id", "TEXT"),
            col("entity", "TEXT NOT NULL DEFAULT ''"),
            col("project", "TEXT"),
            col("language", "TEXT"),
            col("editor", "TEXT"),
            col("time", "TEXT"),
        ],
        constraints: &[
            concat!(
                "CONSTRAINT fk_heartbeats_user FOREIGN KEY (user_id) ",
                "REFERENCES users(id) ON DELETE CASCADE"
            ),
        ],
    },
    EntitySchema {
        table: "summaries",
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("user_id", "TEXT"),
            col("from_time", "TEXT NOT NULL DEFAULT ''"),
            col("to_time", "TEXT NOT NULL DEFAULT ''"),
        ],
        constraints: &[
            concat!(
                "CONSTRAINT fk_summaries_user FOREIGN KEY (user_id) ",
                "REFERENCES users(id) ON DELETE CASCADE"
            ),
        ],
    },
    EntitySchema {
        table: "leaderboard_items",
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("user_id", "TEXT"),
            col("interval", "TEXT NOT NULL DEFAULT ''"),
            col("by", "TEXT"),
            col("total", "INTEGER NOT NULL DEFAULT 0"),
            col("key", "TEXT"),
            col("created_at", "TEXT"),
        ],
        constraints: &[
            concat!(
                "CONSTRAINT fk_leaderboard_items_user FOREIGN KEY (user_id) ",
                "REFERENCES users(id) ON DELETE CASCADE"
            ),
        ],
    },
    EntitySchema {
        table: "diagnostics",
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("platform", "TEXT"),
            col("architecture", "TEXT"),
            col("plugin", "TEXT"),
            col("cli_version", "TEXT"),
            col("logs", "TEXT"),
            col("stack_trace", "TEXT"),
        ],
        constraints: &[],
    },
    EntitySchema {
        table: "key_string_values",
        columns: &[col("key", "TEXT PRIMARY KEY"), col("value", "TEXT")],
        constraints: &[],
    },
    EntitySchema {
        table: crate::ledger::LEDGER_TABLE,
        columns: &[
            col("name", "TEXT PRIMARY KEY"),
            col("completed_at", "TEXT NOT NULL DEFAULT ''"),
        ],
        constraints: &[],
    },
];

/// Sync driven by a static entity catalogue.
pub struct EntitySync<'a> {
    db: &'a Database,
    entities: &'a [EntitySchema],
}

impl<'a> EntitySync<'a> {
    pub fn new(db: &'a Database, entities: &'a [EntitySchema]) -> Self {
        Self { db, entities }
    }

    pub fn current(db: &'a Database) -> Self {
        Self::new(db, ENTITIES)
    }

    fn sync_entity(&self, entity: &EntitySchema) -> Result<()> {
        if !self.db.table_exists(entity.table)? {
            info!("creating table {}", entity.table);
            return self.db.execute_batch(&create_table_sql(entity));
        }

        for column in entity.columns {
            if !self.db.column_exists(entity.table, column.name)? {
                info!("adding column {}.{}", entity.table, column.name);
                self.db.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(entity.table),
                    quote_ident(column.name),
                    column.definition
                ))?;
            }
        }
        Ok(())
    }
}

impl SchemaSync for EntitySync<'_> {
    fn sync(&self) -> Result<()> {
        for entity in self.entities {
            self.sync_entity(entity)?;
        }
        debug!("schema sync checked {} entities", self.entities.len());
        Ok(())
    }
}

fn create_table_sql(entity: &EntitySchema) -> String {
    let mut parts: Vec<String> = entity
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(c.name), c.definition))
        .collect();
    parts.extend(entity.constraints.iter().map(|c| c.to_string()));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(entity.table),
        parts.join(",\n    ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_every_entity_on_an_empty_database() {
        let db = Database::in_memory().unwrap();
        EntitySync::current(&db).sync().unwrap();

        for entity in ENTITIES {
            assert!(db.table_exists(entity.table).unwrap(), "{}", entity.table);
        }
        assert!(db.constraint_exists("heartbeats", "fk_heartbeats_user").unwrap());
    }

    #[test]
    fn current_schema_has_no_legacy_columns() {
        let db = Database::in_memory().unwrap();
        EntitySync::current(&db).sync().unwrap();

        assert!(!db.column_exists("leaderboard_items", "rank").unwrap());
        assert!(!db.column_exists("diagnostics", "user_id").unwrap());
    }

    #[test]
    fn adds_missing_columns_and_leaves_extra_ones() {
        let db = Database::in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE diagnostics (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id TEXT)",
        )
        .unwrap();

        EntitySync::current(&db).sync().unwrap();

        assert!(db.column_exists("diagnostics", "stack_trace").unwrap());
        assert!(db.column_exists("diagnostics", "user_id").unwrap());
    }

    #[test]
    fn adds_columns_to_legacy_tables_missing_most_fields() {
        let db = Database::in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE users (id TEXT PRIMARY KEY);
             CREATE TABLE leaderboard_items (id INTEGER PRIMARY KEY AUTOINCREMENT, rank INTEGER);",
        )
        .unwrap();

        EntitySync::current(&db).sync().unwrap();

        for entity in ENTITIES {
            for column in entity.columns {
                assert!(
                    db.column_exists(entity.table, column.name).unwrap(),
                    "{}.{}",
                    entity.table,
                    column.name
                );
            }
        }
    }

    #[test]
    fn sync_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let sync = EntitySync::current(&db);
        sync.sync().unwrap();
        sync.sync().unwrap();
    }
}
