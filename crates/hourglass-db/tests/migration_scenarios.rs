use std::cell::Cell;
use std::path::Path;
use std::time::Duration;

use hourglass_common::Result;
use hourglass_config::AppConfig;
use hourglass_db::{
    Database, EntitySync, MigrationOutcome, MigrationRunner, SchemaIntrospector, SchemaMigrator,
    SqliteLedger, builtin_registry, migrate,
};

const DROP_DIAGNOSTICS_USER: &str = "202203191-drop_diagnostics_user";
const DROP_RANK_COLUMN: &str = "20221016-drop_rank_column";

/// Schema as it looked before both legacy artifacts were retired.
const LEGACY_SCHEMA: &str = "
CREATE TABLE users (id TEXT PRIMARY KEY);
CREATE TABLE leaderboard_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    interval TEXT NOT NULL DEFAULT '',
    total INTEGER NOT NULL DEFAULT 0,
    rank INTEGER
);
CREATE TABLE diagnostics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT,
    platform TEXT,
    CONSTRAINT fk_diagnostics_user FOREIGN KEY (user_id) REFERENCES users(id)
);
INSERT INTO users (id) VALUES ('alice');
INSERT INTO leaderboard_items (user_id, interval, total, rank) VALUES ('alice', '7_days', 3600, 1);
INSERT INTO diagnostics (user_id, platform) VALUES ('alice', 'linux');
";

/// Forwards to a real database and counts every introspection or DDL call.
struct CountingDb<'a> {
    inner: &'a Database,
    calls: Cell<usize>,
}

impl<'a> CountingDb<'a> {
    fn new(inner: &'a Database) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
        }
    }

    fn bump(&self) {
        self.calls.set(self.calls.get() + 1);
    }
}

impl SchemaIntrospector for CountingDb<'_> {
    fn table_exists(&self, table: &str) -> Result<bool> {
        self.bump();
        self.inner.table_exists(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        self.bump();
        self.inner.column_exists(table, column)
    }

    fn constraint_exists(&self, table: &str, constraint: &str) -> Result<bool> {
        self.bump();
        self.inner.constraint_exists(table, constraint)
    }
}

impl SchemaMigrator for CountingDb<'_> {
    fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        self.bump();
        self.inner.drop_column(table, column)
    }

    fn drop_constraint(&self, table: &str, constraint: &str) -> Result<()> {
        self.bump();
        self.inner.drop_constraint(table, constraint)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.bump();
        self.inner.drop_table(table)
    }

    fn execute_sql(&self, sql: &str) -> Result<()> {
        self.bump();
        self.inner.execute_sql(sql)
    }
}

fn run_builtins(db: &Database, handle: &dyn SchemaMigrator) -> hourglass_db::RunReport {
    let ledger = SqliteLedger::new(db);
    let sync = EntitySync::current(db);
    let mut runner = MigrationRunner::new(builtin_registry().unwrap(), &ledger, &sync);
    runner.run(handle, &AppConfig::default())
}

fn open_file(path: &Path) -> Database {
    Database::open_path(path, Duration::from_secs(5)).unwrap()
}

#[test]
fn fresh_database_records_builtins_without_ddl() {
    let db = Database::in_memory().unwrap();
    let counting = CountingDb::new(&db);

    let report = run_builtins(&db, &counting);

    assert_eq!(
        report.outcome_of(DROP_DIAGNOSTICS_USER),
        Some(&MigrationOutcome::NoopGuardFalse)
    );
    assert_eq!(
        report.outcome_of(DROP_RANK_COLUMN),
        Some(&MigrationOutcome::NoopGuardFalse)
    );

    let names: Vec<_> = SqliteLedger::new(&db)
        .records()
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec![DROP_DIAGNOSTICS_USER, DROP_RANK_COLUMN]);

    // Only guard predicates were evaluated: column check for one, table + column for the other.
    assert_eq!(counting.calls.get(), 3);
}

#[test]
fn legacy_rank_column_dropped_once_then_short_circuited() {
    let db = Database::in_memory().unwrap();
    db.execute_batch(LEGACY_SCHEMA).unwrap();

    let first = run_builtins(&db, &db);
    assert_eq!(first.outcome_of(DROP_RANK_COLUMN), Some(&MigrationOutcome::Applied));
    assert!(!db.column_exists("leaderboard_items", "rank").unwrap());
    assert!(db.column_exists("leaderboard_items", "total").unwrap());

    let counting = CountingDb::new(&db);
    let second = run_builtins(&db, &counting);

    assert_eq!(second.outcome_of(DROP_RANK_COLUMN), Some(&MigrationOutcome::Skipped));
    assert_eq!(
        second.outcome_of(DROP_DIAGNOSTICS_USER),
        Some(&MigrationOutcome::Skipped)
    );
    assert_eq!(counting.calls.get(), 0);
}

#[test]
fn legacy_diagnostics_lose_constraint_and_column() {
    let db = Database::in_memory().unwrap();
    db.execute_batch(LEGACY_SCHEMA).unwrap();

    let report = run_builtins(&db, &db);

    assert_eq!(
        report.outcome_of(DROP_DIAGNOSTICS_USER),
        Some(&MigrationOutcome::Applied)
    );
    assert!(!db.constraint_exists("diagnostics", "fk_diagnostics_user").unwrap());
    assert!(!db.column_exists("diagnostics", "user_id").unwrap());
    // The additive sync filled in the columns the current entity has.
    assert!(db.column_exists("diagnostics", "stack_trace").unwrap());
}

#[test]
fn missing_constraint_only_warns_and_still_drops_column() {
    let db = Database::in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE diagnostics (
             id INTEGER PRIMARY KEY AUTOINCREMENT, user_id TEXT, platform TEXT
         );
         INSERT INTO diagnostics (user_id, platform) VALUES ('alice', 'linux');",
    )
    .unwrap();

    let report = run_builtins(&db, &db);

    let outcome = report.outcome_of(DROP_DIAGNOSTICS_USER).unwrap();
    let warnings = outcome.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].step.contains("fk_diagnostics_user"));
    assert!(!db.column_exists("diagnostics", "user_id").unwrap());
    assert!(SqliteLedger::new(&db).has_completed_record(DROP_DIAGNOSTICS_USER));
}

/// Lets a second instance run its whole pass right before this instance's first
/// destructive call, after both have seen the guard as true.
struct RacingDb<'a> {
    own: &'a Database,
    rival: &'a Database,
    raced: Cell<bool>,
}

impl SchemaIntrospector for RacingDb<'_> {
    fn table_exists(&self, table: &str) -> Result<bool> {
        self.own.table_exists(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        self.own.column_exists(table, column)
    }

    fn constraint_exists(&self, table: &str, constraint: &str) -> Result<bool> {
        self.own.constraint_exists(table, constraint)
    }
}

impl SchemaMigrator for RacingDb<'_> {
    fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        if !self.raced.replace(true) {
            let rival = migrate(self.rival, &AppConfig::default()).unwrap();
            assert_eq!(rival.outcome_of(DROP_RANK_COLUMN), Some(&MigrationOutcome::Applied));
        }
        self.own.drop_column(table, column)
    }

    fn drop_constraint(&self, table: &str, constraint: &str) -> Result<()> {
        self.own.drop_constraint(table, constraint)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.own.drop_table(table)
    }

    fn execute_sql(&self, sql: &str) -> Result<()> {
        self.own.execute_sql(sql)
    }
}

#[test]
fn concurrent_instances_both_record_and_drop_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let instance_a = open_file(&path);
    let instance_b = open_file(&path);
    instance_a
        .execute_batch(
            "CREATE TABLE leaderboard_items (id INTEGER PRIMARY KEY AUTOINCREMENT, rank INTEGER);",
        )
        .unwrap();

    let racing = RacingDb {
        own: &instance_a,
        rival: &instance_b,
        raced: Cell::new(false),
    };
    let report = run_builtins(&instance_a, &racing);

    let outcome = report.outcome_of(DROP_RANK_COLUMN).unwrap();
    assert_eq!(outcome.warnings().len(), 1);
    assert!(outcome.warnings()[0].error.contains("rank"));

    assert!(!instance_a.column_exists("leaderboard_items", "rank").unwrap());
    assert!(SqliteLedger::new(&instance_a).has_completed_record(DROP_RANK_COLUMN));
    assert!(SqliteLedger::new(&instance_b).has_completed_record(DROP_RANK_COLUMN));
}

#[test]
fn crash_before_ledger_write_heals_on_next_start() {
    let db = Database::in_memory().unwrap();
    db.execute_batch(LEGACY_SCHEMA).unwrap();
    // Mutation applied by a previous process that died before recording it.
    db.drop_column("leaderboard_items", "rank").unwrap();

    let report = run_builtins(&db, &db);

    assert_eq!(
        report.outcome_of(DROP_RANK_COLUMN),
        Some(&MigrationOutcome::NoopGuardFalse)
    );
    assert!(SqliteLedger::new(&db).has_completed_record(DROP_RANK_COLUMN));
}

#[test]
fn skip_migrations_leaves_database_untouched() {
    let db = Database::in_memory().unwrap();
    db.execute_batch(LEGACY_SCHEMA).unwrap();
    let config = AppConfig {
        skip_migrations: true,
        ..AppConfig::default()
    };

    let report = migrate(&db, &config).unwrap();

    assert!(report.disabled);
    assert!(db.column_exists("leaderboard_items", "rank").unwrap());
    assert!(!db.table_exists("schema_migrations").unwrap());
}

trait LedgerExt {
    fn has_completed_record(&self, name: &str) -> bool;
}

impl LedgerExt for SqliteLedger<'_> {
    fn has_completed_record(&self, name: &str) -> bool {
        self.record(name).unwrap().is_some()
    }
}
