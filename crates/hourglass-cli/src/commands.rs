use std::path::Path;

use anyhow::{Context, Result};
use hourglass_config::AppConfig;
use hourglass_db::{
    Database, MigrationRecord, MigrationRegistry, Phase, RunReport, SqliteLedger,
    builtin_registry, migrate,
};
use serde::Serialize;
use tracing::info;

use crate::banner::print_banner;

/// Run the migration pass and print what happened to each migration.
pub fn run_migrate(config: &AppConfig, config_path: &Path) -> Result<()> {
    let registry = builtin_registry().context("invalid migration registry")?;
    print_banner(config, config_path, registry.len());

    let db = Database::open(&config.db)
        .with_context(|| format!("could not open database {}", config.db.name.display()))?;
    let report = migrate(&db, config)?;

    for line in summarize(&report) {
        println!("{line}");
    }
    info!("migration pass finished");
    Ok(())
}

/// Print every registered migration with its ledger state.
pub fn run_status(config: &AppConfig, json: bool) -> Result<()> {
    let registry = builtin_registry().context("invalid migration registry")?;
    let records = ledger_records(config)?;

    let rows = status_rows(&registry, &records);
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            let phase = row.phase.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
            let state = row.completed_at.as_deref().unwrap_or("pending");
            println!("{:<40} {:<5} {state}", row.name, phase);
        }
    }
    Ok(())
}

/// Ledger contents, read without creating or modifying the database.
fn ledger_records(config: &AppConfig) -> Result<Vec<MigrationRecord>> {
    if !config.db.name.exists() {
        info!("database {} does not exist yet", config.db.name.display());
        return Ok(Vec::new());
    }
    let db = Database::open_read_only(&config.db)
        .with_context(|| format!("could not open database {}", config.db.name.display()))?;
    SqliteLedger::new(&db)
        .records()
        .context("could not read migration ledger")
}

/// Validate config and registry without touching the database.
pub fn run_check(config: &AppConfig) -> Result<()> {
    let registry = builtin_registry().context("invalid migration registry")?;
    println!(
        "config ok: {} pre-phase and {} post-phase migrations registered, database {}",
        registry.list_pre().len(),
        registry.list_post().len(),
        config.db.name.display()
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub name: String,
    /// `None` for ledger entries no registered migration claims.
    pub phase: Option<Phase>,
    pub completed_at: Option<String>,
}

fn status_rows(registry: &MigrationRegistry, records: &[MigrationRecord]) -> Vec<StatusRow> {
    let completed = |name: &str| {
        records
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.completed_at.to_rfc3339())
    };

    let mut rows: Vec<StatusRow> = registry
        .iter()
        .map(|d| StatusRow {
            name: d.name().to_string(),
            phase: Some(d.phase()),
            completed_at: completed(d.name()),
        })
        .collect();

    rows.extend(
        records
            .iter()
            .filter(|r| !registry.contains(&r.name))
            .map(|r| StatusRow {
                name: r.name.clone(),
                phase: None,
                completed_at: Some(r.completed_at.to_rfc3339()),
            }),
    );
    rows
}

fn summarize(report: &RunReport) -> Vec<String> {
    if report.disabled {
        return vec!["migrations disabled by configuration".to_string()];
    }

    let mut lines = Vec::new();
    for migration in report.migrations() {
        lines.push(format!(
            "{:<40} {:<5} {}",
            migration.name,
            migration.phase.to_string(),
            migration.outcome.label()
        ));
        for failure in migration.outcome.warnings() {
            lines.push(format!("    warning: {}: {}", failure.step, failure.error));
        }
    }
    if let Some(error) = &report.sync_error {
        lines.push(format!("schema sync failed: {error}"));
    }
    lines
}
