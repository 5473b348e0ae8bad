use hourglass_common::Result;
use hourglass_config::AppConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::ledger::{MigrationLedger, SqliteLedger};
use crate::migration::{MigrationDescriptor, MigrationOutcome, Phase};
use crate::migrations::builtin_registry;
use crate::registry::MigrationRegistry;
use crate::schema::SchemaMigrator;
use crate::sync::{EntitySync, SchemaSync};

/// Lifecycle of a single migration pass. Strictly linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    RunningPre,
    SyncingSchema,
    RunningPost,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub name: String,
    pub phase: Phase,
    pub outcome: MigrationOutcome,
}

/// What happened during a pass. Informational only; a pass never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Migrations were disabled by configuration and nothing was consulted.
    pub disabled: bool,
    pub pre: Vec<MigrationReport>,
    pub sync_error: Option<String>,
    pub post: Vec<MigrationReport>,
}

impl RunReport {
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn migrations(&self) -> impl Iterator<Item = &MigrationReport> {
        self.pre.iter().chain(self.post.iter())
    }

    pub fn outcome_of(&self, name: &str) -> Option<&MigrationOutcome> {
        self.migrations()
            .find(|m| m.name == name)
            .map(|m| &m.outcome)
    }
}

/// Executes the pre-phase, the additive sync and the post-phase, in that order.
pub struct MigrationRunner<'a> {
    registry: MigrationRegistry,
    ledger: &'a dyn MigrationLedger,
    sync: &'a dyn SchemaSync,
    state: RunnerState,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(
        registry: MigrationRegistry,
        ledger: &'a dyn MigrationLedger,
        sync: &'a dyn SchemaSync,
    ) -> Self {
        Self {
            registry,
            ledger,
            sync,
            state: RunnerState::Idle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Run the whole pass once. Failures are logged and reported, never returned.
    pub fn run(&mut self, db: &dyn SchemaMigrator, config: &AppConfig) -> RunReport {
        if self.state != RunnerState::Idle {
            warn!("migration pass already ran in state {:?}, ignoring", self.state);
            return RunReport::default();
        }
        if config.skip_migrations {
            info!("skipping database migrations");
            self.transition(RunnerState::Done);
            return RunReport::disabled();
        }

        let mut report = RunReport::default();

        self.transition(RunnerState::RunningPre);
        report.pre = self.run_phase(self.registry.list_pre(), db, config);

        self.transition(RunnerState::SyncingSchema);
        if let Err(e) = self.sync.sync() {
            warn!("additive schema sync failed, continuing with post migrations ({e})");
            report.sync_error = Some(e.to_string());
        }

        self.transition(RunnerState::RunningPost);
        report.post = self.run_phase(self.registry.list_post(), db, config);

        self.transition(RunnerState::Done);
        report
    }

    fn run_phase(
        &self,
        migrations: &[MigrationDescriptor],
        db: &dyn SchemaMigrator,
        config: &AppConfig,
    ) -> Vec<MigrationReport> {
        migrations
            .iter()
            .map(|migration| {
                let outcome = migration.execute(db, self.ledger, config);
                log_outcome(migration.name(), &outcome);
                MigrationReport {
                    name: migration.name().to_string(),
                    phase: migration.phase(),
                    outcome,
                }
            })
            .collect()
    }

    fn transition(&mut self, next: RunnerState) {
        debug!("migration runner: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn log_outcome(name: &str, outcome: &MigrationOutcome) {
    match outcome {
        MigrationOutcome::Skipped | MigrationOutcome::NoopGuardFalse => {
            debug!("migration '{name}': {}", outcome.label())
        }
        MigrationOutcome::Applied => info!("migration '{name}': applied"),
        MigrationOutcome::AppliedWithWarnings(failures) => warn!(
            "migration '{name}': applied with {} failed step(s)",
            failures.len()
        ),
    }
}

/// Run the built-in migrations against `db` with the SQLite ledger and the current
/// entity catalogue. Only registry construction can fail, before any schema work.
pub fn migrate(db: &Database, config: &AppConfig) -> Result<RunReport> {
    if config.skip_migrations {
        info!("skipping database migrations");
        return Ok(RunReport::disabled());
    }

    let registry = builtin_registry()?;
    let ledger = SqliteLedger::new(db);
    let sync = EntitySync::current(db);

    let mut runner = MigrationRunner::new(registry, &ledger, &sync);
    Ok(runner.run(db, config))
}
