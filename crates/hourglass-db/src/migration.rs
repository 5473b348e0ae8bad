//! The migration contract.
//!
//! A migration is attempted at most once per database: the ledger short-circuits it
//! on later starts, its guard turns it into a no-op on schemas that never had the
//! legacy artifact, and every mutation sub-step failure is downgraded to a warning.

use std::fmt;

use hourglass_common::Result;
use hourglass_config::AppConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ledger::MigrationLedger;
use crate::schema::SchemaMigrator;

/// Position of a migration relative to the additive schema sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pre,
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => write!(f, "pre"),
            Phase::Post => write!(f, "post"),
        }
    }
}

/// A mutation sub-step that failed and was downgraded to a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "warnings", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The ledger already lists this migration; nothing was touched.
    Skipped,
    Applied,
    AppliedWithWarnings(Vec<StepFailure>),
    /// The guarded artifact does not exist on this database.
    NoopGuardFalse,
}

impl MigrationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            MigrationOutcome::Skipped => "skipped",
            MigrationOutcome::Applied => "applied",
            MigrationOutcome::AppliedWithWarnings(_) => "applied with warnings",
            MigrationOutcome::NoopGuardFalse => "not applicable",
        }
    }

    pub fn warnings(&self) -> &[StepFailure] {
        match self {
            MigrationOutcome::AppliedWithWarnings(failures) => failures,
            _ => &[],
        }
    }
}

/// Introspection predicate deciding whether a migration's target still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Table(String),
    Column { table: String, column: String },
    Constraint { table: String, constraint: String },
    All(Vec<Guard>),
}

impl Guard {
    pub fn table(table: impl Into<String>) -> Self {
        Guard::Table(table.into())
    }

    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Guard::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn constraint(table: impl Into<String>, constraint: impl Into<String>) -> Self {
        Guard::Constraint {
            table: table.into(),
            constraint: constraint.into(),
        }
    }

    /// Both guards must hold. Evaluation stops at the first one that does not.
    pub fn and(self, other: Guard) -> Self {
        match self {
            Guard::All(mut guards) => {
                guards.push(other);
                Guard::All(guards)
            }
            first => Guard::All(vec![first, other]),
        }
    }

    pub fn holds(&self, db: &dyn SchemaMigrator) -> Result<bool> {
        match self {
            Guard::Table(table) => db.table_exists(table),
            Guard::Column { table, column } => db.column_exists(table, column),
            Guard::Constraint { table, constraint } => db.constraint_exists(table, constraint),
            Guard::All(guards) => {
                for guard in guards {
                    if !guard.holds(db)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Table(table) => write!(f, "table {table}"),
            Guard::Column { table, column } => write!(f, "column {table}.{column}"),
            Guard::Constraint { table, constraint } => {
                write!(f, "constraint {constraint} on {table}")
            }
            Guard::All(guards) => {
                let parts: Vec<String> = guards.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" and "))
            }
        }
    }
}

/// A single destructive schema mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    DropConstraint { table: String, constraint: String },
    DropColumn { table: String, column: String },
    DropTable { table: String },
    Statement(String),
}

impl Step {
    pub fn drop_constraint(table: impl Into<String>, constraint: impl Into<String>) -> Self {
        Step::DropConstraint {
            table: table.into(),
            constraint: constraint.into(),
        }
    }

    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Step::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn drop_table(table: impl Into<String>) -> Self {
        Step::DropTable {
            table: table.into(),
        }
    }

    pub fn statement(sql: impl Into<String>) -> Self {
        Step::Statement(sql.into())
    }

    pub fn apply(&self, db: &dyn SchemaMigrator) -> Result<()> {
        match self {
            Step::DropConstraint { table, constraint } => db.drop_constraint(table, constraint),
            Step::DropColumn { table, column } => db.drop_column(table, column),
            Step::DropTable { table } => db.drop_table(table),
            Step::Statement(sql) => db.execute_sql(sql),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::DropConstraint { table, constraint } => {
                write!(f, "drop constraint '{constraint}' on {table}")
            }
            Step::DropColumn { table, column } => write!(f, "drop column '{column}' of {table}"),
            Step::DropTable { table } => write!(f, "drop table '{table}'"),
            Step::Statement(sql) => write!(f, "execute '{sql}'"),
        }
    }
}

/// What a body reports back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyResult {
    GuardFalse,
    Attempted,
}

/// Execution context handed to a migration body.
pub struct MigrationScope<'a> {
    name: &'a str,
    db: &'a dyn SchemaMigrator,
    config: &'a AppConfig,
    started: bool,
    failures: Vec<StepFailure>,
}

impl<'a> MigrationScope<'a> {
    fn new(name: &'a str, db: &'a dyn SchemaMigrator, config: &'a AppConfig) -> Self {
        Self {
            name,
            db,
            config,
            started: false,
            failures: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn db(&self) -> &'a dyn SchemaMigrator {
        self.db
    }

    pub fn config(&self) -> &'a AppConfig {
        self.config
    }

    /// Evaluate a guard. An introspection error counts as "absent" so nothing
    /// destructive runs against a schema we could not read.
    pub fn check(&self, guard: &Guard) -> bool {
        match guard.holds(self.db) {
            Ok(holds) => {
                debug!("migration '{}': {guard} present = {holds}", self.name);
                holds
            }
            Err(e) => {
                warn!(
                    "migration '{}': could not evaluate guard on {guard}, treating as absent ({e})",
                    self.name
                );
                false
            }
        }
    }

    /// Announce that the migration is about to mutate the schema.
    pub fn begin(&mut self) {
        if !self.started {
            info!("running migration '{}'", self.name);
            self.started = true;
        }
    }

    /// Run one mutation sub-step. Failure is logged and recorded, never propagated.
    pub fn attempt<F>(&mut self, description: impl fmt::Display, op: F) -> bool
    where
        F: FnOnce(&dyn SchemaMigrator) -> Result<()>,
    {
        self.begin();
        match op(self.db) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to {description} ({e})");
                self.failures.push(StepFailure {
                    step: description.to_string(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    pub fn run_step(&mut self, step: &Step) -> bool {
        self.attempt(step, |db| step.apply(db))
    }

    fn into_outcome(self) -> MigrationOutcome {
        if self.failures.is_empty() {
            MigrationOutcome::Applied
        } else {
            MigrationOutcome::AppliedWithWarnings(self.failures)
        }
    }
}

/// The executable part of a migration.
pub trait MigrationBody: Send + Sync {
    fn apply(&self, scope: &mut MigrationScope<'_>) -> BodyResult;
}

impl<F> MigrationBody for F
where
    F: Fn(&mut MigrationScope<'_>) -> BodyResult + Send + Sync,
{
    fn apply(&self, scope: &mut MigrationScope<'_>) -> BodyResult {
        self(scope)
    }
}

/// Pin a closure to the body signature so its scope argument is inferred correctly.
pub fn migration_fn<F>(body: F) -> F
where
    F: Fn(&mut MigrationScope<'_>) -> BodyResult + Send + Sync,
{
    body
}

/// Guarded removal of legacy artifacts: if the guard holds, every step is attempted
/// in order regardless of earlier failures.
#[derive(Debug, Clone)]
pub struct DropArtifacts {
    guard: Guard,
    steps: Vec<Step>,
}

impl DropArtifacts {
    pub fn new(guard: Guard) -> Self {
        Self {
            guard,
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

impl MigrationBody for DropArtifacts {
    fn apply(&self, scope: &mut MigrationScope<'_>) -> BodyResult {
        if !scope.check(&self.guard) {
            return BodyResult::GuardFalse;
        }
        scope.begin();
        for step in &self.steps {
            scope.run_step(step);
        }
        BodyResult::Attempted
    }
}

/// A named, registered migration.
pub struct MigrationDescriptor {
    name: String,
    phase: Phase,
    body: Box<dyn MigrationBody>,
}

impl MigrationDescriptor {
    pub fn new(name: impl Into<String>, phase: Phase, body: impl MigrationBody + 'static) -> Self {
        Self {
            name: name.into(),
            phase,
            body: Box::new(body),
        }
    }

    pub fn pre(name: impl Into<String>, body: impl MigrationBody + 'static) -> Self {
        Self::new(name, Phase::Pre, body)
    }

    pub fn post(name: impl Into<String>, body: impl MigrationBody + 'static) -> Self {
        Self::new(name, Phase::Post, body)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the migration once against `db`, recording it in `ledger` whatever happens.
    pub fn execute(
        &self,
        db: &dyn SchemaMigrator,
        ledger: &dyn MigrationLedger,
        config: &AppConfig,
    ) -> MigrationOutcome {
        if ledger.has_completed(&self.name) {
            debug!("migration '{}' already completed, skipping", self.name);
            return MigrationOutcome::Skipped;
        }

        let mut scope = MigrationScope::new(&self.name, db, config);
        let outcome = match self.body.apply(&mut scope) {
            BodyResult::GuardFalse => MigrationOutcome::NoopGuardFalse,
            BodyResult::Attempted => scope.into_outcome(),
        };

        ledger.mark_completed(&self.name);
        outcome
    }
}

impl fmt::Debug for MigrationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDescriptor")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
