pub mod database;
pub mod ledger;
pub mod migration;
pub mod migrations;
pub mod registry;
pub mod runner;
pub mod schema;
pub mod sync;

pub use database::Database;
pub use ledger::{LEDGER_TABLE, MigrationLedger, MigrationRecord, SqliteLedger};
pub use migration::{
    BodyResult, DropArtifacts, Guard, MigrationBody, MigrationDescriptor, MigrationOutcome,
    MigrationScope, Phase, Step, StepFailure, migration_fn,
};
pub use migrations::builtin_registry;
pub use registry::MigrationRegistry;
pub use runner::{MigrationReport, MigrationRunner, RunReport, RunnerState, migrate};
pub use schema::{SchemaIntrospector, SchemaMigrator};
pub use sync::{ENTITIES, EntitySchema, EntitySync, SchemaSync};
