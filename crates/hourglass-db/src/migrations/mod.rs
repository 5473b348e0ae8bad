//! Hand-written migrations for legacy schema artifacts the additive sync cannot remove.
//!
//! Every migration is listed in [`all`]. Names carry a sortable date prefix; the
//! registry is built from that list in name order, so adding a migration means adding
//! a module and one line below.

mod m202203191_drop_diagnostics_user;
mod m20221016_drop_rank_column;

use hourglass_common::Result;

use crate::migration::MigrationDescriptor;
use crate::registry::MigrationRegistry;

pub fn all() -> Vec<MigrationDescriptor> {
    vec![
        m20221016_drop_rank_column::migration(),
        m202203191_drop_diagnostics_user::migration(),
    ]
}

/// Explicit registration of every built-in migration, ordered by name.
pub fn builtin_registry() -> Result<MigrationRegistry> {
    MigrationRegistry::sorted(all())
}
