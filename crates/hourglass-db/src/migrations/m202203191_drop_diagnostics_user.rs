use crate::migration::{DropArtifacts, Guard, MigrationDescriptor, Step};

pub const NAME: &str = "202203191-drop_diagnostics_user";

/// Diagnostics are no longer tied to a user. The foreign key goes first; some
/// dialects drop it together with the column, so its failure is harmless.
pub fn migration() -> MigrationDescriptor {
    MigrationDescriptor::post(
        NAME,
        DropArtifacts::new(Guard::column("diagnostics", "user_id"))
            .then(Step::drop_constraint("diagnostics", "fk_diagnostics_user"))
            .then(Step::drop_column("diagnostics", "user_id")),
    )
}
