use crate::migration::{DropArtifacts, Guard, MigrationDescriptor, Step};

pub const NAME: &str = "20221016-drop_rank_column";

/// Leaderboard rank is computed at query time now.
pub fn migration() -> MigrationDescriptor {
    MigrationDescriptor::post(
        NAME,
        DropArtifacts::new(
            Guard::table("leaderboard_items").and(Guard::column("leaderboard_items", "rank")),
        )
        .then(Step::drop_column("leaderboard_items", "rank")),
    )
}
