use hourglass_common::{Error, Result};

use crate::migration::{MigrationDescriptor, Phase};

/// Ordered migration lists for both phases.
///
/// Execution order within a phase is registration order; the registry itself never
/// reorders. Names must be unique across both phases.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    pre: Vec<MigrationDescriptor>,
    post: Vec<MigrationDescriptor>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an unordered set of descriptors, registering each phase
    /// in lexicographic name order so execution follows the sortable name prefixes.
    pub fn sorted(descriptors: impl IntoIterator<Item = MigrationDescriptor>) -> Result<Self> {
        let mut descriptors: Vec<_> = descriptors.into_iter().collect();
        descriptors.sort_by(|a, b| a.name().cmp(b.name()));

        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: MigrationDescriptor) -> Result<()> {
        match descriptor.phase() {
            Phase::Pre => self.register_pre(descriptor),
            Phase::Post => self.register_post(descriptor),
        }
    }

    pub fn register_pre(&mut self, descriptor: MigrationDescriptor) -> Result<()> {
        self.check(&descriptor, Phase::Pre)?;
        self.pre.push(descriptor);
        Ok(())
    }

    pub fn register_post(&mut self, descriptor: MigrationDescriptor) -> Result<()> {
        self.check(&descriptor, Phase::Post)?;
        self.post.push(descriptor);
        Ok(())
    }

    pub fn list_pre(&self) -> &[MigrationDescriptor] {
        &self.pre
    }

    pub fn list_post(&self) -> &[MigrationDescriptor] {
        &self.post
    }

    /// Every descriptor in execution order: pre-phase first, then post-phase.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationDescriptor> {
        self.pre.iter().chain(self.post.iter())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.iter().any(|d| d.name() == name)
    }

    pub fn len(&self) -> usize {
        self.pre.len() + self.post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, descriptor: &MigrationDescriptor, phase: Phase) -> Result<()> {
        if descriptor.name().trim().is_empty() {
            return Err(Error::Migration("migration name must not be empty".into()));
        }
        if descriptor.phase() != phase {
            return Err(Error::Migration(format!(
                "migration '{}' is a {}-phase migration, cannot register it as {phase}",
                descriptor.name(),
                descriptor.phase()
            )));
        }
        if self.contains(descriptor.name()) {
            return Err(Error::DuplicateMigration(descriptor.name().to_string()));
        }
        Ok(())
    }
}
