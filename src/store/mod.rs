//! Storage collaborators of the association field.
//!
//! The field never talks to a database directly. It relies on three narrow
//! traits, which a backend implements together:
//! - [`SchemaCatalog`]: table existence, for pivot detection by convention
//! - [`EntityCatalog`]: every instance of the target type, for the option list
//! - [`RelationStore`]: reading and fully replacing one source's association set
//!
//! Two backends ship with the crate: [`MemoryStore`] and [`PgStore`].

use crate::entity::{EntityId, EntityType, Record};
use crate::error::StoreError;
use crate::pivot::PivotInfo;
use serde::Serialize;

pub mod memory;
pub mod postgres;

#[doc(inline)]
pub use memory::MemoryStore;
#[doc(inline)]
pub use postgres::PgStore;

/// Table existence checks
pub trait SchemaCatalog {
    fn has_table(&self, name: &str) -> Result<bool, StoreError>;
}

/// Enumeration of every instance of an entity type
pub trait EntityCatalog {
    /// All instances of `entity_type`, ordered by key
    fn all(&self, entity_type: &EntityType) -> Result<Vec<Record>, StoreError>;
}

/// Reads and writes association sets through a pivot table
pub trait RelationStore {
    /// Entities of type `target` linked to `source_key`, ordered by key
    fn related(
        &self,
        source_key: &EntityId,
        pivot: &PivotInfo,
        target: &EntityType,
    ) -> Result<Vec<Record>, StoreError>;

    /// Replace the association set of `source_key` with exactly `ids`
    ///
    /// Either the whole new set is stored or nothing changes. `target` is used
    /// to check that every id refers to an existing entity.
    fn sync(
        &self,
        source_key: &EntityId,
        pivot: &PivotInfo,
        target: &EntityType,
        ids: &[EntityId],
    ) -> Result<SyncChanges, StoreError>;
}

/// Everything the field needs from a backend
pub trait Backend: SchemaCatalog + EntityCatalog + RelationStore {
    /// This backend as a schema catalog, for [`PivotResolver`](crate::pivot::PivotResolver)
    fn schema(&self) -> &dyn SchemaCatalog;
}

impl<T: SchemaCatalog + EntityCatalog + RelationStore> Backend for T {
    fn schema(&self) -> &dyn SchemaCatalog {
        self
    }
}

/// Outcome of a full sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncChanges {
    /// Ids that were linked by this sync
    pub attached: Vec<EntityId>,
    /// Ids that were unlinked by this sync
    pub detached: Vec<EntityId>,
}

impl SyncChanges {
    /// Diff a current set against the desired one, preserving the order of each input
    pub fn diff(current: &[EntityId], desired: &[EntityId]) -> Self {
        Self {
            attached: desired
                .iter()
                .filter(|id| !current.contains(id))
                .cloned()
                .collect(),
            detached: current
                .iter()
                .filter(|id| !desired.contains(id))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty()
    }
}
