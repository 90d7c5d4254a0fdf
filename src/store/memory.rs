//! In-process backend.
//!
//! Entity tables are keyed maps of [`Record`]s; pivot tables are lists of rows
//! mapping column name to id. A sync validates every id against the target
//! table before touching the pivot, and runs under one lock, so a failed sync
//! leaves the association unchanged.

use super::{EntityCatalog, RelationStore, SchemaCatalog, SyncChanges};
use crate::entity::{EntityId, EntityType, Model, Record};
use crate::error::StoreError;
use crate::pivot::PivotInfo;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type PivotRow = BTreeMap<String, EntityId>;

#[derive(Default)]
struct Tables {
    entities: BTreeMap<String, BTreeMap<EntityId, Record>>,
    pivots: BTreeMap<String, Vec<PivotRow>>,
}

impl Tables {
    fn pivot_mut(&mut self, table: &str) -> Result<&mut Vec<PivotRow>, StoreError> {
        self.pivots
            .get_mut(table)
            .ok_or_else(|| StoreError::Other(format!("relation \"{table}\" does not exist")))
    }

    fn pivot(&self, table: &str) -> Result<&Vec<PivotRow>, StoreError> {
        self.pivots
            .get(table)
            .ok_or_else(|| StoreError::Other(format!("relation \"{table}\" does not exist")))
    }
}

/// In-memory implementation of every storage trait
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".to_string()))
    }

    /// Create an empty entity table
    pub fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.lock()?.entities.entry(table.to_string()).or_default();
        Ok(())
    }

    /// Create an empty pivot table
    pub fn create_pivot_table(&self, table: &str) -> Result<(), StoreError> {
        self.lock()?.pivots.entry(table.to_string()).or_default();
        Ok(())
    }

    /// Insert or replace a record in its entity type's table
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Constraint` when the record has no key.
    pub fn insert(&self, record: Record) -> Result<EntityId, StoreError> {
        let key = record.key().ok_or_else(|| {
            StoreError::Constraint(format!(
                "null value in column \"{}\" of relation \"{}\"",
                record.entity_type().key_name(),
                record.entity_type().table()
            ))
        })?;
        let table = record.entity_type().table().to_string();
        self.lock()?
            .entities
            .entry(table)
            .or_default()
            .insert(key.clone(), record);
        Ok(key)
    }

    /// Link `source` to `target` through `pivot`, without integrity checks
    pub fn attach(
        &self,
        pivot: &PivotInfo,
        source: impl Into<EntityId>,
        target: impl Into<EntityId>,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let rows = tables.pivot_mut(&pivot.pivot_table)?;
        rows.push(pivot_row(pivot, source.into(), target.into()));
        Ok(())
    }

    /// `(foreign, related)` pairs currently stored in `pivot`, in insertion order
    pub fn pivot_rows(&self, pivot: &PivotInfo) -> Result<Vec<(EntityId, EntityId)>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .pivot(&pivot.pivot_table)?
            .iter()
            .filter_map(|row| {
                Some((
                    row.get(&pivot.foreign_key)?.clone(),
                    row.get(&pivot.related_key)?.clone(),
                ))
            })
            .collect())
    }
}

fn pivot_row(pivot: &PivotInfo, source: EntityId, target: EntityId) -> PivotRow {
    let mut row = PivotRow::new();
    row.insert(pivot.foreign_key.clone(), source);
    row.insert(pivot.related_key.clone(), target);
    row
}

fn linked_ids(rows: &[PivotRow], pivot: &PivotInfo, source_key: &EntityId) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = Vec::new();
    for row in rows {
        if row.get(&pivot.foreign_key) != Some(source_key) {
            continue;
        }
        if let Some(id) = row.get(&pivot.related_key) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
    }
    ids
}

impl SchemaCatalog for MemoryStore {
    fn has_table(&self, name: &str) -> Result<bool, StoreError> {
        let tables = self.lock()?;
        Ok(tables.entities.contains_key(name) || tables.pivots.contains_key(name))
    }
}

impl EntityCatalog for MemoryStore {
    fn all(&self, entity_type: &EntityType) -> Result<Vec<Record>, StoreError> {
        let tables = self.lock()?;
        let table = tables.entities.get(entity_type.table()).ok_or_else(|| {
            StoreError::Other(format!("relation \"{}\" does not exist", entity_type.table()))
        })?;
        Ok(table.values().cloned().collect())
    }
}

impl RelationStore for MemoryStore {
    fn related(
        &self,
        source_key: &EntityId,
        pivot: &PivotInfo,
        target: &EntityType,
    ) -> Result<Vec<Record>, StoreError> {
        let tables = self.lock()?;
        let ids = linked_ids(tables.pivot(&pivot.pivot_table)?, pivot, source_key);
        let Some(table) = tables.entities.get(target.table()) else {
            return Err(StoreError::Other(format!(
                "relation \"{}\" does not exist",
                target.table()
            )));
        };

        // BTreeMap iteration keeps the result ordered by key
        Ok(table
            .iter()
            .filter(|(key, _)| ids.contains(key))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn sync(
        &self,
        source_key: &EntityId,
        pivot: &PivotInfo,
        target: &EntityType,
        ids: &[EntityId],
    ) -> Result<SyncChanges, StoreError> {
        let mut tables = self.lock()?;

        let known = tables.entities.get(target.table()).ok_or_else(|| {
            StoreError::Other(format!("relation \"{}\" does not exist", target.table()))
        })?;
        if let Some(missing) = ids.iter().find(|id| !known.contains_key(id)) {
            return Err(StoreError::Constraint(format!(
                "insert on table \"{}\" violates foreign key \"{}\": key ({})=({missing}) is not present in table \"{}\"",
                pivot.pivot_table,
                pivot.related_key,
                pivot.related_key,
                target.table()
            )));
        }

        let rows = tables.pivot_mut(&pivot.pivot_table)?;
        let current = linked_ids(rows, pivot, source_key);
        let changes = SyncChanges::diff(&current, ids);

        rows.retain(|row| {
            row.get(&pivot.foreign_key) != Some(source_key)
                || row
                    .get(&pivot.related_key)
                    .map_or(true, |id| !changes.detached.contains(id))
        });
        for id in &changes.attached {
            rows.push(pivot_row(pivot, source_key.clone(), id.clone()));
        }

        Ok(changes)
    }
}
