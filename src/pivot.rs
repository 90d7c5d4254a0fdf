//! Pivot table detection.
//!
//! [`PivotResolver`] turns `(source instance, relation name, target type)` into
//! the junction table and its two key columns:
//!
//! 1. a relation declared on the source as [`RelationKind::BelongsToMany`] is
//!    authoritative and returned verbatim;
//! 2. otherwise the two conventional names `singular(source)_singular(target)`
//!    and `singular(target)_singular(source)` are looked up, in that order, and
//!    the keys are `singular(source)_id` / `singular(target)_id`.
//!
//! Every failure, including a failing schema lookup, is reported as
//! [`FieldError::PivotResolution`].

use crate::entity::{EntityType, Model, RelationKind};
use crate::error::FieldError;
use crate::store::SchemaCatalog;
use serde::Serialize;

#[cfg(feature = "tracing")]
use crate::tracing_helpers;

/// Junction table and key columns of a many-to-many relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotInfo {
    pub pivot_table: String,
    /// Column referencing the source entity
    pub foreign_key: String,
    /// Column referencing the related (target) entity
    pub related_key: String,
}

impl PivotInfo {
    pub fn new(
        pivot_table: impl Into<String>,
        foreign_key: impl Into<String>,
        related_key: impl Into<String>,
    ) -> Self {
        Self {
            pivot_table: pivot_table.into(),
            foreign_key: foreign_key.into(),
            related_key: related_key.into(),
        }
    }

    /// Build from three optional parts; `None` unless all are present and non-empty
    pub fn from_parts(
        pivot_table: Option<&str>,
        foreign_key: Option<&str>,
        related_key: Option<&str>,
    ) -> Option<Self> {
        let non_empty = |s: Option<&str>| s.filter(|s| !s.trim().is_empty());
        Some(Self::new(
            non_empty(pivot_table)?,
            non_empty(foreign_key)?,
            non_empty(related_key)?,
        ))
    }
}

/// Singular form of a table name
///
/// Schema-qualified names (`app.posts`) keep their qualifier out of the result.
pub fn singular(table: &str) -> String {
    let bare = table.rsplit('.').next().unwrap_or(table);
    pluralizer::pluralize(bare, 1, false)
}

/// The two conventional pivot table names, source-first
pub fn candidate_tables(source_table: &str, target_table: &str) -> [String; 2] {
    let source = singular(source_table);
    let target = singular(target_table);
    [format!("{source}_{target}"), format!("{target}_{source}")]
}

/// Resolves pivot details for many-to-many relations
pub struct PivotResolver<'a> {
    schema: &'a dyn SchemaCatalog,
}

impl<'a> PivotResolver<'a> {
    pub fn new(schema: &'a dyn SchemaCatalog) -> Self {
        Self { schema }
    }

    /// Resolve the pivot of relation `relation_name` from `source` to `target`
    ///
    /// # Errors
    ///
    /// Returns `FieldError::PivotResolution` when no declared many-to-many relation
    /// exists and neither conventional table is present, or when probing the
    /// schema fails. The message names both candidate tables and both entities.
    pub fn resolve(
        &self,
        source: &dyn Model,
        relation_name: &str,
        target: &EntityType,
    ) -> Result<PivotInfo, FieldError> {
        let source_type = source.entity_type();

        #[cfg(feature = "tracing")]
        let _span =
            tracing_helpers::resolve_pivot_span(relation_name, source_type.name(), target.name())
                .entered();

        if let Some(relation) = source.describe_relation(relation_name) {
            if let RelationKind::BelongsToMany(pivot) = &relation.kind {
                log::debug!(
                    "pivot for {}.{relation_name} taken from declared relation: {}",
                    source_type.name(),
                    pivot.pivot_table
                );
                return Ok(pivot.clone());
            }
            log::debug!(
                "{}.{relation_name} is declared but not many-to-many, trying naming convention",
                source_type.name()
            );
        }

        self.by_convention(source_type, target).map_err(|message| {
            FieldError::PivotResolution(format!(
                "Failed to detect pivot information: {message}. \
                 Please provide pivot details manually via relationship_config()."
            ))
        })
    }

    fn by_convention(&self, source: &EntityType, target: &EntityType) -> Result<PivotInfo, String> {
        let candidates = candidate_tables(source.table(), target.table());

        for table in &candidates {
            let exists = self.schema.has_table(table).map_err(|e| e.to_string())?;
            if exists {
                log::debug!(
                    "pivot for {} <-> {} found by convention: {table}",
                    source.name(),
                    target.name()
                );
                return Ok(PivotInfo::new(
                    table.clone(),
                    format!("{}_id", singular(source.table())),
                    format!("{}_id", singular(target.table())),
                ));
            }
        }

        Err(format!(
            "Could not find pivot table. Tried: {}. Models: {}, {}",
            candidates.join(", "),
            source.name(),
            target.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Record, Relation};
    use crate::error::StoreError;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct Tables(HashSet<&'static str>);

    impl SchemaCatalog for Tables {
        fn has_table(&self, name: &str) -> Result<bool, StoreError> {
            Ok(self.0.contains(name))
        }
    }

    struct BrokenSchema;

    impl SchemaCatalog for BrokenSchema {
        fn has_table(&self, _name: &str) -> Result<bool, StoreError> {
            Err(StoreError::Other("connection reset".into()))
        }
    }

    fn tables(names: &[&'static str]) -> Tables {
        Tables(names.iter().copied().collect())
    }

    fn blank(ty: EntityType) -> Record {
        Record::new(Arc::new(ty))
    }

    // ============================================================================
    // Naming helpers
    // ============================================================================

    #[test]
    fn test_singular() {
        assert_eq!(singular("posts"), "post");
        assert_eq!(singular("tags"), "tag");
        assert_eq!(singular("categories"), "category");
        assert_eq!(singular("app.users"), "user");
    }

    #[test]
    fn test_candidate_tables_order() {
        assert_eq!(candidate_tables("users", "roles"), ["user_role", "role_user"]);
    }

    #[test]
    fn test_pivot_info_from_parts_is_all_or_nothing() {
        assert_eq!(
            PivotInfo::from_parts(Some("post_tag"), Some("post_id"), Some("tag_id")),
            Some(PivotInfo::new("post_tag", "post_id", "tag_id"))
        );
        assert_eq!(PivotInfo::from_parts(Some("post_tag"), None, Some("tag_id")), None);
        // EDGE CASE: blank strings count as missing
        assert_eq!(PivotInfo::from_parts(Some("post_tag"), Some(" "), Some("tag_id")), None);
    }

    // ============================================================================
    // Declared path
    // ============================================================================

    #[test]
    fn test_declared_relation_wins_over_convention() {
        // Both conventional tables exist, but the declaration names a different one
        let schema = tables(&["post_tag", "tag_post", "taggables"]);
        let post = blank(EntityType::new("Post", "posts").with_relation(
            Relation::belongs_to_many(
                "tags",
                "tags",
                PivotInfo::new("taggables", "taggable_id", "label_id"),
            ),
        ));
        let tag = EntityType::new("Tag", "tags");

        let info = PivotResolver::new(&schema).resolve(&post, "tags", &tag).unwrap();
        assert_eq!(info, PivotInfo::new("taggables", "taggable_id", "label_id"));
    }

    #[test]
    fn test_declared_non_many_to_many_falls_back_to_convention() {
        let schema = tables(&["post_tag"]);
        let post = blank(EntityType::new("Post", "posts").with_relation(Relation::new(
            "tags",
            "tags",
            RelationKind::HasMany {
                foreign_key: "post_id".into(),
            },
        )));
        let tag = EntityType::new("Tag", "tags");

        let info = PivotResolver::new(&schema).resolve(&post, "tags", &tag).unwrap();
        assert_eq!(info, PivotInfo::new("post_tag", "post_id", "tag_id"));
    }

    // ============================================================================
    // Convention path
    // ============================================================================

    #[test]
    fn test_convention_source_first() {
        let schema = tables(&["user_role"]);
        let user = blank(EntityType::new("User", "users"));
        let role = EntityType::new("Role", "roles");

        let info = PivotResolver::new(&schema).resolve(&user, "roles", &role).unwrap();
        assert_eq!(info, PivotInfo::new("user_role", "user_id", "role_id"));
    }

    #[test]
    fn test_convention_reverse_order() {
        let schema = tables(&["role_user"]);
        let user = blank(EntityType::new("User", "users"));
        let role = EntityType::new("Role", "roles");

        let info = PivotResolver::new(&schema).resolve(&user, "roles", &role).unwrap();
        // Keys still follow source/target, not the table's word order
        assert_eq!(info, PivotInfo::new("role_user", "user_id", "role_id"));
    }

    #[test]
    fn test_convention_prefers_first_candidate_when_both_exist() {
        let schema = tables(&["user_role", "role_user"]);
        let user = blank(EntityType::new("User", "users"));
        let role = EntityType::new("Role", "roles");

        let info = PivotResolver::new(&schema).resolve(&user, "roles", &role).unwrap();
        assert_eq!(info.pivot_table, "user_role");
    }

    // ============================================================================
    // Failures
    // ============================================================================

    #[test]
    fn test_no_pivot_found_names_candidates_and_models() {
        let schema = tables(&["posts", "tags"]);
        let post = blank(EntityType::new("Post", "posts"));
        let tag = EntityType::new("Tag", "tags");

        let err = PivotResolver::new(&schema).resolve(&post, "tags", &tag).unwrap_err();
        let FieldError::PivotResolution(message) = err else {
            panic!("expected PivotResolution, got {err:?}");
        };
        assert!(message.contains("post_tag"));
        assert!(message.contains("tag_post"));
        assert!(message.contains("Post"));
        assert!(message.contains("Tag"));
        assert!(message.contains("relationship_config()"));
    }

    #[test]
    fn test_schema_failure_is_rewrapped() {
        let post = blank(EntityType::new("Post", "posts"));
        let tag = EntityType::new("Tag", "tags");

        let err = PivotResolver::new(&BrokenSchema)
            .resolve(&post, "tags", &tag)
            .unwrap_err();
        match err {
            FieldError::PivotResolution(message) => assert!(message.contains("connection reset")),
            other => panic!("expected PivotResolution, got {other:?}"),
        }
    }
}
