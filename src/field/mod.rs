//! Many-to-many association field.
//!
//! [`AssociationField`] shows and edits the set of target entities linked to a
//! source entity through a pivot table. Configuration resolves the pivot once
//! (explicit details win, detection fills the gaps); reads produce either HTML
//! links (index view) or the related ids plus the full option list; a form
//! submission replaces the whole association set.
//!
//! ```no_run
//! use lifeguard_pivot::{
//!     AssociationField, EntityType, FieldContext, FormRequest, MemoryStore, Record,
//!     RelationshipConfig, Settings, ViewMode,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let posts = Arc::new(EntityType::new("Post", "posts"));
//! let tags = Arc::new(EntityType::new("Tag", "tags"));
//! let store = MemoryStore::new();
//! let settings = Settings::default();
//! let ctx = FieldContext::new(&settings, &store, posts.clone());
//!
//! let mut field = AssociationField::new("Tags")
//!     .relationship_config(&ctx, RelationshipConfig::new(tags, "tags"));
//!
//! let post = Record::new(posts).set("id", 1);
//! field.resolve(&ctx, &post, ViewMode::Form)?;
//! field.fill_from_request(&ctx, &FormRequest::new().with("tags", "[5, 9]"), &post)?;
//! # Ok(())
//! # }
//! ```

mod display;
pub mod meta;
pub mod request;

pub use meta::{CandidateOption, FieldMeta, FieldValue};
pub use request::{parse_selection, FormRequest};

use crate::config::Settings;
use crate::entity::{EntityType, Model, Record};
use crate::error::FieldError;
use crate::pivot::{PivotInfo, PivotResolver};
use crate::store::{Backend, SyncChanges};
use display::{anchor, link_label, option_label};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Widget component name
pub const COMPONENT: &str = "belongs-to-many";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Caller-supplied label for a related entity
pub type DisplayFn = Arc<dyn Fn(&dyn Model) -> Result<String, BoxError> + Send + Sync>;

/// Wrap a closure as a [`DisplayFn`]
pub fn display_fn<F>(f: F) -> DisplayFn
where
    F: Fn(&dyn Model) -> Result<String, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which admin view the field is being resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// A list of source entities; the value is rendered as links
    Index,
    /// One source entity, read-only
    Detail,
    /// One source entity, editable
    Form,
}

/// Per-request collaborators of a field
pub struct FieldContext<'a> {
    pub settings: &'a Settings,
    pub backend: &'a dyn Backend,
    /// Entity type of the resource the field is attached to
    pub source_type: Arc<EntityType>,
}

impl<'a> FieldContext<'a> {
    pub fn new(settings: &'a Settings, backend: &'a dyn Backend, source_type: Arc<EntityType>) -> Self {
        Self {
            settings,
            backend,
            source_type,
        }
    }

    fn report(&self, message: &str) {
        if self.settings.debug {
            log::error!("{message}");
        } else {
            log::debug!("{message}");
        }
    }
}

/// Relationship description passed to [`AssociationField::relationship_config`]
#[derive(Clone)]
pub struct RelationshipConfig {
    target: Arc<EntityType>,
    relation_name: String,
    pivot_table: Option<String>,
    foreign_key: Option<String>,
    related_key: Option<String>,
    display: Option<DisplayFn>,
}

impl RelationshipConfig {
    pub fn new(target: Arc<EntityType>, relation_name: impl Into<String>) -> Self {
        Self {
            target,
            relation_name: relation_name.into(),
            pivot_table: None,
            foreign_key: None,
            related_key: None,
            display: None,
        }
    }

    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.pivot_table = Some(table.into());
        self
    }

    /// Pivot column referencing the source entity
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Pivot column referencing the target entity
    pub fn related_key(mut self, column: impl Into<String>) -> Self {
        self.related_key = Some(column.into());
        self
    }

    /// Supply all pivot details at once; detection is skipped
    pub fn pivot(self, pivot: PivotInfo) -> Self {
        self.pivot_table(pivot.pivot_table)
            .foreign_key(pivot.foreign_key)
            .related_key(pivot.related_key)
    }

    pub fn display_using<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Model) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        self.display = Some(display_fn(f));
        self
    }

    fn explicit_pivot(&self) -> Option<PivotInfo> {
        PivotInfo::from_parts(
            self.pivot_table.as_deref(),
            self.foreign_key.as_deref(),
            self.related_key.as_deref(),
        )
    }

    /// Explicit parts over detected ones, field by field
    fn merge(&self, detected: PivotInfo) -> PivotInfo {
        let pick = |explicit: &Option<String>, detected: String| {
            explicit
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(detected)
        };
        PivotInfo::new(
            pick(&self.pivot_table, detected.pivot_table),
            pick(&self.foreign_key, detected.foreign_key),
            pick(&self.related_key, detected.related_key),
        )
    }
}

impl fmt::Debug for RelationshipConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipConfig")
            .field("target", &self.target.name())
            .field("relation_name", &self.relation_name)
            .field("pivot_table", &self.pivot_table)
            .field("foreign_key", &self.foreign_key)
            .field("related_key", &self.related_key)
            .field("display", &self.display.is_some())
            .finish()
    }
}

/// Configured state of a field
struct Relationship {
    target: Arc<EntityType>,
    relation_name: String,
    pivot: Option<PivotInfo>,
    display: Option<DisplayFn>,
}

impl Relationship {
    /// Pivot used to read and write: the declared relation, else the resolved one
    fn traversal_pivot(&self, source: &dyn Model) -> Result<PivotInfo, FieldError> {
        if let Some(pivot) = source
            .describe_relation(&self.relation_name)
            .and_then(|r| r.kind.pivot())
        {
            return Ok(pivot.clone());
        }
        self.pivot.clone().ok_or_else(|| {
            FieldError::Configuration(format!(
                "relation '{}' is not declared as many-to-many on {} and its pivot table could not be resolved",
                self.relation_name,
                source.entity_type().name()
            ))
        })
    }
}

/// Searchable multi-select over a many-to-many relation
pub struct AssociationField {
    name: String,
    attribute: String,
    relationship: Option<Relationship>,
    value: FieldValue,
    meta: FieldMeta,
    placeholder_set: bool,
    display_field_set: bool,
}

#[derive(Serialize)]
struct Payload<'a> {
    component: &'static str,
    name: &'a str,
    attribute: &'a str,
    value: &'a FieldValue,
    #[serde(flatten)]
    meta: &'a FieldMeta,
}

impl AssociationField {
    /// Create an unconfigured field; the attribute is the snake-cased name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            attribute: snake_case(&name),
            name,
            relationship: None,
            value: FieldValue::Empty,
            meta: FieldMeta::default(),
            placeholder_set: false,
            display_field_set: false,
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }

    pub fn placeholder(mut self, text: impl Into<String>) -> Self {
        self.meta.placeholder = text.into();
        self.placeholder_set = true;
        self
    }

    /// Attribute used as the label of related entities
    pub fn display_field(mut self, attribute: impl Into<String>) -> Self {
        self.meta.display_field = attribute.into();
        self.display_field_set = true;
        self
    }

    pub fn with_create_button(mut self, show: bool, label: impl Into<String>) -> Self {
        self.meta.show_create_button = show;
        self.meta.create_button_label = Some(label.into());
        self
    }

    /// Configure the relationship and resolve its pivot
    ///
    /// Complete explicit pivot details are used as given. Otherwise detection
    /// runs against a blank instance of the context's source type and the
    /// explicit parts override the detected ones. A failed detection is not an
    /// error: the pivot stays unset and traversal relies on the declared relation.
    pub fn relationship_config(mut self, ctx: &FieldContext<'_>, config: RelationshipConfig) -> Self {
        if config.relation_name.trim().is_empty() {
            log::warn!("field '{}': empty relation name, leaving unconfigured", self.name);
            return self;
        }

        let pivot = match config.explicit_pivot() {
            Some(pivot) => Some(pivot),
            None => {
                let blank = Record::new(ctx.source_type.clone());
                match PivotResolver::new(ctx.backend.schema()).resolve(
                    &blank,
                    &config.relation_name,
                    &config.target,
                ) {
                    Ok(detected) => Some(config.merge(detected)),
                    Err(e) => {
                        log::debug!("field '{}': pivot left unresolved: {e}", self.name);
                        None
                    }
                }
            }
        };

        if !self.placeholder_set {
            self.meta.placeholder = ctx.settings.placeholder.clone();
        }
        if !self.display_field_set {
            self.meta.display_field = config.target.display_field().to_string();
        }
        self.meta.resource_key = Some(config.target.resource_key().to_string());
        self.meta.relation_name = Some(config.relation_name.clone());
        self.meta.set_pivot(pivot.as_ref());

        self.relationship = Some(Relationship {
            target: config.target,
            relation_name: config.relation_name,
            pivot,
            display: config.display,
        });
        self
    }

    fn configured(&self) -> Result<&Relationship, FieldError> {
        self.relationship.as_ref().ok_or_else(|| {
            FieldError::Configuration("relationship must be configured before use".to_string())
        })
    }

    /// Render the related entities of `source` as admin links
    ///
    /// # Errors
    ///
    /// `FieldError::Configuration` if the field is unconfigured or has no usable
    /// pivot, `FieldError::Storage` if loading the related entities fails.
    pub fn resolve_for_display(
        &mut self,
        ctx: &FieldContext<'_>,
        source: &dyn Model,
    ) -> Result<(), FieldError> {
        let rel = self.configured()?;
        let links = match source.key() {
            None => Vec::new(),
            Some(key) => {
                let pivot = rel.traversal_pivot(source)?;
                let resource_key = rel.target.resource_key();
                ctx.backend
                    .related(&key, &pivot, &rel.target)?
                    .iter()
                    .filter_map(|related| {
                        let related_key = related.key()?;
                        let label = link_label(
                            related,
                            &related_key,
                            rel.display.as_ref(),
                            &self.meta.display_field,
                        );
                        Some(anchor(ctx.settings.base_path(), resource_key, &related_key, &label))
                    })
                    .collect()
            }
        };
        self.value = FieldValue::Links(links);
        Ok(())
    }

    /// Resolve the value and option list for `mode`
    ///
    /// The index view delegates to [`resolve_for_display`](Self::resolve_for_display).
    /// Otherwise a persisted source gets its related ids as value and an unsaved
    /// one an empty value. The option list is rebuilt from every target entity. Entities whose label
    /// cannot be computed, or that have no key, are left out of the options.
    ///
    /// # Errors
    ///
    /// `FieldError::Configuration` if the field is unconfigured or has no usable
    /// pivot, `FieldError::Storage` if a read fails.
    pub fn resolve(
        &mut self,
        ctx: &FieldContext<'_>,
        source: &dyn Model,
        mode: ViewMode,
    ) -> Result<(), FieldError> {
        if mode == ViewMode::Index {
            return self.resolve_for_display(ctx, source);
        }
        let rel = self.configured()?;

        let value = match source.key() {
            Some(key) => {
                let pivot = rel.traversal_pivot(source)?;
                let ids = ctx
                    .backend
                    .related(&key, &pivot, &rel.target)?
                    .iter()
                    .filter_map(|related| related.key())
                    .collect();
                FieldValue::Ids(ids)
            }
            None => FieldValue::Empty,
        };

        let mut options = Vec::new();
        for candidate in ctx.backend.all(&rel.target)? {
            let Some(key) = candidate.key() else {
                ctx.report(&format!(
                    "{} option skipped: record has no '{}'",
                    rel.target.name(),
                    rel.target.key_name()
                ));
                continue;
            };
            match option_label(&candidate, &key, rel.display.as_ref(), &self.meta.display_field) {
                Ok(label) => options.push(CandidateOption { value: key, label }),
                Err(e) => ctx.report(&format!(
                    "{} {key} option skipped, label failed: {e}",
                    rel.target.name()
                )),
            }
        }

        self.value = value;
        self.meta.options = options;
        Ok(())
    }

    /// Replace the association set of `source` with the submitted selection
    ///
    /// Returns `Ok(None)` without touching storage when the attribute is absent
    /// from the request or its value is not a selection.
    ///
    /// # Errors
    ///
    /// `FieldError::Configuration` if the field is unconfigured or has no usable
    /// pivot; `FieldError::AssociationSync` if the source is not persisted or the
    /// sync fails, in which case the association is unchanged.
    pub fn fill_from_request(
        &self,
        ctx: &FieldContext<'_>,
        request: &FormRequest,
        source: &dyn Model,
    ) -> Result<Option<SyncChanges>, FieldError> {
        let rel = self.configured()?;
        let Some(raw) = request.input(&self.attribute) else {
            return Ok(None);
        };
        let Some(ids) = parse_selection(raw) else {
            log::warn!("field '{}': ignoring malformed selection", self.name);
            return Ok(None);
        };

        let key = source.key().ok_or_else(|| {
            FieldError::AssociationSync(format!(
                "{} must be saved before its {} can be synced",
                source.entity_type().name(),
                rel.relation_name
            ))
        })?;
        let pivot = rel.traversal_pivot(source)?;

        match ctx.backend.sync(&key, &pivot, &rel.target, &ids) {
            Ok(changes) => Ok(Some(changes)),
            Err(e) => {
                if ctx.settings.debug {
                    log::error!("field '{}': sync through {} failed: {e}", self.name, pivot.pivot_table);
                }
                Err(FieldError::AssociationSync(e.to_string()))
            }
        }
    }

    /// Serialized field state for the widget
    pub fn json_payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(Payload {
            component: COMPONENT,
            name: &self.name,
            attribute: &self.attribute,
            value: &self.value,
            meta: &self.meta,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    pub fn is_configured(&self) -> bool {
        self.relationship.is_some()
    }

    /// Resolved pivot, `None` while unconfigured or unresolved
    pub fn pivot(&self) -> Option<&PivotInfo> {
        self.relationship.as_ref().and_then(|r| r.pivot.as_ref())
    }
}

impl fmt::Debug for AssociationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationField")
            .field("name", &self.name)
            .field("attribute", &self.attribute)
            .field("configured", &self.is_configured())
            .field("pivot", &self.pivot())
            .field("value", &self.value)
            .finish()
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut after_lower = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && after_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            after_lower = c.is_lowercase() || c.is_numeric();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            after_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
