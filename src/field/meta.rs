//! Serializable field state consumed by the admin widget.

use crate::entity::EntityId;
use crate::pivot::PivotInfo;
use serde::Serialize;

pub const DEFAULT_PLACEHOLDER: &str = "Search...";
pub const DEFAULT_DISPLAY_FIELD: &str = "name";

/// One selectable entity in the option list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateOption {
    pub value: EntityId,
    /// Never empty; falls back to `ID: <value>`
    pub label: String,
}

/// Current value of the field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Not resolved yet, or the source entity is not persisted
    #[default]
    Empty,
    /// Index view: one HTML anchor per related entity
    Links(Vec<String>),
    /// Single-resource view: ordered related identifiers
    Ids(Vec<EntityId>),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Links(links) => links.is_empty(),
            FieldValue::Ids(ids) => ids.is_empty(),
        }
    }

    pub fn ids(&self) -> Option<&[EntityId]> {
        match self {
            FieldValue::Ids(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn links(&self) -> Option<&[String]> {
        match self {
            FieldValue::Links(links) => Some(links),
            _ => None,
        }
    }
}

/// Widget metadata
///
/// Pivot details stay `None` until configuration resolves all three of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    pub options: Vec<CandidateOption>,
    pub placeholder: String,
    /// Admin resource key of the target entity type
    pub resource_key: Option<String>,
    pub display_field: String,
    pub relation_name: Option<String>,
    pub pivot_table: Option<String>,
    pub foreign_pivot_key: Option<String>,
    pub related_pivot_key: Option<String>,
    pub show_create_button: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_button_label: Option<String>,
}

impl Default for FieldMeta {
    fn default() -> Self {
        Self {
            options: Vec::new(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            resource_key: None,
            display_field: DEFAULT_DISPLAY_FIELD.to_string(),
            relation_name: None,
            pivot_table: None,
            foreign_pivot_key: None,
            related_pivot_key: None,
            show_create_button: false,
            create_button_label: None,
        }
    }
}

impl FieldMeta {
    pub(crate) fn set_pivot(&mut self, pivot: Option<&PivotInfo>) {
        self.pivot_table = pivot.map(|p| p.pivot_table.clone());
        self.foreign_pivot_key = pivot.map(|p| p.foreign_key.clone());
        self.related_pivot_key = pivot.map(|p| p.related_key.clone());
    }
}
