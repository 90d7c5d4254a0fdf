//! Entity types, identifiers, declared relations and the [`Model`] capability.
//!
//! An [`EntityType`] is the static description of a kind of record (its table,
//! key column, admin resource key, default label attribute) together with the
//! relations the application declares on it. A [`Model`] is one instance.

use crate::pivot::PivotInfo;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Primary key value of an entity
///
/// Strings that are the canonical text of an `i64` normalize to
/// [`EntityId::Int`], so `"5"` and `5` refer to the same entity. Anything else,
/// such as `"007"` or `"+5"`, stays a string key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Str(String),
}

impl EntityId {
    /// Parse an identifier from its textual form
    pub fn parse(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(i) if i.to_string() == s => EntityId::Int(i),
            _ => EntityId::Str(s.to_string()),
        }
    }

    /// Read an identifier from a JSON scalar
    ///
    /// Returns `None` for `null`, booleans, arrays, objects and empty strings.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(EntityId::Int(i)),
                None => Some(EntityId::parse(&n.to_string())),
            },
            Value::String(s) if !s.trim().is_empty() => Some(EntityId::parse(s)),
            _ => None,
        }
    }

    /// JSON form of the identifier
    pub fn to_json(&self) -> Value {
        match self {
            EntityId::Int(i) => Value::from(*i),
            EntityId::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(i) => write!(f, "{i}"),
            EntityId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Int(value)
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        EntityId::Int(i64::from(value))
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::parse(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::parse(&value)
    }
}

/// Kind of a declared relation
///
/// Only [`RelationKind::BelongsToMany`] carries pivot details; the other kinds
/// are recognized so that a relation name pointing at them is not mistaken for
/// a many-to-many one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// Many-to-many through a pivot table
    BelongsToMany(PivotInfo),
    /// One-to-many; `foreign_key` lives on the related table
    HasMany { foreign_key: String },
    /// One-to-one; `foreign_key` lives on the related table
    HasOne { foreign_key: String },
    /// Many-to-one; `foreign_key` lives on this table
    BelongsTo { foreign_key: String },
}

impl RelationKind {
    /// Pivot details, if this is a many-to-many relation
    pub fn pivot(&self) -> Option<&PivotInfo> {
        match self {
            RelationKind::BelongsToMany(pivot) => Some(pivot),
            _ => None,
        }
    }
}

/// A relation declared by the application's data layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub related_table: String,
    pub kind: RelationKind,
}

impl Relation {
    pub fn new(name: impl Into<String>, related_table: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            related_table: related_table.into(),
            kind,
        }
    }

    /// Shorthand for a many-to-many relation
    pub fn belongs_to_many(
        name: impl Into<String>,
        related_table: impl Into<String>,
        pivot: PivotInfo,
    ) -> Self {
        Self::new(name, related_table, RelationKind::BelongsToMany(pivot))
    }
}

/// Static description of a kind of record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    name: String,
    table: String,
    key_name: String,
    resource_key: String,
    display_field: String,
    relations: Vec<Relation>,
}

impl EntityType {
    /// Create an entity type with `id` as key and `name` as display attribute.
    ///
    /// The admin resource key defaults to the table name with `_` replaced by `-`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            name: name.into(),
            resource_key: table.replace('_', "-"),
            table,
            key_name: "id".to_string(),
            display_field: "name".to_string(),
            relations: Vec::new(),
        }
    }

    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = key_name.into();
        self
    }

    pub fn with_resource_key(mut self, resource_key: impl Into<String>) -> Self {
        self.resource_key = resource_key.into();
        self
    }

    pub fn with_display_field(mut self, display_field: impl Into<String>) -> Self {
        self.display_field = display_field.into();
        self
    }

    /// Declare a relation on this type; a later declaration replaces an earlier one of the same name
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.retain(|r| r.name != relation.name);
        self.relations.push(relation);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    pub fn display_field(&self) -> &str {
        &self.display_field
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Look up a declared relation by name
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Capability exposed by every entity instance the field works with
pub trait Model {
    fn entity_type(&self) -> &EntityType;

    /// Primary key, `None` while the entity has not been persisted
    fn key(&self) -> Option<EntityId>;

    /// Attribute lookup by column name
    fn attribute(&self, name: &str) -> Option<Value>;

    fn exists(&self) -> bool {
        self.key().is_some()
    }

    /// Declared relation named `name`, if any
    fn describe_relation(&self, name: &str) -> Option<&Relation> {
        self.entity_type().relation(name)
    }
}

/// Attribute-map entity used by the stores
#[derive(Debug, Clone)]
pub struct Record {
    entity_type: Arc<EntityType>,
    attributes: Map<String, Value>,
}

impl Record {
    /// A blank, unsaved instance
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self {
            entity_type,
            attributes: Map::new(),
        }
    }

    pub fn with_attributes(entity_type: Arc<EntityType>, attributes: Map<String, Value>) -> Self {
        Self {
            entity_type,
            attributes,
        }
    }

    /// Builder-style attribute assignment
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }
}

impl Model for Record {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn key(&self) -> Option<EntityId> {
        self.attributes
            .get(self.entity_type.key_name())
            .and_then(EntityId::from_json)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }
}
