//! # Lifeguard Pivot
//!
//! Many-to-many association field for admin panels, with pivot table
//! detection, over the Lifeguard `may_postgres` execution layer.
//!
//! - [`PivotResolver`] finds the junction table and key columns of a relation,
//!   from a declared [`Relation`] or by naming convention.
//! - [`AssociationField`] reads the current selection and option list, and
//!   replaces the association set from a form submission.
//! - [`MemoryStore`] and [`PgStore`] provide the storage side.

pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod executor;
pub mod field;
pub mod pivot;
pub mod store;
pub mod transaction;

#[cfg(feature = "tracing")]
mod tracing_helpers;

pub use config::{DatabaseConfig, Settings};
pub use connection::{connect, connect_with, ConnectionError};
pub use entity::{EntityId, EntityType, Model, Record, Relation, RelationKind};
pub use error::{FieldError, StoreError};
pub use executor::{ExecError, Executor, PgExecutor};
pub use field::{
    AssociationField, CandidateOption, DisplayFn, FieldContext, FieldMeta, FieldValue,
    FormRequest, RelationshipConfig, ViewMode,
};
pub use pivot::{PivotInfo, PivotResolver};
pub use store::{
    Backend, EntityCatalog, MemoryStore, PgStore, RelationStore, SchemaCatalog, SyncChanges,
};
pub use transaction::{Transaction, TransactionError};
