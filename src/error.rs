//! Error types for the association field and its storage collaborators.

use crate::executor::ExecError;
use crate::transaction::TransactionError;
use std::fmt;

/// Errors surfaced by [`AssociationField`](crate::field::AssociationField) and
/// [`PivotResolver`](crate::pivot::PivotResolver)
#[derive(Debug)]
pub enum FieldError {
    /// Relationship configuration is missing or unusable
    Configuration(String),
    /// Neither a declared relation nor a conventional pivot table was found
    PivotResolution(String),
    /// The full-sync write failed; the association is unchanged
    AssociationSync(String),
    /// A read from the storage layer failed
    Storage(StoreError),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::Configuration(s) => write!(f, "Configuration error: {s}"),
            FieldError::PivotResolution(s) => write!(f, "Pivot resolution error: {s}"),
            FieldError::AssociationSync(s) => write!(f, "Association sync error: {s}"),
            FieldError::Storage(e) => write!(f, "Storage error: {e}"),
        }
    }
}

impl std::error::Error for FieldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FieldError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for FieldError {
    fn from(err: StoreError) -> Self {
        FieldError::Storage(err)
    }
}

/// Errors raised by [`SchemaCatalog`](crate::store::SchemaCatalog),
/// [`EntityCatalog`](crate::store::EntityCatalog) and
/// [`RelationStore`](crate::store::RelationStore) implementations
#[derive(Debug)]
pub enum StoreError {
    /// Statement execution failed
    Database(ExecError),
    /// Transaction control failed
    Transaction(TransactionError),
    /// A table or column name is not a plain SQL identifier
    InvalidIdentifier(String),
    /// Referential integrity violation
    Constraint(String),
    /// A row could not be turned into a record
    Decode(String),
    /// Other storage errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "{e}"),
            StoreError::Transaction(e) => write!(f, "{e}"),
            StoreError::InvalidIdentifier(s) => write!(f, "Invalid SQL identifier: {s:?}"),
            StoreError::Constraint(s) => write!(f, "Constraint violation: {s}"),
            StoreError::Decode(s) => write!(f, "Decode error: {s}"),
            StoreError::Other(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            StoreError::Transaction(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ExecError> for StoreError {
    fn from(err: ExecError) -> Self {
        StoreError::Database(err)
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        StoreError::Transaction(err)
    }
}
