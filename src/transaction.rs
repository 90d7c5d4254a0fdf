//! Transaction Module
//!
//! A top-level `BEGIN`/`COMMIT` transaction over a `may_postgres::Client`.
//!
//! `PgStore` runs every full sync inside one of these so that the delete and
//! insert halves of a sync are applied together or not at all.

use crate::executor::{ExecError, Executor};
use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use std::fmt;

#[cfg(feature = "tracing")]
use crate::tracing_helpers;

/// Transaction error type
#[derive(Debug)]
pub enum TransactionError {
    /// PostgreSQL error from may_postgres
    PostgresError(PostgresError),
    /// Transaction already committed or rolled back
    TransactionClosed,
    /// Other transaction errors
    Other(String),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::PostgresError(e) => write!(f, "PostgreSQL error: {}", e),
            TransactionError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
            TransactionError::Other(s) => write!(f, "Transaction error: {}", s),
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<PostgresError> for TransactionError {
    fn from(err: PostgresError) -> Self {
        TransactionError::PostgresError(err)
    }
}

/// A database transaction
///
/// Dropping an open transaction without calling [`commit`](Self::commit) issues
/// a best-effort `ROLLBACK`.
pub struct Transaction {
    client: Client,
    closed: bool,
}

impl Transaction {
    pub(crate) fn new(client: Client) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        client
            .execute("BEGIN", &[])
            .map_err(TransactionError::from)?;

        Ok(Self {
            client,
            closed: false,
        })
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is already closed or `COMMIT` fails.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.finish("COMMIT")
    }

    /// Roll back the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is already closed or `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        self.finish("ROLLBACK")
    }

    fn finish(&mut self, statement: &str) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::finish_transaction_span(statement).entered();

        // Closed even if the statement fails: the server aborts the block either way.
        self.closed = true;
        self.client
            .execute(statement, &[])
            .map(|_| ())
            .map_err(TransactionError::from)
    }

    fn ensure_open(&self) -> Result<(), ExecError> {
        if self.closed {
            return Err(ExecError::Other("Transaction is closed".to_string()));
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.finish("ROLLBACK") {
                log::warn!("rollback on drop failed: {e}");
            }
        }
    }
}

impl Executor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, ExecError> {
        self.ensure_open()?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(query).entered();

        self.client.execute(query, params).map_err(ExecError::from)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, ExecError> {
        self.ensure_open()?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(query).entered();

        self.client.query_one(query, params).map_err(ExecError::from)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, ExecError> {
        self.ensure_open()?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(query).entered();

        self.client.query(query, params).map_err(ExecError::from)
    }
}
