//! Span constructors used when the `tracing` feature is enabled.

use tracing::Span;

/// Span around a single SQL statement
pub fn execute_query_span(query: &str) -> Span {
    tracing::debug_span!("lifeguard_pivot.query", db.statement = %query)
}

/// Span around `BEGIN`
pub fn begin_transaction_span() -> Span {
    tracing::debug_span!("lifeguard_pivot.transaction.begin")
}

/// Span around `COMMIT` / `ROLLBACK`
pub fn finish_transaction_span(statement: &str) -> Span {
    tracing::debug_span!("lifeguard_pivot.transaction.finish", statement = %statement)
}

/// Span around connection establishment
pub fn connect_span() -> Span {
    tracing::info_span!("lifeguard_pivot.connect")
}

/// Span around pivot detection for one relation
pub fn resolve_pivot_span(relation: &str, source: &str, target: &str) -> Span {
    tracing::debug_span!(
        "lifeguard_pivot.resolve",
        relation = %relation,
        source = %source,
        target = %target,
    )
}

/// Span around a full association sync
pub fn sync_span(pivot_table: &str, count: usize) -> Span {
    tracing::info_span!("lifeguard_pivot.sync", pivot_table = %pivot_table, ids = count)
}
