//! PostgreSQL backend.
//!
//! Statements are built with SeaQuery and executed through [`Executor`].
//! Rows are fetched as `row_to_json(t)::text` so any table decodes into a
//! [`Record`] without a generated model. Key columns are compared through
//! their text form against text parameters, so integer and string keyed tables
//! share one code path. Inserted integer ids are bound as `BIGINT` and left to
//! the server's assignment cast.
//!
//! A sync runs in one transaction: check that every id exists, lock and read
//! the current pivot rows, delete what is gone, insert what is new.

use super::{EntityCatalog, RelationStore, SchemaCatalog, SyncChanges};
use crate::config::DatabaseConfig;
use crate::connection::{connect_with, ConnectionError};
use crate::entity::{EntityId, EntityType, Model, Record};
use crate::error::StoreError;
use crate::executor::{Executor, PgExecutor};
use crate::pivot::PivotInfo;
use may_postgres::types::ToSql;
use may_postgres::Row;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_query::{
    Alias, Expr, ExprTrait, IntoColumnRef, LockType, Order, PostgresQueryBuilder, Query,
    SelectStatement, Value, Values,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use crate::tracing_helpers;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid"));

const ROW_ALIAS: &str = "t";

const HAS_TABLE_SQL: &str = "SELECT EXISTS (\
    SELECT 1 FROM information_schema.tables \
    WHERE table_schema = COALESCE($1::text, current_schema()) \
    AND table_name = $2::text)";

/// PostgreSQL implementation of every storage trait
pub struct PgStore {
    executor: PgExecutor,
}

impl PgStore {
    pub fn new(executor: PgExecutor) -> Self {
        Self { executor }
    }

    /// Connect using the `[database]` settings
    pub fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        Ok(Self::new(PgExecutor::new(connect_with(config)?)))
    }

    pub fn executor(&self) -> &PgExecutor {
        &self.executor
    }
}

impl SchemaCatalog for PgStore {
    fn has_table(&self, name: &str) -> Result<bool, StoreError> {
        let (schema, table) = match name.split_once('.') {
            Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
            None => (None, name.to_string()),
        };
        let row = self.executor.query_one(HAS_TABLE_SQL, &[&schema, &table])?;
        row.try_get::<_, bool>(0)
            .map_err(|e| StoreError::Decode(format!("has_table: {e}")))
    }
}

impl EntityCatalog for PgStore {
    fn all(&self, entity_type: &EntityType) -> Result<Vec<Record>, StoreError> {
        let query = select_all(entity_type)?;
        let rows = run_query(&self.executor, &query)?;
        decode_records(&rows, entity_type)
    }
}

impl RelationStore for PgStore {
    fn related(
        &self,
        source_key: &EntityId,
        pivot: &PivotInfo,
        target: &EntityType,
    ) -> Result<Vec<Record>, StoreError> {
        let query = select_related(source_key, pivot, target)?;
        let rows = run_query(&self.executor, &query)?;
        let mut records = decode_records(&rows, target)?;

        // Duplicate pivot rows would otherwise repeat an entity
        let mut seen = Vec::with_capacity(records.len());
        records.retain(|r| match r.key() {
            Some(key) if !seen.contains(&key) => {
                seen.push(key);
                true
            }
            _ => false,
        });
        Ok(records)
    }

    fn sync(
        &self,
        source_key: &EntityId,
        pivot: &PivotInfo,
        target: &EntityType,
        ids: &[EntityId],
    ) -> Result<SyncChanges, StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::sync_span(&pivot.pivot_table, ids.len()).entered();

        let tx = self.executor.begin()?;
        match sync_within(&tx, source_key, pivot, target, ids) {
            Ok(changes) => {
                tx.commit()?;
                log::debug!(
                    "synced {}: {} attached, {} detached",
                    pivot.pivot_table,
                    changes.attached.len(),
                    changes.detached.len()
                );
                Ok(changes)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    log::warn!("rollback of {} sync failed: {rollback_err}", pivot.pivot_table);
                }
                Err(e)
            }
        }
    }
}

fn sync_within<E: Executor>(
    executor: &E,
    source_key: &EntityId,
    pivot: &PivotInfo,
    target: &EntityType,
    ids: &[EntityId],
) -> Result<SyncChanges, StoreError> {
    if !ids.is_empty() {
        let found = decode_ids(&run_query(executor, &select_existing(target, ids)?)?)?;
        if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
            return Err(StoreError::Constraint(format!(
                "key ({})=({missing}) is not present in table \"{}\"",
                target.key_name(),
                target.table()
            )));
        }
    }

    let current = decode_ids(&run_query(executor, &select_current(source_key, pivot)?)?)?;
    let changes = SyncChanges::diff(&current, ids);

    if !changes.detached.is_empty() {
        let (sql, values) = Query::delete()
            .from_table(ident(&pivot.pivot_table)?)
            .and_where(key_text(ident(&pivot.foreign_key)?).eq(id_text(source_key)))
            .and_where(key_text(ident(&pivot.related_key)?).is_in(changes.detached.iter().map(id_text)))
            .build(PostgresQueryBuilder);
        execute(executor, &sql, &values)?;
    }

    if !changes.attached.is_empty() {
        let mut insert = Query::insert()
            .into_table(ident(&pivot.pivot_table)?)
            .columns([ident(&pivot.foreign_key)?, ident(&pivot.related_key)?])
            .to_owned();
        for id in &changes.attached {
            insert
                .values([id_value(source_key), id_value(id)])
                .map_err(|e| StoreError::Other(format!("building pivot insert: {e}")))?;
        }
        let (sql, values) = insert.build(PostgresQueryBuilder);
        execute(executor, &sql, &values)?;
    }

    Ok(changes)
}

// ============================================================================
// Statement builders
// ============================================================================

fn ident(name: &str) -> Result<Alias, StoreError> {
    if IDENTIFIER.is_match(name) {
        Ok(Alias::new(name))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Key column in its text form
fn key_text<C: IntoColumnRef>(column: C) -> Expr {
    Expr::col(column).cast_as(Alias::new("TEXT"))
}

/// Comparison operand for [`key_text`]
fn id_text(id: &EntityId) -> Expr {
    Expr::val(id.to_string())
}

/// Inserted value; string keys keep their exact text
fn id_value(id: &EntityId) -> Expr {
    match id {
        EntityId::Int(i) => Expr::val(*i).cast_as(Alias::new("BIGINT")),
        EntityId::Str(s) => Expr::val(s.clone()),
    }
}

fn row_json() -> Expr {
    Expr::cust(format!("row_to_json({ROW_ALIAS})::text"))
}

fn select_all(target: &EntityType) -> Result<SelectStatement, StoreError> {
    Ok(Query::select()
        .expr(row_json())
        .from_as(ident(target.table())?, Alias::new(ROW_ALIAS))
        .order_by((Alias::new(ROW_ALIAS), ident(target.key_name())?), Order::Asc)
        .to_owned())
}

fn select_related(
    source_key: &EntityId,
    pivot: &PivotInfo,
    target: &EntityType,
) -> Result<SelectStatement, StoreError> {
    let pivot_table = ident(&pivot.pivot_table)?;
    Ok(Query::select()
        .expr(row_json())
        .from_as(ident(target.table())?, Alias::new(ROW_ALIAS))
        .inner_join(
            pivot_table.clone(),
            Expr::col((pivot_table.clone(), ident(&pivot.related_key)?))
                .equals((Alias::new(ROW_ALIAS), ident(target.key_name())?)),
        )
        .and_where(key_text((pivot_table, ident(&pivot.foreign_key)?)).eq(id_text(source_key)))
        .order_by((Alias::new(ROW_ALIAS), ident(target.key_name())?), Order::Asc)
        .to_owned())
}

fn select_current(source_key: &EntityId, pivot: &PivotInfo) -> Result<SelectStatement, StoreError> {
    Ok(Query::select()
        .expr(key_text(ident(&pivot.related_key)?))
        .from(ident(&pivot.pivot_table)?)
        .and_where(key_text(ident(&pivot.foreign_key)?).eq(id_text(source_key)))
        .lock(LockType::Update)
        .to_owned())
}

fn select_existing(target: &EntityType, ids: &[EntityId]) -> Result<SelectStatement, StoreError> {
    Ok(Query::select()
        .expr(key_text(ident(target.key_name())?))
        .from(ident(target.table())?)
        .and_where(key_text(ident(target.key_name())?).is_in(ids.iter().map(id_text)))
        .to_owned())
}

// ============================================================================
// Execution and decoding
// ============================================================================

fn bind(values: &Values) -> Result<Vec<Box<dyn ToSql + Sync>>, StoreError> {
    values
        .iter()
        .map(|value| -> Result<Box<dyn ToSql + Sync>, StoreError> {
            match value {
                Value::BigInt(Some(i)) => Ok(Box::new(*i)),
                Value::String(Some(s)) => Ok(Box::new(s.clone())),
                other => Err(StoreError::Other(format!(
                    "Unsupported value type in query: {other:?}"
                ))),
            }
        })
        .collect()
}

fn with_params<R>(
    values: &Values,
    f: impl FnOnce(&[&dyn ToSql]) -> Result<R, StoreError>,
) -> Result<R, StoreError> {
    let owned = bind(values)?;
    let params: Vec<&dyn ToSql> = owned.iter().map(|p| p.as_ref() as &dyn ToSql).collect();
    f(&params)
}

fn run_query<E: Executor>(executor: &E, query: &SelectStatement) -> Result<Vec<Row>, StoreError> {
    let (sql, values) = query.build(PostgresQueryBuilder);
    with_params(&values, |params| Ok(executor.query_all(&sql, params)?))
}

fn execute<E: Executor>(executor: &E, sql: &str, values: &Values) -> Result<u64, StoreError> {
    with_params(values, |params| Ok(executor.execute(sql, params)?))
}

fn decode_records(rows: &[Row], entity_type: &EntityType) -> Result<Vec<Record>, StoreError> {
    let shared = Arc::new(entity_type.clone());
    rows.iter()
        .map(|row| {
            let text: String = row
                .try_get(0)
                .map_err(|e| StoreError::Decode(format!("{}: {e}", entity_type.table())))?;
            parse_record(&text, &shared)
        })
        .collect()
}

fn parse_record(text: &str, entity_type: &Arc<EntityType>) -> Result<Record, StoreError> {
    match serde_json::from_str::<JsonValue>(text) {
        Ok(JsonValue::Object(attributes)) => Ok(Record::with_attributes(entity_type.clone(), attributes)),
        Ok(other) => Err(StoreError::Decode(format!(
            "{}: expected a JSON object per row, got {other}",
            entity_type.table()
        ))),
        Err(e) => Err(StoreError::Decode(format!("{}: {e}", entity_type.table()))),
    }
}

fn decode_ids(rows: &[Row]) -> Result<Vec<EntityId>, StoreError> {
    rows.iter()
        .map(|row| {
            row.try_get::<_, String>(0)
                .map(|text| EntityId::parse(&text))
                .map_err(|e| StoreError::Decode(format!("pivot key: {e}")))
        })
        .collect()
}
