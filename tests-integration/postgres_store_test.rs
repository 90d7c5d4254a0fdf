//! Integration tests for the PostgreSQL store
//!
//! These tests run the association field against a real PostgreSQL database.
//! The connection comes from `DatabaseConfig::load()`, i.e.
//! `config/config.toml` or `LIFEGUARD__DATABASE__URL`; without a reachable
//! server each test prints a notice and returns.
//!
//! Every test owns its tables, so the suite can run in parallel:
//! - `articles` / `labels` through `article_label`
//! - `books` / `genres` through `book_genre`
//! - `shipments` / `ports` through `shipment_port` (VARCHAR target keys)
//! - `movies` (schema lookups only)

use lifeguard_pivot::{
    AssociationField, DatabaseConfig, EntityId, EntityType, ExecError, Executor, FieldContext,
    FieldError, FieldValue, FormRequest, PgStore, PivotInfo, Record, RelationshipConfig,
    SchemaCatalog, Settings, StoreError, ViewMode,
};
use sea_query::{
    Alias, ColumnDef, ForeignKey, ForeignKeyAction, Index, PostgresQueryBuilder, Query, Table,
};
use std::sync::Arc;

// ============================================================================
// Helpers
// ============================================================================

fn connect_or_skip(test: &str) -> Option<PgStore> {
    let config = match DatabaseConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("skipping {test}: configuration error: {e}");
            return None;
        }
    };
    match PgStore::connect(&config) {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("skipping {test}: no database at {}: {e}", config.url);
            None
        }
    }
}

fn run(store: &PgStore, sql: &str) -> Result<u64, ExecError> {
    store.executor().execute(sql, &[])
}

/// Drop and recreate `source`, `target` and their pivot
///
/// Source keys are BIGINT and target keys INTEGER, so both column widths are
/// exercised.
fn create_schema(store: &PgStore, source: &str, target: &str, pivot: &PivotInfo) -> Result<(), ExecError> {
    for table in [pivot.pivot_table.as_str(), source, target] {
        run(
            store,
            &Table::drop()
                .table(Alias::new(table))
                .if_exists()
                .cascade()
                .build(PostgresQueryBuilder),
        )?;
    }

    run(
        store,
        &Table::create()
            .table(Alias::new(source))
            .col(ColumnDef::new(Alias::new("id")).big_integer().not_null().primary_key())
            .col(ColumnDef::new(Alias::new("title")).text())
            .build(PostgresQueryBuilder),
    )?;
    run(
        store,
        &Table::create()
            .table(Alias::new(target))
            .col(ColumnDef::new(Alias::new("id")).integer().not_null().primary_key())
            .col(ColumnDef::new(Alias::new("name")).text())
            .build(PostgresQueryBuilder),
    )?;
    run(
        store,
        &Table::create()
            .table(Alias::new(pivot.pivot_table.as_str()))
            .col(ColumnDef::new(Alias::new(pivot.foreign_key.as_str())).big_integer().not_null())
            .col(ColumnDef::new(Alias::new(pivot.related_key.as_str())).integer().not_null())
            .primary_key(
                Index::create()
                    .col(Alias::new(pivot.foreign_key.as_str()))
                    .col(Alias::new(pivot.related_key.as_str())),
            )
            .foreign_key(
                ForeignKey::create()
                    .from(Alias::new(pivot.pivot_table.as_str()), Alias::new(pivot.foreign_key.as_str()))
                    .to(Alias::new(source), Alias::new("id"))
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .foreign_key(
                ForeignKey::create()
                    .from(Alias::new(pivot.pivot_table.as_str()), Alias::new(pivot.related_key.as_str()))
                    .to(Alias::new(target), Alias::new("id"))
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .build(PostgresQueryBuilder),
    )?;
    Ok(())
}

fn insert_rows(store: &PgStore, table: &str, column: &str, rows: &[(i64, &str)]) -> Result<(), ExecError> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut insert = Query::insert()
        .into_table(Alias::new(table))
        .columns([Alias::new("id"), Alias::new(column)])
        .to_owned();
    for (id, value) in rows {
        insert.values_panic([(*id).into(), (*value).into()]);
    }
    run(store, &insert.to_string(PostgresQueryBuilder))?;
    Ok(())
}

fn link(store: &PgStore, pivot: &PivotInfo, pairs: &[(i64, i64)]) -> Result<(), ExecError> {
    if pairs.is_empty() {
        return Ok(());
    }
    let mut insert = Query::insert()
        .into_table(Alias::new(pivot.pivot_table.as_str()))
        .columns([
            Alias::new(pivot.foreign_key.as_str()),
            Alias::new(pivot.related_key.as_str()),
        ])
        .to_owned();
    for (source, target) in pairs {
        insert.values_panic([(*source).into(), (*target).into()]);
    }
    run(store, &insert.to_string(PostgresQueryBuilder))?;
    Ok(())
}

fn linked(store: &PgStore, pivot: &PivotInfo, source: i64) -> Result<Vec<i64>, ExecError> {
    let sql = format!(
        "SELECT {rk}::bigint FROM {table} WHERE {fk} = $1 ORDER BY 1",
        rk = pivot.related_key,
        table = pivot.pivot_table,
        fk = pivot.foreign_key
    );
    let rows = store.executor().query_all(&sql, &[&source])?;
    Ok(rows.iter().map(|row| row.get::<_, i64>(0)).collect())
}

fn ints(values: &[i64]) -> Vec<EntityId> {
    values.iter().copied().map(EntityId::Int).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_pg_detect_read_and_sync() {
    let Some(store) = connect_or_skip("test_pg_detect_read_and_sync") else {
        return;
    };
    let pivot = PivotInfo::new("article_label", "article_id", "label_id");
    create_schema(&store, "articles", "labels", &pivot).expect("Failed to create schema");
    insert_rows(&store, "articles", "title", &[(1, "First"), (2, "Second")]).unwrap();
    insert_rows(&store, "labels", "name", &[(1, "news"), (2, "sport"), (3, "tech")]).unwrap();
    link(&store, &pivot, &[(1, 1), (1, 2), (2, 3)]).unwrap();

    let settings = Settings::default();
    let articles = Arc::new(EntityType::new("Article", "articles").with_display_field("title"));
    let labels = Arc::new(EntityType::new("Label", "labels"));
    let ctx = FieldContext::new(&settings, &store, articles.clone());

    let mut field = AssociationField::new("Labels")
        .relationship_config(&ctx, RelationshipConfig::new(labels, "labels"));
    assert_eq!(field.pivot(), Some(&pivot));

    let article = Record::new(articles).set("id", 1);
    field.resolve(&ctx, &article, ViewMode::Form).unwrap();
    assert_eq!(field.value(), &FieldValue::Ids(ints(&[1, 2])));
    let labels: Vec<_> = field.meta().options.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["news", "sport", "tech"]);

    let request = FormRequest::new().with("labels", r#"["2","3","3"]"#);
    let changes = field
        .fill_from_request(&ctx, &request, &article)
        .unwrap()
        .unwrap();
    assert_eq!(changes.attached, ints(&[3]));
    assert_eq!(changes.detached, ints(&[1]));
    assert_eq!(linked(&store, &pivot, 1).unwrap(), vec![2, 3]);
    // The other article keeps its labels
    assert_eq!(linked(&store, &pivot, 2).unwrap(), vec![3]);

    field.resolve(&ctx, &article, ViewMode::Index).unwrap();
    assert_eq!(
        field.value().links().unwrap()[0],
        r#"<a class="link-default" href="/admin/resources/labels/2">sport</a>"#
    );
}

#[test]
fn test_pg_failed_sync_rolls_back() {
    let Some(store) = connect_or_skip("test_pg_failed_sync_rolls_back") else {
        return;
    };
    let pivot = PivotInfo::new("book_genre", "book_id", "genre_id");
    create_schema(&store, "books", "genres", &pivot).expect("Failed to create schema");
    insert_rows(&store, "books", "title", &[(10, "Dune")]).unwrap();
    insert_rows(&store, "genres", "name", &[(1, "scifi"), (2, "classic")]).unwrap();
    link(&store, &pivot, &[(10, 1)]).unwrap();

    let settings = Settings {
        debug: true,
        ..Settings::default()
    };
    let books = Arc::new(EntityType::new("Book", "books"));
    let genres = Arc::new(EntityType::new("Genre", "genres"));
    let ctx = FieldContext::new(&settings, &store, books.clone());
    let field = AssociationField::new("Genres")
        .relationship_config(&ctx, RelationshipConfig::new(genres, "genres"));

    let book = Record::new(books).set("id", 10);
    let request = FormRequest::new().with("genres", "[2, 999]");
    let err = field.fill_from_request(&ctx, &request, &book).unwrap_err();
    assert!(matches!(err, FieldError::AssociationSync(_)), "{err}");
    assert_eq!(linked(&store, &pivot, 10).unwrap(), vec![1]);

    // The connection is usable again after the rollback
    let request = FormRequest::new().with("genres", "null");
    field.fill_from_request(&ctx, &request, &book).unwrap();
    assert!(linked(&store, &pivot, 10).unwrap().is_empty());
}

#[test]
fn test_pg_string_keys_keep_their_text() {
    let Some(store) = connect_or_skip("test_pg_string_keys_keep_their_text") else {
        return;
    };
    for sql in [
        "DROP TABLE IF EXISTS shipment_port, shipments, ports CASCADE",
        "CREATE TABLE shipments (id BIGINT PRIMARY KEY)",
        "CREATE TABLE ports (id VARCHAR(8) PRIMARY KEY, name TEXT)",
        "CREATE TABLE shipment_port (\
            shipment_id BIGINT NOT NULL REFERENCES shipments(id), \
            port_id VARCHAR(8) NOT NULL REFERENCES ports(id), \
            PRIMARY KEY (shipment_id, port_id))",
        "INSERT INTO shipments VALUES (1)",
        "INSERT INTO ports VALUES ('007', 'Dock seven padded'), ('7', 'Dock seven'), ('LHR', 'Heathrow')",
        "INSERT INTO shipment_port VALUES (1, '7')",
    ] {
        run(&store, sql).unwrap();
    }

    let settings = Settings::default();
    let shipments = Arc::new(EntityType::new("Shipment", "shipments"));
    let ports = Arc::new(EntityType::new("Port", "ports"));
    let ctx = FieldContext::new(&settings, &store, shipments.clone());
    let mut field = AssociationField::new("Ports")
        .relationship_config(&ctx, RelationshipConfig::new(ports, "ports"));

    let shipment = Record::new(shipments).set("id", 1);
    field.resolve(&ctx, &shipment, ViewMode::Form).unwrap();
    assert_eq!(field.value(), &FieldValue::Ids(vec![EntityId::Int(7)]));

    let request = FormRequest::new().with("ports", r#"["007", "LHR"]"#);
    let changes = field
        .fill_from_request(&ctx, &request, &shipment)
        .unwrap()
        .unwrap();
    assert_eq!(
        changes.attached,
        vec![EntityId::Str("007".into()), EntityId::Str("LHR".into())]
    );
    assert_eq!(changes.detached, vec![EntityId::Int(7)]);

    let rows = store
        .executor()
        .query_all("SELECT port_id FROM shipment_port WHERE shipment_id = 1 ORDER BY 1", &[])
        .unwrap();
    let stored: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
    assert_eq!(stored, vec!["007".to_string(), "LHR".to_string()]);
}

#[test]
fn test_pg_has_table() {
    let Some(store) = connect_or_skip("test_pg_has_table") else {
        return;
    };
    run(&store, "DROP TABLE IF EXISTS movies").unwrap();
    run(&store, "CREATE TABLE movies (id BIGINT PRIMARY KEY)").unwrap();

    assert!(store.has_table("movies").unwrap());
    assert!(store.has_table("public.movies").unwrap());
    assert!(!store.has_table("movie_actor").unwrap());
    assert!(!store.has_table("no_such_schema.movies").unwrap());
}

#[test]
fn test_pg_unsafe_identifiers_are_rejected() {
    let Some(store) = connect_or_skip("test_pg_unsafe_identifiers_are_rejected") else {
        return;
    };
    let settings = Settings::default();
    let movies = Arc::new(EntityType::new("Movie", "movies"));
    let actors = Arc::new(EntityType::new("Actor", "actors"));
    let ctx = FieldContext::new(&settings, &store, movies.clone());
    let mut field = AssociationField::new("Actors").relationship_config(
        &ctx,
        RelationshipConfig::new(actors, "actors")
            .pivot(PivotInfo::new("movie_actor; DROP TABLE movies", "movie_id", "actor_id")),
    );

    let movie = Record::new(movies).set("id", 1);
    let err = field.resolve(&ctx, &movie, ViewMode::Form).unwrap_err();
    assert!(
        matches!(err, FieldError::Storage(StoreError::InvalidIdentifier(_))),
        "{err}"
    );
}
