//! SQLite introspection over `rusqlite`. The driver is synchronous, so
//! every catalog query runs inside `spawn_blocking` rather than racing
//! against cancellation mid-query; only the outer retry loop is async.

use crate::{with_retry, ConnectionConfig, IntrospectError, Introspector};
use async_trait::async_trait;
use rusqlite::Connection;
use schemist_schema_model::{Column, Constraint, ConstraintKind, Index, Metadata, Schema, Table};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct SqliteIntrospector {
    config: ConnectionConfig,
}

impl SqliteIntrospector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn path(&self) -> String {
        self.config.connection_string.clone().unwrap_or_else(|| self.config.database.clone())
    }

    async fn connect(&self) -> Result<Arc<Mutex<Connection>>, String> {
        let path = self.path();
        tokio::task::spawn_blocking(move || Connection::open(&path).map_err(|e| e.to_string()))
            .await
            .map_err(|e| e.to_string())?
            .map(|conn| Arc::new(Mutex::new(conn)))
    }
}

#[async_trait]
impl Introspector for SqliteIntrospector {
    async fn introspect(&self, cancel: CancellationToken) -> Result<Schema, IntrospectError> {
        let conn = with_retry(&self.config, &cancel, || self.connect()).await?;

        let schema = tokio::task::spawn_blocking(move || introspect_blocking(&conn))
            .await
            .map_err(|e| IntrospectError::QueryFailed(e.to_string()))??;

        info!(table_count = schema.tables.len(), "sqlite introspection complete");
        Ok(crate::finalize(schema))
    }
}

fn introspect_blocking(conn: &Arc<Mutex<Connection>>) -> Result<Schema, IntrospectError> {
    let conn = conn.lock().expect("sqlite connection mutex poisoned");

    let table_names = table_names(&conn)?;
    let mut tables = Vec::with_capacity(table_names.len());
    let mut constraints = Vec::new();
    let mut indexes = Vec::new();

    for name in &table_names {
        let columns = table_columns(&conn, name)?;
        constraints.extend(table_constraints(&conn, name)?);
        indexes.extend(table_indexes(&conn, name)?);
        tables.push(Table { name: name.clone(), schema: "main".to_string(), columns, metadata: Metadata::new() });
    }

    Ok(Schema {
        tables,
        constraints,
        indexes,
        views: Vec::new(),
        procedures: Vec::new(),
        functions: Vec::new(),
    })
}

fn table_names(conn: &Connection) -> Result<Vec<String>, IntrospectError> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(|e| IntrospectError::QueryFailed(e.to_string()))
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<Column>, IntrospectError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_pragma_ident(table)))
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let data_type: String = row.get(2)?;
            let notnull: i64 = row.get(3)?;
            let default_value: Option<String> = row.get(4)?;
            let pk: i64 = row.get(5)?;
            Ok((name, data_type, notnull, default_value, pk))
        })
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    rows.map(|r| {
        r.map(|(name, data_type, notnull, default_value, pk)| Column {
            name,
            data_type: data_type.to_ascii_uppercase(),
            nullable: notnull == 0,
            primary_key: pk > 0,
            identity: pk > 0 && data_type.eq_ignore_ascii_case("INTEGER"),
            max_length: None,
            precision: None,
            scale: None,
            default_value,
            metadata: Metadata::new(),
        })
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))
    })
    .collect()
}

fn table_constraints(conn: &Connection, table: &str) -> Result<Vec<Constraint>, IntrospectError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA foreign_key_list({})", quote_pragma_ident(table)))
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let referenced_table: String = row.get(2)?;
            let from: String = row.get(3)?;
            let to: String = row.get(4)?;
            let on_update: String = row.get(5)?;
            let on_delete: String = row.get(6)?;
            Ok((id, referenced_table, from, to, on_update, on_delete))
        })
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut constraints: Vec<Constraint> = Vec::new();
    for row in rows {
        let (id, referenced_table, from, to, on_update, on_delete) =
            row.map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let name = format!("fk_{table}_{id}");
        if let Some(existing) = constraints.iter_mut().find(|c| c.name == name) {
            existing.columns.push(from);
            existing.referenced_columns.push(to);
        } else {
            constraints.push(Constraint {
                name,
                kind: ConstraintKind::Fk,
                table: table.to_string(),
                schema: "main".to_string(),
                columns: vec![from],
                referenced_table: Some(referenced_table),
                referenced_schema: Some("main".to_string()),
                referenced_columns: vec![to],
                on_delete: Some(on_delete),
                on_update: Some(on_update),
                check_expression: None,
            });
        }
    }
    Ok(constraints)
}

fn table_indexes(conn: &Connection, table: &str) -> Result<Vec<Index>, IntrospectError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA index_list({})", quote_pragma_ident(table)))
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let index_rows = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: i64 = row.get(2)?;
            let origin: String = row.get(3)?;
            Ok((name, unique, origin))
        })
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut indexes = Vec::new();
    for (name, unique, origin) in index_rows {
        if origin == "pk" {
            continue;
        }
        let mut info_stmt = conn
            .prepare(&format!("PRAGMA index_info({})", quote_pragma_ident(&name)))
            .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let columns: Vec<String> = info_stmt
            .query_map([], |row| row.get::<_, String>(2))
            .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

        indexes.push(Index {
            name,
            table: table.to_string(),
            schema: "main".to_string(),
            columns,
            unique: unique != 0,
            clustered: false,
            filter: None,
        });
    }
    Ok(indexes)
}

/// SQLite's PRAGMA statements don't accept bound parameters for object
/// names, so identifiers are quoted and inlined instead.
fn quote_pragma_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
