//! Oracle introspection over the OCI-based `oracle` crate. Like SQLite,
//! the driver is synchronous, so catalog queries run inside
//! `spawn_blocking`.

use crate::{with_retry, ConnectionConfig, IntrospectError, Introspector};
use async_trait::async_trait;
use oracle::Connection;
use schemist_schema_model::{Column, Constraint, ConstraintKind, Index, Metadata, Schema, Table};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct OracleIntrospector {
    config: ConnectionConfig,
}

impl OracleIntrospector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Connection, String> {
        let server = self.config.server.clone();
        let database = self.config.database.clone();
        let port = self.config.port.unwrap_or(1521);
        let username = self.config.username.clone().unwrap_or_default();
        let password = self.config.password.clone().unwrap_or_default();

        tokio::task::spawn_blocking(move || {
            let connect_string = format!("//{server}:{port}/{database}");
            Connection::connect(&username, &password, &connect_string).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[async_trait]
impl Introspector for OracleIntrospector {
    async fn introspect(&self, cancel: CancellationToken) -> Result<Schema, IntrospectError> {
        let conn = with_retry(&self.config, &cancel, || self.connect()).await?;
        let owner = self.config.schema.clone().unwrap_or_else(|| self.config.username.clone().unwrap_or_default());

        let schema = tokio::task::spawn_blocking(move || introspect_blocking(&conn, &owner))
            .await
            .map_err(|e| IntrospectError::QueryFailed(e.to_string()))??;

        info!(table_count = schema.tables.len(), "oracle introspection complete");
        Ok(crate::finalize(schema))
    }
}

fn introspect_blocking(conn: &Connection, owner: &str) -> Result<Schema, IntrospectError> {
    let tables = table_names(conn, owner)?;
    let mut out_tables = Vec::with_capacity(tables.len());
    for name in &tables {
        let columns = table_columns(conn, owner, name)?;
        out_tables.push(Table { name: name.clone(), schema: owner.to_string(), columns, metadata: Metadata::new() });
    }
    let constraints = constraints(conn, owner)?;
    let indexes = indexes(conn, owner)?;

    Ok(Schema {
        tables: out_tables,
        constraints,
        indexes,
        views: Vec::new(),
        procedures: Vec::new(),
        functions: Vec::new(),
    })
}

fn table_names(conn: &Connection, owner: &str) -> Result<Vec<String>, IntrospectError> {
    let mut stmt = conn
        .statement("SELECT table_name FROM all_tables WHERE owner = :1 ORDER BY table_name")
        .build()
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
    let rows = stmt.query(&[&owner]).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut names = Vec::new();
    for row_result in rows {
        let row = row_result.map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let name: String = row.get(0).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        names.push(name);
    }
    Ok(names)
}

fn table_columns(conn: &Connection, owner: &str, table: &str) -> Result<Vec<Column>, IntrospectError> {
    let mut stmt = conn
        .statement(
            "SELECT column_name, data_type, nullable, data_default, data_length, \
                    data_precision, data_scale \
             FROM all_tab_columns WHERE owner = :1 AND table_name = :2 ORDER BY column_id",
        )
        .build()
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
    let rows = stmt.query(&[&owner, &table]).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut columns = Vec::new();
    for row_result in rows {
        let row = row_result.map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let name: String = row.get(0).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let data_type: String = row.get(1).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let nullable: String = row.get(2).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let default_value: Option<String> = row.get(3).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let data_length: Option<i64> = row.get(4).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let precision: Option<i64> = row.get(5).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let scale: Option<i64> = row.get(6).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

        columns.push(Column {
            name,
            data_type: data_type.to_ascii_uppercase(),
            nullable: nullable == "Y",
            primary_key: false,
            identity: false,
            max_length: data_length.map(|n| n as u32),
            precision: precision.map(|n| n as u32),
            scale: scale.map(|n| n as u32),
            default_value: default_value.map(|d| d.trim().to_string()),
            metadata: Metadata::new(),
        });
    }
    Ok(columns)
}

fn constraints(conn: &Connection, owner: &str) -> Result<Vec<Constraint>, IntrospectError> {
    let mut stmt = conn
        .statement(
            "SELECT c.constraint_name, c.constraint_type, c.table_name, cc.column_name, \
                    r.table_name AS referenced_table \
             FROM all_constraints c \
             JOIN all_cons_columns cc ON cc.constraint_name = c.constraint_name AND cc.owner = c.owner \
             LEFT JOIN all_constraints r ON r.constraint_name = c.r_constraint_name AND r.owner = c.owner \
             WHERE c.owner = :1 AND c.constraint_type IN ('P', 'U', 'R', 'C')",
        )
        .build()
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
    let rows = stmt.query(&[&owner]).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut out: Vec<Constraint> = Vec::new();
    for row_result in rows {
        let row = row_result.map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let name: String = row.get(0).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let constraint_type: String = row.get(1).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let table: String = row.get(2).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let column: String = row.get(3).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let referenced_table: Option<String> = row.get(4).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

        let kind = match constraint_type.as_str() {
            "P" => ConstraintKind::Pk,
            "U" => ConstraintKind::Uq,
            "R" => ConstraintKind::Fk,
            "C" => ConstraintKind::Ck,
            _ => continue,
        };

        if let Some(existing) = out.iter_mut().find(|c| c.name == name && c.table == table) {
            existing.columns.push(column);
        } else {
            out.push(Constraint {
                name,
                kind,
                table,
                schema: owner.to_string(),
                columns: vec![column],
                referenced_schema: referenced_table.as_ref().map(|_| owner.to_string()),
                referenced_table,
                referenced_columns: Vec::new(),
                on_delete: None,
                on_update: None,
                check_expression: None,
            });
        }
    }
    Ok(out)
}

fn indexes(conn: &Connection, owner: &str) -> Result<Vec<Index>, IntrospectError> {
    let mut stmt = conn
        .statement(
            "SELECT i.index_name, i.table_name, ic.column_name, i.uniqueness \
             FROM all_indexes i \
             JOIN all_ind_columns ic ON ic.index_name = i.index_name AND ic.index_owner = i.owner \
             WHERE i.owner = :1 ORDER BY i.index_name, ic.column_position",
        )
        .build()
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
    let rows = stmt.query(&[&owner]).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut out: Vec<Index> = Vec::new();
    for row_result in rows {
        let row = row_result.map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let name: String = row.get(0).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let table: String = row.get(1).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let column: String = row.get(2).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;
        let uniqueness: String = row.get(3).map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

        if let Some(existing) = out.iter_mut().find(|i| i.name == name && i.table == table) {
            existing.columns.push(column);
        } else {
            out.push(Index {
                name,
                table,
                schema: owner.to_string(),
                columns: vec![column],
                unique: uniqueness == "UNIQUE",
                clustered: false,
                filter: None,
            });
        }
    }
    Ok(out)
}
