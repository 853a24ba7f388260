//! PostgreSQL introspection over `tokio-postgres`, querying
//! `information_schema` and `pg_catalog` directly rather than going
//! through an intermediate driver-abstraction layer.

use crate::{with_retry, ConnectionConfig, IntrospectError, Introspector};
use async_trait::async_trait;
use schemist_schema_model::{Column, Constraint, ConstraintKind, Index, Metadata, Schema, Table, View};
use tokio_postgres::{Client, NoTls, Row};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct PostgresIntrospector {
    config: ConnectionConfig,
}

impl PostgresIntrospector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn connection_string(&self) -> String {
        if let Some(explicit) = &self.config.connection_string {
            return explicit.clone();
        }
        let mut parts = vec![
            format!("host={}", self.config.server),
            format!("dbname={}", self.config.database),
        ];
        if let Some(port) = self.config.port {
            parts.push(format!("port={port}"));
        }
        if let Some(user) = &self.config.username {
            parts.push(format!("user={user}"));
        }
        if let Some(password) = &self.config.password {
            parts.push(format!("password={password}"));
        }
        parts.join(" ")
    }

    async fn connect(&self) -> Result<Client, String> {
        let (client, connection) = tokio_postgres::connect(&self.connection_string(), NoTls)
            .await
            .map_err(|e| e.to_string())?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection task ended with an error");
            }
        });
        Ok(client)
    }
}

#[async_trait]
impl Introspector for PostgresIntrospector {
    async fn introspect(&self, cancel: CancellationToken) -> Result<Schema, IntrospectError> {
        let client = with_retry(&self.config, &cancel, || self.connect()).await?;

        let schema_filter = self.config.schema.clone().unwrap_or_else(|| "public".to_string());

        let (tables, constraints, indexes, views) = tokio::try_join!(
            introspect_tables_and_columns(&client, &schema_filter),
            introspect_constraints(&client, &schema_filter),
            introspect_indexes(&client, &schema_filter),
            introspect_views(&client, &schema_filter),
        )?;

        info!(table_count = tables.len(), "postgres introspection complete");

        Ok(crate::finalize(Schema {
            tables,
            constraints,
            indexes,
            views,
            procedures: Vec::new(),
            functions: Vec::new(),
        }))
    }
}

async fn introspect_tables_and_columns(client: &Client, schema: &str) -> Result<Vec<Table>, IntrospectError> {
    let rows = client
        .query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
            &[&schema],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.get("table_name");
        let columns = introspect_columns(client, schema, &name).await?;
        tables.push(Table { name, schema: schema.to_string(), columns, metadata: Metadata::new() });
    }
    Ok(tables)
}

async fn introspect_columns(client: &Client, schema: &str, table: &str) -> Result<Vec<Column>, IntrospectError> {
    let rows = client
        .query(
            "SELECT column_name, data_type, is_nullable, column_default, \
                    character_maximum_length, numeric_precision, numeric_scale \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    Ok(rows
        .iter()
        .map(|row: &Row| {
            let default_value: Option<String> = row.get("column_default");
            let is_identity = default_value.as_deref().map(|d| d.starts_with("nextval(")).unwrap_or(false);
            Column {
                name: row.get("column_name"),
                data_type: row.get::<_, String>("data_type").to_ascii_uppercase(),
                nullable: row.get::<_, String>("is_nullable") == "YES",
                primary_key: false,
                identity: is_identity,
                max_length: row.get::<_, Option<i32>>("character_maximum_length").map(|n| n as u32),
                precision: row.get::<_, Option<i32>>("numeric_precision").map(|n| n as u32),
                scale: row.get::<_, Option<i32>>("numeric_scale").map(|n| n as u32),
                default_value,
                metadata: Metadata::new(),
            }
        })
        .collect())
}

async fn introspect_constraints(client: &Client, schema: &str) -> Result<Vec<Constraint>, IntrospectError> {
    // con.conkey/con.confkey are attnum arrays; unnest with ordinality to recover
    // declaration order, then join pg_attribute for the column names.
    let rows = client
        .query(
            "SELECT con.conname, con.contype, rel.relname AS table_name, \
                    frel.relname AS referenced_table, pg_get_constraintdef(con.oid) AS definition, \
                    att.attname AS column_name, fatt.attname AS referenced_column_name \
             FROM pg_constraint con \
             JOIN pg_class rel ON rel.oid = con.conrelid \
             JOIN pg_namespace nsp ON nsp.oid = rel.relnamespace \
             LEFT JOIN pg_class frel ON frel.oid = con.confrelid \
             JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS ord(attnum, ordinality) ON true \
             JOIN pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = ord.attnum \
             LEFT JOIN unnest(con.confkey) WITH ORDINALITY AS ford(attnum, ordinality) \
               ON ford.ordinality = ord.ordinality \
             LEFT JOIN pg_attribute fatt ON fatt.attrelid = con.confrelid AND fatt.attnum = ford.attnum \
             WHERE nsp.nspname = $1 \
             ORDER BY con.conname, ord.ordinality",
            &[&schema],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut constraints: Vec<Constraint> = Vec::new();
    for row in &rows {
        let contype: i8 = row.get::<_, i8>("contype");
        let kind = match contype as u8 as char {
            'p' => ConstraintKind::Pk,
            'u' => ConstraintKind::Uq,
            'f' => ConstraintKind::Fk,
            'c' => ConstraintKind::Ck,
            _ => continue,
        };
        let name: String = row.get("conname");
        let table: String = row.get("table_name");
        let column: String = row.get("column_name");
        let referenced_column: Option<String> = row.get("referenced_column_name");

        if let Some(existing) = constraints.iter_mut().find(|c| c.name == name && c.table == table) {
            existing.columns.push(column);
            if let Some(referenced_column) = referenced_column {
                existing.referenced_columns.push(referenced_column);
            }
        } else {
            let referenced_table: Option<String> = row.get("referenced_table");
            constraints.push(Constraint {
                name,
                kind,
                table,
                schema: schema.to_string(),
                columns: vec![column],
                referenced_schema: referenced_table.as_ref().map(|_| schema.to_string()),
                referenced_table,
                referenced_columns: referenced_column.into_iter().collect(),
                on_delete: None,
                on_update: None,
                check_expression: row.get("definition"),
            });
        }
    }
    Ok(constraints)
}

async fn introspect_indexes(client: &Client, schema: &str) -> Result<Vec<Index>, IntrospectError> {
    // pi.indkey is an int2vector of attnums in index order; cast to int2[] so it
    // can be unnested alongside WITH ORDINALITY the same way conkey is above.
    let rows = client
        .query(
            "SELECT ic.relname AS index_name, tc.relname AS table_name, \
                    pi.indisunique AS is_unique, pi.indisclustered AS is_clustered, \
                    att.attname AS column_name, \
                    pg_get_expr(pi.indpred, pi.indrelid) AS filter_expr \
             FROM pg_index pi \
             JOIN pg_class ic ON ic.oid = pi.indexrelid \
             JOIN pg_class tc ON tc.oid = pi.indrelid \
             JOIN pg_namespace nsp ON nsp.oid = tc.relnamespace \
             JOIN LATERAL unnest(pi.indkey::int2[]) WITH ORDINALITY AS ord(attnum, ordinality) ON true \
             JOIN pg_attribute att ON att.attrelid = pi.indrelid AND att.attnum = ord.attnum \
             WHERE nsp.nspname = $1 AND NOT pi.indisprimary \
             ORDER BY ic.relname, ord.ordinality",
            &[&schema],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut indexes: Vec<Index> = Vec::new();
    for row in &rows {
        let name: String = row.get("index_name");
        let table: String = row.get("table_name");
        let column: String = row.get("column_name");

        if let Some(existing) = indexes.iter_mut().find(|i| i.name == name && i.table == table) {
            existing.columns.push(column);
        } else {
            indexes.push(Index {
                name,
                table,
                schema: schema.to_string(),
                columns: vec![column],
                unique: row.get("is_unique"),
                clustered: row.get("is_clustered"),
                filter: row.get::<_, Option<String>>("filter_expr"),
            });
        }
    }
    Ok(indexes)
}

async fn introspect_views(client: &Client, schema: &str) -> Result<Vec<View>, IntrospectError> {
    let rows = client
        .query(
            "SELECT table_name, view_definition FROM information_schema.views WHERE table_schema = $1",
            &[&schema],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    Ok(rows
        .iter()
        .map(|row: &Row| View {
            name: row.get("table_name"),
            schema: schema.to_string(),
            definition: row.get("view_definition"),
        })
        .collect())
}
