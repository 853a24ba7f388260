//! MySQL introspection over `mysql_async`, querying `information_schema`.

use crate::{with_retry, ConnectionConfig, IntrospectError, Introspector};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool};
use schemist_schema_model::{Column, Constraint, ConstraintKind, Index, Metadata, Schema, Table};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct MySqlIntrospector {
    config: ConnectionConfig,
}

impl MySqlIntrospector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn opts(&self) -> Result<Opts, String> {
        if let Some(url) = &self.config.connection_string {
            return Opts::from_url(url).map_err(|e| e.to_string());
        }
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(self.config.server.clone())
            .db_name(Some(self.config.database.clone()));
        if let Some(port) = self.config.port {
            builder = builder.tcp_port(port);
        }
        if let Some(user) = &self.config.username {
            builder = builder.user(Some(user.clone()));
        }
        if let Some(password) = &self.config.password {
            builder = builder.pass(Some(password.clone()));
        }
        Ok(Opts::from(builder))
    }

    async fn connect(&self) -> Result<Conn, String> {
        let opts = self.opts()?;
        let pool = Pool::new(opts);
        pool.get_conn().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Introspector for MySqlIntrospector {
    async fn introspect(&self, cancel: CancellationToken) -> Result<Schema, IntrospectError> {
        let mut conn = with_retry(&self.config, &cancel, || self.connect()).await?;
        let database = self.config.database.clone();

        let tables = introspect_tables_and_columns(&mut conn, &database).await?;
        let constraints = introspect_constraints(&mut conn, &database).await?;
        let indexes = introspect_indexes(&mut conn, &database).await?;

        info!(table_count = tables.len(), "mysql introspection complete");

        Ok(crate::finalize(Schema {
            tables,
            constraints,
            indexes,
            views: Vec::new(),
            procedures: Vec::new(),
            functions: Vec::new(),
        }))
    }
}

async fn introspect_tables_and_columns(conn: &mut Conn, database: &str) -> Result<Vec<Table>, IntrospectError> {
    let table_names: Vec<String> = conn
        .exec(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = ? AND table_type = 'BASE TABLE' ORDER BY table_name",
            (database,),
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let columns = introspect_columns(conn, database, &name).await?;
        tables.push(Table { name, schema: database.to_string(), columns, metadata: Metadata::new() });
    }
    Ok(tables)
}

async fn introspect_columns(conn: &mut Conn, database: &str, table: &str) -> Result<Vec<Column>, IntrospectError> {
    let rows: Vec<(String, String, String, Option<String>, Option<u64>, Option<u32>, Option<u32>, String)> = conn
        .exec(
            "SELECT column_name, data_type, is_nullable, column_default, \
                    character_maximum_length, numeric_precision, numeric_scale, extra \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
            (database, table),
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, is_nullable, default_value, max_length, precision, scale, extra)| Column {
            name,
            data_type: data_type.to_ascii_uppercase(),
            nullable: is_nullable == "YES",
            primary_key: false,
            identity: extra.contains("auto_increment"),
            max_length: max_length.map(|n| n as u32),
            precision,
            scale,
            default_value,
            metadata: Metadata::new(),
        })
        .collect())
}

async fn introspect_constraints(conn: &mut Conn, database: &str) -> Result<Vec<Constraint>, IntrospectError> {
    let rows: Vec<(String, String, String, String, Option<String>)> = conn
        .exec(
            "SELECT tc.constraint_name, tc.constraint_type, tc.table_name, kcu.column_name, \
                    kcu.referenced_table_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema \
             WHERE tc.table_schema = ?",
            (database,),
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut constraints: Vec<Constraint> = Vec::new();
    for (name, constraint_type, table, column, referenced_table) in rows {
        let kind = match constraint_type.as_str() {
            "PRIMARY KEY" => ConstraintKind::Pk,
            "UNIQUE" => ConstraintKind::Uq,
            "FOREIGN KEY" => ConstraintKind::Fk,
            "CHECK" => ConstraintKind::Ck,
            _ => continue,
        };
        if let Some(existing) = constraints.iter_mut().find(|c| c.name == name && c.table == table) {
            existing.columns.push(column);
        } else {
            constraints.push(Constraint {
                name,
                kind,
                table,
                schema: database.to_string(),
                columns: vec![column],
                referenced_schema: referenced_table.as_ref().map(|_| database.to_string()),
                referenced_table,
                referenced_columns: Vec::new(),
                on_delete: None,
                on_update: None,
                check_expression: None,
            });
        }
    }
    Ok(constraints)
}

async fn introspect_indexes(conn: &mut Conn, database: &str) -> Result<Vec<Index>, IntrospectError> {
    let rows: Vec<(String, String, String, i8)> = conn
        .exec(
            "SELECT index_name, table_name, column_name, non_unique \
             FROM information_schema.statistics WHERE table_schema = ? AND index_name != 'PRIMARY'",
            (database,),
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut indexes: Vec<Index> = Vec::new();
    for (name, table, column, non_unique) in rows {
        if let Some(existing) = indexes.iter_mut().find(|i| i.name == name && i.table == table) {
            existing.columns.push(column);
        } else {
            indexes.push(Index {
                name,
                table,
                schema: database.to_string(),
                columns: vec![column],
                unique: non_unique == 0,
                clustered: false,
                filter: None,
            });
        }
    }
    Ok(indexes)
}
