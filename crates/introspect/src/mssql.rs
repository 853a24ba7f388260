//! SQL Server introspection over `tiberius`.

use crate::{with_retry, ConnectionConfig, IntrospectError, Introspector};
use async_trait::async_trait;
use schemist_schema_model::{Column, Constraint, ConstraintKind, Index, Metadata, Schema, Table};
use tiberius::{Client, Config, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct SqlServerIntrospector {
    config: ConnectionConfig,
}

impl SqlServerIntrospector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn tiberius_config(&self) -> Result<Config, String> {
        if let Some(conn_str) = &self.config.connection_string {
            return Config::from_ado_string(conn_str).map_err(|e| e.to_string());
        }
        let mut cfg = Config::new();
        cfg.host(&self.config.server);
        cfg.port(self.config.port.unwrap_or(1433));
        cfg.database(&self.config.database);
        if let (Some(user), Some(password)) = (&self.config.username, &self.config.password) {
            cfg.authentication(tiberius::AuthMethod::sql_server(user, password));
        }
        cfg.trust_cert();
        Ok(cfg)
    }

    async fn connect(&self) -> Result<Client<Compat<TcpStream>>, String> {
        let config = self.tiberius_config()?;
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| e.to_string())?;
        tcp.set_nodelay(true).map_err(|e| e.to_string())?;
        Client::connect(config, tcp.compat_write()).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Introspector for SqlServerIntrospector {
    async fn introspect(&self, cancel: CancellationToken) -> Result<Schema, IntrospectError> {
        let mut client = with_retry(&self.config, &cancel, || self.connect()).await?;
        let schema_name = self.config.schema.clone().unwrap_or_else(|| "dbo".to_string());

        let tables = introspect_tables_and_columns(&mut client, &schema_name).await?;
        let constraints = introspect_constraints(&mut client, &schema_name).await?;
        let indexes = introspect_indexes(&mut client, &schema_name).await?;

        info!(table_count = tables.len(), "sql server introspection complete");

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

async fn introspect_tables_and_columns(
    client: &mut Client<Compat<TcpStream>>,
    schema: &str,
) -> Result<Vec<Table>, IntrospectError> {
    let rows: Vec<Row> = client
        .query(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
            &[&schema],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?
        .into_first_result()
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: &str = row.get("TABLE_NAME").unwrap_or_default();
        let columns = introspect_columns(client, schema, name).await?;
        tables.push(Table {
            name: name.to_string(),
            schema: schema.to_string(),
            columns,
            metadata: Metadata::new(),
        });
    }
    Ok(tables)
}

async fn introspect_columns(
    client: &mut Client<Compat<TcpStream>>,
    schema: &str,
    table: &str,
) -> Result<Vec<Column>, IntrospectError> {
    let rows: Vec<Row> = client
        .query(
            "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, \
                    CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE, \
                    COLUMNPROPERTY(OBJECT_ID(TABLE_SCHEMA + '.' + TABLE_NAME), COLUMN_NAME, 'IsIdentity') AS IS_IDENTITY \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 ORDER BY ORDINAL_POSITION",
            &[&schema, &table],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?
        .into_first_result()
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    Ok(rows
        .iter()
        .map(|row| Column {
            name: row.get::<&str, _>("COLUMN_NAME").unwrap_or_default().to_string(),
            data_type: row.get::<&str, _>("DATA_TYPE").unwrap_or_default().to_ascii_uppercase(),
            nullable: row.get::<&str, _>("IS_NULLABLE").unwrap_or_default() == "YES",
            primary_key: false,
            identity: row.get::<i32, _>("IS_IDENTITY").unwrap_or(0) == 1,
            max_length: row.get::<i32, _>("CHARACTER_MAXIMUM_LENGTH").map(|n| n as u32),
            precision: row.get::<u8, _>("NUMERIC_PRECISION").map(|n| n as u32),
            scale: row.get::<i32, _>("NUMERIC_SCALE").map(|n| n as u32),
            default_value: row.get::<&str, _>("COLUMN_DEFAULT").map(|s| s.to_string()),
            metadata: Metadata::new(),
        })
        .collect())
}

async fn introspect_constraints(
    client: &mut Client<Compat<TcpStream>>,
    schema: &str,
) -> Result<Vec<Constraint>, IntrospectError> {
    let rows: Vec<Row> = client
        .query(
            "SELECT tc.CONSTRAINT_NAME, tc.CONSTRAINT_TYPE, tc.TABLE_NAME, kcu.COLUMN_NAME \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
             JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
               ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME AND kcu.TABLE_SCHEMA = tc.TABLE_SCHEMA \
             WHERE tc.TABLE_SCHEMA = @P1",
            &[&schema],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?
        .into_first_result()
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut constraints: Vec<Constraint> = Vec::new();
    for row in &rows {
        let name = row.get::<&str, _>("CONSTRAINT_NAME").unwrap_or_default().to_string();
        let table = row.get::<&str, _>("TABLE_NAME").unwrap_or_default().to_string();
        let column = row.get::<&str, _>("COLUMN_NAME").unwrap_or_default().to_string();
        let kind = match row.get::<&str, _>("CONSTRAINT_TYPE").unwrap_or_default() {
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
                schema: schema.to_string(),
                columns: vec![column],
                referenced_table: None,
                referenced_schema: None,
                referenced_columns: Vec::new(),
                on_delete: None,
                on_update: None,
                check_expression: None,
            });
        }
    }
    Ok(constraints)
}

async fn introspect_indexes(
    client: &mut Client<Compat<TcpStream>>,
    schema: &str,
) -> Result<Vec<Index>, IntrospectError> {
    let rows: Vec<Row> = client
        .query(
            "SELECT i.name AS index_name, t.name AS table_name, c.name AS column_name, \
                    i.is_unique, i.type_desc \
             FROM sys.indexes i \
             JOIN sys.tables t ON t.object_id = i.object_id \
             JOIN sys.schemas s ON s.schema_id = t.schema_id \
             JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
             JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
             WHERE s.name = @P1 AND i.name IS NOT NULL",
            &[&schema],
        )
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?
        .into_first_result()
        .await
        .map_err(|e| IntrospectError::QueryFailed(e.to_string()))?;

    let mut indexes: Vec<Index> = Vec::new();
    for row in &rows {
        let name = row.get::<&str, _>("index_name").unwrap_or_default().to_string();
        let table = row.get::<&str, _>("table_name").unwrap_or_default().to_string();
        let column = row.get::<&str, _>("column_name").unwrap_or_default().to_string();
        let unique = row.get::<bool, _>("is_unique").unwrap_or(false);
        let clustered = row.get::<&str, _>("type_desc").unwrap_or_default() == "CLUSTERED";
        if let Some(existing) = indexes.iter_mut().find(|i| i.name == name && i.table == table) {
            existing.columns.push(column);
        } else {
            indexes.push(Index {
                name,
                table,
                schema: schema.to_string(),
                columns: vec![column],
                unique,
                clustered,
                filter: None,
            });
        }
    }
    Ok(indexes)
}
