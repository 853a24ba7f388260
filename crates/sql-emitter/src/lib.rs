//! Per-dialect SQL DDL rendering.
//!
//! One render function per statement shape, dispatched from a single
//! `emit` entry point that looks the affected object up in whichever of
//! `current`/`target` actually still has it. Mirrors the per-statement
//! `render_*` methods a dialect-specific renderer would carry, just kept
//! as free functions over the shared [`Dialect`] enum instead of one
//! struct per database.

use schemist_dialect::Dialect;
use schemist_schema_differ::{ChangeKind, ObjectType, SchemaChange};
use schemist_schema_model::{Column, Constraint, ConstraintKind, Function, Index, Procedure, Schema, Table, View};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("no {object_type} `{schema}.{name}` found to render")]
    ObjectNotFound {
        object_type: &'static str,
        schema: String,
        name: String,
    },
    #[error("no renderer for a {kind:?} change against {object_type:?}")]
    UnsupportedChange { kind: ChangeKind, object_type: ObjectType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    PreDeployment,
    PostDeployment,
}

fn find_table<'a>(schema: &'a Schema, table_schema: &str, name: &str) -> Option<&'a Table> {
    schema.tables.iter().find(|t| t.schema == table_schema && t.name.eq_ignore_ascii_case(name))
}

fn find_column<'a>(table: &'a Table, name: &str) -> Option<&'a Column> {
    table.column(name)
}

fn find_constraint<'a>(schema: &'a Schema, table_schema: &str, name: &str) -> Option<&'a Constraint> {
    schema.constraints.iter().find(|c| c.schema == table_schema && c.name.eq_ignore_ascii_case(name))
}

fn find_index<'a>(schema: &'a Schema, table_schema: &str, name: &str) -> Option<&'a Index> {
    schema.indexes.iter().find(|i| i.schema == table_schema && i.name.eq_ignore_ascii_case(name))
}

fn find_view<'a>(schema: &'a Schema, view_schema: &str, name: &str) -> Option<&'a View> {
    schema.views.iter().find(|v| v.schema == view_schema && v.name.eq_ignore_ascii_case(name))
}

fn find_procedure<'a>(schema: &'a Schema, proc_schema: &str, name: &str) -> Option<&'a Procedure> {
    schema.procedures.iter().find(|p| p.schema == proc_schema && p.name.eq_ignore_ascii_case(name))
}

fn find_function<'a>(schema: &'a Schema, fn_schema: &str, name: &str) -> Option<&'a Function> {
    schema.functions.iter().find(|f| f.schema == fn_schema && f.name.eq_ignore_ascii_case(name))
}

fn render_column_def(col: &Column, dialect: Dialect) -> String {
    let mut out = format!("{} {}", dialect.quote(&col.name), col.data_type);
    if !col.identity {
        out.push_str(if col.nullable { " NULL" } else { " NOT NULL" });
    }
    if let Some(default) = &col.default_value {
        out.push_str(&format!(" DEFAULT {default}"));
    }
    out
}

pub fn render_create_table(table: &Table, dialect: Dialect) -> String {
    let cols = table
        .columns
        .iter()
        .map(|c| render_column_def(c, dialect))
        .collect::<Vec<_>>()
        .join(",\n  ");
    format!(
        "CREATE TABLE {} (\n  {}\n);",
        dialect.quote_qualified(Some(&table.schema), &table.name),
        cols
    )
}

pub fn render_drop_table(table_schema: &str, name: &str, dialect: Dialect) -> String {
    format!("DROP TABLE {};", dialect.quote_qualified(Some(table_schema), name))
}

pub fn render_add_column(table_schema: &str, table_name: &str, col: &Column, dialect: Dialect) -> String {
    format!(
        "ALTER TABLE {} ADD {};",
        dialect.quote_qualified(Some(table_schema), table_name),
        render_column_def(col, dialect)
    )
}

pub fn render_drop_column(table_schema: &str, table_name: &str, col_name: &str, dialect: Dialect) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {};",
        dialect.quote_qualified(Some(table_schema), table_name),
        dialect.quote(col_name)
    )
}

pub fn render_alter_column_type(table_schema: &str, table_name: &str, col: &Column, dialect: Dialect) -> String {
    let qualified = dialect.quote_qualified(Some(table_schema), table_name);
    let name = dialect.quote(&col.name);
    match dialect {
        Dialect::Postgres => format!("ALTER TABLE {qualified} ALTER COLUMN {name} TYPE {};", col.data_type),
        Dialect::MySql => format!("ALTER TABLE {qualified} MODIFY COLUMN {};", render_column_def(col, dialect)),
        Dialect::Oracle => format!("ALTER TABLE {qualified} MODIFY ({});", render_column_def(col, dialect)),
        Dialect::SqlServer => format!("ALTER TABLE {qualified} ALTER COLUMN {};", render_column_def(col, dialect)),
        Dialect::Sqlite => format!(
            "-- SQLite has no ALTER COLUMN TYPE; rebuild {qualified} via a new table and copy ({name} -> {}).",
            col.data_type
        ),
    }
}

pub fn render_alter_column_nullable(table_schema: &str, table_name: &str, col: &Column, dialect: Dialect) -> String {
    let qualified = dialect.quote_qualified(Some(table_schema), table_name);
    let name = dialect.quote(&col.name);
    let nullability = if col.nullable { "NULL" } else { "NOT NULL" };
    match dialect {
        Dialect::Postgres => {
            if col.nullable {
                format!("ALTER TABLE {qualified} ALTER COLUMN {name} DROP NOT NULL;")
            } else {
                format!("ALTER TABLE {qualified} ALTER COLUMN {name} SET NOT NULL;")
            }
        }
        Dialect::MySql => format!("ALTER TABLE {qualified} MODIFY COLUMN {};", render_column_def(col, dialect)),
        Dialect::Oracle => format!("ALTER TABLE {qualified} MODIFY ({name} {nullability});"),
        Dialect::SqlServer => format!("ALTER TABLE {qualified} ALTER COLUMN {};", render_column_def(col, dialect)),
        Dialect::Sqlite => format!(
            "-- SQLite has no ALTER COLUMN NULLABLE; rebuild {qualified} via a new table and copy ({name} -> {nullability})."
        ),
    }
}

pub fn render_alter_column_default(table_schema: &str, table_name: &str, col: &Column, dialect: Dialect) -> String {
    let qualified = dialect.quote_qualified(Some(table_schema), table_name);
    let name = dialect.quote(&col.name);
    match (&col.default_value, dialect) {
        (Some(default), Dialect::Postgres) => format!("ALTER TABLE {qualified} ALTER COLUMN {name} SET DEFAULT {default};"),
        (None, Dialect::Postgres) => format!("ALTER TABLE {qualified} ALTER COLUMN {name} DROP DEFAULT;"),
        (_, Dialect::MySql) => format!("ALTER TABLE {qualified} ALTER COLUMN {name} {};", default_clause(col)),
        (_, Dialect::Oracle) => format!("ALTER TABLE {qualified} MODIFY ({name} {});", default_clause(col)),
        (_, Dialect::SqlServer) => format!("ALTER TABLE {qualified} ADD CONSTRAINT DF_{table_name}_{} DEFAULT {} FOR {name};", col.name, col.default_value.clone().unwrap_or_else(|| "NULL".into())),
        (_, Dialect::Sqlite) => format!(
            "-- SQLite has no ALTER COLUMN DEFAULT; rebuild {qualified} via a new table and copy."
        ),
    }
}

fn default_clause(col: &Column) -> String {
    match &col.default_value {
        Some(d) => format!("SET DEFAULT {d}"),
        None => "DROP DEFAULT".to_string(),
    }
}

pub fn render_create_constraint(constraint: &Constraint, dialect: Dialect) -> String {
    let qualified = dialect.quote_qualified(Some(&constraint.schema), &constraint.table);
    let name = dialect.quote(&constraint.name);
    let cols = constraint.columns.iter().map(|c| dialect.quote(c)).collect::<Vec<_>>().join(", ");
    match constraint.kind {
        ConstraintKind::Pk => format!("ALTER TABLE {qualified} ADD CONSTRAINT {name} PRIMARY KEY ({cols});"),
        ConstraintKind::Uq => format!("ALTER TABLE {qualified} ADD CONSTRAINT {name} UNIQUE ({cols});"),
        ConstraintKind::Ck => format!(
            "ALTER TABLE {qualified} ADD CONSTRAINT {name} CHECK ({});",
            constraint.check_expression.clone().unwrap_or_default()
        ),
        ConstraintKind::Fk => {
            let referenced = dialect.quote_qualified(
                constraint.referenced_schema.as_deref(),
                constraint.referenced_table.as_deref().unwrap_or(""),
            );
            let ref_cols = constraint.referenced_columns.iter().map(|c| dialect.quote(c)).collect::<Vec<_>>().join(", ");
            let on_delete = constraint.on_delete.as_deref().map(|a| format!(" ON DELETE {a}")).unwrap_or_default();
            let on_update = constraint.on_update.as_deref().map(|a| format!(" ON UPDATE {a}")).unwrap_or_default();
            format!(
                "ALTER TABLE {qualified} ADD CONSTRAINT {name} FOREIGN KEY ({cols}) REFERENCES {referenced} ({ref_cols}){on_delete}{on_update};"
            )
        }
    }
}

pub fn render_drop_constraint(constraint: &Constraint, dialect: Dialect) -> String {
    let qualified = dialect.quote_qualified(Some(&constraint.schema), &constraint.table);
    let name = dialect.quote(&constraint.name);
    match (dialect, constraint.kind) {
        (Dialect::MySql, ConstraintKind::Fk) => format!("ALTER TABLE {qualified} DROP FOREIGN KEY {name};"),
        (Dialect::MySql, ConstraintKind::Pk) => format!("ALTER TABLE {qualified} DROP PRIMARY KEY;"),
        (Dialect::MySql, ConstraintKind::Uq) => format!("DROP INDEX {name} ON {qualified};"),
        (Dialect::MySql, ConstraintKind::Ck) => format!("ALTER TABLE {qualified} DROP CHECK {name};"),
        (Dialect::Sqlite, _) => format!(
            "-- SQLite has no DROP CONSTRAINT; rebuild {qualified} via a new table without {name}."
        ),
        _ => format!("ALTER TABLE {qualified} DROP CONSTRAINT {name};"),
    }
}

pub fn render_create_index(index: &Index, dialect: Dialect) -> String {
    let qualified_table = dialect.quote_qualified(Some(&index.schema), &index.table);
    let name = dialect.quote(&index.name);
    let cols = index.columns.iter().map(|c| dialect.quote(c)).collect::<Vec<_>>().join(", ");
    let unique = if index.unique { "UNIQUE " } else { "" };
    let clustered = if index.clustered && matches!(dialect, Dialect::SqlServer) {
        "CLUSTERED "
    } else {
        ""
    };
    let filter = index
        .filter
        .as_ref()
        .map(|f| format!(" WHERE {f}"))
        .unwrap_or_default();
    format!("CREATE {unique}{clustered}INDEX {name} ON {qualified_table} ({cols}){filter};")
}

pub fn render_drop_index(index: &Index, dialect: Dialect) -> String {
    let name = dialect.quote(&index.name);
    match dialect {
        Dialect::SqlServer | Dialect::MySql => {
            format!("DROP INDEX {name} ON {};", dialect.quote_qualified(Some(&index.schema), &index.table))
        }
        _ => format!("DROP INDEX {};", dialect.quote_qualified(Some(&index.schema), &index.name)),
    }
}

pub fn render_create_view(view: &View, dialect: Dialect) -> String {
    format!(
        "CREATE VIEW {} AS\n{};",
        dialect.quote_qualified(Some(&view.schema), &view.name),
        view.definition.trim_end_matches(';')
    )
}

pub fn render_drop_view(view_schema: &str, name: &str, dialect: Dialect) -> String {
    format!("DROP VIEW {};", dialect.quote_qualified(Some(view_schema), name))
}

pub fn render_create_procedure(procedure: &Procedure, dialect: Dialect) -> String {
    format!(
        "CREATE PROCEDURE {} AS\n{};",
        dialect.quote_qualified(Some(&procedure.schema), &procedure.name),
        procedure.definition.trim_end_matches(';')
    )
}

pub fn render_drop_procedure(proc_schema: &str, name: &str, dialect: Dialect) -> String {
    format!("DROP PROCEDURE {};", dialect.quote_qualified(Some(proc_schema), name))
}

pub fn render_create_function(function: &Function, dialect: Dialect) -> String {
    format!(
        "CREATE FUNCTION {} AS\n{};",
        dialect.quote_qualified(Some(&function.schema), &function.name),
        function.definition.trim_end_matches(';')
    )
}

pub fn render_drop_function(fn_schema: &str, name: &str, dialect: Dialect) -> String {
    format!("DROP FUNCTION {};", dialect.quote_qualified(Some(fn_schema), name))
}

pub fn validation_statement(phase: ValidationPhase, dialect: Dialect) -> String {
    match (phase, dialect) {
        (ValidationPhase::PreDeployment, Dialect::SqlServer) => "SELECT @@VERSION, DB_NAME();".to_string(),
        (ValidationPhase::PreDeployment, Dialect::Postgres) => "SELECT version(), current_database();".to_string(),
        (ValidationPhase::PreDeployment, Dialect::MySql) => "SELECT VERSION(), DATABASE();".to_string(),
        (ValidationPhase::PreDeployment, Dialect::Oracle) => {
            "SELECT * FROM v$version WHERE banner LIKE 'Oracle%';".to_string()
        }
        (ValidationPhase::PreDeployment, Dialect::Sqlite) => "SELECT sqlite_version();".to_string(),
        (ValidationPhase::PostDeployment, Dialect::SqlServer) => {
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES;".to_string()
        }
        (ValidationPhase::PostDeployment, Dialect::Postgres) => {
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = current_schema();".to_string()
        }
        (ValidationPhase::PostDeployment, Dialect::MySql) => {
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE();".to_string()
        }
        (ValidationPhase::PostDeployment, Dialect::Oracle) => "SELECT COUNT(*) FROM user_tables;".to_string(),
        (ValidationPhase::PostDeployment, Dialect::Sqlite) => {
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table';".to_string()
        }
    }
}

pub fn backup_statement(dialect: Dialect, database_name: &str) -> String {
    match dialect {
        Dialect::SqlServer => format!(
            "BACKUP DATABASE [{database_name}] TO DISK = '{database_name}.bak';"
        ),
        Dialect::Postgres => format!("-- Recommended: pg_dump {database_name} > {database_name}.backup.sql"),
        Dialect::MySql => format!("-- Recommended: mysqldump {database_name} > {database_name}.backup.sql"),
        Dialect::Oracle => format!("-- Recommended: expdp for schema {database_name} before deployment"),
        Dialect::Sqlite => format!("-- Recommended: copy the {database_name} database file before deployment"),
    }
}

/// Render the SQL for a single `SchemaChange`, resolving the affected
/// object from whichever schema still has it (`target` for creates and
/// alters-to, `current` for drops and alters-from).
pub fn emit(change: &SchemaChange, current: &Schema, target: &Schema, dialect: Dialect) -> Result<String, EmitError> {
    use ChangeKind::*;
    use ObjectType::*;

    match (change.kind, change.object_type) {
        (Create, Table) => {
            let table = find_table(target, &change.schema, &change.object_name).ok_or_else(|| not_found("table", change))?;
            Ok(render_create_table(table, dialect))
        }
        (Drop, Table) => Ok(render_drop_table(&change.schema, &change.object_name, dialect)),

        (Alter, Column) => emit_column_change(change, current, target, dialect),

        (Create, Constraint) => {
            let constraint =
                find_constraint(target, &change.schema, &change.object_name).ok_or_else(|| not_found("constraint", change))?;
            Ok(render_create_constraint(constraint, dialect))
        }
        (Drop, Constraint) => {
            let constraint =
                find_constraint(current, &change.schema, &change.object_name).ok_or_else(|| not_found("constraint", change))?;
            Ok(render_drop_constraint(constraint, dialect))
        }

        (Create, Index) => {
            let index = find_index(target, &change.schema, &change.object_name).ok_or_else(|| not_found("index", change))?;
            Ok(render_create_index(index, dialect))
        }
        (Drop, Index) => {
            let index = find_index(current, &change.schema, &change.object_name).ok_or_else(|| not_found("index", change))?;
            Ok(render_drop_index(index, dialect))
        }

        (Create, View) => {
            let view = find_view(target, &change.schema, &change.object_name).ok_or_else(|| not_found("view", change))?;
            Ok(render_create_view(view, dialect))
        }
        (Drop, View) => Ok(render_drop_view(&change.schema, &change.object_name, dialect)),

        (Create, Procedure) => {
            let procedure =
                find_procedure(target, &change.schema, &change.object_name).ok_or_else(|| not_found("procedure", change))?;
            Ok(render_create_procedure(procedure, dialect))
        }
        (Drop, Procedure) => Ok(render_drop_procedure(&change.schema, &change.object_name, dialect)),

        (Create, Function) => {
            let function =
                find_function(target, &change.schema, &change.object_name).ok_or_else(|| not_found("function", change))?;
            Ok(render_create_function(function, dialect))
        }
        (Drop, Function) => Ok(render_drop_function(&change.schema, &change.object_name, dialect)),

        // The differ never constructs these shapes: column changes are always
        // Alter, and view/procedure/function changes are always Drop+Create.
        (kind, object_type) => Err(EmitError::UnsupportedChange { kind, object_type }),
    }
}

fn emit_column_change(change: &SchemaChange, current: &Schema, target: &Schema, dialect: Dialect) -> Result<String, EmitError> {
    let change_tag = change
        .properties
        .get("change")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    match change_tag {
        "add_column" => {
            let table = find_table(target, &change.schema, table_name_for(change)).ok_or_else(|| not_found("table", change))?;
            let col = find_column(table, &change.object_name).ok_or_else(|| not_found("column", change))?;
            Ok(render_add_column(&table.schema, &table.name, col, dialect))
        }
        "drop_column" => {
            let table = find_table(current, &change.schema, table_name_for(change)).ok_or_else(|| not_found("table", change))?;
            Ok(render_drop_column(&table.schema, &table.name, &change.object_name, dialect))
        }
        "alter_type" => {
            let table = find_table(target, &change.schema, table_name_for(change)).ok_or_else(|| not_found("table", change))?;
            let col = find_column(table, &change.object_name).ok_or_else(|| not_found("column", change))?;
            Ok(render_alter_column_type(&table.schema, &table.name, col, dialect))
        }
        "alter_nullable" => {
            let table = find_table(target, &change.schema, table_name_for(change)).ok_or_else(|| not_found("table", change))?;
            let col = find_column(table, &change.object_name).ok_or_else(|| not_found("column", change))?;
            Ok(render_alter_column_nullable(&table.schema, &table.name, col, dialect))
        }
        "alter_default" => {
            let table = find_table(target, &change.schema, table_name_for(change)).ok_or_else(|| not_found("table", change))?;
            let col = find_column(table, &change.object_name).ok_or_else(|| not_found("column", change))?;
            Ok(render_alter_column_default(&table.schema, &table.name, col, dialect))
        }
        other => Ok(format!("-- unrecognized column change `{other}` for {}", change.object_name)),
    }
}

fn table_name_for(change: &SchemaChange) -> &str {
    change.dependencies.first().map(String::as_str).unwrap_or("")
}

fn not_found(object_type: &'static str, change: &SchemaChange) -> EmitError {
    EmitError::ObjectNotFound {
        object_type,
        schema: change.schema.clone(),
        name: change.object_name.clone(),
    }
}

/// Best-effort rollback text: inverse DROP for CREATE, an
/// unreconstructable placeholder for DROP, and a manual-intervention
/// placeholder for ALTER.
pub fn rollback(change: &SchemaChange, current: &Schema, target: &Schema, dialect: Dialect) -> String {
    use ChangeKind::*;

    match change.kind {
        Create => match emit(
            &SchemaChange { kind: ChangeKind::Drop, ..change.clone() },
            current,
            target,
            dialect,
        ) {
            Ok(sql) => sql,
            Err(_) => format!("-- cannot reconstruct a rollback for {}", change.object_name),
        },
        Drop => format!(
            "-- cannot roll back DROP of {} `{}`; original definition was not preserved",
            describe_object_type(change.object_type),
            change.object_name
        ),
        Alter => format!(
            "-- rollback of ALTER on {} `{}` requires manual intervention",
            describe_object_type(change.object_type),
            change.object_name
        ),
    }
}

fn describe_object_type(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Table => "table",
        ObjectType::Column => "column",
        ObjectType::Constraint => "constraint",
        ObjectType::Index => "index",
        ObjectType::View => "view",
        ObjectType::Procedure => "procedure",
        ObjectType::Function => "function",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemist_schema_model::Metadata;

    fn sample_column() -> Column {
        Column {
            name: "CreatedAt".into(),
            data_type: "DATETIME2".into(),
            nullable: true,
            primary_key: false,
            identity: false,
            max_length: None,
            precision: None,
            scale: None,
            default_value: Some("GETUTCDATE()".into()),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn add_column_statement_matches_sql_server_shape() {
        let sql = render_add_column("dbo", "User", &sample_column(), Dialect::SqlServer);
        assert_eq!(sql, "ALTER TABLE [dbo].[User] ADD [CreatedAt] DATETIME2 NULL DEFAULT GETUTCDATE();");
    }

    #[test]
    fn identifier_quoting_is_dialect_specific() {
        let table = Table {
            name: "User".into(),
            schema: "public".into(),
            columns: vec![Column {
                name: "Id".into(),
                data_type: "SERIAL".into(),
                nullable: false,
                primary_key: true,
                identity: true,
                max_length: None,
                precision: None,
                scale: None,
                default_value: None,
                metadata: Metadata::new(),
            }],
            metadata: Metadata::new(),
        };
        let sql = render_create_table(&table, Dialect::Postgres);
        assert!(sql.starts_with("CREATE TABLE \"User\""));
        assert!(sql.contains("\"Id\" SERIAL"));
        assert!(!sql.contains("NOT NULL"), "identity columns omit explicit nullability");
    }

    #[test]
    fn mysql_drops_foreign_key_with_its_own_syntax() {
        let fk = Constraint {
            name: "FK_Order_Customer".into(),
            kind: ConstraintKind::Fk,
            table: "Order".into(),
            schema: "shop".into(),
            columns: vec!["CustomerId".into()],
            referenced_table: Some("Customer".into()),
            referenced_schema: Some("shop".into()),
            referenced_columns: vec!["Id".into()],
            on_delete: Some("CASCADE".into()),
            on_update: Some("NO ACTION".into()),
            check_expression: None,
        };
        let sql = render_drop_constraint(&fk, Dialect::MySql);
        assert_eq!(sql, "ALTER TABLE `shop`.`Order` DROP FOREIGN KEY `FK_Order_Customer`;");
    }

    #[test]
    fn sqlite_alter_type_emits_a_rebuild_comment_instead_of_unsupported_ddl() {
        let col = sample_column();
        let sql = render_alter_column_type("main", "User", &col, Dialect::Sqlite);
        assert!(sql.starts_with("-- SQLite has no ALTER COLUMN TYPE"));
    }
}
