//! Schema diffing: produces an ordered `SchemaChange` list for
//! (current, target) schema pairs.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use schemist_schema_model::{Constraint, ConstraintKind, Index, Procedure, Schema, Table, View, Function};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ChangeProperties = IndexMap<String, Value>;

/// Ordered `Safe < Warning < Risky` — the Risk Assessor (C7) is the only
/// crate that *assigns* this; the Differ always leaves it at `Safe` as a
/// placeholder pending assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe,
    Warning,
    Risky,
}

impl RiskLevel {
    pub fn max(self, other: Self) -> Self {
        std::cmp::max(self, other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Drop,
    Alter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    Table,
    Column,
    Constraint,
    Index,
    View,
    Procedure,
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaChange {
    pub kind: ChangeKind,
    pub object_type: ObjectType,
    pub object_name: String,
    pub schema: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub properties: ChangeProperties,
}

pub fn diff(current: &Schema, target: &Schema) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    diff_tables(current, target, &mut changes);
    diff_constraints(current, target, &mut changes);
    diff_indexes(current, target, &mut changes);
    diff_views(current, target, &mut changes);
    diff_procedures(current, target, &mut changes);
    diff_functions(current, target, &mut changes);

    changes
}

fn diff_tables(current: &Schema, target: &Schema, changes: &mut Vec<SchemaChange>) {
    for target_table in &target.tables {
        match current.table(&target_table.schema, &target_table.name) {
            None => changes.push(SchemaChange {
                kind: ChangeKind::Create,
                object_type: ObjectType::Table,
                object_name: target_table.name.clone(),
                schema: target_table.schema.clone(),
                description: format!("Create table {}", target_table.name),
                risk_level: RiskLevel::Safe,
                dependencies: Vec::new(),
                properties: ChangeProperties::new(),
            }),
            Some(current_table) => diff_columns(current_table, target_table, changes),
        }
    }

    for current_table in &current.tables {
        if target.table(&current_table.schema, &current_table.name).is_none() {
            changes.push(SchemaChange {
                kind: ChangeKind::Drop,
                object_type: ObjectType::Table,
                object_name: current_table.name.clone(),
                schema: current_table.schema.clone(),
                description: format!("Drop table {}", current_table.name),
                risk_level: RiskLevel::Safe,
                dependencies: dropped_fk_dependencies(current, current_table),
                properties: ChangeProperties::new(),
            });
        }
    }
}

fn dropped_fk_dependencies(current: &Schema, table: &Table) -> Vec<String> {
    current
        .constraints
        .iter()
        .filter(|c| matches!(c.kind, ConstraintKind::Fk) && c.table == table.name)
        .map(|c| c.name.clone())
        .collect()
}

fn diff_columns(current_table: &Table, target_table: &Table, changes: &mut Vec<SchemaChange>) {
    for target_col in &target_table.columns {
        match current_table.column(&target_col.name) {
            None => {
                let mut props = ChangeProperties::new();
                props.insert("change".into(), Value::String("add_column".into()));
                props.insert("nullable".into(), Value::Bool(target_col.nullable));
                props.insert("has_default".into(), Value::Bool(target_col.default_value.is_some()));
                changes.push(SchemaChange {
                    kind: ChangeKind::Alter,
                    object_type: ObjectType::Column,
                    object_name: target_col.name.clone(),
                    schema: target_table.schema.clone(),
                    description: format!("Add column {} to {}", target_col.name, target_table.name),
                    risk_level: RiskLevel::Safe,
                    dependencies: vec![target_table.name.clone()],
                    properties: props,
                })
            }
            Some(current_col) => {
                if current_col.data_type != target_col.data_type {
                    let mut props = ChangeProperties::new();
                    props.insert("change".into(), Value::String("alter_type".into()));
                    let narrows = type_narrows(&current_col.data_type, &target_col.data_type);
                    props.insert("potential_data_loss".into(), Value::Bool(narrows));
                    props.insert("from_type".into(), Value::String(current_col.data_type.clone()));
                    props.insert("to_type".into(), Value::String(target_col.data_type.clone()));
                    changes.push(SchemaChange {
                        kind: ChangeKind::Alter,
                        object_type: ObjectType::Column,
                        object_name: target_col.name.clone(),
                        schema: target_table.schema.clone(),
                        description: format!(
                            "Alter column {} data type on {}",
                            target_col.name, target_table.name
                        ),
                        risk_level: RiskLevel::Safe,
                        dependencies: vec![target_table.name.clone()],
                        properties: props,
                    });
                }
                if current_col.nullable != target_col.nullable {
                    let mut props = ChangeProperties::new();
                    props.insert("change".into(), Value::String("alter_nullable".into()));
                    let tightened = current_col.nullable && !target_col.nullable;
                    props.insert("nullable_tightened".into(), Value::Bool(tightened));
                    changes.push(SchemaChange {
                        kind: ChangeKind::Alter,
                        object_type: ObjectType::Column,
                        object_name: target_col.name.clone(),
                        schema: target_table.schema.clone(),
                        description: format!(
                            "Alter column {} nullable on {}",
                            target_col.name, target_table.name
                        ),
                        risk_level: RiskLevel::Safe,
                        dependencies: vec![target_table.name.clone()],
                        properties: props,
                    });
                }
                if current_col.default_value != target_col.default_value {
                    let mut props = ChangeProperties::new();
                    props.insert("change".into(), Value::String("alter_default".into()));
                    changes.push(SchemaChange {
                        kind: ChangeKind::Alter,
                        object_type: ObjectType::Column,
                        object_name: target_col.name.clone(),
                        schema: target_table.schema.clone(),
                        description: format!(
                            "Alter column {} default on {}",
                            target_col.name, target_table.name
                        ),
                        risk_level: RiskLevel::Safe,
                        dependencies: vec![target_table.name.clone()],
                        properties: props,
                    });
                }
            }
        }
    }

    for current_col in &current_table.columns {
        if target_table.column(&current_col.name).is_none() {
            let mut props = ChangeProperties::new();
            props.insert("change".into(), Value::String("drop_column".into()));
            changes.push(SchemaChange {
                kind: ChangeKind::Alter,
                object_type: ObjectType::Column,
                object_name: current_col.name.clone(),
                schema: target_table.schema.clone(),
                description: format!("Drop column {} from {}", current_col.name, current_table.name),
                risk_level: RiskLevel::Safe,
                dependencies: vec![current_table.name.clone()],
                properties: props,
            });
        }
    }
}

static TYPE_SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+)(?:,\s*(\d+))?\)").unwrap());

fn type_category(data_type: &str) -> &'static str {
    let upper = data_type.to_ascii_uppercase();
    if upper.contains("CHAR") || upper.contains("TEXT") || upper.contains("CLOB") {
        "string"
    } else if upper.contains("DECIMAL") || upper.contains("NUMERIC") || upper.contains("NUMBER") {
        "decimal"
    } else if upper.contains("INT") || upper.contains("SERIAL") {
        "int"
    } else if upper.contains("FLOAT") || upper.contains("DOUBLE") || upper.contains("REAL") {
        "float"
    } else if upper.contains("DATE") || upper.contains("TIME") {
        "datetime"
    } else if upper.contains("BOOL") || upper.contains("BIT") {
        "bool"
    } else if upper.contains("UUID") || upper.contains("UNIQUEIDENTIFIER") {
        "uuid"
    } else {
        "other"
    }
}

/// True when `to` cannot losslessly represent every value `from` can:
/// string length shrink, numeric precision shrink, or an outright
/// category change (spec.md §4.6).
fn type_narrows(from: &str, to: &str) -> bool {
    let (from_cat, to_cat) = (type_category(from), type_category(to));
    if from_cat != to_cat {
        return true;
    }

    let from_size = TYPE_SIZE_RE.captures(from);
    let to_size = TYPE_SIZE_RE.captures(to);

    match (from_size, to_size) {
        (Some(f), Some(t)) => {
            let f_len: i64 = f.get(1).unwrap().as_str().parse().unwrap_or(0);
            let t_len: i64 = t.get(1).unwrap().as_str().parse().unwrap_or(0);
            if t_len < f_len {
                return true;
            }
            if let (Some(fs), Some(ts)) = (f.get(2), t.get(2)) {
                let f_scale: i64 = fs.as_str().parse().unwrap_or(0);
                let t_scale: i64 = ts.as_str().parse().unwrap_or(0);
                if t_scale < f_scale {
                    return true;
                }
            }
            false
        }
        // Unbounded -> bounded (e.g. TEXT -> VARCHAR(50)) always narrows.
        (None, Some(_)) => from_cat == "string" || from_cat == "decimal",
        _ => false,
    }
}

fn diff_constraints(current: &Schema, target: &Schema, changes: &mut Vec<SchemaChange>) {
    diff_by_identity(
        &current.constraints,
        &target.constraints,
        Constraint::identity,
        |c| format!("Create {:?} constraint {}", c.kind, c.name),
        |c| format!("Drop {:?} constraint {}", c.kind, c.name),
        |c| {
            let mut props = ChangeProperties::new();
            props.insert(
                "constraint_type".into(),
                Value::String(format!("{:?}", c.kind).to_uppercase()),
            );
            props
        },
        |c| match c.kind {
            ConstraintKind::Fk => vec![c.table.clone()]
                .into_iter()
                .chain(c.referenced_table.clone())
                .collect(),
            _ => vec![c.table.clone()],
        },
        ObjectType::Constraint,
        changes,
    );
}

fn diff_indexes(current: &Schema, target: &Schema, changes: &mut Vec<SchemaChange>) {
    diff_by_identity(
        &current.indexes,
        &target.indexes,
        Index::identity,
        |i| format!("Create index {}", i.name),
        |i| format!("Drop index {}", i.name),
        |i| {
            let mut props = ChangeProperties::new();
            props.insert("is_unique".into(), Value::Bool(i.unique));
            props.insert("is_clustered".into(), Value::Bool(i.clustered));
            props
        },
        |i| vec![i.table.clone()],
        ObjectType::Index,
        changes,
    );
}

/// Generic "compare by (schema, name), emit CREATE/DROP for present-only
/// items" helper shared by constraints and indexes.
#[allow(clippy::too_many_arguments)]
fn diff_by_identity<T: Clone>(
    current_items: &[T],
    target_items: &[T],
    identity: impl Fn(&T) -> (String, String),
    create_desc: impl Fn(&T) -> String,
    drop_desc: impl Fn(&T) -> String,
    properties_of: impl Fn(&T) -> ChangeProperties,
    dependencies_of: impl Fn(&T) -> Vec<String>,
    object_type: ObjectType,
    changes: &mut Vec<SchemaChange>,
) {
    let current_keys: std::collections::HashSet<(String, String)> =
        current_items.iter().map(&identity).collect();
    let target_keys: std::collections::HashSet<(String, String)> =
        target_items.iter().map(&identity).collect();

    for item in target_items {
        let key = identity(item);
        if !current_keys.contains(&key) {
            changes.push(SchemaChange {
                kind: ChangeKind::Create,
                object_type,
                object_name: key.1.clone(),
                schema: key.0,
                description: create_desc(item),
                risk_level: RiskLevel::Safe,
                dependencies: dependencies_of(item),
                properties: properties_of(item),
            });
        }
    }
    for item in current_items {
        let key = identity(item);
        if !target_keys.contains(&key) {
            changes.push(SchemaChange {
                kind: ChangeKind::Drop,
                object_type,
                object_name: key.1.clone(),
                schema: key.0,
                description: drop_desc(item),
                risk_level: RiskLevel::Safe,
                dependencies: dependencies_of(item),
                properties: properties_of(item),
            });
        }
    }
}

fn diff_views(current: &Schema, target: &Schema, changes: &mut Vec<SchemaChange>) {
    diff_definitions(
        &current.views,
        &target.views,
        |v: &View| (v.schema.clone(), v.name.clone()),
        |v: &View| v.definition.clone(),
        ObjectType::View,
        changes,
    );
}

fn diff_procedures(current: &Schema, target: &Schema, changes: &mut Vec<SchemaChange>) {
    diff_definitions(
        &current.procedures,
        &target.procedures,
        |p: &Procedure| (p.schema.clone(), p.name.clone()),
        |p: &Procedure| p.definition.clone(),
        ObjectType::Procedure,
        changes,
    );
}

fn diff_functions(current: &Schema, target: &Schema, changes: &mut Vec<SchemaChange>) {
    diff_definitions(
        &current.functions,
        &target.functions,
        |f: &Function| (f.schema.clone(), f.name.clone()),
        |f: &Function| f.definition.clone(),
        ObjectType::Function,
        changes,
    );
}

/// Views/procedures/functions are DROP+CREATE when their definition
/// differs (spec.md §4.6) — never ALTERed in place.
fn diff_definitions<T>(
    current_items: &[T],
    target_items: &[T],
    identity: impl Fn(&T) -> (String, String),
    definition: impl Fn(&T) -> String,
    object_type: ObjectType,
    changes: &mut Vec<SchemaChange>,
) {
    let current_map: IndexMap<(String, String), String> =
        current_items.iter().map(|i| (identity(i), definition(i))).collect();
    let target_map: IndexMap<(String, String), String> =
        target_items.iter().map(|i| (identity(i), definition(i))).collect();

    for (key, target_def) in &target_map {
        let needs_create = match current_map.get(key) {
            None => true,
            Some(current_def) => current_def != target_def,
        };
        if current_map.contains_key(key) && needs_create {
            changes.push(SchemaChange {
                kind: ChangeKind::Drop,
                object_type,
                object_name: key.1.clone(),
                schema: key.0.clone(),
                description: format!("Drop {:?} {} (definition changed)", object_type, key.1),
                risk_level: RiskLevel::Safe,
                dependencies: Vec::new(),
                properties: ChangeProperties::new(),
            });
        }
        if needs_create {
            changes.push(SchemaChange {
                kind: ChangeKind::Create,
                object_type,
                object_name: key.1.clone(),
                schema: key.0.clone(),
                description: format!("Create {:?} {}", object_type, key.1),
                risk_level: RiskLevel::Safe,
                dependencies: Vec::new(),
                properties: {
                    let mut p = ChangeProperties::new();
                    p.insert("definition".into(), Value::String(target_def.clone()));
                    p
                },
            });
        }
    }
    for (key, _) in &current_map {
        if !target_map.contains_key(key) {
            changes.push(SchemaChange {
                kind: ChangeKind::Drop,
                object_type,
                object_name: key.1.clone(),
                schema: key.0.clone(),
                description: format!("Drop {:?} {}", object_type, key.1),
                risk_level: RiskLevel::Safe,
                dependencies: Vec::new(),
                properties: ChangeProperties::new(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemist_schema_model::{Column, Metadata};

    fn column(name: &str, data_type: &str, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            primary_key: false,
            identity: false,
            max_length: None,
            precision: None,
            scale: None,
            default_value: None,
            metadata: Metadata::new(),
        }
    }

    fn user_table(columns: Vec<Column>) -> Table {
        Table { name: "User".into(), schema: "dbo".into(), columns, metadata: Metadata::new() }
    }

    #[test]
    fn identical_schemas_yield_no_changes() {
        let schema = Schema {
            tables: vec![user_table(vec![column("Id", "INT IDENTITY(1,1)", false), column("Email", "NVARCHAR(255)", false)])],
            ..Schema::default()
        };
        assert!(diff(&schema, &schema).is_empty());
    }

    #[test]
    fn added_column_is_detected() {
        let current = Schema { tables: vec![user_table(vec![column("Id", "INT", false)])], ..Schema::default() };
        let target = Schema {
            tables: vec![user_table(vec![column("Id", "INT", false), column("CreatedAt", "DATETIME2", true)])],
            ..Schema::default()
        };
        let changes = diff(&current, &target);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].description.contains("Add column"));
    }

    #[test]
    fn narrowing_string_length_flags_potential_data_loss() {
        let current = Schema { tables: vec![user_table(vec![column("Name", "NVARCHAR(255)", true)])], ..Schema::default() };
        let target = Schema { tables: vec![user_table(vec![column("Name", "NVARCHAR(50)", true)])], ..Schema::default() };
        let changes = diff(&current, &target);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].properties.get("potential_data_loss"), Some(&Value::Bool(true)));
    }

    #[test]
    fn dropped_table_carries_its_fk_as_a_dependency() {
        let mut current = Schema::default();
        current.tables.push(user_table(vec![column("Id", "INT", false)]));
        current.constraints.push(Constraint {
            name: "FK_Order_User_UserId".into(),
            kind: ConstraintKind::Fk,
            table: "Order".into(),
            schema: "dbo".into(),
            columns: vec!["UserId".into()],
            referenced_table: Some("User".into()),
            referenced_schema: Some("dbo".into()),
            referenced_columns: vec!["Id".into()],
            on_delete: Some("CASCADE".into()),
            on_update: Some("NO_ACTION".into()),
            check_expression: None,
        });
        let target = Schema::default();
        let changes = diff(&current, &target);
        let drop_table = changes.iter().find(|c| matches!(c.kind, ChangeKind::Drop) && matches!(c.object_type, ObjectType::Table)).unwrap();
        assert_eq!(drop_table.dependencies, vec!["FK_Order_User_UserId".to_string()]);
    }
}
