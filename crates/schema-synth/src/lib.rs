//! Target-schema synthesis: entities + config → Schema.

use schemist_dialect::Dialect;
use schemist_entity_model::{DiscoveredEntity, DiscoveredProperty, RelationshipKind};
use schemist_schema_model::{Column, Constraint, ConstraintKind, Index, Metadata, Schema, Table};
use schemist_type_mapper::{map_type, normalize_default, TypeOptions};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub dialect: Dialect,
    /// Add a supporting index for every foreign key whose columns are
    /// not already covered by an existing index.
    pub generate_fk_indexes: bool,
    /// Allow relationships to reference tables outside the set being
    /// synthesized, provided those tables are pre-declared as existing.
    pub cross_schema_refs_enabled: bool,
    /// When cross-schema refs are enabled, also tolerate FK targets that
    /// cannot be resolved at all (skip + warn rather than fail).
    pub allow_missing_fk_targets: bool,
    /// Fatal unless true and the entity set ends up empty (spec.md §7:
    /// `EntityDiscovery` zero entities, marker absent).
    pub ignore_export_attribute: bool,
    /// Externally declared tables considered to exist for cross-schema
    /// FK resolution even though they are not part of this entity set.
    pub known_external_tables: Vec<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            generate_fk_indexes: true,
            cross_schema_refs_enabled: false,
            allow_missing_fk_targets: false,
            ignore_export_attribute: false,
            known_external_tables: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SynthesisReport {
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("entity `{name}` is invalid: {reason}")]
    InvalidEntity { name: String, reason: String },
    #[error("table `{table}` has duplicate column names: {columns:?}")]
    DuplicateColumns { table: String, columns: Vec<String> },
    #[error("no valid entities to synthesize a schema from")]
    NoValidEntities,
}

pub fn synthesize(
    entities: Vec<DiscoveredEntity>,
    config: &SynthesisConfig,
) -> Result<(Schema, SynthesisReport), SynthesisError> {
    let mut report = SynthesisReport::default();
    let mut schema = Schema::default();
    let mut valid_entities = Vec::new();

    for entity in entities {
        let name = entity.name.clone();
        match entity.normalize() {
            Ok((normalized, warnings)) => {
                report.warnings.extend(warnings);
                valid_entities.push(normalized);
            }
            Err(err) => {
                warn!(entity = %name, error = %err, "skipping invalid entity");
                report.warnings.push(format!("skipped invalid entity `{name}`: {err}"));
            }
        }
    }

    if valid_entities.is_empty() && !config.ignore_export_attribute {
        return Err(SynthesisError::NoValidEntities);
    }

    let default_schema = config.dialect.default_schema().to_string();

    // Step 1: allocate a Table + Columns per entity.
    for entity in &valid_entities {
        let schema_name = entity.resolved_schema(&default_schema);
        let mut columns = Vec::with_capacity(entity.properties.len());
        for prop in &entity.properties {
            columns.push(build_column(config.dialect, prop));
        }

        let table = Table {
            name: entity.table_name.clone(),
            schema: schema_name,
            columns,
            metadata: Metadata::new(),
        };

        let dupes = table.duplicate_column_names();
        if !dupes.is_empty() {
            return Err(SynthesisError::DuplicateColumns {
                table: table.name.clone(),
                columns: dupes,
            });
        }

        for word in table.reserved_word_columns(config.dialect) {
            report
                .warnings
                .push(format!("column `{}`.`{}` uses a reserved word", table.name, word));
        }
        for oversized in table.oversized_identifiers(config.dialect) {
            report.warnings.push(format!(
                "identifier `{oversized}` exceeds the {} limit of {} characters",
                config.dialect,
                config.dialect.max_identifier_length()
            ));
        }

        schema.tables.push(table);
    }

    // Step 3+4: constraints and indexes, per entity.
    for entity in &valid_entities {
        let table_name = entity.table_name.clone();
        let table_schema = entity.resolved_schema(&default_schema);

        add_primary_key(&mut schema, entity, &table_name, &table_schema);
        add_unique_constraints(&mut schema, entity, &table_name, &table_schema);
        add_check_constraints(&mut schema, entity, &table_name, &table_schema);
        add_foreign_keys(&mut schema, entity, &table_name, &table_schema, config, &mut report);
        add_discovered_indexes(&mut schema, entity, &table_name, &table_schema);
    }

    if config.generate_fk_indexes {
        add_fk_support_indexes(&mut schema);
    }

    schema.sort_deterministically();
    Ok((schema, report))
}

fn build_column(dialect: Dialect, prop: &DiscoveredProperty) -> Column {
    let opts = TypeOptions {
        max_length: prop.max_length,
        precision: prop.precision,
        scale: prop.scale,
        identity: prop.primary_key && is_integer_type(&prop.abstract_type),
    };
    let data_type = match &prop.sql_type {
        Some(explicit) => explicit.clone(),
        None => map_type(dialect, &prop.abstract_type, opts),
    };
    let default_value = prop
        .default_value
        .as_ref()
        .map(|raw| normalize_default(dialect, raw));

    Column {
        name: prop.column_name().to_string(),
        data_type,
        nullable: prop.nullable,
        primary_key: prop.primary_key,
        identity: opts.identity,
        max_length: prop.max_length,
        precision: prop.precision,
        scale: prop.scale,
        default_value,
        metadata: Metadata::new(),
    }
}

fn is_integer_type(abstract_type: &str) -> bool {
    matches!(abstract_type.to_ascii_lowercase().as_str(), "int" | "int32" | "int64" | "short")
}

fn add_primary_key(schema: &mut Schema, entity: &DiscoveredEntity, table: &str, table_schema: &str) {
    let pk_columns = entity.primary_key_columns();
    if pk_columns.is_empty() {
        return;
    }
    schema.constraints.push(Constraint {
        name: format!("PK_{table}"),
        kind: ConstraintKind::Pk,
        table: table.to_string(),
        schema: table_schema.to_string(),
        columns: pk_columns,
        referenced_table: None,
        referenced_schema: None,
        referenced_columns: Vec::new(),
        on_delete: None,
        on_update: None,
        check_expression: None,
    });
}

fn add_unique_constraints(schema: &mut Schema, entity: &DiscoveredEntity, table: &str, table_schema: &str) {
    for prop in &entity.properties {
        if prop.unique && !prop.primary_key {
            let col = prop.column_name().to_string();
            schema.constraints.push(Constraint {
                name: format!("UQ_{table}_{col}"),
                kind: ConstraintKind::Uq,
                table: table.to_string(),
                schema: table_schema.to_string(),
                columns: vec![col],
                referenced_table: None,
                referenced_schema: None,
                referenced_columns: Vec::new(),
                on_delete: None,
                on_update: None,
                check_expression: None,
            });
        }
    }
}

fn add_check_constraints(schema: &mut Schema, entity: &DiscoveredEntity, table: &str, table_schema: &str) {
    for prop in &entity.properties {
        if let Some(expr) = prop.check_constraint() {
            let col = prop.column_name().to_string();
            schema.constraints.push(Constraint {
                name: format!("CK_{table}_{col}"),
                kind: ConstraintKind::Ck,
                table: table.to_string(),
                schema: table_schema.to_string(),
                columns: vec![col],
                referenced_table: None,
                referenced_schema: None,
                referenced_columns: Vec::new(),
                on_delete: None,
                on_update: None,
                check_expression: Some(expr.to_string()),
            });
        }
    }
}

fn add_foreign_keys(
    schema: &mut Schema,
    entity: &DiscoveredEntity,
    table: &str,
    table_schema: &str,
    config: &SynthesisConfig,
    report: &mut SynthesisReport,
) {
    for rel in &entity.relationships {
        if matches!(rel.kind, RelationshipKind::ManyToMany) {
            // Many-to-many relationships never synthesize a join table;
            // the caller models the join table as its own entity.
            continue;
        }

        let referenced_table = rel
            .referenced_table
            .clone()
            .unwrap_or_else(|| rel.referenced_entity.clone());

        let target_exists = schema.table_by_name(&referenced_table).is_some()
            || config.known_external_tables.iter().any(|t| t.eq_ignore_ascii_case(&referenced_table));

        if !target_exists && !(config.cross_schema_refs_enabled && config.allow_missing_fk_targets) {
            report.warnings.push(format!(
                "skipping foreign key `{}` -> `{}`: referenced table not found",
                rel.name, referenced_table
            ));
            continue;
        }

        let fk_columns = if rel.fk_columns.is_empty() {
            vec![format!("{referenced_table}Id")]
        } else {
            rel.fk_columns.clone()
        };
        let referenced_columns = if rel.referenced_columns.is_empty() {
            vec!["Id".to_string()]
        } else {
            rel.referenced_columns.clone()
        };

        let joined = fk_columns.join("_");
        schema.constraints.push(Constraint {
            name: format!("FK_{table}_{referenced_table}_{joined}"),
            kind: ConstraintKind::Fk,
            table: table.to_string(),
            schema: table_schema.to_string(),
            columns: fk_columns,
            referenced_table: Some(referenced_table),
            referenced_schema: Some(table_schema.to_string()),
            referenced_columns,
            on_delete: Some(rel.on_delete.clone()),
            on_update: Some(rel.on_update.clone()),
            check_expression: None,
        });
    }
}

fn add_discovered_indexes(schema: &mut Schema, entity: &DiscoveredEntity, table: &str, table_schema: &str) {
    for idx in &entity.indexes {
        schema.indexes.push(Index {
            name: idx.name.clone(),
            table: table.to_string(),
            schema: table_schema.to_string(),
            columns: idx.columns.clone(),
            unique: idx.unique,
            clustered: idx.clustered,
            filter: idx.filter.clone(),
        });
    }
}

fn add_fk_support_indexes(schema: &mut Schema) {
    let fks: Vec<Constraint> = schema
        .constraints
        .iter()
        .filter(|c| matches!(c.kind, ConstraintKind::Fk))
        .cloned()
        .collect();

    for fk in fks {
        let already_covered = schema
            .indexes
            .iter()
            .any(|idx| idx.table == fk.table && idx.schema == fk.schema && idx.has_prefix(&fk.columns));
        if already_covered {
            continue;
        }
        let joined = fk.columns.join("_");
        let name = format!("IX_{}_{joined}", fk.table);
        let dup_name = schema
            .indexes
            .iter()
            .any(|idx| idx.schema == fk.schema && idx.name.eq_ignore_ascii_case(&name));
        if dup_name {
            continue;
        }
        schema.indexes.push(Index {
            name,
            table: fk.table,
            schema: fk.schema,
            columns: fk.columns,
            unique: false,
            clustered: false,
            filter: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemist_entity_model::{Attributes, DiscoveredIndex, DiscoveredRelationship};

    fn prop(name: &str, abstract_type: &str, pk: bool) -> DiscoveredProperty {
        DiscoveredProperty {
            name: name.to_string(),
            abstract_type: abstract_type.to_string(),
            sql_type: None,
            nullable: !pk,
            primary_key: pk,
            foreign_key: false,
            unique: false,
            indexed: false,
            max_length: None,
            precision: None,
            scale: None,
            default_value: None,
            attributes: Attributes::new(),
        }
    }

    fn entity(name: &str, properties: Vec<DiscoveredProperty>) -> DiscoveredEntity {
        DiscoveredEntity {
            name: name.to_string(),
            full_name: format!("App.Models.{name}"),
            namespace: "App.Models".to_string(),
            table_name: String::new(),
            schema_name: None,
            source_file: "models.rs".to_string(),
            source_line: 1,
            properties,
            relationships: Vec::new(),
            indexes: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn synthesizes_pk_and_columns() {
        let entities = vec![entity(
            "User",
            vec![prop("Id", "int64", true), prop("Email", "string", false)],
        )];
        let config = SynthesisConfig::default();
        let (schema, _) = synthesize(entities, &config).unwrap();

        let table = schema.table_by_name("User").unwrap();
        assert_eq!(table.columns.len(), 2);
        assert!(schema
            .constraints
            .iter()
            .any(|c| c.name == "PK_User" && matches!(c.kind, ConstraintKind::Pk)));
    }

    #[test]
    fn unresolved_fk_is_skipped_with_warning() {
        let mut user = entity("Order", vec![prop("Id", "int64", true)]);
        user.relationships.push(DiscoveredRelationship {
            name: "Customer".to_string(),
            kind: RelationshipKind::ManyToOne,
            referenced_entity: "Customer".to_string(),
            referenced_table: None,
            fk_columns: vec![],
            referenced_columns: vec![],
            on_delete: "NO_ACTION".to_string(),
            on_update: "NO_ACTION".to_string(),
        });

        let config = SynthesisConfig::default();
        let (schema, report) = synthesize(vec![user], &config).unwrap();
        assert!(schema.constraints.iter().all(|c| !matches!(c.kind, ConstraintKind::Fk)));
        assert!(report.warnings.iter().any(|w| w.contains("skipping foreign key")));
    }

    #[test]
    fn duplicate_columns_are_fatal() {
        let mut attrs = Attributes::new();
        attrs.insert("column_name".to_string(), serde_json::Value::String("email".to_string()));
        let mut dup_prop = prop("Email2", "string", false);
        dup_prop.attributes = attrs;

        let entities = vec![entity(
            "User",
            vec![prop("Id", "int64", true), prop("Email", "string", false), dup_prop],
        )];
        let err = synthesize(entities, &SynthesisConfig::default()).unwrap_err();
        assert!(matches!(err, SynthesisError::DuplicateColumns { .. }));
    }

    #[test]
    fn zero_valid_entities_is_fatal_unless_ignored() {
        let err = synthesize(vec![], &SynthesisConfig::default()).unwrap_err();
        assert!(matches!(err, SynthesisError::NoValidEntities));

        let config = SynthesisConfig { ignore_export_attribute: true, ..SynthesisConfig::default() };
        let (schema, _) = synthesize(vec![], &config).unwrap();
        assert!(schema.tables.is_empty());
    }

    #[test]
    fn many_to_many_relationship_is_not_synthesized_into_a_join_table() {
        let mut post = entity("Post", vec![prop("Id", "int64", true)]);
        post.relationships.push(DiscoveredRelationship {
            name: "Tags".to_string(),
            kind: RelationshipKind::ManyToMany,
            referenced_entity: "Tag".to_string(),
            referenced_table: None,
            fk_columns: vec![],
            referenced_columns: vec![],
            on_delete: "CASCADE".to_string(),
            on_update: "CASCADE".to_string(),
        });
        let (schema, _) = synthesize(vec![post], &SynthesisConfig::default()).unwrap();
        assert_eq!(schema.tables.len(), 1);
    }

    #[test]
    fn fk_index_generation_skips_existing_prefix_index() {
        let mut order = entity("Order", vec![prop("Id", "int64", true)]);
        order.relationships.push(DiscoveredRelationship {
            name: "Customer".to_string(),
            kind: RelationshipKind::ManyToOne,
            referenced_entity: "Customer".to_string(),
            referenced_table: Some("Customer".to_string()),
            fk_columns: vec!["CustomerId".to_string()],
            referenced_columns: vec!["Id".to_string()],
            on_delete: "CASCADE".to_string(),
            on_update: "NO_ACTION".to_string(),
        });
        order.indexes.push(DiscoveredIndex {
            name: "IX_Order_Manual".to_string(),
            columns: vec!["CustomerId".to_string()],
            unique: false,
            clustered: false,
            filter: None,
            attributes: Attributes::new(),
        });
        let customer = entity("Customer", vec![prop("Id", "int64", true)]);

        let (schema, _) = synthesize(vec![customer, order], &SynthesisConfig::default()).unwrap();
        let fk_indexes: Vec<_> = schema
            .indexes
            .iter()
            .filter(|idx| idx.table == "Order" && idx.columns == vec!["CustomerId".to_string()])
            .collect();
        assert_eq!(fk_indexes.len(), 1, "should not add a duplicate FK-support index");
    }
}
