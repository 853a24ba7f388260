//! Language-neutral entity model.
//!
//! A [`DiscoveredEntity`] is what a per-language parser hands back after
//! finding a type marked with the project's track attribute. Everything
//! downstream — synthesis, diffing, tagging — works off this model, never
//! off the original source language.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type Attributes = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredRelationship {
    pub name: String,
    pub kind: RelationshipKind,
    pub referenced_entity: String,
    pub referenced_table: Option<String>,
    pub fk_columns: Vec<String>,
    pub referenced_columns: Vec<String>,
    /// Passed through verbatim to SQL generation, not validated against
    /// dialect capability.
    pub on_delete: String,
    pub on_update: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub clustered: bool,
    pub filter: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredProperty {
    pub name: String,
    pub abstract_type: String,
    pub sql_type: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub foreign_key: bool,
    pub unique: bool,
    pub indexed: bool,
    pub max_length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub default_value: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl DiscoveredProperty {
    pub fn column_name(&self) -> &str {
        match self.attributes.get("column_name").and_then(Value::as_str) {
            Some(name) => name,
            None => &self.name,
        }
    }

    pub fn check_constraint(&self) -> Option<&str> {
        self.attributes.get("check_constraint").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredEntity {
    pub name: String,
    pub full_name: String,
    pub namespace: String,
    pub table_name: String,
    pub schema_name: Option<String>,
    pub source_file: String,
    pub source_line: u32,
    pub properties: Vec<DiscoveredProperty>,
    pub relationships: Vec<DiscoveredRelationship>,
    pub indexes: Vec<DiscoveredIndex>,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityModelError {
    #[error("entity name must not be empty (source: {source_file})")]
    EmptyName { source_file: String },
    #[error("entity `{name}` has no properties")]
    NoProperties { name: String },
}

/// A builder-less constructor that is forgiving of absent `table_name`
/// and absent primary keys, matching the invariants in spec.md §3:
/// `table_name` defaults to `name`; a missing PK gets a synthetic
/// identity `Id` column synthesized (not just warned about).
impl DiscoveredEntity {
    pub fn normalize(mut self) -> Result<(Self, Vec<String>), EntityModelError> {
        let mut warnings = Vec::new();

        if self.name.trim().is_empty() {
            return Err(EntityModelError::EmptyName {
                source_file: self.source_file.clone(),
            });
        }
        if self.table_name.trim().is_empty() {
            self.table_name = self.name.clone();
        }
        if self.properties.is_empty() {
            return Err(EntityModelError::NoProperties { name: self.name });
        }

        let pk_columns: Vec<String> = self
            .properties
            .iter()
            .filter(|p| p.primary_key)
            .map(|p| p.column_name().to_string())
            .collect();

        if pk_columns.is_empty() {
            warnings.push(format!(
                "entity `{}` has no primary key; synthesizing identity column `Id`",
                self.name
            ));
            self.properties.insert(
                0,
                DiscoveredProperty {
                    name: "Id".to_string(),
                    abstract_type: "int64".to_string(),
                    sql_type: None,
                    nullable: false,
                    primary_key: true,
                    foreign_key: false,
                    unique: false,
                    indexed: false,
                    max_length: None,
                    precision: None,
                    scale: None,
                    default_value: None,
                    attributes: Attributes::new(),
                },
            );
        }

        Ok((self, warnings))
    }

    pub fn primary_key_columns(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|p| p.primary_key)
            .map(|p| p.column_name().to_string())
            .collect()
    }

    pub fn resolved_schema(&self, dialect_default: &str) -> String {
        self.schema_name
            .clone()
            .unwrap_or_else(|| dialect_default.to_string())
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(name: &str, pk: bool) -> DiscoveredProperty {
        DiscoveredProperty {
            name: name.to_string(),
            abstract_type: "string".to_string(),
            sql_type: None,
            nullable: false,
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

    fn entity(name: &str, props: Vec<DiscoveredProperty>) -> DiscoveredEntity {
        DiscoveredEntity {
            name: name.to_string(),
            full_name: format!("App.Models.{name}"),
            namespace: "App.Models".to_string(),
            table_name: String::new(),
            schema_name: None,
            source_file: "models.rs".to_string(),
            source_line: 1,
            properties: props,
            relationships: Vec::new(),
            indexes: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn table_name_defaults_to_entity_name() {
        let (normalized, _) = entity("User", vec![prop("Id", true)]).normalize().unwrap();
        assert_eq!(normalized.table_name, "User");
    }

    #[test]
    fn missing_primary_key_synthesizes_identity_id() {
        let (normalized, warnings) = entity("User", vec![prop("Email", false)]).normalize().unwrap();
        assert_eq!(normalized.primary_key_columns(), vec!["Id".to_string()]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn empty_properties_is_fatal() {
        let err = entity("User", vec![]).normalize().unwrap_err();
        assert!(matches!(err, EntityModelError::NoProperties { .. }));
    }

    #[test]
    fn empty_name_is_fatal() {
        let err = entity("", vec![prop("Id", true)]).normalize().unwrap_err();
        assert!(matches!(err, EntityModelError::EmptyName { .. }));
    }

    #[test]
    fn column_name_attribute_overrides_property_name() {
        let mut p = prop("CreatedAt", false);
        p.attributes.insert("column_name".to_string(), Value::String("created_at".into()));
        assert_eq!(p.column_name(), "created_at");
    }
}
