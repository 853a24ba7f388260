//! Canonical database-side schema model.
//!
//! This is the shape both the target-schema synthesizer (from entities)
//! and the introspectors (from a live database) build, and the shape the
//! differ compares. Constraints and indexes reference their owning table
//! by `(schema, name)` string pair rather than a back-pointer, so the
//! whole graph stays tree-shaped.

use indexmap::IndexMap;
use schemist_dialect::Dialect;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

pub type Metadata = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub identity: bool,
    pub max_length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub default_value: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub schema: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Table {
    pub fn qualified_key(&self) -> (String, String) {
        (self.schema.clone(), self.name.clone())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive duplicate-column check (hard error per spec.md §3).
    pub fn duplicate_column_names(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut dupes = Vec::new();
        for col in &self.columns {
            let lowered = col.name.to_ascii_lowercase();
            if !seen.insert(lowered.clone()) && !dupes.contains(&col.name) {
                dupes.push(col.name.clone());
            }
        }
        dupes
    }

    /// Identifiers (table + column names) exceeding the dialect's
    /// maximum length — a warning, never fatal.
    pub fn oversized_identifiers(&self, dialect: Dialect) -> Vec<String> {
        let limit = dialect.max_identifier_length();
        let mut out = Vec::new();
        if self.name.len() > limit {
            out.push(self.name.clone());
        }
        for col in &self.columns {
            if col.name.len() > limit {
                out.push(col.name.clone());
            }
        }
        out
    }

    pub fn reserved_word_columns(&self, dialect: Dialect) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| dialect.is_reserved_word(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    Pk,
    Uq,
    Fk,
    Ck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub table: String,
    pub schema: String,
    pub columns: Vec<String>,
    pub referenced_table: Option<String>,
    pub referenced_schema: Option<String>,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
    pub check_expression: Option<String>,
}

impl Constraint {
    pub fn identity(&self) -> (String, String) {
        (self.schema.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub schema: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub clustered: bool,
    pub filter: Option<String>,
}

impl Index {
    pub fn identity(&self) -> (String, String) {
        (self.schema.clone(), self.name.clone())
    }

    /// True when `columns` is a prefix of this index's column list —
    /// used by the Synthesizer to skip redundant FK-support indexes.
    pub fn has_prefix(&self, columns: &[String]) -> bool {
        columns.len() <= self.columns.len()
            && self
                .columns
                .iter()
                .zip(columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub data_type: String,
    pub mode: ParameterMode,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterMode {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub schema: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub schema: String,
    pub definition: String,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub schema: String,
    pub definition: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
}

/// The full database-side schema: everything the Differ compares,
/// current vs. target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub constraints: Vec<Constraint>,
    pub indexes: Vec<Index>,
    pub views: Vec<View>,
    pub procedures: Vec<Procedure>,
    pub functions: Vec<Function>,
}

impl Schema {
    pub fn table(&self, schema: &str, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.schema == schema && t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Constraint/index names unique per schema — hard invariant from
    /// spec.md §3.
    pub fn duplicate_constraint_names(&self) -> Vec<(String, String)> {
        duplicate_identities(self.constraints.iter().map(Constraint::identity))
    }

    pub fn duplicate_index_names(&self) -> Vec<(String, String)> {
        duplicate_identities(self.indexes.iter().map(Index::identity))
    }

    /// Sort everything by stable keys so introspection's independent,
    /// concurrently-fetched catalog queries merge deterministically
    /// (spec.md §5).
    pub fn sort_deterministically(&mut self) {
        self.tables.sort_by(|a, b| cmp_pair((&a.schema, &a.name), (&b.schema, &b.name)));
        for table in &mut self.tables {
            table.columns.sort_by(|a, b| a.name.cmp(&b.name));
        }
        self.constraints
            .sort_by(|a, b| cmp_pair((&a.schema, &a.name), (&b.schema, &b.name)));
        self.indexes
            .sort_by(|a, b| cmp_pair((&a.schema, &a.name), (&b.schema, &b.name)));
        self.views.sort_by(|a, b| cmp_pair((&a.schema, &a.name), (&b.schema, &b.name)));
        self.procedures
            .sort_by(|a, b| cmp_pair((&a.schema, &a.name), (&b.schema, &b.name)));
        self.functions
            .sort_by(|a, b| cmp_pair((&a.schema, &a.name), (&b.schema, &b.name)));
    }
}

fn cmp_pair(a: (&String, &String), b: (&String, &String)) -> Ordering {
    a.0.cmp(b.0).then_with(|| a.1.cmp(b.1))
}

fn duplicate_identities(iter: impl Iterator<Item = (String, String)>) -> Vec<(String, String)> {
    let mut seen = std::collections::HashSet::new();
    let mut dupes = Vec::new();
    for identity in iter {
        if !seen.insert(identity.clone()) && !dupes.contains(&identity) {
            dupes.push(identity);
        }
    }
    dupes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: "INT".to_string(),
            nullable: false,
            primary_key: false,
            identity: false,
            max_length: None,
            precision: None,
            scale: None,
            default_value: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn duplicate_column_names_are_case_insensitive() {
        let table = Table {
            name: "User".into(),
            schema: "dbo".into(),
            columns: vec![column("Email"), column("email")],
            metadata: Metadata::new(),
        };
        assert_eq!(table.duplicate_column_names(), vec!["email".to_string()]);
    }

    #[test]
    fn oversized_identifiers_flagged_per_dialect() {
        let long_name = "x".repeat(70);
        let table = Table {
            name: "User".into(),
            schema: "public".into(),
            columns: vec![column(&long_name)],
            metadata: Metadata::new(),
        };
        assert_eq!(table.oversized_identifiers(Dialect::Postgres), vec![long_name.clone()]);
        assert!(table.oversized_identifiers(Dialect::SqlServer).is_empty());
    }

    #[test]
    fn index_prefix_match_is_case_insensitive() {
        let idx = Index {
            name: "IX_Order_CustomerId".into(),
            table: "Order".into(),
            schema: "dbo".into(),
            columns: vec!["CustomerId".into(), "Status".into()],
            unique: false,
            clustered: false,
            filter: None,
        };
        assert!(idx.has_prefix(&["customerid".to_string()]));
        assert!(!idx.has_prefix(&["Status".to_string()]));
    }
}
