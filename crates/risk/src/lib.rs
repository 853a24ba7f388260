//! Risk assignment and aggregation over a list of schema changes.

use schemist_schema_differ::{ChangeKind, ObjectType, RiskLevel, SchemaChange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub category: String,
    pub affected_objects: Vec<String>,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk_level: RiskLevel,
    pub requires_approval: bool,
    pub requires_dual_approval: bool,
    pub safe_count: usize,
    pub warning_count: usize,
    pub risky_count: usize,
    pub factors: Vec<RiskFactor>,
}

fn prop_bool(change: &SchemaChange, key: &str) -> bool {
    matches!(change.properties.get(key), Some(Value::Bool(true)))
}

fn prop_str<'a>(change: &'a SchemaChange, key: &str) -> Option<&'a str> {
    match change.properties.get(key) {
        Some(Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Assigns a `RiskLevel` to a single change per the fixed classification
/// table: CREATE TABLE / safe ADD COLUMN / non-unique index / PK / alter
/// default are Safe; most constraint and index churn plus view/procedure/
/// function drops are Warning; DROP TABLE, DROP COLUMN, and a narrowing
/// type change are Risky.
pub fn assess_change(change: &SchemaChange) -> RiskLevel {
    use ChangeKind::*;
    use ObjectType::*;

    match (change.kind, change.object_type) {
        (Create, Table) => RiskLevel::Safe,
        (Drop, Table) => RiskLevel::Risky,

        (Alter, Column) => match prop_str(change, "change") {
            Some("add_column") => {
                let nullable = prop_bool(change, "nullable");
                let has_default = prop_bool(change, "has_default");
                if nullable || has_default {
                    RiskLevel::Safe
                } else {
                    RiskLevel::Warning
                }
            }
            Some("drop_column") => RiskLevel::Risky,
            Some("alter_type") => {
                if prop_bool(change, "potential_data_loss") {
                    RiskLevel::Risky
                } else {
                    RiskLevel::Safe
                }
            }
            Some("alter_nullable") => RiskLevel::Warning,
            Some("alter_default") => RiskLevel::Safe,
            _ => RiskLevel::Warning,
        },

        (Create, Constraint) => match prop_str(change, "constraint_type") {
            Some("PK") => RiskLevel::Safe,
            Some("UQ") | Some("CK") | Some("FK") => RiskLevel::Warning,
            _ => RiskLevel::Warning,
        },
        (Drop, Constraint) => match prop_str(change, "constraint_type") {
            Some("UQ") | Some("CK") => RiskLevel::Warning,
            Some("FK") => RiskLevel::Warning,
            Some("PK") => RiskLevel::Warning,
            _ => RiskLevel::Warning,
        },

        (Create, Index) => {
            if prop_bool(change, "is_clustered") {
                RiskLevel::Warning
            } else {
                RiskLevel::Safe
            }
        }
        // Dropping an index is Warning whether or not it's clustered, unlike
        // Create where only a clustered index earns the extra scrutiny.
        (Drop, Index) => RiskLevel::Warning,

        (Drop, View) | (Drop, Procedure) | (Drop, Function) => RiskLevel::Warning,
        (Create, View) | (Create, Procedure) | (Create, Function) => RiskLevel::Safe,

        _ => RiskLevel::Warning,
    }
}

/// Assigns a risk level to every change (mutating in place) and returns
/// the aggregate assessment.
pub fn assess(changes: &mut [SchemaChange]) -> RiskAssessment {
    let mut safe_count = 0;
    let mut warning_count = 0;
    let mut risky_count = 0;
    let mut overall = RiskLevel::Safe;
    let mut factors = Vec::new();

    for change in changes.iter_mut() {
        let level = assess_change(change);
        change.risk_level = level;
        overall = overall.max(level);

        match level {
            RiskLevel::Safe => safe_count += 1,
            RiskLevel::Warning => warning_count += 1,
            RiskLevel::Risky => risky_count += 1,
        }

        if level != RiskLevel::Safe {
            factors.push(RiskFactor {
                category: format!("{:?}:{:?}", change.object_type, change.kind),
                affected_objects: vec![change.object_name.clone()],
                requires_approval: level != RiskLevel::Safe,
            });
        }
    }

    debug!(safe_count, warning_count, risky_count, ?overall, "risk assessment complete");

    RiskAssessment {
        overall_risk_level: overall,
        requires_approval: warning_count > 0 || risky_count > 0,
        requires_dual_approval: risky_count > 0,
        safe_count,
        warning_count,
        risky_count,
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemist_schema_differ::ChangeProperties;

    fn change(kind: ChangeKind, object_type: ObjectType, properties: ChangeProperties) -> SchemaChange {
        SchemaChange {
            kind,
            object_type,
            object_name: "Thing".into(),
            schema: "dbo".into(),
            description: "test".into(),
            risk_level: RiskLevel::Safe,
            dependencies: Vec::new(),
            properties,
        }
    }

    #[test]
    fn drop_table_is_risky() {
        let c = change(ChangeKind::Drop, ObjectType::Table, ChangeProperties::new());
        assert_eq!(assess_change(&c), RiskLevel::Risky);
    }

    #[test]
    fn nullable_add_column_is_safe() {
        let mut props = ChangeProperties::new();
        props.insert("change".into(), Value::String("add_column".into()));
        props.insert("nullable".into(), Value::Bool(true));
        props.insert("has_default".into(), Value::Bool(false));
        let c = change(ChangeKind::Alter, ObjectType::Column, props);
        assert_eq!(assess_change(&c), RiskLevel::Safe);
    }

    #[test]
    fn required_add_column_without_default_is_warning() {
        let mut props = ChangeProperties::new();
        props.insert("change".into(), Value::String("add_column".into()));
        props.insert("nullable".into(), Value::Bool(false));
        props.insert("has_default".into(), Value::Bool(false));
        let c = change(ChangeKind::Alter, ObjectType::Column, props);
        assert_eq!(assess_change(&c), RiskLevel::Warning);
    }

    #[test]
    fn narrowing_type_change_is_risky() {
        let mut props = ChangeProperties::new();
        props.insert("change".into(), Value::String("alter_type".into()));
        props.insert("potential_data_loss".into(), Value::Bool(true));
        let c = change(ChangeKind::Alter, ObjectType::Column, props);
        assert_eq!(assess_change(&c), RiskLevel::Risky);
    }

    #[test]
    fn aggregate_overall_level_is_the_max_and_drives_approval_flags() {
        let mut changes = vec![
            change(ChangeKind::Create, ObjectType::Table, ChangeProperties::new()),
            change(ChangeKind::Drop, ObjectType::Table, ChangeProperties::new()),
        ];
        let assessment = assess(&mut changes);
        assert_eq!(assessment.overall_risk_level, RiskLevel::Risky);
        assert!(assessment.requires_approval);
        assert!(assessment.requires_dual_approval);
        assert_eq!(assessment.safe_count, 1);
        assert_eq!(assessment.risky_count, 1);
    }

    #[test]
    fn empty_diff_is_safe_and_needs_no_approval() {
        let mut changes: Vec<SchemaChange> = Vec::new();
        let assessment = assess(&mut changes);
        assert_eq!(assessment.overall_risk_level, RiskLevel::Safe);
        assert!(!assessment.requires_approval);
        assert!(!assessment.requires_dual_approval);
    }
}
