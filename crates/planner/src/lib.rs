//! Orders `SchemaChange`s into a deployment plan: the fixed 29-phase
//! ordering (default) or a simple 3-phase collapse, both carrying
//! rendered SQL and a best-effort rollback statement per operation.

use schemist_dialect::Dialect;
use schemist_schema_differ::{ChangeKind, ObjectType, RiskLevel, SchemaChange};
use schemist_schema_model::Schema;
use schemist_sql_emitter::{self as emitter, ValidationPhase};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOperation {
    pub change: SchemaChange,
    pub sql_command: String,
    pub rollback_command: String,
    pub can_rollback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPhase {
    pub number: u32,
    pub name: String,
    pub operations: Vec<DeploymentOperation>,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub can_rollback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub phases: Vec<DeploymentPhase>,
    pub overall_risk_level: RiskLevel,
    pub use_29_phase: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PlannerOptions {
    pub use_29_phase: bool,
    pub skip_backup: bool,
    pub skip_warning_phases: bool,
    pub custom_phase_order: Option<Vec<u32>>,
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("customPhaseOrder contains unknown phase number {0}")]
    UnknownPhaseNumber(u32),
    #[error("customPhaseOrder contains duplicate phase number {0}")]
    DuplicatePhaseNumber(u32),
}

const PHASE_NAMES: [&str; 29] = [
    "Pre-deployment validation",
    "Backup",
    "Drop views",
    "Drop procedures",
    "Drop functions",
    "Drop foreign key constraints",
    "Drop check constraints",
    "Drop unique constraints",
    "Drop non-clustered indexes",
    "Drop clustered indexes",
    "Reserved",
    "Reserved",
    "Drop columns",
    "Drop tables",
    "Create tables",
    "Add columns",
    "Alter column data type",
    "Alter column nullability",
    "Alter column default",
    "Create primary key constraints",
    "Create unique constraints",
    "Create check constraints",
    "Create clustered indexes",
    "Create unique non-clustered indexes",
    "Create non-clustered indexes",
    "Create foreign key constraints",
    "Create views",
    "Create procedures and functions",
    "Post-deployment validation",
];

fn phase_number_for(change: &SchemaChange) -> u32 {
    use ChangeKind::*;
    use ObjectType::*;

    match (change.kind, change.object_type) {
        (Drop, View) => 3,
        (Drop, Procedure) => 4,
        (Drop, Function) => 5,
        (Drop, Constraint) => match change.properties.get("constraint_type").and_then(|v| v.as_str()) {
            Some("FK") => 6,
            Some("CK") => 7,
            Some("UQ") => 8,
            Some("PK") => 8,
            _ => 8,
        },
        (Drop, Index) => {
            if matches!(change.properties.get("is_clustered"), Some(v) if v.as_bool() == Some(true)) {
                10
            } else {
                9
            }
        }
        (Alter, Column) => match change.properties.get("change").and_then(|v| v.as_str()) {
            Some("drop_column") => 13,
            Some("add_column") => 16,
            Some("alter_type") => 17,
            Some("alter_nullable") => 18,
            Some("alter_default") => 19,
            _ => 19,
        },
        (Drop, Table) => 14,
        (Create, Table) => 15,
        (Create, Constraint) => match change.properties.get("constraint_type").and_then(|v| v.as_str()) {
            Some("PK") => 20,
            Some("UQ") => 21,
            Some("CK") => 22,
            Some("FK") => 26,
            _ => 26,
        },
        (Create, Index) => {
            let clustered = matches!(change.properties.get("is_clustered"), Some(v) if v.as_bool() == Some(true));
            let unique = matches!(change.properties.get("is_unique"), Some(v) if v.as_bool() == Some(true));
            if clustered {
                23
            } else if unique {
                24
            } else {
                25
            }
        }
        (Create, View) => 27,
        (Create, Procedure) | (Create, Function) => 28,

        // The differ never constructs these shapes: column changes are always
        // Alter, and view/procedure/function changes are always Drop+Create.
        (Create, Column) => 16,
        (Drop, Column) => 13,
        (Alter, Table | Constraint | Index | View | Procedure | Function) => 19,
    }
}

/// Build the fixed 29-phase (or, if `options.use_29_phase` is false, the
/// simple 3-phase) deployment plan for a diff, rendering SQL for every
/// operation and applying `skipWarningPhases`/`customPhaseOrder` last.
pub fn plan(
    changes: Vec<SchemaChange>,
    current: &Schema,
    target: &Schema,
    dialect: Dialect,
    database_name: &str,
    options: &PlannerOptions,
) -> Result<DeploymentPlan, PlannerError> {
    let operations: Vec<(u32, DeploymentOperation)> = changes
        .into_iter()
        .map(|change| {
            let phase_number = if options.use_29_phase { phase_number_for(&change) } else { simple_phase_number(&change) };
            let sql_command = emitter::emit(&change, current, target, dialect)
                .unwrap_or_else(|err| format!("-- could not render SQL for {}: {err}", change.object_name));
            let rollback_command = emitter::rollback(&change, current, target, dialect);
            let potential_data_loss = matches!(change.properties.get("potential_data_loss"), Some(v) if v.as_bool() == Some(true));
            let can_rollback = !matches!(change.kind, ChangeKind::Drop) && !potential_data_loss;
            (
                phase_number,
                DeploymentOperation { change, sql_command, rollback_command, can_rollback },
            )
        })
        .collect();

    let max_phase = if options.use_29_phase { 29 } else { 3 };
    let mut phases: Vec<DeploymentPhase> = (1..=max_phase)
        .map(|n| DeploymentPhase {
            number: n,
            name: phase_name(n, options.use_29_phase),
            operations: Vec::new(),
            risk_level: RiskLevel::Safe,
            requires_approval: false,
            can_rollback: true,
        })
        .collect();

    for (phase_number, operation) in operations {
        phases[(phase_number - 1) as usize].operations.push(operation);
    }

    // Phase 1: pre-deployment validation; phase 29/3: post-deployment validation.
    if options.use_29_phase {
        phases[0].operations.push(validation_operation(ValidationPhase::PreDeployment, dialect));
        phases[28].operations.push(validation_operation(ValidationPhase::PostDeployment, dialect));
        if !options.skip_backup {
            phases[1].operations.push(backup_operation(dialect, database_name));
        }
    } else {
        phases[2].operations.push(validation_operation(ValidationPhase::PostDeployment, dialect));
    }

    for phase in &mut phases {
        let risk = phase.operations.iter().map(|op| op.change.risk_level).max().unwrap_or(RiskLevel::Safe);
        phase.risk_level = risk;
        phase.requires_approval = phase.operations.iter().any(|op| op.change.risk_level == RiskLevel::Risky);
        phase.can_rollback = phase.operations.iter().all(|op| op.can_rollback);
    }

    phases.retain(|p| !p.operations.is_empty() || is_always_present(p.number, options.use_29_phase));

    if options.skip_warning_phases {
        phases.retain(|p| !(p.risk_level == RiskLevel::Warning && !p.requires_approval));
        renumber(&mut phases);
    }

    if let Some(custom_order) = &options.custom_phase_order {
        phases = apply_custom_order(phases, custom_order)?;
    }

    let overall_risk_level = phases.iter().map(|p| p.risk_level).max().unwrap_or(RiskLevel::Safe);

    info!(phase_count = phases.len(), ?overall_risk_level, "deployment plan built");

    Ok(DeploymentPlan { phases, overall_risk_level, use_29_phase: options.use_29_phase })
}

fn is_always_present(phase_number: u32, use_29_phase: bool) -> bool {
    if use_29_phase {
        matches!(phase_number, 1 | 29)
    } else {
        phase_number == 3
    }
}

fn phase_name(number: u32, use_29_phase: bool) -> String {
    if use_29_phase {
        PHASE_NAMES[(number - 1) as usize].to_string()
    } else {
        match number {
            1 => "Drop operations".to_string(),
            2 => "Create and alter operations".to_string(),
            3 => "Validation".to_string(),
            _ => "Unknown".to_string(),
        }
    }
}

fn simple_phase_number(change: &SchemaChange) -> u32 {
    match change.kind {
        ChangeKind::Drop => 1,
        ChangeKind::Create | ChangeKind::Alter => 2,
    }
}

fn validation_operation(phase: ValidationPhase, dialect: Dialect) -> DeploymentOperation {
    let sql = emitter::validation_statement(phase, dialect);
    DeploymentOperation {
        change: synthetic_change("validation", ObjectType::Table, &sql),
        sql_command: sql,
        rollback_command: "-- validation queries are not rolled back".to_string(),
        can_rollback: true,
    }
}

fn backup_operation(dialect: Dialect, database_name: &str) -> DeploymentOperation {
    let sql = emitter::backup_statement(dialect, database_name);
    DeploymentOperation {
        change: synthetic_change("backup", ObjectType::Table, &sql),
        sql_command: sql,
        rollback_command: "-- backups are not rolled back".to_string(),
        can_rollback: true,
    }
}

fn synthetic_change(name: &str, object_type: ObjectType, description: &str) -> SchemaChange {
    SchemaChange {
        kind: ChangeKind::Alter,
        object_type,
        object_name: name.to_string(),
        schema: String::new(),
        description: description.to_string(),
        risk_level: RiskLevel::Safe,
        dependencies: Vec::new(),
        properties: Default::default(),
    }
}

fn renumber(phases: &mut [DeploymentPhase]) {
    for (i, phase) in phases.iter_mut().enumerate() {
        phase.number = (i + 1) as u32;
    }
}

fn apply_custom_order(phases: Vec<DeploymentPhase>, custom_order: &[u32]) -> Result<Vec<DeploymentPhase>, PlannerError> {
    let mut seen = std::collections::HashSet::new();
    for &n in custom_order {
        if !seen.insert(n) {
            return Err(PlannerError::DuplicatePhaseNumber(n));
        }
        if !phases.iter().any(|p| p.number == n) {
            return Err(PlannerError::UnknownPhaseNumber(n));
        }
    }

    let mut by_number: std::collections::HashMap<u32, DeploymentPhase> =
        phases.into_iter().map(|p| (p.number, p)).collect();

    let mut ordered = Vec::new();
    for &n in custom_order {
        if let Some(phase) = by_number.remove(&n) {
            ordered.push(phase);
        }
    }
    let mut remaining: Vec<DeploymentPhase> = by_number.into_values().collect();
    remaining.sort_by_key(|p| p.number);
    ordered.extend(remaining);

    if ordered.iter().any(|p| !p.operations.is_empty()) {
        warn!("customPhaseOrder reorders phases; drop-before-create and FK-after-tables invariants are caller responsibility");
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemist_schema_differ::{ChangeProperties, ChangeKind as CK, ObjectType as OT};
    use serde_json::Value;

    fn table_change(kind: CK, name: &str) -> SchemaChange {
        SchemaChange {
            kind,
            object_type: OT::Table,
            object_name: name.to_string(),
            schema: "dbo".to_string(),
            description: format!("{:?} table {name}", kind),
            risk_level: RiskLevel::Safe,
            dependencies: Vec::new(),
            properties: ChangeProperties::new(),
        }
    }

    #[test]
    fn empty_diff_produces_only_validation_phases() {
        let options = PlannerOptions { use_29_phase: true, skip_backup: true, ..Default::default() };
        let current = Schema::default();
        let target = Schema::default();
        let result = plan(vec![], &current, &target, Dialect::SqlServer, "TestDb", &options).unwrap();
        assert_eq!(result.phases.len(), 2);
        assert_eq!(result.phases[0].number, 1);
        assert_eq!(result.phases[1].number, 29);
        assert_eq!(result.overall_risk_level, RiskLevel::Safe);
    }

    #[test]
    fn create_table_lands_in_phase_15() {
        let options = PlannerOptions { use_29_phase: true, skip_backup: true, ..Default::default() };
        let current = Schema::default();
        let target = Schema::default();
        let changes = vec![table_change(CK::Create, "User")];
        let result = plan(changes, &current, &target, Dialect::Postgres, "testdb", &options).unwrap();
        let phase_15 = result.phases.iter().find(|p| p.number == 15).unwrap();
        assert_eq!(phase_15.operations.len(), 1);
    }

    #[test]
    fn drop_fk_precedes_drop_table() {
        let mut fk_props = ChangeProperties::new();
        fk_props.insert("constraint_type".into(), Value::String("FK".into()));
        let drop_fk = SchemaChange {
            kind: CK::Drop,
            object_type: OT::Constraint,
            object_name: "FK_Order_Customer".into(),
            schema: "dbo".into(),
            description: "Drop FK".into(),
            risk_level: RiskLevel::Safe,
            dependencies: vec!["Order".into(), "Customer".into()],
            properties: fk_props,
        };
        let drop_table = table_change(CK::Drop, "Customer");

        let options = PlannerOptions { use_29_phase: true, skip_backup: true, ..Default::default() };
        let current = Schema::default();
        let target = Schema::default();
        let result = plan(vec![drop_fk, drop_table], &current, &target, Dialect::SqlServer, "TestDb", &options).unwrap();

        let fk_phase = result.phases.iter().find(|p| p.operations.iter().any(|op| op.change.object_name == "FK_Order_Customer")).unwrap();
        let table_phase = result.phases.iter().find(|p| p.operations.iter().any(|op| op.change.object_name == "Customer")).unwrap();
        assert!(fk_phase.number < table_phase.number);
    }

    #[test]
    fn skip_warning_phases_renumbers_contiguously_and_keeps_risky_phases() {
        let mut fk_props = ChangeProperties::new();
        fk_props.insert("constraint_type".into(), Value::String("FK".into()));
        let create_fk = SchemaChange {
            kind: CK::Create,
            object_type: OT::Constraint,
            object_name: "FK_X".into(),
            schema: "dbo".into(),
            description: "Create FK".into(),
            risk_level: RiskLevel::Warning,
            dependencies: vec![],
            properties: fk_props,
        };
        let drop_table = table_change(CK::Drop, "Legacy");
        let mut drop_table_risky = drop_table.clone();
        drop_table_risky.risk_level = RiskLevel::Risky;

        let options = PlannerOptions {
            use_29_phase: true,
            skip_backup: true,
            skip_warning_phases: true,
            ..Default::default()
        };
        let current = Schema::default();
        let target = Schema::default();
        let result = plan(vec![create_fk, drop_table_risky], &current, &target, Dialect::SqlServer, "TestDb", &options).unwrap();

        for (i, phase) in result.phases.iter().enumerate() {
            assert_eq!(phase.number, (i + 1) as u32);
        }
        assert!(result.phases.iter().any(|p| p.risk_level == RiskLevel::Risky));
        assert!(
            !result.phases.iter().any(|p| p.risk_level == RiskLevel::Warning),
            "a Warning-only phase with no Risky operation must be dropped by skip_warning_phases"
        );
    }

    #[test]
    fn malformed_custom_phase_order_is_a_configuration_error() {
        let options = PlannerOptions {
            use_29_phase: true,
            skip_backup: true,
            custom_phase_order: Some(vec![1, 1, 99]),
            ..Default::default()
        };
        let current = Schema::default();
        let target = Schema::default();
        let err = plan(vec![], &current, &target, Dialect::SqlServer, "TestDb", &options).unwrap_err();
        assert!(matches!(err, PlannerError::DuplicatePhaseNumber(1)));
    }
}
