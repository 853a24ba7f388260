//! End-to-end scenarios from spec.md §8 (S1–S6), driving the real
//! pipeline stages against in-memory test doubles for the out-of-scope
//! collaborators (discovery, git metadata, serialization).

use schemist_core::testing::{FixedDiscoverer, FixedGitMetadata, FixedIntrospector, InMemorySerializer, NoGitMetadata};
use schemist_core::{run_pipeline, OperationMode, PipelineConfig};
use schemist_dialect::Dialect;
use schemist_entity_model::{Attributes, DiscoveredEntity, DiscoveredProperty};
use schemist_planner::PlannerOptions;
use schemist_risk::{self as risk};
use schemist_schema_differ::{self as differ, ChangeKind, ObjectType, RiskLevel};
use schemist_schema_model::Schema;
use schemist_schema_synth::{self as synth, SynthesisConfig};
use tokio_util::sync::CancellationToken;

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

fn user_entity() -> DiscoveredEntity {
    let mut email = prop("Email", "string", false);
    email.nullable = false;
    email.unique = true;
    email.max_length = Some(255);
    entity("User", vec![prop("Id", "int64", true), email])
}

fn base_config(dialect: Dialect) -> PipelineConfig {
    PipelineConfig {
        language: "csharp".to_string(),
        track_attribute: "TrackSchema".to_string(),
        dialect,
        server: "localhost".to_string(),
        database: "AppDb".to_string(),
        mode: OperationMode::Validate,
        ..PipelineConfig::default()
    }
}

/// S1 — identical current/target schema yields zero changes, a Safe plan
/// containing only the always-present validation/backup phases.
#[tokio::test]
async fn s1_empty_diff_yields_safe_plan_with_no_change_phases() {
    let target_schema = synth::synthesize(vec![user_entity()], &SynthesisConfig { dialect: Dialect::SqlServer, ..SynthesisConfig::default() })
        .unwrap()
        .0;

    let discoverer = FixedDiscoverer(vec![user_entity()]);
    let introspector = FixedIntrospector(target_schema);
    let git = NoGitMetadata;
    let serializer = InMemorySerializer::new();

    let mut config = base_config(Dialect::SqlServer);
    config.mode = OperationMode::Noop;

    let output = run_pipeline(
        &config,
        &discoverer,
        Some(&introspector),
        &git,
        &serializer,
        "20260730000000",
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(output.report.changes.is_empty());
    assert_eq!(output.report.risk.overall_risk_level, RiskLevel::Safe);
    let numbers: Vec<u32> = output.plan.phases.iter().map(|p| p.number).collect();
    assert_eq!(numbers, vec![1, 2, 29]);
}

/// S2 — adding a nullable column with a default is a Safe, phase-16 change
/// whose rendered SQL matches the dialect's ADD COLUMN shape exactly.
#[tokio::test]
async fn s2_add_nullable_column_with_default_is_safe_and_lands_in_phase_16() {
    let current = synth::synthesize(vec![user_entity()], &SynthesisConfig { dialect: Dialect::SqlServer, ..SynthesisConfig::default() })
        .unwrap()
        .0;

    let mut created_at = prop("CreatedAt", "datetime", false);
    created_at.default_value = Some("NOW()".to_string());
    let mut target_entity = user_entity();
    target_entity.properties.push(created_at);
    let target = synth::synthesize(vec![target_entity], &SynthesisConfig { dialect: Dialect::SqlServer, ..SynthesisConfig::default() })
        .unwrap()
        .0;

    let mut changes = differ::diff(&current, &target);
    risk::assess(&mut changes);
    assert_eq!(changes.len(), 1);
    let change = &changes[0];
    assert!(change.description.contains("Add column"));
    assert_eq!(change.risk_level, RiskLevel::Safe);

    let plan = schemist_planner::plan(
        changes,
        &current,
        &target,
        Dialect::SqlServer,
        "AppDb",
        &PlannerOptions { use_29_phase: true, skip_backup: true, ..PlannerOptions::default() },
    )
    .unwrap();

    let phase_16 = plan.phases.iter().find(|p| p.number == 16).expect("phase 16 present");
    assert_eq!(phase_16.operations.len(), 1);
    // `dbo` is SQL Server's own default schema, so per §4.9's qualified-name
    // rule (qualify only when the schema differs from the dialect default)
    // it is omitted here rather than spelled out — see DESIGN.md.
    assert_eq!(
        phase_16.operations[0].sql_command,
        "ALTER TABLE [User] ADD [CreatedAt] DATETIME2 NULL DEFAULT GETUTCDATE();"
    );
}

/// S3 — narrowing a string column is Risky, flags potential data loss,
/// lands in phase 17, and forces dual approval with no rollback.
#[tokio::test]
async fn s3_narrowing_string_column_is_risky_and_requires_dual_approval() {
    let mut current_entity = user_entity();
    current_entity.properties[1].max_length = Some(255);
    let current = synth::synthesize(vec![current_entity], &SynthesisConfig { dialect: Dialect::SqlServer, ..SynthesisConfig::default() })
        .unwrap()
        .0;

    let mut target_entity = user_entity();
    target_entity.properties[1].max_length = Some(50);
    let target = synth::synthesize(vec![target_entity], &SynthesisConfig { dialect: Dialect::SqlServer, ..SynthesisConfig::default() })
        .unwrap()
        .0;

    let mut changes = differ::diff(&current, &target);
    let assessment = risk::assess(&mut changes);

    let type_change = changes
        .iter()
        .find(|c| matches!(c.object_type, ObjectType::Column) && c.description.contains("data type"))
        .expect("a data-type change is present");
    assert_eq!(type_change.properties.get("potential_data_loss"), Some(&serde_json::Value::Bool(true)));
    assert_eq!(type_change.risk_level, RiskLevel::Risky);
    assert!(assessment.requires_dual_approval);

    let plan = schemist_planner::plan(
        changes,
        &current,
        &target,
        Dialect::SqlServer,
        "AppDb",
        &PlannerOptions { use_29_phase: true, skip_backup: true, ..PlannerOptions::default() },
    )
    .unwrap();
    let phase_17 = plan.phases.iter().find(|p| p.number == 17).expect("phase 17 present");
    assert_eq!(phase_17.risk_level, RiskLevel::Risky);
    assert!(phase_17.requires_approval);
    assert!(!phase_17.can_rollback, "a narrowing type change cannot be reconstructed");
}

/// S4 — dropping a table that's referenced by a foreign key drops the FK
/// (phase 6) strictly before the table itself (phase 14); overall risk is
/// Risky.
#[tokio::test]
async fn s4_drop_fk_then_table_orders_fk_drop_before_table_drop() {
    let customer = entity("Customer", vec![prop("Id", "int64", true)]);
    let mut order = entity("Order", vec![prop("Id", "int64", true)]);
    order.relationships.push(schemist_entity_model::DiscoveredRelationship {
        name: "Customer".to_string(),
        kind: schemist_entity_model::RelationshipKind::ManyToOne,
        referenced_entity: "Customer".to_string(),
        referenced_table: Some("Customer".to_string()),
        fk_columns: vec!["CustomerId".to_string()],
        referenced_columns: vec!["Id".to_string()],
        on_delete: "CASCADE".to_string(),
        on_update: "NO_ACTION".to_string(),
    });

    let current = synth::synthesize(vec![customer, order], &SynthesisConfig { dialect: Dialect::SqlServer, ..SynthesisConfig::default() })
        .unwrap()
        .0;
    let target = Schema::default();

    let mut changes = differ::diff(&current, &target);
    risk::assess(&mut changes);

    let plan = schemist_planner::plan(
        changes,
        &current,
        &target,
        Dialect::SqlServer,
        "AppDb",
        &PlannerOptions { use_29_phase: true, skip_backup: true, ..PlannerOptions::default() },
    )
    .unwrap();

    let fk_drop_phase = plan
        .phases
        .iter()
        .find(|p| p.operations.iter().any(|op| matches!(op.change.kind, ChangeKind::Drop) && matches!(op.change.object_type, ObjectType::Constraint)))
        .expect("an FK drop phase exists")
        .number;
    let table_drop_phase = plan
        .phases
        .iter()
        .find(|p| p.operations.iter().any(|op| matches!(op.change.kind, ChangeKind::Drop) && matches!(op.change.object_type, ObjectType::Table)))
        .expect("a table drop phase exists")
        .number;

    assert!(fk_drop_phase < table_drop_phase);
    assert_eq!(fk_drop_phase, 6);
    assert_eq!(table_drop_phase, 14);
    assert_eq!(plan.overall_risk_level, RiskLevel::Risky);
}

/// S5 — with no resolvable git metadata, tag expansion falls back to the
/// deterministic defaults, and the version derives from entity shape.
#[tokio::test]
async fn s5_tag_expansion_falls_back_to_deterministic_defaults() {
    // 12 entities, 137 total properties+relationships (matching spec.md's literal scenario).
    let mut entities = Vec::new();
    for i in 0..12 {
        let mut props: Vec<DiscoveredProperty> = (0..11).map(|j| prop(&format!("Field{j}"), "string", j == 0)).collect();
        if i == 11 {
            // top up so the total is exactly 137 (11 * 12 = 132, + 5 more on the last entity).
            for j in 0..5 {
                props.push(prop(&format!("Extra{j}"), "string", false));
            }
        }
        entities.push(entity(&format!("Entity{i}"), props));
    }
    let total: usize = entities.iter().map(|e| e.property_count() + e.relationship_count()).sum();
    assert_eq!(total, 137);

    let discoverer = FixedDiscoverer(entities);
    let introspector_schema = Schema::default();
    let introspector = FixedIntrospector(introspector_schema);
    let git = NoGitMetadata;
    let serializer = InMemorySerializer::new();

    let mut config = base_config(Dialect::Postgres);
    config.mode = OperationMode::Noop;
    config.ignore_export_attribute = true;

    let output = run_pipeline(
        &config,
        &discoverer,
        Some(&introspector),
        &git,
        &serializer,
        "20260730000000",
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(output.tags.generated, "main/unknown-repo/schema/1.2.37");
    assert_eq!(output.tags.docker_tag, "main-unknown-repo-schema-1.2.37");
}

/// S5b — fixed git metadata overrides the fallback and flows through the
/// tag template untouched.
#[tokio::test]
async fn s5b_resolved_git_metadata_is_used_when_available() {
    let discoverer = FixedDiscoverer(vec![user_entity()]);
    let introspector = FixedIntrospector(Schema::default());
    let git = FixedGitMetadata {
        branch: "release/2.0".to_string(),
        repo: "acme-app".to_string(),
        commit_hash: "abc1234".to_string(),
        commit_hash_full: "abc1234def5678".to_string(),
    };
    let serializer = InMemorySerializer::new();

    let mut config = base_config(Dialect::Postgres);
    config.mode = OperationMode::Noop;

    let output = run_pipeline(
        &config,
        &discoverer,
        Some(&introspector),
        &git,
        &serializer,
        "20260730000000",
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(output.tags.generated.starts_with("release/2.0/acme-app/schema/"));
}

/// S6 — simple 3-phase mode collapses all drops into phase 1 and all
/// creates/alters into phase 2.
#[tokio::test]
async fn s6_simple_mode_collapses_into_three_phases() {
    let x = entity("X", vec![prop("Id", "int64", true)]);
    let y = entity("Y", vec![prop("Id", "int64", true)]);

    let current = synth::synthesize(vec![y.clone()], &SynthesisConfig { dialect: Dialect::Postgres, ..SynthesisConfig::default() })
        .unwrap()
        .0;
    let target = synth::synthesize(vec![x], &SynthesisConfig { dialect: Dialect::Postgres, ..SynthesisConfig::default() })
        .unwrap()
        .0;

    let mut changes = differ::diff(&current, &target);
    risk::assess(&mut changes);
    assert_eq!(changes.len(), 2);

    let plan = schemist_planner::plan(
        changes,
        &current,
        &target,
        Dialect::Postgres,
        "AppDb",
        &PlannerOptions { use_29_phase: false, skip_backup: true, ..PlannerOptions::default() },
    )
    .unwrap();

    assert_eq!(plan.phases.len(), 3);
    assert!(plan.phases[0].operations.iter().all(|op| matches!(op.change.kind, ChangeKind::Drop)));
    assert!(plan.phases[1].operations.iter().all(|op| matches!(op.change.kind, ChangeKind::Create | ChangeKind::Alter)));
    assert_eq!(plan.phases[0].name, "Drop operations");
    assert_eq!(plan.phases[1].name, "Create and alter operations");
    assert_eq!(plan.phases[2].name, "Validation");
}
