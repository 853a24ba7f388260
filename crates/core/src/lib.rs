//! Wires entity discovery, target synthesis, live introspection,
//! diffing, risk assessment, phase planning, SQL emission, and tag
//! templating into a single pipeline. The stages themselves live in
//! their own crates; this crate owns configuration, the
//! external-collaborator contracts, and the orchestration that calls
//! them in order.

pub mod testing;

use async_trait::async_trait;
use schemist_dialect::Dialect;
use schemist_entity_model::DiscoveredEntity;
use schemist_introspect::{IntrospectError, Introspector};
use schemist_planner::{self as planner, DeploymentPlan, PlannerError, PlannerOptions};
use schemist_risk::{self as risk, RiskAssessment};
use schemist_schema_differ::{self as differ, SchemaChange};
use schemist_schema_model::Schema;
use schemist_schema_synth::{self as synth, SynthesisConfig, SynthesisError, SynthesisReport};
use schemist_tag_template::{self as tag, GitMetadata as GitFallback, TagContext, TagPatterns, TagTemplateError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    Noop,
    Validate,
    Execute,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub language: String,
    pub track_attribute: String,
    pub source_paths: Vec<PathBuf>,
    pub dialect: Dialect,
    pub server: String,
    pub database: String,
    pub port: Option<u16>,
    pub schema: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_string: Option<String>,
    pub secret_keys: Vec<String>,
    pub tag_template: String,
    pub mode: OperationMode,
    pub skip_backup: bool,
    pub enable_29_phase_deployment: bool,
    pub skip_warning_phases: bool,
    pub custom_phase_order: Option<Vec<u32>>,
    pub environment: String,
    pub vertical: String,
    pub ignore_export_attribute: bool,
    pub generate_fk_indexes: bool,
    pub cross_schema_refs_enabled: bool,
    pub allow_missing_fk_targets: bool,
    pub known_external_tables: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: String::new(),
            track_attribute: String::new(),
            source_paths: Vec::new(),
            dialect: Dialect::Postgres,
            server: String::new(),
            database: String::new(),
            port: None,
            schema: None,
            username: None,
            password: None,
            connection_string: None,
            secret_keys: Vec::new(),
            tag_template: "{branch}/{repo}/schema/{version}".to_string(),
            mode: OperationMode::Noop,
            skip_backup: false,
            enable_29_phase_deployment: true,
            skip_warning_phases: false,
            custom_phase_order: None,
            environment: "production".to_string(),
            vertical: String::new(),
            ignore_export_attribute: false,
            generate_fk_indexes: true,
            cross_schema_refs_enabled: false,
            allow_missing_fk_targets: false,
            known_external_tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation(pub String);

impl std::fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PipelineConfig {
    /// Accumulates every violation rather than stopping at the first,
    /// per the `InvalidConfiguration` propagation policy.
    pub fn validate(&self) -> Result<(), Vec<ConfigViolation>> {
        let mut violations = Vec::new();

        if self.language.trim().is_empty() {
            violations.push(ConfigViolation("language selector is required".to_string()));
        }
        if self.track_attribute.trim().is_empty() {
            violations.push(ConfigViolation("track attribute is required".to_string()));
        }
        if self.connection_string.is_none() && self.server.trim().is_empty() {
            violations.push(ConfigViolation(
                "either a connection string or a server must be provided".to_string(),
            ));
        }
        if self.connection_string.is_none() && self.database.trim().is_empty() {
            violations.push(ConfigViolation("database name is required".to_string()));
        }
        if let Err(err) = tag::validate(&self.tag_template) {
            violations.push(ConfigViolation(format!("tag template: {err}")));
        }
        if let Some(order) = &self.custom_phase_order {
            if order.is_empty() {
                violations.push(ConfigViolation("customPhaseOrder must not be empty if provided".to_string()));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[derive(Debug, Error)]
pub enum SecretResolutionError {
    #[error("failed to resolve secret `{key}`: {message}")]
    Failed { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("entity discovery failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to serialize pipeline artifacts: {0}")]
    Failed(String),
}

/// Resolves a secret-vault key (`ClientSecret`, `AccessKeyId`, a bare
/// `Token`, ...) to its plaintext value. Fatal on first failure per §7.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, key: &str) -> Result<String, SecretResolutionError>;
}

/// Scans `source_paths` for types carrying `track_attribute` and returns
/// them as [`DiscoveredEntity`] — the only language-specific boundary in
/// the pipeline.
#[async_trait]
pub trait EntityDiscoverer: Send + Sync {
    async fn discover(
        &self,
        source_paths: &[PathBuf],
        track_attribute: &str,
    ) -> Result<Vec<DiscoveredEntity>, DiscoveryError>;
}

/// Git metadata for tag expansion. Every method is non-fatal on failure
/// (network lookups are bounded by a short timeout upstream); `None`
/// means "fall back to [`GitFallback::fallback`]".
#[async_trait]
pub trait GitMetadataProvider: Send + Sync {
    async fn branch(&self) -> Option<String>;
    async fn repo(&self) -> Option<String>;
    async fn commit_hash(&self) -> Option<String>;
    async fn commit_hash_full(&self) -> Option<String>;
}

/// Writes the pipeline's final artifacts. File I/O itself is out of
/// scope for this crate; the CLI supplies a concrete implementation.
#[async_trait]
pub trait ArtifactSerializer: Send + Sync {
    async fn write(
        &self,
        analysis: &SchemaAnalysis,
        plan: &DeploymentPlan,
        report: &ValidationReport,
        sql: &str,
        tags: &TagPatterns,
    ) -> Result<(), SerializationError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaAnalysis {
    pub entities: Vec<DiscoveredEntity>,
    pub current: Schema,
    pub target: Schema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub changes: Vec<SchemaChange>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub risk: RiskAssessment,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub analysis: SchemaAnalysis,
    pub plan: DeploymentPlan,
    pub report: ValidationReport,
    pub sql: String,
    pub tags: TagPatterns,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    InvalidConfiguration(Vec<ConfigViolation>),
    #[error("database connection failed: {0}")]
    DatabaseConnection(#[from] IntrospectError),
    #[error("secret resolution failed: {0}")]
    SecretResolution(#[from] SecretResolutionError),
    #[error("entity discovery failed: {0}")]
    EntityDiscovery(#[from] DiscoveryError),
    #[error("entity synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("SQL generation failed: {0}")]
    SqlGeneration(String),
    #[error("tag template error: {0}")]
    TagTemplate(#[from] TagTemplateError),
    #[error("phase planning error: {0}")]
    Planning(#[from] PlannerError),
    #[error("artifact serialization failed: {0}")]
    Serialization(#[from] SerializationError),
    #[error("pipeline run was cancelled")]
    Cancelled,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    InvalidConfiguration = 1,
    LicenseFailure = 2,
    VaultFailure = 3,
    DatabaseConnectionFailure = 4,
    EntityDiscoveryFailure = 5,
    SchemaValidationFailure = 6,
}

impl From<&PipelineError> for ExitCode {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::InvalidConfiguration(_) => ExitCode::InvalidConfiguration,
            PipelineError::SecretResolution(_) => ExitCode::VaultFailure,
            PipelineError::DatabaseConnection(_) => ExitCode::DatabaseConnectionFailure,
            PipelineError::EntityDiscovery(_) => ExitCode::EntityDiscoveryFailure,
            PipelineError::Synthesis(_) => ExitCode::SchemaValidationFailure,
            PipelineError::SqlGeneration(_)
            | PipelineError::TagTemplate(_)
            | PipelineError::Planning(_)
            | PipelineError::Serialization(_)
            | PipelineError::Cancelled => ExitCode::SchemaValidationFailure,
        }
    }
}

/// Runs the full pipeline: discover entities, synthesize the target
/// schema, introspect the current one (skipped when no introspector is
/// given), diff, assess risk, plan phases, emit SQL, expand tags, then
/// hand the result to `serializer` (only in non-`noop` modes). Any stage
/// returning an error short-circuits the rest via `?` and `serializer`
/// is never called for that run.
pub async fn run_pipeline(
    config: &PipelineConfig,
    discoverer: &dyn EntityDiscoverer,
    introspector: Option<&dyn Introspector>,
    git: &dyn GitMetadataProvider,
    serializer: &dyn ArtifactSerializer,
    build_timestamp_utc: &str,
    cancel: CancellationToken,
) -> Result<PipelineOutput, PipelineError> {
    config.validate().map_err(PipelineError::InvalidConfiguration)?;

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let entities = discoverer.discover(&config.source_paths, &config.track_attribute).await?;
    if entities.is_empty() && !config.ignore_export_attribute {
        return Err(PipelineError::EntityDiscovery(DiscoveryError::Failed(
            "no entities carry the track attribute".to_string(),
        )));
    }
    info!(entity_count = entities.len(), "entity discovery complete");

    let synth_config = SynthesisConfig {
        dialect: config.dialect,
        generate_fk_indexes: config.generate_fk_indexes,
        cross_schema_refs_enabled: config.cross_schema_refs_enabled,
        allow_missing_fk_targets: config.allow_missing_fk_targets,
        ignore_export_attribute: config.ignore_export_attribute,
        known_external_tables: config.known_external_tables.clone(),
    };
    let (target, SynthesisReport { warnings: synth_warnings }) =
        synth::synthesize(entities.clone(), &synth_config)?;

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let current = match introspector {
        Some(introspector) => introspector.introspect(cancel.clone()).await?,
        None => Schema::default(),
    };

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let mut changes = differ::diff(&current, &target);
    let assessment = risk::assess(&mut changes);

    let planner_options = PlannerOptions {
        use_29_phase: config.enable_29_phase_deployment,
        skip_backup: config.skip_backup,
        skip_warning_phases: config.skip_warning_phases,
        custom_phase_order: config.custom_phase_order.clone(),
    };
    let plan = planner::plan(changes.clone(), &current, &target, config.dialect, &config.database, &planner_options)?;

    let sql = compile_sql(&plan);

    let git_branch = git.branch().await;
    let git_repo = git.repo().await;
    let git_commit = git.commit_hash().await;
    let git_commit_full = git.commit_hash_full().await;
    let fallback = GitFallback::fallback(build_timestamp_utc);
    let git_metadata = GitFallback {
        branch: git_branch.unwrap_or(fallback.branch),
        repo: git_repo.unwrap_or(fallback.repo),
        commit_hash: git_commit.unwrap_or(fallback.commit_hash),
        commit_hash_full: git_commit_full.unwrap_or(fallback.commit_hash_full),
        build_number: fallback.build_number,
        user: fallback.user,
    };

    let total_properties_and_relationships: usize =
        entities.iter().map(|e| e.property_count() + e.relationship_count()).sum();
    let version = tag::generate_version(entities.len(), total_properties_and_relationships);

    let date = build_timestamp_utc.get(..10).unwrap_or(build_timestamp_utc).to_string();
    let tag_ctx = TagContext {
        git: git_metadata,
        version,
        date,
        datetime: build_timestamp_utc.to_string(),
        database: config.database.clone(),
        environment: config.environment.clone(),
        vertical: config.vertical.clone(),
    };
    let tags = tag::generate_patterns(&config.tag_template, &tag_ctx)?;

    let report = ValidationReport { changes, errors: Vec::new(), warnings: synth_warnings, risk: assessment };

    let analysis = SchemaAnalysis { entities, current, target };

    if !matches!(config.mode, OperationMode::Noop) {
        serializer.write(&analysis, &plan, &report, &sql, &tags).await?;
    }

    Ok(PipelineOutput { analysis, plan, report, sql, tags })
}

/// Renders the plan's statements in phase order with `-- Phase n: <name>`
/// banners, per the Compiled Deployment SQL output contract.
fn compile_sql(plan: &DeploymentPlan) -> String {
    let mut out = String::new();
    for phase in &plan.phases {
        out.push_str(&format!("-- Phase {}: {}\n", phase.number, phase.name));
        for op in &phase.operations {
            out.push_str(&op.sql_command);
            out.push('\n');
        }
    }
    out
}

