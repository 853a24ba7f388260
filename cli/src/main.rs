//! Command-line front end for the Schemist pipeline: discover entities
//! from a JSON fixture, synthesize the target schema, optionally
//! introspect a live database, diff, assess risk, plan phases, emit
//! SQL, and expand deployment tags.

mod discovery;
mod git;
mod secrets;
mod serializer;

use chrono::Utc;
use discovery::JsonFileDiscoverer;
use git::ProcessGitMetadataProvider;
use schemist_core::{run_pipeline, ExitCode, GitMetadataProvider, OperationMode, PipelineConfig, SecretResolver};
use schemist_dialect::Dialect;
use schemist_introspect::{ConnectionConfig, Introspector};
use secrets::EnvSecretResolver;
use serializer::FileSerializer;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, StructOpt)]
struct DiscoveryArgs {
    /// Path to a JSON array of DiscoveredEntity records, standing in
    /// for a language-specific scan of the track attribute.
    #[structopt(long, parse(from_os_str))]
    entities_file: PathBuf,
    #[structopt(long, default_value = "csharp")]
    language: String,
    #[structopt(long, default_value = "TrackSchema")]
    track_attribute: String,
    /// Treat an empty entities file as "nothing to do" instead of fatal.
    #[structopt(long)]
    ignore_export_attribute: bool,
}

#[derive(Debug, StructOpt)]
struct ConnectionArgs {
    #[structopt(long, parse(try_from_str = parse_dialect), default_value = "postgres")]
    dialect: Dialect,
    #[structopt(long, default_value = "")]
    server: String,
    #[structopt(long, default_value = "")]
    database: String,
    #[structopt(long)]
    port: Option<u16>,
    #[structopt(long)]
    schema: Option<String>,
    #[structopt(long)]
    username: Option<String>,
    #[structopt(long)]
    password: Option<String>,
    /// Resolve the password from `SCHEMIST_SECRET_<KEY>` instead of `--password`.
    #[structopt(long = "password-secret-key")]
    password_secret_key: Option<String>,
    #[structopt(long)]
    connection_string: Option<String>,
    /// Skip introspecting a live database; diff against an empty schema.
    #[structopt(long)]
    no_introspect: bool,
}

#[derive(Debug, StructOpt)]
struct PlanningArgs {
    #[structopt(long)]
    simple_phases: bool,
    #[structopt(long)]
    skip_backup: bool,
    #[structopt(long)]
    skip_warning_phases: bool,
    #[structopt(long, use_delimiter = true)]
    custom_phase_order: Option<Vec<u32>>,
    #[structopt(long)]
    no_fk_indexes: bool,
    #[structopt(long)]
    cross_schema_refs_enabled: bool,
    #[structopt(long)]
    allow_missing_fk_targets: bool,
    #[structopt(long, use_delimiter = true)]
    known_external_tables: Vec<String>,
}

#[derive(Debug, StructOpt)]
struct TagArgs {
    #[structopt(long, default_value = "{branch}/{repo}/schema/{version}")]
    tag_template: String,
    #[structopt(long, default_value = "production")]
    environment: String,
    #[structopt(long, default_value = "")]
    vertical: String,
    #[structopt(long, parse(from_os_str), default_value = ".")]
    repo_root: PathBuf,
}

#[derive(Debug, StructOpt)]
struct PlanOpt {
    #[structopt(flatten)]
    discovery: DiscoveryArgs,
    #[structopt(flatten)]
    connection: ConnectionArgs,
    #[structopt(flatten)]
    planning: PlanningArgs,
    #[structopt(flatten)]
    tag: TagArgs,
}

#[derive(Debug, StructOpt)]
struct MigrateOpt {
    #[structopt(flatten)]
    discovery: DiscoveryArgs,
    #[structopt(flatten)]
    connection: ConnectionArgs,
    #[structopt(flatten)]
    planning: PlanningArgs,
    #[structopt(flatten)]
    tag: TagArgs,
    /// Directory the compiled SQL and JSON artifacts are written to.
    #[structopt(long, parse(from_os_str), default_value = "./schemist-out")]
    output_dir: PathBuf,
}

#[derive(Debug, StructOpt)]
struct TagOpt {
    #[structopt(flatten)]
    discovery: DiscoveryArgs,
    #[structopt(flatten)]
    tag: TagArgs,
}

#[derive(Debug, StructOpt)]
#[structopt(name = "schemist", about = "Schema migration generator and deployment planner")]
enum Command {
    /// Run the pipeline in dry-run mode and print the plan and risk summary.
    Plan(PlanOpt),
    /// Run the pipeline for real and write compiled SQL and artifacts to disk.
    Migrate(MigrateOpt),
    /// Expand a tag template against discovered entity counts.
    Tag(TagOpt),
}

fn parse_dialect(s: &str) -> Result<Dialect, String> {
    Dialect::parse(s).ok_or_else(|| format!("unknown dialect `{s}` (expected one of: sqlserver, postgres, mysql, oracle, sqlite)"))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn build_introspector(dialect: Dialect, conn: ConnectionConfig) -> anyhow::Result<Box<dyn Introspector>> {
    match dialect {
        #[cfg(feature = "postgresql")]
        Dialect::Postgres => Ok(Box::new(schemist_introspect::postgres::PostgresIntrospector::new(conn))),
        #[cfg(not(feature = "postgresql"))]
        Dialect::Postgres => anyhow::bail!("postgresql support was not compiled into this binary (enable the `postgresql` feature)"),

        #[cfg(feature = "mysql")]
        Dialect::MySql => Ok(Box::new(schemist_introspect::mysql::MySqlIntrospector::new(conn))),
        #[cfg(not(feature = "mysql"))]
        Dialect::MySql => anyhow::bail!("mysql support was not compiled into this binary (enable the `mysql` feature)"),

        #[cfg(feature = "mssql")]
        Dialect::SqlServer => Ok(Box::new(schemist_introspect::mssql::SqlServerIntrospector::new(conn))),
        #[cfg(not(feature = "mssql"))]
        Dialect::SqlServer => anyhow::bail!("sql server support was not compiled into this binary (enable the `mssql` feature)"),

        #[cfg(feature = "sqlite")]
        Dialect::Sqlite => Ok(Box::new(schemist_introspect::sqlite::SqliteIntrospector::new(conn))),
        #[cfg(not(feature = "sqlite"))]
        Dialect::Sqlite => anyhow::bail!("sqlite support was not compiled into this binary (enable the `sqlite` feature)"),

        #[cfg(feature = "oracle-native")]
        Dialect::Oracle => Ok(Box::new(schemist_introspect::oracle_native::OracleIntrospector::new(conn))),
        #[cfg(not(feature = "oracle-native"))]
        Dialect::Oracle => anyhow::bail!("oracle support was not compiled into this binary (enable the `oracle-native` feature)"),
    }
}

async fn resolve_password(connection: &ConnectionArgs) -> anyhow::Result<Option<String>> {
    match &connection.password_secret_key {
        Some(key) => {
            let resolver = EnvSecretResolver { prefix: "SCHEMIST_SECRET_".to_string() };
            let value = resolver.resolve(key).await.map_err(|e| anyhow::anyhow!(e))?;
            Ok(Some(value))
        }
        None => Ok(connection.password.clone()),
    }
}

fn base_config(discovery: &DiscoveryArgs, connection: &ConnectionArgs, planning: &PlanningArgs, tag: &TagArgs, password: Option<String>) -> PipelineConfig {
    PipelineConfig {
        language: discovery.language.clone(),
        track_attribute: discovery.track_attribute.clone(),
        source_paths: vec![discovery.entities_file.clone()],
        dialect: connection.dialect,
        server: connection.server.clone(),
        database: connection.database.clone(),
        port: connection.port,
        schema: connection.schema.clone(),
        username: connection.username.clone(),
        password,
        connection_string: connection.connection_string.clone(),
        secret_keys: connection.password_secret_key.clone().into_iter().collect(),
        tag_template: tag.tag_template.clone(),
        mode: OperationMode::Noop,
        skip_backup: planning.skip_backup,
        enable_29_phase_deployment: !planning.simple_phases,
        skip_warning_phases: planning.skip_warning_phases,
        custom_phase_order: planning.custom_phase_order.clone(),
        environment: tag.environment.clone(),
        vertical: tag.vertical.clone(),
        ignore_export_attribute: discovery.ignore_export_attribute,
        generate_fk_indexes: !planning.no_fk_indexes,
        cross_schema_refs_enabled: planning.cross_schema_refs_enabled,
        allow_missing_fk_targets: planning.allow_missing_fk_targets,
        known_external_tables: planning.known_external_tables.clone(),
    }
}

fn exit_with(err: &schemist_core::PipelineError) -> ! {
    eprintln!("error: {err}");
    process::exit(ExitCode::from(err) as i32);
}

#[tokio::main]
async fn main() {
    init_tracing();

    let command = Command::from_args();
    let result = match command {
        Command::Plan(opt) => run_plan(opt).await,
        Command::Migrate(opt) => run_migrate(opt).await,
        Command::Tag(opt) => run_tag(opt).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

async fn run_plan(opt: PlanOpt) -> anyhow::Result<()> {
    let password = resolve_password(&opt.connection).await?;
    let mut config = base_config(&opt.discovery, &opt.connection, &opt.planning, &opt.tag, password.clone());
    config.mode = OperationMode::Validate;

    let discoverer = JsonFileDiscoverer { entities_file: opt.discovery.entities_file.clone() };
    let git = ProcessGitMetadataProvider { repo_root: opt.tag.repo_root.clone() };
    let serializer = schemist_core::testing::NoopSerializer;
    let build_timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let introspector = if opt.connection.no_introspect {
        None
    } else {
        let conn = connection_config(&opt.connection, password.clone());
        Some(build_introspector(opt.connection.dialect, conn)?)
    };

    let output = run_pipeline(
        &config,
        &discoverer,
        introspector.as_deref(),
        &git,
        &serializer,
        &build_timestamp,
        CancellationToken::new(),
    )
    .await;

    match output {
        Ok(output) => {
            let summary = serde_json::json!({
                "plan": output.plan,
                "risk": output.report.risk,
                "changeCount": output.report.changes.len(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(err) => exit_with(&err),
    }
}

async fn run_migrate(opt: MigrateOpt) -> anyhow::Result<()> {
    let password = resolve_password(&opt.connection).await?;
    let mut config = base_config(&opt.discovery, &opt.connection, &opt.planning, &opt.tag, password.clone());
    config.mode = OperationMode::Execute;

    let discoverer = JsonFileDiscoverer { entities_file: opt.discovery.entities_file.clone() };
    let git = ProcessGitMetadataProvider { repo_root: opt.tag.repo_root.clone() };
    let serializer = FileSerializer { output_dir: opt.output_dir.clone() };
    let build_timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let introspector = if opt.connection.no_introspect {
        None
    } else {
        let conn = connection_config(&opt.connection, password);
        Some(build_introspector(opt.connection.dialect, conn)?)
    };

    let output = run_pipeline(
        &config,
        &discoverer,
        introspector.as_deref(),
        &git,
        &serializer,
        &build_timestamp,
        CancellationToken::new(),
    )
    .await;

    match output {
        Ok(output) => {
            println!("wrote {} change(s) across {} phase(s) to {}", output.report.changes.len(), output.plan.phases.len(), opt.output_dir.display());
            Ok(())
        }
        Err(err) => exit_with(&err),
    }
}

async fn run_tag(opt: TagOpt) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&opt.discovery.entities_file)?;
    let entities: Vec<schemist_entity_model::DiscoveredEntity> = serde_json::from_str(&raw)?;
    let total_properties_and_relationships: usize =
        entities.iter().map(|e| e.property_count() + e.relationship_count()).sum();
    let version = schemist_tag_template::generate_version(entities.len(), total_properties_and_relationships);

    let git = ProcessGitMetadataProvider { repo_root: opt.tag.repo_root.clone() };
    let build_timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let fallback = schemist_tag_template::GitMetadata::fallback(&build_timestamp);
    let git_metadata = schemist_tag_template::GitMetadata {
        branch: git.branch().await.unwrap_or(fallback.branch),
        repo: git.repo().await.unwrap_or(fallback.repo),
        commit_hash: git.commit_hash().await.unwrap_or(fallback.commit_hash),
        commit_hash_full: git.commit_hash_full().await.unwrap_or(fallback.commit_hash_full),
        build_number: fallback.build_number,
        user: fallback.user,
    };

    let ctx = schemist_tag_template::TagContext {
        git: git_metadata,
        version,
        date: build_timestamp.get(..10).unwrap_or(&build_timestamp).to_string(),
        datetime: build_timestamp.clone(),
        database: String::new(),
        environment: opt.tag.environment.clone(),
        vertical: opt.tag.vertical.clone(),
    };
    let patterns = schemist_tag_template::generate_patterns(&opt.tag.tag_template, &ctx)?;
    println!("{}", serde_json::to_string_pretty(&patterns)?);
    Ok(())
}

fn connection_config(connection: &ConnectionArgs, password: Option<String>) -> ConnectionConfig {
    ConnectionConfig {
        dialect: connection.dialect,
        server: connection.server.clone(),
        database: connection.database.clone(),
        port: connection.port,
        schema: connection.schema.clone(),
        username: connection.username.clone(),
        password,
        connection_string: connection.connection_string.clone(),
        ..ConnectionConfig::default()
    }
}
