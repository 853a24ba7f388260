//! In-memory test doubles for the external-collaborator contracts.
//!
//! Source discovery, secret resolution, git metadata, and artifact
//! serialization are all out of scope for the core per spec.md §1 — they
//! are modeled as traits so the pipeline can be exercised end to end
//! without a real parser, vault, git binary, or filesystem. These doubles
//! back [`run_pipeline`](crate::run_pipeline) in this crate's own
//! integration tests; downstream embedders (the CLI, future callers) are
//! free to reuse them for their own tests rather than reimplementing.

use crate::{ArtifactSerializer, DiscoveryError, EntityDiscoverer, GitMetadataProvider, SchemaAnalysis, SecretResolutionError, SecretResolver, SerializationError, ValidationReport};
use async_trait::async_trait;
use schemist_entity_model::DiscoveredEntity;
use schemist_introspect::{IntrospectError, Introspector};
use schemist_planner::DeploymentPlan;
use schemist_schema_model::Schema;
use schemist_tag_template::TagPatterns;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Hands back a fixed `Schema` as the "current" state, standing in for a
/// live database connection.
pub struct FixedIntrospector(pub Schema);

#[async_trait]
impl Introspector for FixedIntrospector {
    async fn introspect(&self, cancel: CancellationToken) -> Result<Schema, IntrospectError> {
        if cancel.is_cancelled() {
            return Err(IntrospectError::Cancelled);
        }
        Ok(self.0.clone())
    }
}

/// Hands back a fixed list of entities regardless of `source_paths`.
pub struct FixedDiscoverer(pub Vec<DiscoveredEntity>);

#[async_trait]
impl EntityDiscoverer for FixedDiscoverer {
    async fn discover(
        &self,
        _source_paths: &[PathBuf],
        _track_attribute: &str,
    ) -> Result<Vec<DiscoveredEntity>, DiscoveryError> {
        Ok(self.0.clone())
    }
}

/// Always reports "no entities found" — exercises the `EntityDiscovery`
/// fatal path.
pub struct EmptyDiscoverer;

#[async_trait]
impl EntityDiscoverer for EmptyDiscoverer {
    async fn discover(
        &self,
        _source_paths: &[PathBuf],
        _track_attribute: &str,
    ) -> Result<Vec<DiscoveredEntity>, DiscoveryError> {
        Ok(Vec::new())
    }
}

/// Never resolves any git metadata, forcing every tag token onto the
/// deterministic fallback defaults (spec.md §4.10).
pub struct NoGitMetadata;

#[async_trait]
impl GitMetadataProvider for NoGitMetadata {
    async fn branch(&self) -> Option<String> {
        None
    }
    async fn repo(&self) -> Option<String> {
        None
    }
    async fn commit_hash(&self) -> Option<String> {
        None
    }
    async fn commit_hash_full(&self) -> Option<String> {
        None
    }
}

/// Reports fixed git metadata, for tests exercising the non-fallback path.
pub struct FixedGitMetadata {
    pub branch: String,
    pub repo: String,
    pub commit_hash: String,
    pub commit_hash_full: String,
}

#[async_trait]
impl GitMetadataProvider for FixedGitMetadata {
    async fn branch(&self) -> Option<String> {
        Some(self.branch.clone())
    }
    async fn repo(&self) -> Option<String> {
        Some(self.repo.clone())
    }
    async fn commit_hash(&self) -> Option<String> {
        Some(self.commit_hash.clone())
    }
    async fn commit_hash_full(&self) -> Option<String> {
        Some(self.commit_hash_full.clone())
    }
}

/// Resolves every requested key to a constant string. Never fails.
pub struct StaticSecretResolver(pub String);

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, _key: &str) -> Result<String, SecretResolutionError> {
        Ok(self.0.clone())
    }
}

/// Fails every resolution — exercises the `SecretResolution` fatal path.
pub struct FailingSecretResolver;

#[async_trait]
impl SecretResolver for FailingSecretResolver {
    async fn resolve(&self, key: &str) -> Result<String, SecretResolutionError> {
        Err(SecretResolutionError::Failed { key: key.to_string(), message: "vault unreachable".to_string() })
    }
}

/// Captures every run's artifacts in memory instead of writing files, so
/// tests can assert on what would have been serialized.
#[derive(Default)]
pub struct InMemorySerializer {
    pub last_sql: Mutex<Option<String>>,
    pub last_tags: Mutex<Option<TagPatterns>>,
    pub call_count: Mutex<u32>,
}

impl InMemorySerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl ArtifactSerializer for InMemorySerializer {
    async fn write(
        &self,
        _analysis: &SchemaAnalysis,
        _plan: &DeploymentPlan,
        _report: &ValidationReport,
        sql: &str,
        tags: &TagPatterns,
    ) -> Result<(), SerializationError> {
        *self.last_sql.lock().unwrap() = Some(sql.to_string());
        *self.last_tags.lock().unwrap() = Some(tags.clone());
        *self.call_count.lock().unwrap() += 1;
        Ok(())
    }
}

/// Discards every artifact. Used when a test only cares that the pipeline
/// completed, not what would have been written.
pub struct NoopSerializer;

#[async_trait]
impl ArtifactSerializer for NoopSerializer {
    async fn write(
        &self,
        _analysis: &SchemaAnalysis,
        _plan: &DeploymentPlan,
        _report: &ValidationReport,
        _sql: &str,
        _tags: &TagPatterns,
    ) -> Result<(), SerializationError> {
        Ok(())
    }
}
