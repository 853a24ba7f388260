//! The only language-specific boundary in the pipeline — scanning
//! source files for a track attribute — has no single idiomatic answer
//! across C#, Java, TypeScript, and so on, so this binary does not ship
//! a parser. Instead it reads entities already expressed as
//! [`DiscoveredEntity`] JSON, which is what a per-language companion
//! tool (or a hand-written fixture, in tests) is expected to produce.

use async_trait::async_trait;
use schemist_core::DiscoveryError;
use schemist_entity_model::DiscoveredEntity;
use std::path::{Path, PathBuf};

/// Reads a JSON array of [`DiscoveredEntity`] from a single file.
///
/// `source_paths` passed to [`discover`](schemist_core::EntityDiscoverer::discover)
/// is ignored beyond its first element; the track attribute is informational
/// only, since filtering already happened upstream of this file.
pub struct JsonFileDiscoverer {
    pub entities_file: PathBuf,
}

#[async_trait]
impl schemist_core::EntityDiscoverer for JsonFileDiscoverer {
    async fn discover(
        &self,
        _source_paths: &[PathBuf],
        _track_attribute: &str,
    ) -> Result<Vec<DiscoveredEntity>, DiscoveryError> {
        read_entities(&self.entities_file).map_err(|e| DiscoveryError::Failed(e.to_string()))
    }
}

fn read_entities(path: &Path) -> anyhow::Result<Vec<DiscoveredEntity>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read entities file {}: {e}", path.display()))?;
    let entities: Vec<DiscoveredEntity> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse entities file {}: {e}", path.display()))?;
    Ok(entities)
}
