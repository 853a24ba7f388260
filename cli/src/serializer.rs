//! Writes the pipeline's artifacts to a directory as JSON plus a single
//! compiled SQL file. File I/O is out of scope for `schemist-core`
//! itself; this is the binary's own concrete [`ArtifactSerializer`].

use async_trait::async_trait;
use schemist_core::{ArtifactSerializer, SchemaAnalysis, SerializationError, ValidationReport};
use schemist_planner::DeploymentPlan;
use schemist_tag_template::TagPatterns;
use std::path::PathBuf;

pub struct FileSerializer {
    pub output_dir: PathBuf,
}

impl FileSerializer {
    fn write_json<T: serde::Serialize>(&self, file_name: &str, value: &T) -> Result<(), SerializationError> {
        let path = self.output_dir.join(file_name);
        let body = serde_json::to_string_pretty(value)
            .map_err(|e| SerializationError::Failed(format!("{file_name}: {e}")))?;
        std::fs::write(&path, body)
            .map_err(|e| SerializationError::Failed(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl ArtifactSerializer for FileSerializer {
    async fn write(
        &self,
        analysis: &SchemaAnalysis,
        plan: &DeploymentPlan,
        report: &ValidationReport,
        sql: &str,
        tags: &TagPatterns,
    ) -> Result<(), SerializationError> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| SerializationError::Failed(format!("{}: {e}", self.output_dir.display())))?;

        self.write_json("analysis.json", analysis)?;
        self.write_json("plan.json", plan)?;
        self.write_json("report.json", report)?;
        self.write_json("tags.json", tags)?;

        let sql_path = self.output_dir.join("migration.sql");
        std::fs::write(&sql_path, sql)
            .map_err(|e| SerializationError::Failed(format!("{}: {e}", sql_path.display())))?;

        Ok(())
    }
}
