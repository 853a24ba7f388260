//! Shells out to the `git` binary for branch, remote, and commit
//! metadata. Every lookup is bounded by a short timeout and treated as
//! non-fatal on failure — callers fall back to
//! [`GitMetadata::fallback`](schemist_tag_template::GitMetadata::fallback).

use async_trait::async_trait;
use schemist_core::GitMetadataProvider;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

const GIT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct ProcessGitMetadataProvider {
    pub repo_root: PathBuf,
}

impl ProcessGitMetadataProvider {
    async fn run(&self, args: &[&str]) -> Option<String> {
        let mut command = Command::new("git");
        command.current_dir(&self.repo_root).args(args);
        let output = match tokio::time::timeout(GIT_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                warn!(args = ?args, status = ?output.status, "git command exited non-zero");
                return None;
            }
            Ok(Err(err)) => {
                warn!(args = ?args, error = %err, "failed to spawn git");
                return None;
            }
            Err(_) => {
                warn!(args = ?args, timeout_secs = GIT_TIMEOUT.as_secs(), "git command timed out");
                return None;
            }
        };
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn repo_name_from_remote(remote: &str) -> String {
        remote
            .trim_end_matches(".git")
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(remote)
            .to_string()
    }
}

#[async_trait]
impl GitMetadataProvider for ProcessGitMetadataProvider {
    async fn branch(&self) -> Option<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn repo(&self) -> Option<String> {
        let remote = self.run(&["config", "--get", "remote.origin.url"]).await?;
        Some(Self::repo_name_from_remote(&remote))
    }

    async fn commit_hash(&self) -> Option<String> {
        self.run(&["rev-parse", "--short", "HEAD"]).await
    }

    async fn commit_hash_full(&self) -> Option<String> {
        self.run(&["rev-parse", "HEAD"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_strips_suffix_and_path() {
        assert_eq!(
            ProcessGitMetadataProvider::repo_name_from_remote("git@github.com:acme/widgets.git"),
            "widgets"
        );
        assert_eq!(
            ProcessGitMetadataProvider::repo_name_from_remote("https://github.com/acme/widgets.git"),
            "widgets"
        );
    }
}
