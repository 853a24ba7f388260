//! Deployment-tag template parsing, token expansion, version generation,
//! and per-destination sanitization.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const SUPPORTED_TOKENS: &[&str] = &[
    "branch",
    "repo",
    "version",
    "major",
    "minor",
    "patch",
    "date",
    "datetime",
    "commit-hash",
    "commit-hash-full",
    "build-number",
    "user",
    "database",
    "environment",
    "vertical",
];

#[derive(Debug, Error)]
pub enum TagTemplateError {
    #[error("unbalanced braces in tag template `{0}`")]
    UnbalancedBraces(String),
    #[error("nested `{{` before a closing `}}` in tag template `{0}`")]
    NestedBraces(String),
    #[error("unknown token `{{{0}}}` in tag template")]
    UnknownToken(String),
}

/// Fills in for unresolvable git metadata (no repo, no network, timeout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitMetadata {
    pub branch: String,
    pub repo: String,
    pub commit_hash: String,
    pub commit_hash_full: String,
    pub build_number: String,
    pub user: String,
}

impl GitMetadata {
    pub fn fallback(build_timestamp_utc: &str) -> Self {
        Self {
            branch: "main".to_string(),
            repo: "unknown-repo".to_string(),
            commit_hash: "unknown".to_string(),
            commit_hash_full: "unknown".to_string(),
            build_number: build_timestamp_utc.to_string(),
            user: "system".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionNumber {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Deterministic version derivation from entity shape: `major` is always
/// 1; `minor` steps with entity count; `patch` wraps the combined
/// property+relationship count into 0..99.
pub fn generate_version(entity_count: usize, properties_plus_relationships: usize) -> VersionNumber {
    let minor = match entity_count {
        0 => 0,
        1..=5 => 1,
        6..=15 => 2,
        16..=30 => 3,
        n => std::cmp::min(n / 10, 9) as u32,
    };
    VersionNumber {
        major: 1,
        minor,
        patch: std::cmp::min(properties_plus_relationships % 100, 99) as u32,
    }
}

#[derive(Debug, Clone)]
pub struct TagContext {
    pub git: GitMetadata,
    pub version: VersionNumber,
    pub date: String,
    pub datetime: String,
    pub database: String,
    pub environment: String,
    pub vertical: String,
}

fn token_value(ctx: &TagContext, token: &str) -> Option<String> {
    match token.to_ascii_lowercase().as_str() {
        "branch" => Some(ctx.git.branch.clone()),
        "repo" => Some(ctx.git.repo.clone()),
        "version" => Some(ctx.version.to_string()),
        "major" => Some(ctx.version.major.to_string()),
        "minor" => Some(ctx.version.minor.to_string()),
        "patch" => Some(ctx.version.patch.to_string()),
        "date" => Some(ctx.date.clone()),
        "datetime" => Some(ctx.datetime.clone()),
        "commit-hash" => Some(ctx.git.commit_hash.clone()),
        "commit-hash-full" => Some(ctx.git.commit_hash_full.clone()),
        "build-number" => Some(ctx.git.build_number.clone()),
        "user" => Some(ctx.git.user.clone()),
        "database" => Some(ctx.database.clone()),
        "environment" => Some(ctx.environment.clone()),
        "vertical" => Some(ctx.vertical.clone()),
        _ => None,
    }
}

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]*)\}").unwrap());

/// Balanced braces, no nested `{`, every `{...}` names a supported token.
pub fn validate(template: &str) -> Result<(), TagTemplateError> {
    let mut depth = 0;
    for ch in template.chars() {
        match ch {
            '{' => {
                if depth > 0 {
                    return Err(TagTemplateError::NestedBraces(template.to_string()));
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return Err(TagTemplateError::UnbalancedBraces(template.to_string()));
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(TagTemplateError::UnbalancedBraces(template.to_string()));
    }

    for capture in TOKEN_RE.captures_iter(template) {
        let token = &capture[1];
        if !SUPPORTED_TOKENS.iter().any(|t| t.eq_ignore_ascii_case(token)) {
            return Err(TagTemplateError::UnknownToken(token.to_string()));
        }
    }
    Ok(())
}

/// Expand every `{token}` placeholder against `ctx`. Pure: identical
/// `template`/`ctx` always produce byte-identical output.
pub fn expand(template: &str, ctx: &TagContext) -> Result<String, TagTemplateError> {
    validate(template)?;
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for capture in TOKEN_RE.captures_iter(template) {
        let m = capture.get(0).unwrap();
        out.push_str(&template[last..m.start()]);
        let token = &capture[1];
        let value = token_value(ctx, token).ok_or_else(|| TagTemplateError::UnknownToken(token.to_string()))?;
        out.push_str(&value);
        last = m.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagPatterns {
    pub generated: String,
    pub docker_tag: String,
    pub helm_chart_version: String,
    pub kubernetes_label: String,
    pub file_safe: String,
    pub azure_resource_name: String,
}

/// Expand `template` and produce every destination variant in one pass.
pub fn generate_patterns(template: &str, ctx: &TagContext) -> Result<TagPatterns, TagTemplateError> {
    let generated = expand(template, ctx)?;
    Ok(TagPatterns {
        docker_tag: sanitize_docker(&generated),
        helm_chart_version: sanitize_helm(&generated),
        kubernetes_label: sanitize_kubernetes_label(&generated),
        file_safe: sanitize_filename(&generated),
        azure_resource_name: sanitize_azure_resource(&generated),
        generated: sanitize_git(&generated),
    })
}

/// git-ref-safe tag: strip `~^:?*[]\`, collapse `..`, trim leading `.`/`-`,
/// cap at 250 characters.
pub fn sanitize_git(tag: &str) -> String {
    let mut s: String = tag.chars().filter(|c| !"~^:?*[]\\".contains(*c) && !c.is_whitespace()).collect();
    while s.contains("..") {
        s = s.replace("..", ".");
    }
    let trimmed = s.trim_start_matches(['.', '-']).to_string();
    trimmed.chars().take(250).collect()
}

/// Docker tags allow `[a-z0-9_.-]`; everything else (notably path
/// separators from `{repo}`/`{branch}`) becomes a hyphen. Dots are kept
/// so a `{version}` token renders as `1.2.37`, not `1-2-37`.
pub fn sanitize_docker(tag: &str) -> String {
    let lowered = tag.to_ascii_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_hyphen = false;
    for ch in lowered.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
            out.push(ch);
            last_was_hyphen = ch == '-';
        } else if !last_was_hyphen {
            out.push('-');
            last_was_hyphen = true;
        }
    }
    out.trim_matches('-').to_string()
}

static SEMVER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+\.\d+").unwrap());

pub fn sanitize_helm(tag: &str) -> String {
    SEMVER_RE.find(tag).map(|m| m.as_str().to_string()).unwrap_or_else(|| "1.0.0".to_string())
}

pub fn sanitize_kubernetes_label(tag: &str) -> String {
    let mut out: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect();
    out = out.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_string();
    out.chars().take(63).collect()
}

pub fn sanitize_filename(tag: &str) -> String {
    tag.chars()
        .map(|c| if "/\\:*?\"<>|".contains(c) { '_' } else { c })
        .collect()
}

pub fn sanitize_azure_resource(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    let mut last_was_hyphen = false;
    for ch in tag.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            out.push('-');
            last_was_hyphen = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(git: GitMetadata, version: VersionNumber) -> TagContext {
        TagContext {
            git,
            version,
            date: "2026-07-30".to_string(),
            datetime: "2026-07-30T00:00:00Z".to_string(),
            database: "AppDb".to_string(),
            environment: "prod".to_string(),
            vertical: "retail".to_string(),
        }
    }

    #[test]
    fn version_generation_matches_entity_and_property_counts() {
        let v = generate_version(12, 137);
        assert_eq!(v.to_string(), "1.2.37");
    }

    #[test]
    fn version_minor_buckets_are_staircased() {
        assert_eq!(generate_version(0, 0).minor, 0);
        assert_eq!(generate_version(5, 0).minor, 1);
        assert_eq!(generate_version(15, 0).minor, 2);
        assert_eq!(generate_version(30, 0).minor, 3);
        assert_eq!(generate_version(1000, 0).minor, 9);
    }

    #[test]
    fn fallback_expansion_matches_deterministic_defaults() {
        let git = GitMetadata::fallback("20260730120000");
        let ctx = ctx_with(git, generate_version(12, 137));
        let generated = expand("{branch}/{repo}/schema/{version}", &ctx).unwrap();
        assert_eq!(generated, "main/unknown-repo/schema/1.2.37");
        assert_eq!(sanitize_docker(&generated), "main-unknown-repo-schema-1.2.37");
    }

    #[test]
    fn unbalanced_braces_are_rejected() {
        assert!(matches!(validate("{branch"), Err(TagTemplateError::UnbalancedBraces(_))));
        assert!(matches!(validate("branch}"), Err(TagTemplateError::UnbalancedBraces(_))));
    }

    #[test]
    fn nested_braces_are_rejected() {
        assert!(matches!(validate("{{branch}}"), Err(TagTemplateError::NestedBraces(_))));
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert!(matches!(validate("{nonsense}"), Err(TagTemplateError::UnknownToken(_))));
    }

    #[test]
    fn token_matching_is_case_insensitive() {
        assert!(validate("{Branch}/{REPO}").is_ok());
    }

    #[test]
    fn git_sanitizer_strips_forbidden_characters_and_collapses_dots() {
        let dirty = "feature/foo..bar~baz:qux";
        let clean = sanitize_git(dirty);
        assert!(!clean.contains(".."));
        assert!(!clean.contains('~'));
        assert!(!clean.contains(':'));
    }

    #[test]
    fn helm_sanitizer_falls_back_to_default_semver() {
        assert_eq!(sanitize_helm("no-version-here"), "1.0.0");
        assert_eq!(sanitize_helm("release-2.3.4-final"), "2.3.4");
    }
}
