//! Spawns the compiled `schemist` binary and drives its subcommands
//! through stdin/stdout, the way the pipeline's own CLI tests do.

use std::process::{Command, Output};

fn schemist_bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_schemist")
}

fn run(args: &[&str]) -> Output {
    Command::new(schemist_bin_path()).args(args).output().unwrap()
}

fn write_single_entity_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let entities = serde_json::json!([{
        "name": "User",
        "full_name": "App.Models.User",
        "namespace": "App.Models",
        "table_name": "User",
        "schema_name": null,
        "source_file": "User.cs",
        "source_line": 1,
        "properties": [
            {
                "name": "Id",
                "abstract_type": "int64",
                "sql_type": null,
                "nullable": false,
                "primary_key": true,
                "foreign_key": false,
                "unique": false,
                "indexed": false,
                "max_length": null,
                "precision": null,
                "scale": null,
                "default_value": null,
                "attributes": {}
            },
            {
                "name": "Email",
                "abstract_type": "string",
                "sql_type": null,
                "nullable": false,
                "primary_key": false,
                "foreign_key": false,
                "unique": true,
                "indexed": false,
                "max_length": 255,
                "precision": null,
                "scale": null,
                "default_value": null,
                "attributes": {}
            }
        ],
        "relationships": [],
        "indexes": [],
        "attributes": {}
    }]);
    let path = dir.join("entities.json");
    std::fs::write(&path, serde_json::to_string_pretty(&entities).unwrap()).unwrap();
    path
}

#[test]
fn tag_subcommand_falls_back_to_deterministic_defaults_outside_a_git_repo() {
    let fixture_dir = tempfile::tempdir().unwrap();
    let entities_file = write_single_entity_fixture(fixture_dir.path());
    let repo_root = tempfile::tempdir().unwrap();

    let output = run(&[
        "tag",
        "--entities-file",
        entities_file.to_str().unwrap(),
        "--repo-root",
        repo_root.path().to_str().unwrap(),
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let tags: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert_eq!(tags["generated"], "main/unknown-repo/schema/1.1.2");
    assert_eq!(tags["docker_tag"], "main-unknown-repo-schema-1.1.2");
}

#[test]
fn tag_subcommand_rejects_an_unknown_token() {
    let fixture_dir = tempfile::tempdir().unwrap();
    let entities_file = write_single_entity_fixture(fixture_dir.path());

    let output = run(&[
        "tag",
        "--entities-file",
        entities_file.to_str().unwrap(),
        "--tag-template",
        "{not-a-real-token}",
    ]);

    assert!(!output.status.success());
}

#[test]
fn plan_subcommand_reports_a_create_table_change_with_no_introspect() {
    let fixture_dir = tempfile::tempdir().unwrap();
    let entities_file = write_single_entity_fixture(fixture_dir.path());
    let repo_root = tempfile::tempdir().unwrap();

    let output = run(&[
        "plan",
        "--entities-file",
        entities_file.to_str().unwrap(),
        "--dialect",
        "postgres",
        "--server",
        "localhost",
        "--database",
        "AppDb",
        "--no-introspect",
        "--repo-root",
        repo_root.path().to_str().unwrap(),
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert!(summary["changeCount"].as_u64().unwrap() >= 1);
    assert!(summary["plan"]["phases"].as_array().unwrap().iter().any(|p| !p["operations"].as_array().unwrap().is_empty()));
}

#[test]
fn plan_subcommand_fails_without_a_database_name() {
    let fixture_dir = tempfile::tempdir().unwrap();
    let entities_file = write_single_entity_fixture(fixture_dir.path());

    let output = run(&[
        "plan",
        "--entities-file",
        entities_file.to_str().unwrap(),
        "--no-introspect",
    ]);

    assert!(!output.status.success());
}
