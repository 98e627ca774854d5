//! Smoke tests -- verify the binary runs and the offline subcommands work.

use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

fn bddrunner() -> Command {
    let mut cmd = Command::cargo_bin("bddrunner").unwrap();
    cmd.env_remove("BDDRUNNER_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    bddrunner()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Run BDD test suites"));
}

#[test]
fn test_cli_version() {
    bddrunner()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("bddrunner"));
}

#[test]
fn test_subcommands_exist() {
    for args in [
        vec!["serve", "--help"],
        vec!["run", "--help"],
        vec!["runs", "list", "--help"],
        vec!["runs", "show", "--help"],
        vec!["projects", "list", "--help"],
    ] {
        bddrunner().args(&args).assert().success();
    }
}

#[test]
fn test_parse_cucumber_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cucumber.json");
    fs::write(
        &path,
        r#"[{"name":"Login","elements":[{"type":"scenario","name":"valid user","steps":[{"keyword":"Given ","name":"a user","result":{"status":"passed","duration":1500000}}]}]}]"#,
    )
    .unwrap();

    bddrunner()
        .arg("parse")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("Feature: Login"))
        .stdout(predicates::str::contains("1 scenarios: 1 passed, 0 failed, 0 skipped"));
}

#[test]
fn test_parse_junit_json_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("TEST-suite.xml");
    fs::write(
        &path,
        r#"<testsuites><testsuite name="Cart"><testcase name="adds" time="0.25"/><testcase name="removes"><failure message="expected 0"/></testcase></testsuite></testsuites>"#,
    )
    .unwrap();

    let output = bddrunner()
        .args(["parse", "--json"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["summary"]["passed"], 1);
    assert_eq!(json["summary"]["failed"], 1);
    assert_eq!(json["features"][0]["scenarios"][1]["steps"][0]["error"], "expected 0");
}

#[test]
fn test_parse_rejects_unknown_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("report.txt");
    fs::write(&path, "[]").unwrap();

    bddrunner()
        .arg("parse")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicates::str::contains("--format"));

    bddrunner()
        .args(["parse", "--format", "cucumber"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("0 scenarios"));
}

#[test]
fn test_locate_prefers_cucumber() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("target/reports")).unwrap();
    fs::write(
        dir.path().join("target/reports/junit.xml"),
        "<testsuite name=\"s\"></testsuite>",
    )
    .unwrap();

    bddrunner()
        .arg("locate")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicates::str::starts_with("junit "));

    fs::write(dir.path().join("cucumber.json"), r#"[{"elements":[]}]"#).unwrap();
    bddrunner()
        .arg("locate")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicates::str::starts_with("cucumber "));
}

#[test]
fn test_projects_seeded_from_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bddrunner.toml");
    fs::write(
        &config,
        format!(
            r#"
[storage]
database_path = "{}"

[[projects]]
id = "checkout"
name = "Checkout"
repository = "acme/checkout-tests"
default_target = "acceptance"
"#,
            dir.path().join("db/bddrunner.db").display()
        ),
    )
    .unwrap();

    bddrunner()
        .arg("--config")
        .arg(&config)
        .args(["projects", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("acme/checkout-tests"));

    bddrunner()
        .arg("--config")
        .arg(&config)
        .args(["runs", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No runs found."));

    bddrunner()
        .arg("--config")
        .arg(&config)
        .args(["runs", "show", "nope"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("not found"));
}

#[test]
fn test_run_unknown_project_fails() {
    bddrunner()
        .args(["run", "ghost", "--ephemeral"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("project 'ghost' not found"));
}
