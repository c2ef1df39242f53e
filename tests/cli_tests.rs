//! CLI surface tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn panka() -> Command {
    Command::cargo_bin("panka").unwrap()
}

#[test]
fn help_lists_core_verbs() {
    panka()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("drift"));
}

#[test]
fn version_prints() {
    panka()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("panka"));
}

#[test]
fn init_scaffolds_a_valid_stack() {
    let dir = tempfile::tempdir().unwrap();
    panka()
        .current_dir(dir.path())
        .args(["init", "demo-stack"])
        .assert()
        .success();

    assert!(dir.path().join("demo-stack/stack.yaml").is_file());
    assert!(dir
        .path()
        .join("demo-stack/services/api/service.yaml")
        .is_file());

    // The scaffold validates cleanly.
    panka()
        .current_dir(dir.path())
        .args(["validate", "demo-stack"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn validate_missing_folder_exits_1() {
    panka()
        .args(["validate", "/nonexistent/stack"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn validate_reports_all_errors_and_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bad-stack");
    fs::create_dir_all(root.join("services/core")).unwrap();
    fs::write(
        root.join("stack.yaml"),
        "kind: Stack\nmetadata: {name: bad-stack}\nspec:\n  provider: {name: aws, region: us-east-1}\n",
    )
    .unwrap();
    fs::write(
        root.join("services/core/service.yaml"),
        "kind: Service\nmetadata: {name: core}\n",
    )
    .unwrap();
    fs::write(
        root.join("services/core/queue.yaml"),
        "kind: SQS\nmetadata: {name: orders}\ndependsOn: [ghost]\n",
    )
    .unwrap();

    panka()
        .args(["validate"])
        .arg(&root)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn unknown_kind_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("stack");
    fs::create_dir_all(root.join("services/core")).unwrap();
    fs::write(
        root.join("stack.yaml"),
        "kind: Stack\nmetadata: {name: stack}\nspec:\n  provider: {name: aws, region: us-east-1}\n",
    )
    .unwrap();
    fs::write(
        root.join("services/core/service.yaml"),
        "kind: Service\nmetadata: {name: core}\n",
    )
    .unwrap();
    fs::write(
        root.join("services/core/thing.yaml"),
        "kind: Mainframe\nmetadata: {name: thing}\n",
    )
    .unwrap();

    panka()
        .args(["validate"])
        .arg(&root)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown kind"));
}

#[test]
fn graph_shows_stages_and_critical_path() {
    let dir = tempfile::tempdir().unwrap();
    panka()
        .current_dir(dir.path())
        .args(["init", "demo-stack"])
        .assert()
        .success();

    panka()
        .current_dir(dir.path())
        .args(["graph", "demo-stack"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stage 0"));
}

#[test]
fn state_commands_require_backend_configuration() {
    panka()
        .env_remove("PANKA_BUCKET")
        .env_remove("PANKA_LOCK_TABLE")
        .args(["state", "list"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("PANKA_BUCKET"));
}

#[test]
fn admin_tenant_commands_require_admin_session() {
    let home = tempfile::tempdir().unwrap();
    panka()
        .env("PANKA_HOME", home.path())
        .env("PANKA_BUCKET", "bucket")
        .env("PANKA_LOCK_TABLE", "table")
        .args(["admin", "tenant", "list"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not logged in").or(predicate::str::contains("session")));
}

#[test]
fn var_override_must_be_key_value() {
    let dir = tempfile::tempdir().unwrap();
    panka()
        .current_dir(dir.path())
        .args(["init", "demo-stack"])
        .assert()
        .success();

    panka()
        .current_dir(dir.path())
        .args(["validate", "demo-stack", "--var", "notakeyvalue"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("KEY=VALUE"));
}
