use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn edison(root: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_edison"));
    cmd.arg("--root").arg(root).arg("--pm-dir").arg(".project");
    cmd
}

#[test]
fn task_create_then_claim_prints_wip_state() {
    let dir = TempDir::new().unwrap();

    edison(dir.path())
        .args(["task", "create", "T-001", "Wire up the widget", "--kind", "feature"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": \"T-001\""));

    edison(dir.path())
        .args(["task", "claim", "T-001", "--session", "S-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"wip\""));
}

#[test]
fn claiming_unknown_task_fails_with_nonzero_exit() {
    let dir = TempDir::new().unwrap();

    edison(dir.path())
        .args(["task", "claim", "T-missing", "--session", "S-001"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn session_next_on_empty_project_returns_no_actions() {
    let dir = TempDir::new().unwrap();

    edison(dir.path())
        .args(["session", "create", "S-001"])
        .assert()
        .success();

    edison(dir.path())
        .args(["session", "next", "S-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"actions\": []"));
}
