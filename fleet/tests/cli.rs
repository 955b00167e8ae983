//! CLI tests: spawn the fleet binary and check exit codes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use chrono::Utc;

use fleet::core::state::{OrchestrationState, WorkspaceDisposition};
use fleet::core::types::WorkerStatus;
use fleet::exit_codes;
use fleet::io::graph_store::load_graph;
use fleet::io::init::{FleetPaths, InitOptions, init_fleet};
use fleet::io::state_store::write_state;
use fleet::test_support::TestRepo;

fn fleet(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fleet"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("spawn fleet")
}

#[test]
fn init_then_validate_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = fleet(temp.path(), &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));

    let out = fleet(temp.path(), &["validate"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&out.stdout).contains("state: not started"));

    let out = fleet(temp.path(), &["order"]);
    let order = String::from_utf8_lossy(&out.stdout).into_owned();
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(order.find("backend").expect("backend") < order.find("integrate").expect("integrate"));
}

#[test]
fn second_init_without_force_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(fleet(temp.path(), &["init"]).status.code(), Some(exit_codes::OK));
    assert_eq!(
        fleet(temp.path(), &["init"]).status.code(),
        Some(exit_codes::INVALID)
    );
    assert_eq!(
        fleet(temp.path(), &["init", "--force"]).status.code(),
        Some(exit_codes::OK)
    );
}

#[test]
fn cyclic_graph_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_fleet(temp.path(), &InitOptions { force: false }).expect("init");
    fs::write(
        &paths.graph_path,
        r#"{"project": {"name": "demo", "slug": "demo"},
           "workers": [
             {"id": "a", "branch": "fleet/a", "dependencies": ["c"]},
             {"id": "b", "branch": "fleet/b", "dependencies": ["a"]},
             {"id": "c", "branch": "fleet/c", "dependencies": ["b"]}
           ]}"#,
    )
    .expect("write graph");

    let out = fleet(temp.path(), &["validate"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("cycle"));
}

#[test]
fn corrupt_state_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_fleet(temp.path(), &InitOptions { force: false }).expect("init");
    fs::write(&paths.state_path, "{ not json").expect("write state");

    let out = fleet(temp.path(), &["status"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("corrupt"));
}

#[test]
fn status_json_reports_phases() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_fleet(temp.path(), &InitOptions { force: false }).expect("init");

    let out = fleet(temp.path(), &["status", "--json"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(json["max_phase"], 2);
    assert_eq!(json["phases"][0]["workers"][0]["status"], "pending");
}

#[test]
fn closing_phase_with_dirty_workspace_exits_conflict() {
    let repo = TestRepo::new().expect("repo");
    let paths: FleetPaths =
        init_fleet(repo.path(), &InitOptions { force: false }).expect("init");
    let graph = load_graph(&paths.graph_path).expect("graph");

    let ws = repo.path().join(".fleet/worktrees/backend");
    repo.git(&[
        "worktree",
        "add",
        "-b",
        "fleet/backend",
        ws.to_str().expect("utf8 path"),
        "main",
    ])
    .expect("worktree add");
    fs::write(ws.join("unsaved.txt"), "work in progress").expect("dirty");

    let mut state = OrchestrationState::initialize(&graph);
    state.mark_phase_launched(1, Utc::now());
    for id in ["backend", "frontend"] {
        state.worker_mut(id).status = WorkerStatus::Completed;
    }
    let backend = state.worker_mut("backend");
    backend.workspace_path = Some(ws.clone());
    backend.workspace = Some(WorkspaceDisposition::Active);
    let phase = state.phases.entry(1).or_default();
    phase.complete = true;
    phase.completed_at = Some(Utc::now());
    write_state(&paths.state_path, &state).expect("write state");

    let out = fleet(repo.path(), &["close-phase", "1"]);
    assert_eq!(out.status.code(), Some(exit_codes::CONFLICT));
    assert!(ws.join("unsaved.txt").is_file());
    assert!(String::from_utf8_lossy(&out.stderr).contains("retained"));
}
