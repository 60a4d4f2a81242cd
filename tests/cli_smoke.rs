//! CLI smoke tests: exit codes, JSON output, basic lifecycle.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn bd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bd").expect("binary builds");
    cmd.current_dir(dir);
    // isolate from the developer's environment
    cmd.env_remove("BEADS_DIR")
        .env_remove("BEADS_DB")
        .env_remove("BEADS_SYNC_BRANCH")
        .env_remove("BD_NO_AUTO_IMPORT");
    cmd
}

fn init_workspace(dir: &Path) {
    bd(dir).args(["init", "bd"]).assert().success();
}

#[test]
fn init_then_create_then_list() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());

    bd(td.path())
        .args(["create", "Fix the widget", "--priority", "1", "--type", "bug"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Fix the widget"));

    bd(td.path())
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"title\": \"Fix the widget\""))
        .stdout(predicate::str::contains("\"priority\": 1"));
}

#[test]
fn uninitialized_directory_is_a_user_error() {
    let td = TempDir::new().unwrap();
    bd(td.path())
        .args(["list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("NOT_INITIALIZED"));
}

#[test]
fn double_init_requires_force() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());
    bd(td.path()).args(["init", "bd"]).assert().code(1);
    bd(td.path()).args(["init", "bd", "--force"]).assert().success();
}

#[test]
fn conflict_markers_exit_with_code_three() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());
    fs::write(
        td.path().join(".beads/issues.jsonl"),
        "<<<<<<< HEAD\n{\"id\":\"bd-abc\"}\n=======\n>>>>>>> theirs\n",
    )
    .unwrap();

    bd(td.path())
        .args(["import", "--force"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("CONFLICT_MARKERS"));
}

#[test]
fn close_sets_status_and_export_writes_jsonl() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());

    bd(td.path())
        .args(["create", "Will be closed"])
        .assert()
        .success();

    // auto-flush after create wrote the JSONL mirror
    let jsonl = td.path().join(".beads/issues.jsonl");
    assert!(jsonl.exists());
    let before = fs::read_to_string(&jsonl).unwrap();
    assert!(before.contains("\"status\":\"open\""));

    // grab the generated id from list --json
    let output = bd(td.path()).args(["list", "--json"]).output().unwrap();
    let issues: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let id = issues[0]["id"].as_str().unwrap().to_string();

    bd(td.path()).args(["close", &id]).assert().success();
    let after = fs::read_to_string(&jsonl).unwrap();
    assert!(after.contains("\"status\":\"closed\""));
    assert!(after.contains("closed_at"));
}

#[test]
fn delete_leaves_tombstone_in_jsonl() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());
    bd(td.path()).args(["create", "Doomed"]).assert().success();

    let output = bd(td.path()).args(["list", "--json"]).output().unwrap();
    let issues: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let id = issues[0]["id"].as_str().unwrap().to_string();

    bd(td.path())
        .args(["delete", &id, "--reason", "test cleanup"])
        .assert()
        .success();

    // gone from the default list, present as a tombstone record
    bd(td.path())
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
    let jsonl = fs::read_to_string(td.path().join(".beads/issues.jsonl")).unwrap();
    assert!(jsonl.contains("\"status\":\"tombstone\""));
    assert!(jsonl.contains("test cleanup"));
}

#[test]
fn dep_cycle_is_refused() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());
    bd(td.path()).args(["create", "First issue"]).assert().success();
    bd(td.path()).args(["create", "Second issue"]).assert().success();

    let output = bd(td.path()).args(["list", "--json"]).output().unwrap();
    let issues: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let a = issues[0]["id"].as_str().unwrap().to_string();
    let b = issues[1]["id"].as_str().unwrap().to_string();

    bd(td.path()).args(["dep", "add", &a, &b]).assert().success();
    bd(td.path())
        .args(["dep", "add", &b, &a])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("CYCLE_DETECTED"));
}

#[test]
fn ready_reflects_blocking() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());
    bd(td.path()).args(["create", "Blocker issue"]).assert().success();
    bd(td.path()).args(["create", "Dependent issue"]).assert().success();

    let output = bd(td.path()).args(["list", "--json"]).output().unwrap();
    let issues: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let (mut blocker, mut dependent) = (None, None);
    for issue in issues.as_array().unwrap() {
        match issue["title"].as_str().unwrap() {
            "Blocker issue" => blocker = issue["id"].as_str().map(String::from),
            "Dependent issue" => dependent = issue["id"].as_str().map(String::from),
            _ => {}
        }
    }
    let (blocker, dependent) = (blocker.unwrap(), dependent.unwrap());

    bd(td.path())
        .args(["dep", "add", &dependent, &blocker])
        .assert()
        .success();

    let ready = bd(td.path()).args(["ready", "--json"]).output().unwrap();
    let ready: serde_json::Value = serde_json::from_slice(&ready.stdout).unwrap();
    let ready_ids: Vec<&str> = ready
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert!(ready_ids.contains(&blocker.as_str()));
    assert!(!ready_ids.contains(&dependent.as_str()));

    bd(td.path()).args(["close", &blocker]).assert().success();
    let ready = bd(td.path()).args(["ready", "--json"]).output().unwrap();
    let ready: serde_json::Value = serde_json::from_slice(&ready.stdout).unwrap();
    assert!(
        ready
            .as_array()
            .unwrap()
            .iter()
            .any(|i| i["id"].as_str().unwrap() == dependent)
    );
}

#[test]
fn merge_driver_runs_standalone() {
    let td = TempDir::new().unwrap();
    let record = |id: &str, title: &str| {
        format!(
            "{{\"id\":\"{id}\",\"title\":\"{title}\",\"status\":\"open\",\"priority\":2,\"issue_type\":\"task\",\"created_at\":\"2024-05-01T10:00:00.000000000Z\",\"updated_at\":\"2024-05-01T10:00:00.000000000Z\"}}\n"
        )
    };
    let ours = td.path().join("ours.jsonl");
    let base = td.path().join("base.jsonl");
    let theirs = td.path().join("theirs.jsonl");
    fs::write(&ours, record("bd-aaa111", "From A")).unwrap();
    fs::write(&base, "").unwrap();
    fs::write(&theirs, record("bd-bbb222", "From B")).unwrap();

    bd(td.path())
        .args([
            "merge",
            ours.to_str().unwrap(),
            base.to_str().unwrap(),
            ours.to_str().unwrap(),
            theirs.to_str().unwrap(),
        ])
        .assert()
        .success();

    let merged = fs::read_to_string(&ours).unwrap();
    assert!(merged.contains("bd-aaa111"));
    assert!(merged.contains("bd-bbb222"));
    // ascending by ID
    assert!(merged.find("bd-aaa111").unwrap() < merged.find("bd-bbb222").unwrap());
}

#[test]
fn parent_child_creation_and_depth_limit() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());
    bd(td.path()).args(["create", "Epic parent"]).assert().success();

    let output = bd(td.path()).args(["list", "--json"]).output().unwrap();
    let issues: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let parent = issues[0]["id"].as_str().unwrap().to_string();

    bd(td.path())
        .args(["create", "Child task", "--parent", &parent])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{parent}.1")));

    bd(td.path())
        .args(["create", "Second child", "--parent", &parent])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{parent}.2")));

    let grandchild_parent = format!("{parent}.1");
    bd(td.path())
        .args(["create", "Grandchild", "--parent", &grandchild_parent])
        .assert()
        .success();

    // depth 3 is the default limit: .1.1.1 is allowed, one deeper is not
    let ggp = format!("{parent}.1.1");
    bd(td.path())
        .args(["create", "Deepest allowed", "--parent", &ggp])
        .assert()
        .success();
    let too_deep_parent = format!("{parent}.1.1.1");
    bd(td.path())
        .args(["create", "Too deep", "--parent", &too_deep_parent])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("MAX_DEPTH_EXCEEDED"));
}

#[test]
fn missing_parent_is_a_typed_error() {
    let td = TempDir::new().unwrap();
    init_workspace(td.path());
    bd(td.path())
        .args(["create", "Orphan", "--parent", "bd-ghost99"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("MISSING_PARENT"));
}
