use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

#[allow(deprecated)]
fn scriptwatch(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("scriptwatch").expect("binary");
    cmd.current_dir(workdir).arg("--quiet");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn compare_reports_a_structural_change() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::write(root.join("old.js"), "var a=1;").unwrap();
    fs::write(root.join("new.js"), "var a=2;").unwrap();

    let output = scriptwatch(root)
        .args(["compare", "old.js", "new.js", "--out", "diff.html"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let body = stdout_json(&output);
    assert_eq!(body["strategy"], "structural");
    assert_eq!(body["changed"], true);
    assert_eq!(body["stats"]["modified"], 1);
    assert!(body["artifact"]["content_type"]
        .as_str()
        .unwrap()
        .starts_with("text/html"));

    let html = fs::read_to_string(root.join("diff.html")).unwrap();
    assert!(html.contains("var a=2;"));
}

#[test]
fn compare_can_render_json() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::write(root.join("old.js"), "function (\nvar x = 1;").unwrap();
    fs::write(root.join("new.js"), "function (\nvar x = 1;\nvar y = 2;").unwrap();

    let output = scriptwatch(root)
        .args(["compare", "old.js", "new.js", "--format", "json", "--out", "diff.json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let body = stdout_json(&output);
    assert_eq!(body["strategy"], "fallback");
    assert_eq!(body["changed"], true);
    assert!(body["line_similarity"].as_f64().unwrap() < 1.0);

    let artifact: Value = serde_json::from_slice(&fs::read(root.join("diff.json")).unwrap()).unwrap();
    assert!(artifact.is_object());
}

#[test]
fn empty_store_queries_return_empty_json() {
    let temp = tempdir().unwrap();
    let root = temp.path();

    let output = scriptwatch(root)
        .args(["versions", "main", "--data-dir", "store"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output), Value::Array(Vec::new()));

    let output = scriptwatch(root)
        .args(["status", "main", "--data-dir", "store"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output), Value::Null);
}

#[test]
fn invalid_config_fails_before_any_work() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::write(root.join("scriptwatch.toml"), "max_concurrency = 0\n").unwrap();

    scriptwatch(root)
        .args(["versions", "main", "--config", "scriptwatch.toml"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("max_concurrency"));
}

#[test]
fn checking_an_unregistered_resource_fails() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::write(root.join("resources.json"), "[]").unwrap();

    let output = scriptwatch(root)
        .args(["check", "ghost", "--data-dir", "store"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let body = stdout_json(&output);
    assert_eq!(body["error_kind"], "registry");
    assert_eq!(body["changed"], false);
}

#[test]
fn malformed_diff_ids_are_rejected() {
    let temp = tempdir().unwrap();
    scriptwatch(temp.path())
        .args(["artifact", "not-a-diff", "--data-dir", "store"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("Invalid diff id"));
}
