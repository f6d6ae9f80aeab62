#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SITE: &str = r#"
resources:
  - kind: local_directory
    name: site
    attributes:
      path: out
  - kind: local_file
    name: index
    depends_on: ["local_directory.site"]
    attributes:
      path: out/index.html
      content: "hello"
  - kind: local_file
    name: manifest
    attributes:
      path: out/manifest.txt
      content: "ref(local_directory.site.absolute_path)"
"#;

fn project(document: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("terraflow.yaml"), document).unwrap();
    dir
}

fn tflow(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tflow").unwrap();
    cmd.current_dir(dir)
        .env_remove("TERRAFLOW_CONFIG_PATH")
        .env_remove("TERRAFLOW_PARALLELISM")
        .env_remove("TERRAFLOW_RUN_TIMEOUT_SECS")
        .env("NO_COLOR", "1");
    cmd
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("tflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("依存順に収束させる"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("state"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("tflow").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("terraflow"));
}

#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("tflow").unwrap();
    cmd.args(["apply", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[PLAN]"))
        .stdout(predicate::str::contains("--yes"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("tflow").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// プロジェクトファイルがない場所では失敗する
#[test]
fn test_validate_without_project() {
    let dir = tempfile::tempdir().unwrap();
    tflow(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("terraflow.yaml"));
}

#[test]
fn test_validate_ok() {
    let dir = project(SITE);
    tflow(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("設定ファイルは正常です"))
        .stdout(predicate::str::contains("リソース: 3個"));
}

#[test]
fn test_validate_reports_cycle() {
    let dir = project(
        r#"
resources:
  - kind: local_file
    name: a
    attributes:
      path: a.txt
      content: "ref(local_file.b.content)"
  - kind: local_file
    name: b
    attributes:
      path: b.txt
      content: "ref(local_file.a.content)"
"#,
    );

    tflow(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("設定エラー"))
        .stderr(predicate::str::contains("local_file.a"));
}

#[test]
fn test_validate_reports_unknown_kind() {
    let dir = project(
        r#"
resources:
  - kind: cloud_server
    name: web
    attributes:
      size: large
"#,
    );

    tflow(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cloud_server"));
}

#[test]
fn test_plan_shows_creates() {
    let dir = project(SITE);
    tflow(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("+ local_directory.site"))
        .stdout(predicate::str::contains("3 to create"));

    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_apply_then_nothing_to_do() {
    let dir = project(SITE);
    tflow(dir.path())
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("適用完了"));

    let out = dir.path().join("out");
    assert_eq!(fs::read_to_string(out.join("index.html")).unwrap(), "hello");
    let manifest = fs::read_to_string(out.join("manifest.txt")).unwrap();
    assert!(manifest.ends_with("out"), "{}", manifest);
    assert!(dir.path().join(".terraflow/state.json").exists());

    tflow(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("変更はありません"));
}

#[test]
fn test_content_drift_is_repaired() {
    let dir = project(SITE);
    tflow(dir.path()).args(["apply", "--yes"]).assert().success();
    fs::write(dir.path().join("out/index.html"), "tampered").unwrap();

    tflow(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("~ local_file.index"))
        .stdout(predicate::str::contains("1 to update"));

    tflow(dir.path()).args(["apply", "--yes"]).assert().success();
    assert_eq!(
        fs::read_to_string(dir.path().join("out/index.html")).unwrap(),
        "hello"
    );
}

#[test]
fn test_declining_confirmation_changes_nothing() {
    let dir = project(SITE);
    tflow(dir.path())
        .arg("apply")
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("キャンセルしました"));

    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_saved_plan_is_applied() {
    let dir = project(SITE);
    tflow(dir.path())
        .args(["plan", "--out", "plan.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("実行計画を保存しました"));

    tflow(dir.path())
        .args(["apply", "plan.json", "--yes"])
        .assert()
        .success();
    assert!(dir.path().join("out/index.html").exists());
}

#[test]
fn test_stale_saved_plan_is_rejected() {
    let dir = project(SITE);
    tflow(dir.path())
        .args(["plan", "--out", "plan.json"])
        .assert()
        .success();
    tflow(dir.path()).args(["apply", "--yes"]).assert().success();

    tflow(dir.path())
        .args(["apply", "plan.json", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("stale"));
}

#[test]
fn test_state_list_and_show() {
    let dir = project(SITE);
    tflow(dir.path()).args(["apply", "--yes"]).assert().success();

    tflow(dir.path())
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("local_directory.site"))
        .stdout(predicate::str::contains("out/index.html"));

    tflow(dir.path())
        .args(["state", "show", "local_file.index"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"content\": \"hello\""))
        .stdout(predicate::str::contains("local_directory.site"));

    tflow(dir.path())
        .args(["state", "show", "local_file.missing"])
        .assert()
        .failure();
}

#[test]
fn test_destroy_removes_everything() {
    let dir = project(SITE);
    tflow(dir.path()).args(["apply", "--yes"]).assert().success();

    tflow(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 to destroy"));

    assert!(!dir.path().join("out").exists());
    tflow(dir.path())
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("管理しているリソースはありません"));
}
