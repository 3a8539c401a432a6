#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn benchrun(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("benchrun").unwrap();
    cmd.current_dir(dir.path())
        .env("BENCHRUN_ROOT", dir.path())
        .env("RUST_LOG", "error");
    cmd
}

fn init_project(dir: &TempDir) {
    benchrun(dir).arg("init").assert().success();
}

fn run_all(dir: &TempDir) {
    benchrun(dir)
        .args(["run", "--yes", "--skip-delays"])
        .assert()
        .success();
}

fn tips_json(dir: &TempDir) -> serde_json::Value {
    let out = benchrun(dir)
        .args(["tips", "show", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success());
    serde_json::from_slice(&out.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// benchrun init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_state_files() {
    let dir = TempDir::new().unwrap();
    benchrun(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .benchrun/config.yaml"));

    assert!(dir.path().join(".benchrun/config.yaml").exists());
    assert!(dir.path().join(".benchrun/tips.json").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    benchrun(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .benchrun/tips.json"));
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    benchrun(&dir)
        .args(["run", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// benchrun stages / config
// ---------------------------------------------------------------------------

#[test]
fn stages_lists_protocol_order() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let out = benchrun(&dir).args(["stages", "--json"]).output().unwrap();
    assert!(out.status.success());
    let names: Vec<String> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(
        names,
        ["bind", "wash-1", "wash-2", "dry", "elute", "transfer"]
    );

    // A dry walk leaves no trace on disk.
    assert!(!dir.path().join(".benchrun/status.json").exists());
}

#[test]
fn config_validate_default_is_clean() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    benchrun(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_reports_unknown_rack() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let path = dir.path().join(".benchrun/config.yaml");
    let yaml = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, yaml.replace("- tips-right", "- tips-missing")).unwrap();

    benchrun(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown labware 'tips-missing'"));
}

// ---------------------------------------------------------------------------
// benchrun run
// ---------------------------------------------------------------------------

#[test]
fn full_run_prints_calls_and_records_status() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    benchrun(&dir)
        .args(["run", "--yes", "--skip-delays"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# stage bind"))
        .stdout(predicate::str::contains("pick up tip tips-left:A1"))
        .stdout(predicate::str::contains("# cleanup complete"));

    let out = benchrun(&dir).args(["status", "--json"]).output().unwrap();
    let status: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(status["state"], "finished");
    assert_eq!(status["stage"], "transfer");

    let tips = tips_json(&dir);
    assert_eq!(tips[0]["pool"], "left");
    assert_eq!(tips[0]["consumed"], 24);
    assert_eq!(tips[1]["consumed"], 24);
}

#[test]
fn second_run_continues_from_persisted_tips() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    run_all(&dir);
    benchrun(&dir)
        .args(["run", "--yes", "--skip-delays"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pick up tip tips-left:A4"));
    assert_eq!(tips_json(&dir)[0]["consumed"], 48);
}

#[test]
fn resume_skips_earlier_stages() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    benchrun(&dir)
        .args(["run", "--yes", "--skip-delays", "--start-at", "transfer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# stage transfer"))
        .stdout(predicate::str::contains("# stage bind").not());

    // transfer uses one tip per column on each mount
    assert_eq!(tips_json(&dir)[0]["consumed"], 3);
}

#[test]
fn unknown_resume_point_fails_after_walking_all_stages() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    benchrun(&dir)
        .args(["run", "--yes", "--skip-delays", "--start-at", "trasnfer"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "resume point 'trasnfer' was never reached",
        ));

    let out = benchrun(&dir).args(["status", "--json"]).output().unwrap();
    let status: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(status["state"], "failed");
    assert_eq!(status["stage"], "transfer");
    assert_eq!(tips_json(&dir)[0]["consumed"], 0);
}

#[test]
fn operator_can_abort_at_a_prompt() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    benchrun(&dir)
        .args(["run", "--skip-delays"])
        .write_stdin("abort\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("run aborted by operator"));
}

#[test]
fn run_json_is_a_call_log() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let out = benchrun(&dir)
        .args(["run", "--yes", "--skip-delays", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let calls: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(calls[0]["call"], "retract");
    assert!(calls.iter().any(|c| c["call"] == "air_gap"));
}

#[test]
fn mismatched_tip_state_is_fatal() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let path = dir.path().join(".benchrun/config.yaml");
    let yaml = std::fs::read_to_string(&path).unwrap();
    // Shrink the left rack so the saved tips.json no longer fits.
    let yaml = yaml.replacen("columns: 12", "columns: 6", 1);
    std::fs::write(&path, yaml).unwrap();

    benchrun(&dir)
        .args(["run", "--yes", "--skip-delays"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("persisted state does not match"));
}

// ---------------------------------------------------------------------------
// benchrun tips
// ---------------------------------------------------------------------------

#[test]
fn tips_reset_single_pool() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    run_all(&dir);
    benchrun(&dir)
        .args(["tips", "reset", "--pool", "left"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Refilled: left"));

    let tips = tips_json(&dir);
    assert_eq!(tips[0]["consumed"], 0);
    assert_eq!(tips[0]["next"], "tips-left:A1");
    assert_eq!(tips[1]["consumed"], 24);
}

#[test]
fn tips_reset_unknown_pool_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    benchrun(&dir)
        .args(["tips", "reset", "--pool", "p1000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("consumable pool not found: p1000"));
}

#[test]
fn status_before_any_run() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    benchrun(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No run recorded yet."));
}
