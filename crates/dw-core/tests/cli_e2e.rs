//! CLI E2E tests.
//!
//! Validates:
//! - `score` over drive-day records writes the store and reports JSON
//! - `score` without `--mapping` uses the drive-stats column table
//! - `history` reads back what `score` wrote
//! - `export` produces a Parquet file
//! - `refresh` marks failed devices
//! - Exit codes for no-data and bad-input paths

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use dw_config::{FeatureWeight, ModelBundle, ModelParams};
use predicates::prelude::*;
use serde_json::Value;
use tempfile::{tempdir, TempDir};

// ============================================================================
// Helpers
// ============================================================================

fn dw_core() -> Command {
    let mut cmd = cargo_bin_cmd!("dw-core");
    cmd.timeout(Duration::from_secs(60));
    cmd.env_remove("DW_CONFIG").env_remove("DW_LOG").env_remove("RUST_LOG");
    cmd
}

const RECORDS: &str = r#"{"date": "2016-01-01", "serial_number": "Z300", "failure": 0, "smart_5_raw": 0, "smart_187_raw": 0}
{"date": "2016-01-02", "serial_number": "Z300", "failure": 0, "smart_5_raw": 8, "smart_187_raw": 2}
{"date": "2016-01-03", "serial_number": "Z300", "failure": 1, "smart_5_raw": 48, "smart_187_raw": 11}
{"date": "2016-01-01", "serial_number": "W400", "failure": 0, "smart_5_raw": 0, "smart_187_raw": 0}
"#;

const MAPPING: &str = r#"{"entries": [
    {"column": "failure", "metric": "Failure"},
    {"column": "smart_5_raw", "metric": "Smart5Raw"},
    {"column": "smart_187_raw", "metric": "Smart187Raw"}
]}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let ws = Self { dir };
        fs::write(ws.path("config.json"), r#"{"schema_version": "1.0.0"}"#).unwrap();
        fs::write(ws.path("records.jsonl"), RECORDS).unwrap();
        fs::write(ws.path("mapping.json"), MAPPING).unwrap();
        let bundle = ModelBundle::new(ModelParams {
            name: "smart-logit".into(),
            output_column: "1.0".into(),
            intercept: -3.0,
            weights: vec![
                FeatureWeight {
                    metric: "Smart5Raw".into(),
                    weight: 0.05,
                },
                FeatureWeight {
                    metric: "Smart187Raw".into(),
                    weight: 0.2,
                },
            ],
        })
        .unwrap();
        fs::write(ws.path("model.json"), bundle.to_json().unwrap()).unwrap();
        ws
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut cmd = dw_core();
        cmd.env("XDG_CONFIG_HOME", self.dir.path())
            .arg("--config")
            .arg(self.path("config.json"))
            .arg("--store")
            .arg(self.path("scores.json"));
        cmd
    }

    fn score(&self) -> Command {
        let mut cmd = self.cmd();
        cmd.arg("score")
            .arg("--records")
            .arg(self.path("records.jsonl"))
            .arg("--mapping")
            .arg(self.path("mapping.json"))
            .arg("--model")
            .arg(self.path("model.json"));
        cmd
    }
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("parse JSON")
}

fn exists(path: &Path) -> bool {
    path.exists()
}

// ============================================================================
// score / history
// ============================================================================

#[test]
fn score_reports_every_device() {
    let ws = Workspace::new();
    let json = stdout_json(&mut ws.score());
    assert_eq!(json["command"], "score");
    let runs = json["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["device"], "Z300");
    assert_eq!(runs[0]["outcome"], "scored");
    assert_eq!(runs[0]["rows"], 3);
    assert_eq!(runs[1]["rows"], 1);
    assert!(json["errors"].as_array().unwrap().is_empty());
    assert_eq!(json["config"]["source"]["kind"], "cli");
    assert!(exists(&ws.path("scores.json")));
}

#[test]
fn default_mapping_scores_drive_stats_rows() {
    let ws = Workspace::new();
    let rows = [(0, 0, 0), (0, 8, 2), (1, 48, 11)]
        .iter()
        .enumerate()
        .map(|(day, (failure, s5, s187))| {
            format!(
                r#"{{"date": "2016-01-0{}", "serial_number": "Z300", "model": "ST4000DM000", "capacity_bytes": 4000787030016, "failure": {failure}, "smart_1_normalized": null, "smart_5_raw": {s5}, "smart_187_raw": {s187}}}"#,
                day + 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(ws.path("drive_stats.jsonl"), rows).unwrap();

    let mut cmd = ws.cmd();
    cmd.arg("score")
        .arg("--records")
        .arg(ws.path("drive_stats.jsonl"))
        .arg("--model")
        .arg(ws.path("model.json"));
    let json = stdout_json(&mut cmd);
    let runs = json["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["device"], "Z300");
    assert_eq!(runs[0]["outcome"], "scored");
    assert_eq!(runs[0]["rows"], 3);
}

#[test]
fn history_reads_back_scores() {
    let ws = Workspace::new();
    ws.score().assert().success();

    let json = stdout_json(ws.cmd().args(["history", "--device", "Z300"]));
    let scores = json["scores"].as_array().unwrap();
    assert_eq!(scores.len(), 3);
    assert_eq!(scores[0]["timestamp"], "2016-01-01T00:00:00+00:00");
    let p: Vec<f64> = scores.iter().map(|s| s["score"].as_f64().unwrap()).collect();
    assert!(p.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn history_of_unknown_device_is_no_data() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["--format", "summary", "history", "--device", "nope"])
        .assert()
        .code(1);
}

#[test]
fn summary_format_prints_one_line_per_device() {
    let ws = Workspace::new();
    ws.score()
        .args(["--format", "summary"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Z300  scored 3 rows"))
        .stdout(predicate::str::contains("W400  scored 1 rows"));
}

#[test]
fn dump_features_writes_parquet_per_device() {
    let ws = Workspace::new();
    ws.score()
        .arg("--dump-features")
        .arg(ws.path("features"))
        .assert()
        .success();
    assert!(exists(&ws.path("features").join("Z300.parquet")));
    assert!(exists(&ws.path("features").join("W400.parquet")));
}

// ============================================================================
// export / refresh
// ============================================================================

#[test]
fn export_writes_all_scores() {
    let ws = Workspace::new();
    ws.score().assert().success();
    let json = stdout_json(ws.cmd().arg("export").arg("--out").arg(ws.path("scores.parquet")));
    assert_eq!(json["rows"], 4);
    assert!(exists(&ws.path("scores.parquet")));
}

#[test]
fn refresh_marks_failed_device() {
    let ws = Workspace::new();
    let mut cmd = ws.cmd();
    cmd.arg("refresh")
        .arg("--records")
        .arg(ws.path("records.jsonl"))
        .arg("--mapping")
        .arg(ws.path("mapping.json"))
        .arg("--model")
        .arg(ws.path("model.json"));
    let json = stdout_json(&mut cmd);
    assert_eq!(json["summary"]["devices"], 2);
    assert_eq!(json["summary"]["scored"], 2);
    let failed = json["failed_devices"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["id"], "Z300");
    assert_eq!(failed[0]["status"], "Failed");
    assert_eq!(failed[0]["failure_date"], "2016-01-03T00:00:00Z");
}

#[test]
fn refresh_outside_window_scores_nothing() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("refresh")
        .arg("--records")
        .arg(ws.path("records.jsonl"))
        .arg("--mapping")
        .arg(ws.path("mapping.json"))
        .arg("--model")
        .arg(ws.path("model.json"))
        .args(["--start", "2017-01-01", "--end", "2017-02-01"])
        .assert()
        .success();
    assert!(!exists(&ws.path("scores.json")));
}

// ============================================================================
// Error paths
// ============================================================================

#[test]
fn unmapped_column_is_config_error() {
    let ws = Workspace::new();
    fs::write(
        ws.path("mapping.json"),
        r#"{"entries": [{"column": "failure", "metric": "Failure"}]}"#,
    )
    .unwrap();
    ws.score()
        .assert()
        .code(10)
        .stderr(predicate::str::contains("smart_"));
}

#[test]
fn tampered_model_bundle_is_rejected() {
    let ws = Workspace::new();
    let text = fs::read_to_string(ws.path("model.json")).unwrap();
    fs::write(ws.path("model.json"), text.replace("-3.0", "-2.0")).unwrap();
    ws.score().assert().code(10);
}

#[test]
fn invalid_config_is_config_error() {
    let ws = Workspace::new();
    fs::write(ws.path("config.json"), r#"{"schema_version": "9.0.0"}"#).unwrap();
    ws.score().assert().code(10);
}

#[test]
fn missing_input_is_usage_error() {
    dw_core()
        .args(["score", "--model", "m.json"])
        .assert()
        .failure()
        .code(2);
}
