//! End-to-end tests of the `dataforge` binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Binary with configuration and data isolated under `home`
fn dataforge(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dataforge").unwrap();
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("DATAFORGE_ENGINE__DATA_DIR", home.path().join("data"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn write_file(home: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = home.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    dataforge(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    dataforge(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ingest"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("stages"));
}

#[test]
fn test_stages_lists_catalog() {
    let home = TempDir::new().unwrap();
    dataforge(&home)
        .arg("stages")
        .assert()
        .success()
        .stdout(predicate::str::contains("deduplication"))
        .stdout(predicate::str::contains("quality_scorer"))
        .stdout(predicate::str::contains("threshold"));

    let output = dataforge(&home)
        .args(["stages", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stages = stdout_json(&output);
    assert_eq!(stages.as_array().unwrap().len(), 5);
    assert_eq!(stages[0]["id"], "deduplication");
}

#[test]
fn test_ingest_csv_reports_ready_dataset() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "reviews.csv", "id,text\n1,great\n2,awful\n3,fine\n");

    let output = dataforge(&home)
        .arg("ingest")
        .arg(&file)
        .args(["--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let report = stdout_json(&output);
    assert_eq!(report["dataset"]["status"], "ready");
    assert_eq!(report["dataset"]["format"], "csv");
    assert_eq!(report["dataset"]["row_count"], 3);
    assert_eq!(report["dataset"]["name"], "reviews.csv");
    assert_eq!(report["stats"]["columns"].as_array().unwrap().len(), 2);
}

#[test]
fn test_ingest_with_small_chunk_threshold_uploads_in_chunks() {
    let home = TempDir::new().unwrap();
    let mut csv = String::from("text\n");
    for i in 0..50 {
        csv.push_str(&format!("row number {i}\n"));
    }
    let file = write_file(&home, "rows.csv", &csv);

    let output = dataforge(&home)
        .env("DATAFORGE_ENGINE__CHUNK_THRESHOLD_BYTES", "64")
        .arg("ingest")
        .arg(&file)
        .args(["--output", "json", "--name", "chunked"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let report = stdout_json(&output);
    assert_eq!(report["dataset"]["name"], "chunked");
    assert_eq!(report["dataset"]["row_count"], 50);
    assert_eq!(report["dataset"]["size_bytes"], csv.len());
}

#[test]
fn test_ingest_missing_file_is_a_file_error() {
    let home = TempDir::new().unwrap();
    dataforge(&home)
        .args(["ingest", "does-not-exist.csv"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("File Error"));
}

#[test]
fn test_ingest_empty_file_is_invalid_input() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "empty.csv", "");
    dataforge(&home)
        .arg("ingest")
        .arg(&file)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("invalid input"));
}

#[test]
fn test_preview_limits_rows() {
    let home = TempDir::new().unwrap();
    let file = write_file(
        &home,
        "notes.jsonl",
        "{\"text\": \"a\"}\n{\"text\": \"b\"}\n{\"text\": \"c\"}\n",
    );

    let output = dataforge(&home)
        .arg("preview")
        .arg(&file)
        .args(["-n", "2", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let preview = stdout_json(&output);
    assert_eq!(preview["rows"].as_array().unwrap().len(), 2);
    assert_eq!(preview["total_rows"], 3);
    assert_eq!(preview["columns"][0], "text");
}

#[test]
fn test_run_dedup_writes_csv_artifact() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "dupes.csv", "text\nalpha\nalpha\nbeta\n");
    let out_dir = home.path().join("out");

    let output = dataforge(&home)
        .arg("run")
        .arg(&file)
        .args(["--stage", "deduplication", "--export", "csv", "--output", "json"])
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let job = stdout_json(&output);
    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"]["total_rows_before"], 3);
    assert_eq!(job["result"]["total_rows_after"], 2);

    let id = job["id"].as_str().unwrap();
    let artifact = out_dir.join("jobs").join(id).join("output.csv");
    assert_eq!(fs::read_to_string(artifact).unwrap(), "text\nalpha\nbeta\n");
    assert!(out_dir.join("jobs").join(id).join("result.json").exists());
}

#[test]
fn test_run_with_options_and_text_output() {
    let home = TempDir::new().unwrap();
    let file = write_file(
        &home,
        "contacts.csv",
        "text\nmail jane@example.com today\nnothing here\n",
    );

    dataforge(&home)
        .arg("run")
        .arg(&file)
        .args(["-s", "pii_scrubbing", "-o", "pii_scrubbing.action=flag"])
        .arg("--out-dir")
        .arg(home.path().join("out"))
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("pii_scrubbing"));
}

#[test]
fn test_run_from_pipeline_file() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "d.csv", "text\nx\nx\n");
    let pipeline = write_file(
        &home,
        "pipeline.json",
        r#"{"stages": [{"stage": "deduplication"}, {"stage": "noise_removal", "enabled": false}], "output_format": "json"}"#,
    );
    let out_dir = home.path().join("out");

    let output = dataforge(&home)
        .arg("run")
        .arg(&file)
        .arg("--pipeline")
        .arg(&pipeline)
        .args(["--output", "json"])
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let job = stdout_json(&output);
    assert_eq!(job["output_format"], "json");
    assert_eq!(job["result"]["stages"][1]["skipped"], true);
    let id = job["id"].as_str().unwrap();
    assert!(out_dir.join("jobs").join(id).join("output.json").exists());
}

#[test]
fn test_run_unknown_stage_suggests_the_closest_one() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "d.csv", "text\nx\n");

    dataforge(&home)
        .arg("run")
        .arg(&file)
        .args(["--stage", "deduplicaton"])
        .arg("--out-dir")
        .arg(home.path().join("out"))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Did you mean 'deduplication'?"));
}

#[test]
fn test_run_out_of_range_option_names_the_field() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "d.csv", "text\nx\n");

    dataforge(&home)
        .arg("run")
        .arg(&file)
        .args(["-s", "quality_scorer", "-o", "quality_scorer.threshold=42"])
        .arg("--out-dir")
        .arg(home.path().join("out"))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("threshold"));
}

#[test]
fn test_config_set_get_roundtrip_through_binary() {
    let home = TempDir::new().unwrap();

    dataforge(&home)
        .args(["config", "set", "engine.worker_count", "4"])
        .assert()
        .success();
    dataforge(&home)
        .args(["config", "get", "engine.worker_count"])
        .assert()
        .success()
        .stdout("4\n");

    assert!(home.path().join("config/dataforge/config.toml").exists());
}

#[test]
fn test_config_set_rejects_invalid_value() {
    let home = TempDir::new().unwrap();
    dataforge(&home)
        .args(["config", "set", "engine.worker_count", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("worker_count"));
}

#[test]
fn test_env_overrides_configuration() {
    let home = TempDir::new().unwrap();
    dataforge(&home)
        .env("DATAFORGE_ENGINE__PREVIEW_ROWS", "7")
        .args(["config", "get", "engine.preview_rows"])
        .assert()
        .success()
        .stdout("7\n");
}

#[test]
fn test_completions_generate_script() {
    let home = TempDir::new().unwrap();
    dataforge(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dataforge"));
}
