//! Smoke tests -- verify the binary runs and its subcommands behave.

use assert_cmd::Command;
use predicates::prelude::*;

fn sensorwatch() -> Command {
    let mut cmd = Command::cargo_bin("sensorwatch").unwrap();
    cmd.env_remove("SENSORWATCH_CONFIG").env("RUST_LOG", "warn");
    cmd
}

fn simulated(samples: usize, ratio: f64) -> String {
    let out = sensorwatch()
        .args(["simulate", "--samples", &samples.to_string(), "--seed", "3", "--start-ms", "0"])
        .args(["--anomaly-ratio", &ratio.to_string()])
        .output()
        .unwrap();
    assert!(out.status.success());
    String::from_utf8(out.stdout).unwrap()
}

#[test]
fn test_cli_help() {
    sensorwatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Streaming anomaly detection"));
}

#[test]
fn test_cli_version() {
    sensorwatch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sensorwatch"));
}

#[test]
fn test_check_config_defaults() {
    sensorwatch()
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("method = \"zscore\""))
        .stdout(predicate::str::contains("window_size = 100"));
}

#[test]
fn test_check_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sensorwatch.toml");
    std::fs::write(&path, "method = \"iqr\"\nwindow_size = 50\n\n[hysteresis]\nenabled = true\n").unwrap();

    sensorwatch()
        .args(["check-config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("method = \"iqr\""))
        .stdout(predicate::str::contains("window_size = 50"));
}

#[test]
fn test_check_config_rejects_contradiction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "zscore_threshold = 2.0\nzscore_warning = 3.0\n").unwrap();

    sensorwatch()
        .args(["check-config", "--config"])
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn test_simulate_is_reproducible() {
    let a = simulated(20, 0.1);
    let b = simulated(20, 0.1);
    assert_eq!(a, b);
    assert_eq!(a.lines().count(), 20);
    assert!(a.contains("\"temperature\""));
    assert!(a.contains("\"pressure\""));
}

#[test]
fn test_run_scores_simulated_stream() {
    let input = simulated(30, 0.0);
    let out = sensorwatch().arg("run").write_stdin(input).output().unwrap();
    assert!(out.status.success());

    let stdout = String::from_utf8(out.stdout).unwrap();
    let records: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 30);
    for r in &records {
        assert!(r.get("isAnomaly").is_some());
        let sink = r["sink"].as_str().unwrap();
        let expected = if r["isAnomaly"] == true { "anomaly" } else { "normal" };
        assert_eq!(sink, expected);
        assert_eq!(r["inputFormat"], "multi-sensor");
    }
    assert_eq!(records[0]["warmup"], true);
}

#[test]
fn test_run_skips_bad_lines() {
    let input = "1.0\nnot json\n\n{\"payload\": \"abc\"}\n2.0\n3.0\n";
    sensorwatch()
        .arg("run")
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::function(|s: &str| s.lines().count() == 3));
}

#[test]
fn test_run_persists_state() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state").join("session.json");

    sensorwatch()
        .arg("run")
        .arg("--state")
        .arg(&state)
        .write_stdin("10.0\n11.0\n12.0\n")
        .assert()
        .success();
    assert!(state.exists());

    // The resumed session already has three samples in its window.
    sensorwatch()
        .arg("run")
        .arg("--state")
        .arg(&state)
        .write_stdin("11.0\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"bufferSize\":4"));
}
