//! CLI end-to-end tests
//!
//! Tests for the wavemark command-line interface. Commands that need ffmpeg
//! are only exercised up to the point where it would be invoked.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the wavemark binary
#[allow(deprecated)]
fn wavemark_cmd() -> Command {
    Command::cargo_bin("wavemark").unwrap()
}

fn write_tone(path: &Path, secs: f64, rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(secs * rate as f64) as usize {
        let v = ((i as f32 * 0.05).sin() * 0.5 * i16::MAX as f32) as i16;
        w.write_sample(v).unwrap();
    }
    w.finalize().unwrap();
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = wavemark_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = wavemark_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("wavemark"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_flag() {
    let mut cmd = wavemark_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wavemark"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = wavemark_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_check_tools_command() {
    let mut cmd = wavemark_cmd();
    cmd.arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffmpeg"))
        .stdout(predicate::str::contains("ffprobe"));
}

#[test]
fn test_cli_run_help() {
    let mut cmd = wavemark_cmd();
    cmd.args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--primary"))
        .stdout(predicate::str::contains("--keep-intermediate"));
}

#[test]
fn test_cli_run_requires_inputs() {
    let mut cmd = wavemark_cmd();
    cmd.args(["run", "--output", "out"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--primary"));
}

#[test]
fn test_cli_run_with_no_audio_reports_no_work() {
    let dir = tempdir().unwrap();
    let empty = dir.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    fs::write(empty.join("readme.txt"), "not audio").unwrap();

    let mut cmd = wavemark_cmd();
    cmd.arg("run")
        .arg("--primary")
        .arg(&empty)
        .arg("--watermark")
        .arg(&empty)
        .arg("--output")
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No work items"));
}

#[test]
fn test_cli_run_with_missing_input() {
    let dir = tempdir().unwrap();
    let mut cmd = wavemark_cmd();
    cmd.arg("run")
        .arg("--primary")
        .arg(dir.path().join("nope.wav"))
        .arg("--watermark")
        .arg(dir.path().join("tag.wav"))
        .arg("--output")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_plan_single_insertion() {
    let mut cmd = wavemark_cmd();
    let output = cmd
        .args([
            "plan",
            "--primary-duration",
            "60",
            "--watermark-duration",
            "5",
            "--pattern",
            "single_at_end",
            "--volume",
            "0.4",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan = stdout_json(&output);
    assert_eq!(plan["insertions"], 1);
    let segment = &plan["composition"]["watermark_segments"][0];
    assert_eq!(segment["start"].as_f64(), Some(55.0));
    assert_eq!(plan["settings"]["volume"].as_f64(), Some(0.4));
}

#[test]
fn test_cli_plan_is_reproducible_with_seed() {
    let args = [
        "plan",
        "--primary-duration",
        "120",
        "--watermark-duration",
        "2",
        "--pattern",
        "random_interval",
        "--interval",
        "10",
        "--randomness",
        "0.8",
        "--seed",
        "42",
    ];
    let first = wavemark_cmd().args(args).output().unwrap();
    let second = wavemark_cmd().args(args).output().unwrap();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
    assert!(stdout_json(&first)["insertions"].as_u64().unwrap() > 1);
}

#[test]
fn test_cli_plan_rejects_empty_track() {
    let mut cmd = wavemark_cmd();
    cmd.args([
        "plan",
        "--primary-duration",
        "0",
        "--watermark-duration",
        "5",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Composition build failure"));
}

#[test]
fn test_cli_plan_rejects_out_of_range_volume() {
    let mut cmd = wavemark_cmd();
    cmd.args([
        "plan",
        "--primary-duration",
        "30",
        "--watermark-duration",
        "5",
        "--volume",
        "1.5",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("volume"));
}

#[test]
fn test_cli_peaks_json() {
    let dir = tempdir().unwrap();
    let wav = dir.path().join("tone.wav");
    write_tone(&wav, 0.5, 8000);

    let mut cmd = wavemark_cmd();
    let output = cmd
        .arg("peaks")
        .arg(&wav)
        .args(["--buckets", "16"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output);
    let peaks = json["peaks"].as_array().unwrap();
    assert_eq!(peaks.len(), 16);
    assert!(peaks.iter().all(|p| (0.0..=1.0).contains(&p.as_f64().unwrap())));
    assert!(peaks[0].as_f64().unwrap() > 0.1);
    assert_eq!(json["sample_rate"], 8000);
}

#[test]
fn test_cli_peaks_nonexistent_file() {
    let mut cmd = wavemark_cmd();
    cmd.args(["peaks", "/nonexistent/file.wav"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_peaks_rejects_non_audio() {
    let dir = tempdir().unwrap();
    let junk = dir.path().join("junk.wav");
    fs::write(&junk, "definitely not audio").unwrap();

    let mut cmd = wavemark_cmd();
    cmd.arg("peaks")
        .arg(&junk)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid input track"));
}

#[test]
fn test_cli_validate_defaults() {
    let mut cmd = wavemark_cmd();
    cmd.arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("regular_interval"));
}

#[test]
fn test_cli_validate_config_with_warnings() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("wavemark.json");
    fs::write(
        &config,
        r#"{"watermark": {"pattern": "fade_in_out", "loop_interval_secs": 0.0}}"#,
    )
    .unwrap();

    let mut cmd = wavemark_cmd();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("insert only once"));
}

#[test]
fn test_cli_validate_invalid_json() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("broken.json");
    fs::write(&config, "{ not json").unwrap();

    let mut cmd = wavemark_cmd();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("config parse error"));
}
