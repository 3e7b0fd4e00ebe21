#[path = "../common/mod.rs"]
mod common;

use common::{tone, write_tiny_model, write_wav, TINY_RECEPTIVE_FIELD};
use detect_gender::Classification;
use std::path::Path;
use std::process::{Command, Output};

fn classify(config: &Path, audio: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_detect-gender"))
        .arg("--config")
        .arg(config)
        .args(extra)
        .arg(audio)
        .output()
        .expect("run detect-gender")
}

fn parse(output: &Output) -> Vec<Classification> {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout.clone()).expect("utf8 stdout");
    assert!(stdout.ends_with('\n'));
    serde_json::from_str(&stdout).expect("json output")
}

#[test]
fn silence_yields_ranked_labels_summing_to_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_tiny_model(dir.path());
    let audio = write_wav(dir.path(), "silence.wav", &[vec![0.0; 16000]], 16000);

    let results = parse(&classify(&config, &audio, &[]));
    assert_eq!(results.len(), 2);
    let total: f32 = results.iter().map(|r| r.score).sum();
    assert!((total - 1.0).abs() < 1e-4, "scores sum to {total}");
    assert!(results[0].score >= results[1].score);
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    let mut labels: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
    labels.sort_unstable();
    assert_eq!(labels, ["female", "male"]);
}

#[test]
fn output_is_an_array_of_label_score_objects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_tiny_model(dir.path());
    let audio = write_wav(dir.path(), "tone.wav", &tone(0.5, 16000, 1), 16000);

    let output = classify(&config, &audio, &[]);
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let entries = value.as_array().expect("array");
    for entry in entries {
        let object = entry.as_object().expect("object");
        assert_eq!(object.len(), 2);
        assert!(object["label"].is_string());
        assert!(object["score"].is_number());
    }
}

#[test]
fn repeated_runs_are_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_tiny_model(dir.path());
    let audio = write_wav(dir.path(), "tone.wav", &tone(1.0, 16000, 1), 16000);

    let first = parse(&classify(&config, &audio, &[]));
    let second = parse(&classify(&config, &audio, &[]));
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.label, b.label);
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

#[test]
fn top_k_option_limits_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_tiny_model(dir.path());
    let audio = write_wav(dir.path(), "tone.wav", &tone(0.5, 16000, 1), 16000);

    let results = parse(&classify(&config, &audio, &["--top-k", "1"]));
    assert_eq!(results.len(), 1);

    let output = classify(&config, &audio, &["--top-k", "0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn stereo_audio_at_other_rates_is_accepted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_tiny_model(dir.path());
    let audio = write_wav(dir.path(), "stereo.wav", &tone(0.5, 44100, 2), 44100);

    let results = parse(&classify(&config, &audio, &["--verbose"]));
    assert_eq!(results.len(), 2);
}

#[test]
fn verbose_reports_on_stderr_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_tiny_model(dir.path());
    let audio = write_wav(dir.path(), "tone.wav", &tone(0.25, 16000, 1), 16000);

    let output = classify(&config, &audio, &["-v"]);
    let results = parse(&output);
    assert_eq!(results.len(), 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pipeline.classify"), "stderr: {stderr}");
}

#[test]
fn audio_shorter_than_receptive_field_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_tiny_model(dir.path());
    let audio = write_wav(
        dir.path(),
        "click.wav",
        &[vec![0.5; TINY_RECEPTIVE_FIELD - 1]],
        16000,
    );

    let output = classify(&config, &audio, &[]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("receptive field"));
}
