//! Runs the binary against the real pretrained model from the Hugging Face Hub.
//! Needs network access (or a warm hub cache) and a few GB of memory.

#[path = "../common/mod.rs"]
mod common;

use common::{tone, write_wav};
use detect_gender::Classification;
use std::path::Path;
use std::process::Command;

fn should_run() -> bool {
    std::env::var("DETECT_GENDER_E2E")
        .map(|v| v == "1")
        .unwrap_or(false)
}

fn classify(audio: &Path) -> Vec<Classification> {
    let output = Command::new(env!("CARGO_BIN_EXE_detect-gender"))
        .args(["--backend", "ndarray"])
        .arg(audio)
        .output()
        .expect("run detect-gender");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn pretrained_model_classifies_silence() {
    if !should_run() {
        eprintln!("Skipping E2E test; set DETECT_GENDER_E2E=1 to enable.");
        return;
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let audio = write_wav(dir.path(), "silence.wav", &[vec![0.0; 16000]], 16000);

    let first = classify(&audio);
    let mut labels: Vec<&str> = first.iter().map(|r| r.label.as_str()).collect();
    labels.sort_unstable();
    assert_eq!(labels, ["female", "male"]);
    let total: f32 = first.iter().map(|r| r.score).sum();
    assert!((total - 1.0).abs() < 1e-3, "scores sum to {total}");

    let second = classify(&audio);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.label, b.label);
        assert!((a.score - b.score).abs() < 1e-4);
    }
}

#[test]
fn pretrained_model_accepts_resampled_stereo() {
    if !should_run() {
        eprintln!("Skipping E2E test; set DETECT_GENDER_E2E=1 to enable.");
        return;
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let audio = write_wav(dir.path(), "tone.wav", &tone(1.0, 44100, 2), 44100);
    let results = classify(&audio);
    assert_eq!(results.len(), 2);
    assert!(results[0].score >= results[1].score);
}
