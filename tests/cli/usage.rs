use std::process::{Command, Output};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_detect-gender"))
        .args(args)
        .env("HF_HUB_OFFLINE", "1")
        .output()
        .expect("run detect-gender")
}

#[test]
fn no_arguments_is_a_usage_error() {
    let output = run(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr: {stderr}");
}

#[test]
fn two_arguments_is_a_usage_error() {
    let output = run(&["a.wav", "b.wav"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("exactly one"));
}

#[test]
fn unknown_option_is_a_usage_error() {
    let output = run(&["--no-such-flag", "a.wav"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn help_succeeds() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("AUDIO_PATH"));
}

#[test]
fn missing_file_fails_without_json() {
    let output = run(&["definitely/not/here.wav"]);
    assert!(!output.status.success());
    assert_ne!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(serde_json::from_str::<serde_json::Value>(&stdout).is_err());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to decode"));
}

#[test]
fn text_file_with_audio_extension_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("speech.wav");
    std::fs::write(&path, "plain text pretending to be audio").expect("write text");

    let output = run(&[path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
