use assert_cmd::Command;

#[test]
fn help_lists_every_subcommand() {
    let output = Command::cargo_bin("i2v")
        .unwrap()
        .arg("--help")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["setup", "prompts", "generate", "check", "clean"] {
        assert!(stdout.contains(subcommand), "missing {subcommand}");
    }
}

#[test]
fn clean_refuses_without_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::cargo_bin("i2v")
        .unwrap()
        .current_dir(dir.path())
        .arg("clean")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--yes"), "unexpected stderr: {stderr}");
    // Nothing was deleted because nothing was created
    assert!(!dir.path().join("dataset").join("first_frames").exists());
}

#[test]
fn generate_with_zero_workers_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::cargo_bin("i2v")
        .unwrap()
        .current_dir(dir.path())
        .args(["generate", "--generator", "model-runner", "--workers", "0"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("at least one worker"),
        "unexpected stderr: {stderr}"
    );
}
