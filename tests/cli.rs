//! Command line front end

use std::path::Path;
use std::process::Command;

fn livegraph() -> Command {
    Command::new(env!("CARGO_BIN_EXE_livegraph"))
}

#[test]
fn test_classes_lists_builtin_nodes() {
    let output = livegraph().arg("classes").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    for class in ["Add", "Counter", "Delay", "Print", "Scale", "Switch"] {
        assert!(stdout.lines().any(|line| line == class), "missing {}", class);
    }
}

#[test]
fn test_describe_shows_bridges() {
    let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/scale.json");
    let output = livegraph().arg("describe").arg(demo).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("process:worker"));
    assert!(stdout.contains("thread:sink"));
    assert!(stdout.contains("count:value->scale:in"));
}

#[test]
fn test_run_rejects_missing_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let output = livegraph()
        .arg("run")
        .arg(dir.path().join("missing.json"))
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_run_rejects_unrepresentable_duration() {
    let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/scale.json");
    let output = livegraph()
        .arg("run")
        .arg(demo)
        .args(["--seconds", "inf"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("invalid --seconds"));
    assert!(!stderr.contains("panicked"));
}
