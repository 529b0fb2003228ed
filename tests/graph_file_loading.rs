// tests/graph_file_loading.rs

//! Loading graph documents from disk (TOML and JSON).

use std::error::Error;

use rundag::config::{load_and_validate, load_from_path};
use rundag_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

const TOML_DOC: &str = r#"
[config]
on_failure = "stop"

[env]
CI = "1"

[region.eu-west]
endpoint = "https://cache-eu.example.com"

[task.build]
cmd = "cargo build"
inputs = ["src/**", "Cargo.toml"]
outputs = ["target/debug/app"]

[task.test]
cmd = "cargo test"
deps = ["build"]
retry = { max_attempts = 3, initial_delay_ms = 250 }
platforms = ["linux", "darwin"]
"#;

#[test]
fn toml_document_round_trips_through_validation() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Rundag.toml");
    std::fs::write(&path, TOML_DOC)?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.task.len(), 2);
    assert_eq!(cfg.env["CI"], "1");
    assert_eq!(
        cfg.region["eu-west"].endpoint,
        "https://cache-eu.example.com"
    );
    // Bucket falls back to the default.
    assert_eq!(cfg.region["eu-west"].bucket, "rundag-cache");

    let retry = cfg.task["test"].retry.unwrap();
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.initial_delay_ms, 250);
    Ok(())
}

#[test]
fn json_document_is_selected_by_extension() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("graph.json");
    std::fs::write(
        &path,
        r#"{
            "task": {
                "lint": { "cmd": "cargo clippy" },
                "build": { "cmd": "cargo build", "deps": ["lint"] }
            }
        }"#,
    )?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.task["build"].deps, vec!["lint"]);
    Ok(())
}

#[test]
fn unknown_field_is_rejected_at_parse_time() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Rundag.toml");
    std::fs::write(
        &path,
        r#"
        [task.build]
        cmd = "make"
        retrys = 3
        "#,
    )?;

    let err = load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("retrys") || format!("{err:#}").contains("retrys"));
    Ok(())
}

#[test]
fn dependency_cycle_is_diagnosed_with_the_full_path() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Rundag.toml");
    std::fs::write(
        &path,
        r#"
        [task.a]
        cmd = "echo a"
        deps = ["c"]

        [task.b]
        cmd = "echo b"
        deps = ["a"]

        [task.c]
        cmd = "echo c"
        deps = ["b"]
        "#,
    )?;

    let err = load_and_validate(&path).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("cycle"), "unexpected error: {message}");
    // All three participants show up in the reported path.
    for task in ["a", "b", "c"] {
        assert!(message.contains(task), "missing {task} in: {message}");
    }
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_and_validate("/definitely/not/here/Rundag.toml").unwrap_err();
    assert!(format!("{err:#}").to_lowercase().contains("no such file"));
}
