//! End-to-end execution through the operation surface

mod common;

use std::time::{Duration, Instant};

use exrun::Operations;

fn ops(dir: &tempfile::TempDir) -> Operations {
    Operations::with_builtin_catalog(common::stub_config(dir.path())).unwrap()
}

#[tokio::test]
async fn execute_echo_returns_stdout_and_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let ops = ops(&dir);

    let response = ops.execute("box1", "echo hi", Some(5), false).await;
    assert!(response.success, "expected success: {response:?}");
    let data = response.data.unwrap();
    assert_eq!(data["exit_code"], 0);
    assert_eq!(data["timed_out"], false);
    assert!(data["stdout"].as_str().unwrap().contains("hi"));
    assert_eq!(data["container"], "box1");
}

#[tokio::test]
async fn execute_against_unknown_container_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let ops = ops(&dir);

    let response = ops.execute("missing", "whoami", None, false).await;
    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.error_code, "CONTAINER_NOT_FOUND");
    assert!(error.remediation.is_some());
}

#[tokio::test]
async fn execute_against_stopped_container_reports_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let ops = ops(&dir);

    // box2 is listed by `info` but not running
    let response = ops.execute("box2", "whoami", None, false).await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().error_code, "CONTAINER_NOT_RUNNING");
}

#[tokio::test]
async fn timeout_yields_sentinel_and_bounded_duration() {
    let dir = tempfile::tempdir().unwrap();
    let ops = ops(&dir);

    let start = Instant::now();
    let response = ops.execute("box1", "sleep 30", Some(1), false).await;
    let elapsed = start.elapsed();

    assert!(response.success, "a timeout is a result, not an error");
    let data = response.data.unwrap();
    assert_eq!(data["exit_code"], -1);
    assert_eq!(data["timed_out"], true);

    let duration_ms = data["duration_ms"].as_u64().unwrap();
    assert!(duration_ms >= 1000, "duration below the deadline: {duration_ms}");
    assert!(
        elapsed < Duration::from_secs(5),
        "kill did not happen near the deadline: {elapsed:?}"
    );
}

#[tokio::test]
async fn requested_timeout_is_capped_by_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::stub_config(dir.path());
    config.max_timeout_secs = 1;
    config.command_timeout_secs = 1;
    let ops = Operations::with_builtin_catalog(config).unwrap();

    // Caller asks for far more than the cap; the cap wins.
    let start = Instant::now();
    let response = ops.execute("box1", "sleep 30", Some(600), false).await;
    assert!(response.success);
    assert_eq!(response.data.unwrap()["timed_out"], true);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn long_output_is_truncated_with_bookkeeping() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::stub_config(dir.path());
    config.max_output_lines = 50;
    let ops = Operations::with_builtin_catalog(config).unwrap();

    let response = ops.execute("box1", "seq 1 500", None, false).await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["stdout_truncated"], true);
    assert!(data["original_stdout_lines"].as_u64().unwrap() >= 500);
    assert!(data["stdout"].as_str().unwrap().contains("lines truncated"));
}

#[tokio::test]
async fn auto_parse_attaches_structured_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::stub_config(dir.path());
    config.auto_parse_output = true;
    let ops = Operations::with_builtin_catalog(config).unwrap();

    // The stub runs the command locally, so fake an nmap run with printf
    let fake_nmap = "printf 'Nmap scan report for target.local\\n22/tcp open ssh\\n80/tcp open http\\n'";
    let response = ops.execute("box1", fake_nmap, None, false).await;
    assert!(response.success);
    let data = response.data.unwrap();
    let parsed = &data["parsed_output"];
    assert_eq!(parsed["tool"], "nmap");
    assert_eq!(parsed["data"]["total_open"], 2);
}

#[tokio::test]
async fn parse_failure_never_breaks_execution() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::stub_config(dir.path());
    config.auto_parse_output = true;
    let ops = Operations::with_builtin_catalog(config).unwrap();

    let response = ops.execute("box1", "echo just-noise", None, false).await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert!(data.get("parsed_output").is_none());
    assert!(data["stdout"].as_str().unwrap().contains("just-noise"));
}

#[tokio::test]
async fn list_containers_reports_status() {
    let dir = tempfile::tempdir().unwrap();
    let ops = ops(&dir);

    let response = ops.list_containers().await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["total_count"], 2);
    assert_eq!(data["containers"][0]["status"], "running");
    assert_eq!(data["containers"][1]["status"], "stopped");
}
