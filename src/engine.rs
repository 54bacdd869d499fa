//! Workflow Engine: drives multi-step runs through the coordinator
//!
//! Preconditions (unknown workflow, missing/unsafe parameters, unresolved
//! placeholders) reject the run before any step executes, so a rejected run
//! has no side effects. Runtime step failures are results, not errors: the
//! aggregate always records every step attempted, and steps after a
//! non-continuable failure are never reached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::coordinator::ExecutionCoordinator;
use crate::error::{EngineError, Result};
use crate::execution::{ExecutionRequest, ExecutionResult};
use crate::sanitize;
use crate::template::TemplateEngine;
use crate::workflow::{WorkflowCatalog, WorkflowDefinition, WorkflowFilter};

/// Terminal state of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithFailures,
    Failed,
}

/// What happened to one attempted step
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The command ran to a verdict (including non-zero exit and timeout)
    Executed(ExecutionResult),
    /// Dispatch itself failed (collaborator missing, container gone)
    Error { error_code: String, message: String },
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            StepOutcome::Executed(result) => result.is_success(),
            StepOutcome::Error { .. } => false,
        }
    }

    pub fn execution(&self) -> Option<&ExecutionResult> {
        match self {
            StepOutcome::Executed(result) => Some(result),
            StepOutcome::Error { .. } => None,
        }
    }
}

/// One entry of the run aggregate, parallel to step order
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub succeeded: bool,
    pub continue_on_failure: bool,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Aggregate result of one workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunResult {
    pub workflow_id: String,
    pub container: String,
    pub params: HashMap<String, String>,
    pub status: RunStatus,
    pub steps_total: usize,
    pub step_results: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl WorkflowRunResult {
    pub fn steps_attempted(&self) -> usize {
        self.step_results.len()
    }
}

/// Holds the catalog and turns definitions into sequenced executions
pub struct WorkflowEngine {
    config: Arc<EngineConfig>,
    catalog: WorkflowCatalog,
    coordinator: Arc<ExecutionCoordinator>,
    templates: TemplateEngine,
}

impl WorkflowEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        catalog: WorkflowCatalog,
        coordinator: Arc<ExecutionCoordinator>,
    ) -> Self {
        Self {
            config,
            catalog,
            coordinator,
            templates: TemplateEngine::new(),
        }
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// List catalog entries matching the filter.
    pub fn list(&self, filter: &WorkflowFilter) -> Vec<&WorkflowDefinition> {
        self.catalog.list(filter)
    }

    /// Run a workflow end to end.
    ///
    /// `Err` means the run was rejected before any step executed; a returned
    /// `WorkflowRunResult` may still carry `Failed` status from a step.
    #[instrument(skip(self, params))]
    pub async fn run(
        &self,
        workflow_id: &str,
        container: &str,
        params: &HashMap<String, String>,
    ) -> Result<WorkflowRunResult> {
        let workflow = self
            .catalog
            .get(workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound {
                id: workflow_id.to_string(),
            })?;

        sanitize::validate_container_name(container)?;

        let missing: Vec<String> = workflow
            .required_params
            .iter()
            .filter(|name| params.get(*name).map_or(true, |v| v.is_empty()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::MissingParams {
                id: workflow_id.to_string(),
                missing,
            });
        }

        for (name, value) in params {
            sanitize::validate_param_value(name, value)?;
        }

        // Render everything up front: an unresolved placeholder anywhere
        // rejects the whole run before the first command is dispatched.
        let mut commands = Vec::with_capacity(workflow.steps.len());
        for step in &workflow.steps {
            let rendered = self.templates.render(&step.command_template, params);
            if !rendered.unresolved.is_empty() {
                return Err(EngineError::UnresolvedPlaceholder {
                    step: step.name.clone(),
                    placeholders: rendered.unresolved,
                });
            }
            commands.push(rendered.text);
        }

        info!(
            workflow_id,
            container,
            steps = workflow.steps.len(),
            "starting workflow run"
        );
        let started_at = Utc::now();
        let start = Instant::now();
        let mut step_results = Vec::new();
        let mut status = RunStatus::Running;

        for (step, command) in workflow.steps.iter().zip(commands) {
            info!(step = %step.name, "executing workflow step");

            let request = ExecutionRequest {
                container: container.to_string(),
                command,
                timeout: None,
                use_session: self.config.use_sessions,
            };

            let outcome = match self.coordinator.submit(request).await {
                Ok(result) => StepOutcome::Executed(result),
                Err(e) => StepOutcome::Error {
                    error_code: e.error_code().to_string(),
                    message: e.to_string(),
                },
            };
            let succeeded = outcome.succeeded();
            step_results.push(StepRecord {
                step: step.name.clone(),
                succeeded,
                continue_on_failure: step.continue_on_failure,
                outcome,
            });

            if !succeeded && !step.continue_on_failure {
                warn!(step = %step.name, "step failed, aborting run");
                status = RunStatus::Failed;
                break;
            }
        }

        if status != RunStatus::Failed {
            status = if step_results.iter().all(|record| record.succeeded) {
                RunStatus::Completed
            } else {
                RunStatus::CompletedWithFailures
            };
        }

        info!(workflow_id, ?status, attempted = step_results.len(), "workflow run finished");

        Ok(WorkflowRunResult {
            workflow_id: workflow_id.to_string(),
            container: container.to_string(),
            params: params.clone(),
            status,
            steps_total: workflow.steps.len(),
            step_results,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use std::os::unix::fs::PermissionsExt;

    fn stub_cli(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("exegol");
        std::fs::write(
            &path,
            "#!/bin/sh\nif [ \"$1\" = \"exec\" ]; then shift 3; exec sh -c \"$1\"; fi\nexit 2\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    const THREE_STEP_CATALOG: &str = r#"
workflows:
  - id: three_step
    name: Three Step
    description: middle step fails
    category: recon
    difficulty: easy
    required_params: [marker]
    steps:
      - name: first
        command_template: "echo start-{marker}"
      - name: second
        command_template: "ls /definitely/not/a/path/{marker}"
      - name: third
        command_template: "echo end-{marker}"
"#;

    const THREE_STEP_LENIENT: &str = r#"
workflows:
  - id: three_step
    name: Three Step
    description: middle step fails but continues
    category: recon
    difficulty: easy
    required_params: [marker]
    steps:
      - name: first
        command_template: "echo start-{marker}"
      - name: second
        command_template: "ls /definitely/not/a/path/{marker}"
        continue_on_failure: true
      - name: third
        command_template: "echo end-{marker}"
"#;

    fn engine(dir: &tempfile::TempDir, catalog_yaml: &str) -> WorkflowEngine {
        let mut config = EngineConfig::default();
        config.exegol_path = stub_cli(dir);
        let config = Arc::new(config);
        let sessions = Arc::new(SessionManager::new(
            config.exegol_path.clone(),
            config.session_idle_timeout(),
        ));
        let coordinator = Arc::new(ExecutionCoordinator::new(Arc::clone(&config), sessions));
        let catalog = WorkflowCatalog::from_yaml(catalog_yaml).unwrap();
        WorkflowEngine::new(config, catalog, coordinator)
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn failing_step_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, THREE_STEP_CATALOG);
        let run = engine
            .run("three_step", "box1", &params(&[("marker", "abc")]))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.steps_attempted(), 2);
        assert_eq!(run.steps_total, 3);
        assert!(run.step_results[0].succeeded);
        assert!(!run.step_results[1].succeeded);
    }

    #[tokio::test]
    async fn continue_on_failure_reaches_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, THREE_STEP_LENIENT);
        let run = engine
            .run("three_step", "box1", &params(&[("marker", "abc")]))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::CompletedWithFailures);
        assert_eq!(run.steps_attempted(), 3);
        assert!(!run.step_results[1].succeeded);
        assert!(run.step_results[2].succeeded);
        let last = run.step_results[2].outcome.execution().unwrap();
        assert!(last.stdout.contains("end-abc"));
    }

    #[tokio::test]
    async fn missing_required_param_rejects_before_execution() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, THREE_STEP_CATALOG);
        let err = engine
            .run("three_step", "box1", &params(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "MISSING_PARAMS");
    }

    #[tokio::test]
    async fn unknown_workflow_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, THREE_STEP_CATALOG);
        let err = engine
            .run("no_such_workflow", "box1", &params(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "WORKFLOW_NOT_FOUND");
    }

    #[tokio::test]
    async fn unsafe_param_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, THREE_STEP_CATALOG);
        let err = engine
            .run("three_step", "box1", &params(&[("marker", "x;rm -rf /")]))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNSAFE_INPUT");
    }

    #[tokio::test]
    async fn step_order_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, THREE_STEP_LENIENT);

        let mut sequences = Vec::new();
        for _ in 0..3 {
            let run = engine
                .run("three_step", "box1", &params(&[("marker", "abc")]))
                .await
                .unwrap();
            let names: Vec<String> = run.step_results.iter().map(|r| r.step.clone()).collect();
            sequences.push(names);
        }
        assert!(sequences.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(sequences[0], vec!["first", "second", "third"]);
    }
}
