//! Inbound operation surface
//!
//! The transport-agnostic entry points a caller (CLI, RPC layer) invokes.
//! Every operation returns a uniform envelope: `success`, operation-specific
//! `data`, an `error` block with code/message/remediation on failure, and
//! `metadata` with an ISO-8601 timestamp and duration. Operations never
//! return `Err`; failures are envelopes too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::catalog;
use crate::config::EngineConfig;
use crate::coordinator::ExecutionCoordinator;
use crate::engine::WorkflowEngine;
use crate::error::{EngineError, Remediation, Result};
use crate::exegol::ExegolCli;
use crate::execution::ExecutionRequest;
use crate::sanitize;
use crate::session::SessionManager;
use crate::workflow::{WorkflowCatalog, WorkflowCategory, WorkflowDifficulty, WorkflowFilter};

/// Structured error block of a failed response
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl From<&EngineError> for ApiError {
    fn from(err: &EngineError) -> Self {
        ApiError {
            error_code: err.error_code().to_string(),
            message: err.to_string(),
            remediation: err.remediation().map(str::to_string),
        }
    }
}

/// Uniform response envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub metadata: Value,
}

impl ApiResponse {
    fn ok(tool: &str, data: Value, elapsed: Duration) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            metadata: metadata(tool, elapsed),
        }
    }

    fn fail(tool: &str, err: &EngineError, elapsed: Duration) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError::from(err)),
            metadata: metadata(tool, elapsed),
        }
    }
}

fn metadata(tool: &str, elapsed: Duration) -> Value {
    json!({
        "tool": tool,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "duration_ms": elapsed.as_millis() as u64,
    })
}

/// Owns the engine's components and exposes the operation set
pub struct Operations {
    config: Arc<EngineConfig>,
    cli: ExegolCli,
    sessions: Arc<SessionManager>,
    coordinator: Arc<ExecutionCoordinator>,
    engine: WorkflowEngine,
    started: Instant,
}

impl Operations {
    pub fn new(config: EngineConfig, catalog: WorkflowCatalog) -> Self {
        let config = Arc::new(config);
        let cli = ExegolCli::new(config.exegol_path.clone());
        let sessions = Arc::new(SessionManager::new(
            config.exegol_path.clone(),
            config.session_idle_timeout(),
        ));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&sessions),
        ));
        let engine = WorkflowEngine::new(Arc::clone(&config), catalog, Arc::clone(&coordinator));
        Operations {
            config,
            cli,
            sessions,
            coordinator,
            engine,
            started: Instant::now(),
        }
    }

    /// Assemble with the built-in workflow catalog.
    pub fn with_builtin_catalog(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(config, catalog::builtin()?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start background maintenance (the session idle sweep).
    pub fn start_background(&self) {
        if self.config.use_sessions {
            self.sessions
                .start_sweeper(self.config.session_sweep_interval());
        }
    }

    /// Tear down sessions and background tasks.
    pub async fn shutdown(&self) {
        self.sessions.stop_sweeper();
        self.sessions.close_all().await;
    }

    /// Execute one command in a container.
    pub async fn execute(
        &self,
        container: &str,
        command: &str,
        timeout_secs: Option<u64>,
        use_session: bool,
    ) -> ApiResponse {
        let start = Instant::now();
        let outcome = self
            .execute_inner(container, command, timeout_secs, use_session)
            .await;
        match outcome {
            Ok(data) => ApiResponse::ok("execute", data, start.elapsed()),
            Err(e) => ApiResponse::fail("execute", &e, start.elapsed()),
        }
    }

    async fn execute_inner(
        &self,
        container: &str,
        command: &str,
        timeout_secs: Option<u64>,
        use_session: bool,
    ) -> Result<Value> {
        // Direct commands are caller-supplied text; screen them here,
        // before any permit is taken or process spawned.
        sanitize::validate_command(command)?;

        let mut request = ExecutionRequest::new(container, command).use_session(use_session);
        if let Some(secs) = timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }

        let result = self.coordinator.submit(request).await?;
        Ok(serde_json::to_value(&result).expect("result serializes"))
    }

    /// Enumerate known containers.
    pub async fn list_containers(&self) -> ApiResponse {
        let start = Instant::now();
        match self.cli.list_containers().await {
            Ok(containers) => {
                let total = containers.len();
                ApiResponse::ok(
                    "list_containers",
                    json!({ "containers": containers, "total_count": total }),
                    start.elapsed(),
                )
            }
            Err(e) => ApiResponse::fail("list_containers", &e, start.elapsed()),
        }
    }

    /// Engine health and configuration snapshot.
    pub async fn status(&self) -> ApiResponse {
        let start = Instant::now();
        let exegol_version = self.cli.version().await;
        let sessions = self.sessions.sessions_info().await;

        let data = json!({
            "engine": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "exegol_available": exegol_version.is_some(),
            "exegol_version": exegol_version,
            "uptime_seconds": self.started.elapsed().as_secs(),
            "sessions": sessions,
            "configuration": {
                "exegol_path": self.config.exegol_path,
                "command_timeout_secs": self.config.command_timeout_secs,
                "max_timeout_secs": self.config.max_timeout_secs,
                "max_concurrent": self.config.max_concurrent,
                "use_sessions": self.config.use_sessions,
                "session_idle_timeout_secs": self.config.session_idle_timeout_secs,
                "auto_parse_output": self.config.auto_parse_output,
            },
        });
        ApiResponse::ok("status", data, start.elapsed())
    }

    /// List catalog workflows with optional filtering.
    pub fn list_workflows(
        &self,
        category: Option<&str>,
        difficulty: Option<&str>,
        tags: &[String],
    ) -> ApiResponse {
        let start = Instant::now();
        let filter = match self.build_filter(category, difficulty, tags) {
            Ok(filter) => filter,
            Err(e) => return ApiResponse::fail("list_workflows", &e, start.elapsed()),
        };

        let workflows: Vec<Value> = self
            .engine
            .list(&filter)
            .iter()
            .map(|w| w.summary())
            .collect();
        let total = workflows.len();
        ApiResponse::ok(
            "list_workflows",
            json!({ "workflows": workflows, "total_count": total }),
            start.elapsed(),
        )
    }

    fn build_filter(
        &self,
        category: Option<&str>,
        difficulty: Option<&str>,
        tags: &[String],
    ) -> Result<WorkflowFilter> {
        let category = category
            .map(|raw| {
                WorkflowCategory::parse(raw).ok_or_else(|| {
                    EngineError::InvalidInput(format!("unknown category '{raw}'"))
                })
            })
            .transpose()?;
        let difficulty = difficulty
            .map(|raw| {
                WorkflowDifficulty::parse(raw).ok_or_else(|| {
                    EngineError::InvalidInput(format!("unknown difficulty '{raw}'"))
                })
            })
            .transpose()?;
        Ok(WorkflowFilter {
            category,
            difficulty,
            tags: tags.to_vec(),
        })
    }

    /// Run a catalog workflow against a container.
    pub async fn run_workflow(
        &self,
        workflow_id: &str,
        container: &str,
        params: &HashMap<String, String>,
    ) -> ApiResponse {
        let start = Instant::now();
        info!(workflow_id, container, "run_workflow invoked");
        match self.engine.run(workflow_id, container, params).await {
            Ok(run) => ApiResponse::ok(
                "run_workflow",
                serde_json::to_value(&run).expect("run serializes"),
                start.elapsed(),
            ),
            Err(e) => ApiResponse::fail("run_workflow", &e, start.elapsed()),
        }
    }
}
