//! Global concurrency gate and dispatch routing
//!
//! Every command execution in the process funnels through `submit`: it is the
//! only caller of the Process Runner and the Session Manager, which is what
//! makes the global ceiling enforceable. Admission is a counting semaphore
//! with FIFO waiters, so excess requests queue in arrival order while
//! commands against different containers run in parallel.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::exegol::ExegolCli;
use crate::execution::{ExecutionRequest, ExecutionResult};
use crate::parser::ParserRegistry;
use crate::sanitize;
use crate::session::SessionManager;

pub struct ExecutionCoordinator {
    config: Arc<EngineConfig>,
    cli: ExegolCli,
    sessions: Arc<SessionManager>,
    parser: ParserRegistry,
    permits: Arc<Semaphore>,
}

impl ExecutionCoordinator {
    pub fn new(config: Arc<EngineConfig>, sessions: Arc<SessionManager>) -> Self {
        let cli = ExegolCli::new(config.exegol_path.clone());
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            cli,
            sessions,
            parser: ParserRegistry::new(),
            permits,
        }
    }

    /// Permits currently free; equals the ceiling when the gate is idle.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Execute one request under the global ceiling.
    ///
    /// Routing: session reuse when requested and enabled, one-shot dispatch
    /// otherwise. Truncation and best-effort parsing are applied to the
    /// result before it is returned; parse failures never affect the
    /// execution outcome.
    #[instrument(skip(self, request), fields(container = %request.container, use_session = request.use_session))]
    pub async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        sanitize::validate_container_name(&request.container)?;

        let timeout = self.config.effective_timeout(request.timeout);

        let _permit = self
            .permits
            .acquire()
            .await
            .expect("permit semaphore is never closed");
        debug!(in_flight = self.config.max_concurrent - self.available_permits(), "admitted");

        let mut result = if request.use_session && self.config.use_sessions {
            self.sessions.exec(&request, timeout).await?
        } else {
            self.cli.exec(&request, timeout).await?
        };

        result.apply_truncation(&self.config);
        if self.config.auto_parse_output && !result.stdout.is_empty() {
            result.parsed_output = self.parser.parse(&request.command, &result.stdout);
        }

        Ok(result)
    }
}
