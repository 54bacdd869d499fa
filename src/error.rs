//! Error types with stable codes and remediation hints

use std::time::Duration;

use thiserror::Error;

/// Trait for errors that carry an operator-facing remediation hint
pub trait Remediation {
    fn remediation(&self) -> Option<&str>;
}

/// All engine error variants.
///
/// Each variant maps to a stable `error_code()` string so callers can branch
/// on failure class without parsing messages.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Exegol CLI not found at '{path}'")]
    ExegolNotFound { path: String },

    #[error("Container '{name}' not found")]
    ContainerNotFound { name: String },

    #[error("Container '{name}' is not running (status: {status})")]
    ContainerNotRunning { name: String, status: String },

    #[error("Command exceeded {}s timeout", timeout.as_secs())]
    CommandTimeout { timeout: Duration },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rejected unsafe input: {reason}")]
    UnsafeInput { reason: String },

    #[error("Workflow '{id}' not found")]
    WorkflowNotFound { id: String },

    #[error("Workflow '{id}' is missing required parameters: {}", missing.join(", "))]
    MissingParams { id: String, missing: Vec<String> },

    #[error("Step '{step}' has unresolved placeholders: {}", placeholders.join(", "))]
    UnresolvedPlaceholder {
        step: String,
        placeholders: Vec<String>,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Session error for container '{container}': {reason}")]
    Session { container: String, reason: String },

    #[error("Catalog parse error: {0}")]
    CatalogParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::ExegolNotFound { .. } => "EXEGOL_NOT_FOUND",
            EngineError::ContainerNotFound { .. } => "CONTAINER_NOT_FOUND",
            EngineError::ContainerNotRunning { .. } => "CONTAINER_NOT_RUNNING",
            EngineError::CommandTimeout { .. } => "COMMAND_TIMEOUT",
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::UnsafeInput { .. } => "UNSAFE_INPUT",
            EngineError::WorkflowNotFound { .. } => "WORKFLOW_NOT_FOUND",
            EngineError::MissingParams { .. } => "MISSING_PARAMS",
            EngineError::UnresolvedPlaceholder { .. } => "UNRESOLVED_PLACEHOLDER",
            EngineError::Configuration(_) => "CONFIGURATION_ERROR",
            EngineError::Session { .. } => "SESSION_ERROR",
            EngineError::CatalogParse(_) => "CATALOG_PARSE_ERROR",
            EngineError::Io(_) => "IO_ERROR",
        }
    }
}

impl Remediation for EngineError {
    fn remediation(&self) -> Option<&str> {
        match self {
            EngineError::ExegolNotFound { .. } => Some(
                "Install Exegol from https://github.com/ThePorgs/Exegol and update 'exegol_path' in config.yaml",
            ),
            EngineError::ContainerNotFound { .. } => {
                Some("Run 'exegol info' to list containers, or create one with 'exegol install'")
            }
            EngineError::ContainerNotRunning { .. } => {
                Some("Start the container with 'exegol start <name>'")
            }
            EngineError::CommandTimeout { .. } => {
                Some("Use shorter commands or split long operations into multiple steps")
            }
            EngineError::InvalidInput(_) => Some("Provide non-empty, well-formed parameters"),
            EngineError::UnsafeInput { .. } => {
                Some("Remove shell chaining/substitution metacharacters from the input")
            }
            EngineError::WorkflowNotFound { .. } => {
                Some("Use 'exrun workflows' to see available workflow ids")
            }
            EngineError::MissingParams { .. } => {
                Some("Supply every required parameter listed by 'exrun workflows'")
            }
            EngineError::UnresolvedPlaceholder { .. } => {
                Some("Bind a value for each placeholder used by the workflow's step templates")
            }
            EngineError::Configuration(_) => Some("Fix the offending value in config.yaml"),
            EngineError::Session { .. } => {
                Some("Retry the command; a fresh session is created automatically")
            }
            EngineError::CatalogParse(_) => Some("Check the workflow catalog YAML syntax"),
            EngineError::Io(_) => Some("Check file paths and permissions"),
        }
    }
}

/// Convenience alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;
