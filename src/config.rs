//! Engine configuration loaded from `config.yaml`
//!
//! The settings object is validated once at load time and consumed read-only
//! by every component; nothing mutates it after startup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Hard ceiling on any per-command timeout (seconds)
pub const TIMEOUT_CEILING_SECS: u64 = 3600;

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Path to the Exegol CLI executable
    #[serde(default = "default_exegol_path")]
    pub exegol_path: String,

    /// Default per-command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Maximum per-command timeout a caller may request, in seconds
    #[serde(default = "default_max_timeout")]
    pub max_timeout_secs: u64,

    /// Global ceiling on simultaneously in-flight commands
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Keep a persistent shell session per container
    #[serde(default)]
    pub use_sessions: bool,

    /// Tear down a session after this many seconds without a completed command
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_secs: u64,

    /// Interval between idle-eviction sweeps, in seconds
    #[serde(default = "default_session_sweep_interval")]
    pub session_sweep_interval_secs: u64,

    /// Run recognized tool output through the parser registry
    #[serde(default)]
    pub auto_parse_output: bool,

    /// Truncate captured output beyond this many lines (0 disables)
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,

    /// Truncate captured output beyond this many characters (0 disables)
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    /// Log verbosity: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_exegol_path() -> String {
    "exegol".to_string()
}
fn default_command_timeout() -> u64 {
    180
}
fn default_max_timeout() -> u64 {
    900
}
fn default_max_concurrent() -> usize {
    8
}
fn default_session_idle_timeout() -> u64 {
    300
}
fn default_session_sweep_interval() -> u64 {
    60
}
fn default_max_output_lines() -> usize {
    100
}
fn default_max_output_chars() -> usize {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        // serde defaults are the single source of truth
        serde_yaml::from_str("{}").expect("defaults are valid")
    }
}

impl EngineConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges; called once at load time
    pub fn validate(&self) -> Result<()> {
        if !(1..=TIMEOUT_CEILING_SECS).contains(&self.command_timeout_secs) {
            return Err(EngineError::Configuration(format!(
                "command_timeout_secs must be between 1 and {TIMEOUT_CEILING_SECS}, got {}",
                self.command_timeout_secs
            )));
        }
        if !(1..=TIMEOUT_CEILING_SECS).contains(&self.max_timeout_secs) {
            return Err(EngineError::Configuration(format!(
                "max_timeout_secs must be between 1 and {TIMEOUT_CEILING_SECS}, got {}",
                self.max_timeout_secs
            )));
        }
        if self.command_timeout_secs > self.max_timeout_secs {
            return Err(EngineError::Configuration(format!(
                "command_timeout_secs ({}) exceeds max_timeout_secs ({})",
                self.command_timeout_secs, self.max_timeout_secs
            )));
        }
        if self.max_concurrent == 0 {
            return Err(EngineError::Configuration(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.session_idle_timeout_secs == 0 || self.session_sweep_interval_secs == 0 {
            return Err(EngineError::Configuration(
                "session timeouts must be at least 1 second".to_string(),
            ));
        }
        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(EngineError::Configuration(format!(
                    "log_level must be one of debug, info, warn, error; got '{other}'"
                )));
            }
        }
        Ok(())
    }

    /// Default timeout as a `Duration`
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Clamp a caller-requested timeout into the configured bounds,
    /// falling back to the default when none was requested.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(t) => t.min(Duration::from_secs(self.max_timeout_secs)),
            None => self.command_timeout(),
        }
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }
}
