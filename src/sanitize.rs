//! Pre-dispatch input validation
//!
//! Commands reach the external CLI as discrete argv elements, never through a
//! shell string build-up, so the remaining injection surface is caller text
//! that the container-side shell would interpret. Anything matching the
//! forbidden sets below is rejected before dispatch and never executed.
//!
//! Catalog step templates are trusted load-time data and are exempt; only
//! caller-supplied text (direct commands, workflow parameter values,
//! container names) passes through here.

use tracing::warn;

use crate::error::{EngineError, Result};

/// Shell chaining and command-substitution sequences forbidden in
/// caller-supplied command text.
const FORBIDDEN_COMMAND_SEQUENCES: &[&str] = &["$(", "`", ";", "&", "|", ">", "<"];

/// Characters forbidden in workflow parameter values. Values are substituted
/// into templates as single words, so quoting and whitespace are out too.
const FORBIDDEN_VALUE_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '>', '<', '(', ')', '\'', '"', '\\', ' ', '\t', '\n', '\r',
];

/// Validate a container name: non-empty identifier, at most 64 chars,
/// alphanumeric plus `-`, `_`, `.`.
pub fn validate_container_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "container name cannot be empty".to_string(),
        ));
    }
    if name.len() > 64 {
        return Err(EngineError::InvalidInput(format!(
            "container name too long ({} > 64)",
            name.len()
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(EngineError::InvalidInput(format!(
            "container name contains invalid characters: '{name}'"
        )));
    }
    Ok(())
}

/// Validate a caller-supplied command for direct execution.
pub fn validate_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "command cannot be empty".to_string(),
        ));
    }
    if command.contains('\0') || command.contains('\n') || command.contains('\r') {
        return reject(command, "embedded control character");
    }
    for seq in FORBIDDEN_COMMAND_SEQUENCES {
        if command.contains(seq) {
            return reject(command, &format!("shell metacharacter '{seq}'"));
        }
    }
    Ok(())
}

/// Validate one workflow parameter value.
pub fn validate_param_value(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(EngineError::InvalidInput(format!(
            "parameter '{name}' cannot be empty"
        )));
    }
    if let Some(bad) = value.chars().find(|c| FORBIDDEN_VALUE_CHARS.contains(c)) {
        return reject(
            value,
            &format!("character {bad:?} in parameter '{name}'"),
        );
    }
    if value.chars().any(|c| c.is_control()) {
        return reject(value, &format!("control character in parameter '{name}'"));
    }
    Ok(())
}

fn reject<T>(input: &str, reason: &str) -> Result<T> {
    warn!(input, reason, "rejected unsafe input");
    Err(EngineError::UnsafeInput {
        reason: reason.to_string(),
    })
}
