//! Container model parsed from `exegol info` output

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reported container state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Unknown,
}

impl ContainerStatus {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "running" | "up" => ContainerStatus::Running,
            "stopped" | "exited" | "created" => ContainerStatus::Stopped,
            _ => ContainerStatus::Unknown,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Stopped => write!(f, "stopped"),
            ContainerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One Exegol container as reported by the external CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub status: ContainerStatus,
    pub image: String,
    pub created: String,
}

impl Container {
    /// Parse one line of `exegol info` table output.
    ///
    /// Expected columns: NAME STATUS IMAGE CREATED. Header lines, separators,
    /// and anything with fewer columns yield `None`.
    pub fn from_info_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }
        if parts[0].eq_ignore_ascii_case("name") {
            return None;
        }

        Some(Container {
            name: parts[0].to_string(),
            status: ContainerStatus::parse(parts[1]),
            image: parts[2].to_string(),
            created: parts[3].to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_table_line() {
        let container =
            Container::from_info_line("htb-lab running full:latest 2024-01-15").unwrap();
        assert_eq!(container.name, "htb-lab");
        assert_eq!(container.status, ContainerStatus::Running);
        assert_eq!(container.image, "full:latest");
        assert_eq!(container.created, "2024-01-15");
        assert!(container.is_running());
    }

    #[test]
    fn skips_header_and_short_lines() {
        assert!(Container::from_info_line("NAME STATUS IMAGE CREATED").is_none());
        assert!(Container::from_info_line("").is_none());
        assert!(Container::from_info_line("   ").is_none());
        assert!(Container::from_info_line("orphan running").is_none());
    }

    #[test]
    fn unrecognized_status_maps_to_unknown() {
        let container =
            Container::from_info_line("box restarting nightly:latest 2024-02-01").unwrap();
        assert_eq!(container.status, ContainerStatus::Unknown);
        assert!(!container.is_running());
    }

    #[test]
    fn stopped_aliases() {
        for status in ["stopped", "exited", "Created"] {
            let line = format!("box {status} img 2024-01-01");
            let container = Container::from_info_line(&line).unwrap();
            assert_eq!(container.status, ContainerStatus::Stopped);
        }
    }
}
