//! Live container status as reported by the runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse liveness of a container.
///
/// Anything the runtime reports that is not plainly running or stopped
/// (freezing, starting, absent, tool failure) is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerStatus {
    /// Container is running.
    Running,
    /// Container exists and is stopped.
    Stopped,
    /// Absent, transitional, or the query failed.
    Unknown,
}

impl ContainerStatus {
    /// Map a runtime state word (`RUNNING`, `Stopped`, ...) to a status.
    pub fn from_state_text(text: &str) -> Self {
        match text.trim().to_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Find a `<key>: <state>` line in line-oriented tool output.
    ///
    /// A bare state word on its own line is accepted too, which is what
    /// the tools print in their non-humanized modes.
    pub fn parse_keyed(output: &str, key: &str) -> Self {
        let prefix = format!("{key}:");
        for line in output.lines() {
            let line = line.trim();
            if let Some(value) = line.strip_prefix(&prefix) {
                return Self::from_state_text(value);
            }
        }
        match output.trim() {
            single if !single.is_empty() && !single.contains(char::is_whitespace) => {
                Self::from_state_text(single)
            }
            _ => Self::Unknown,
        }
    }

    /// Whether the container is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}
