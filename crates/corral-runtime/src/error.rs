//! Error types for corral-runtime.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for corral-runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while driving the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The external tool exited non-zero
    #[error("{stage} failed: {diagnostic}")]
    CommandFailed {
        /// Lifecycle step that issued the command
        stage: String,
        /// Diagnostic text reported by the tool
        diagnostic: String,
    },

    /// The external tool could not be spawned at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to spawn
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The external tool did not finish in time and was killed
    #[error("{stage} timed out after {after:?}")]
    TimedOut {
        /// Lifecycle step that issued the command
        stage: String,
        /// Bound that was exceeded
        after: Duration,
    },

    /// Stop succeeded but the follow-up start did not
    #[error("restart incomplete, container stopped but not started again: {diagnostic}")]
    RestartPartial {
        /// Diagnostic from the failed start
        diagnostic: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Whether the diagnostic says the container does not exist.
    ///
    /// Used to make destroy tolerant of already-absent containers.
    pub fn is_absent(&self) -> bool {
        match self {
            Self::CommandFailed { diagnostic, .. } => {
                let lower = diagnostic.to_lowercase();
                ["not found", "does not exist", "not defined", "no such"]
                    .iter()
                    .any(|needle| lower.contains(needle))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_absent_matches_tool_diagnostics() {
        let lxd = RuntimeError::CommandFailed {
            stage: "destroy".into(),
            diagnostic: "Error: Instance not found".into(),
        };
        let lxc = RuntimeError::CommandFailed {
            stage: "destroy".into(),
            diagnostic: "web1: Container is not defined".into(),
        };
        let other = RuntimeError::CommandFailed {
            stage: "destroy".into(),
            diagnostic: "permission denied".into(),
        };
        assert!(lxd.is_absent());
        assert!(lxc.is_absent());
        assert!(!other.is_absent());
        assert!(!RuntimeError::Config("x".into()).is_absent());
    }

    #[test]
    fn test_display_carries_stage() {
        let err = RuntimeError::TimedOut {
            stage: "exec".into(),
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "exec timed out after 5s");
    }
}
