//! Error types for corral-core.

use corral_runtime::ContainerStatus;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for corral-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during VPS operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller may not perform this action
    #[error("operator {caller} is not allowed to {action} {id}")]
    AuthorizationDenied {
        /// Operator who asked
        caller: u64,
        /// Action that was refused
        action: &'static str,
        /// Target VPS (or the requested id for provision)
        id: String,
    },

    /// No such VPS in the registry
    #[error("VPS not found: {0}")]
    NotFound(String),

    /// Id already registered or already present in the runtime
    #[error("VPS already exists: {0}")]
    AlreadyExists(String),

    /// No addresses left to lease
    #[error("IP pool exhausted at {last}; expand the pool manually")]
    PoolExhausted {
        /// Cursor value that could not be advanced
        last: Ipv4Addr,
    },

    /// Host address could not be derived from the routing table
    #[error("IP auto-detection failed: {0}; seed the pool cursor manually")]
    AutoDetectFailed(String),

    /// Error from the container runtime
    #[error("runtime error: {0}")]
    Runtime(#[from] corral_runtime::RuntimeError),

    /// Command inside the guest failed
    #[error("command in {id} failed: {diagnostic}")]
    GuestExec {
        /// Target VPS
        id: String,
        /// Diagnostic from the guest
        diagnostic: String,
    },

    /// Operation needs a running guest
    #[error("VPS {id} must be running, current status: {status}")]
    NotRunning {
        /// Target VPS
        id: String,
        /// Live status at the time of the check
        status: ContainerStatus,
    },

    /// Registry and runtime no longer agree
    #[error("VPS {id} is in an inconsistent state: {reason}")]
    PartialFailure {
        /// Target VPS
        id: String,
        /// What diverged
        reason: String,
    },

    /// Another operation on the same VPS is in flight
    #[error("VPS {id} is busy ({phase})")]
    Busy {
        /// Target VPS
        id: String,
        /// Phase of the in-flight operation
        phase: String,
    },

    /// Registry file is unreadable
    #[error("registry {path} is malformed: {reason}")]
    Registry {
        /// Registry file
        path: PathBuf,
        /// Parser diagnostic
        reason: String,
    },

    /// Pool cursor file is unreadable
    #[error("pool cursor {path} is invalid: {reason}")]
    PoolCursor {
        /// Cursor file
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// Request rejected before doing any work
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
