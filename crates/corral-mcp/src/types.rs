//! Tool parameter and response types for MCP tools.
//!
//! These types use serde for serialization and schemars for automatic
//! JSON Schema generation required by MCP. Every tool takes the calling
//! operator's id; the chat front end is trusted to fill it in.

use corral_core::{CoreError, VpsSnapshot};
use corral_runtime::{NetworkSpec, RuntimeError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Parameters
// ============================================================================

/// Parameters for provisioning a new VPS.
#[derive(Deserialize, JsonSchema)]
pub struct ProvisionVpsParams {
    /// Operator making the request (must be privileged).
    pub caller_id: u64,

    /// New VPS id: letters, digits and inner hyphens, starting with a letter.
    pub vps_id: String,

    /// Operator who will own the VPS.
    pub owner_id: u64,

    /// Initial root password.
    pub password: String,

    /// Distribution (default: ubuntu).
    #[serde(default)]
    pub os_type: Option<String>,

    /// Memory in GB (default: 1).
    #[serde(default)]
    pub ram_gb: Option<u32>,

    /// CPU cores (default: 1).
    #[serde(default)]
    pub cpu_cores: Option<u32>,

    /// Root disk in GB (default: 10).
    #[serde(default)]
    pub disk_gb: Option<u32>,
}

/// Parameters for tools acting on one VPS.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VpsTargetParams {
    /// Operator making the request.
    pub caller_id: u64,

    /// Target VPS id.
    pub vps_id: String,
}

/// Parameters for changing the root password.
#[derive(Deserialize, JsonSchema)]
pub struct ChangePasswordParams {
    /// Operator making the request (must own the VPS).
    pub caller_id: u64,

    /// Target VPS id.
    pub vps_id: String,

    /// New root password.
    pub new_password: String,
}

/// Parameters for listing VPSes.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListVpsParams {
    /// Operator whose VPSes to list.
    pub caller_id: u64,
}

// ============================================================================
// Results
// ============================================================================

/// Details of one VPS.
#[derive(Debug, Serialize, JsonSchema)]
pub struct VpsInfo {
    /// VPS id.
    pub vps_id: String,
    /// Owning operator.
    pub owner_id: u64,
    /// Static address.
    pub ip: String,
    /// Gateway the guest routes through.
    pub gateway: String,
    /// SSH command line.
    pub ssh: String,
    /// Root password.
    pub root_password: String,
    /// Distribution.
    pub os_type: String,
    /// Distribution release.
    pub os_release: String,
    /// Memory in GB.
    pub ram_gb: u32,
    /// CPU cores.
    pub cpu_cores: u32,
    /// Root disk in GB.
    pub disk_gb: u32,
    /// Live container status (RUNNING, STOPPED, UNKNOWN).
    pub status: String,
    /// Lifecycle state (ACTIVE, PROVISIONING, ...).
    pub state: String,
    /// When the VPS was provisioned (ISO 8601), if known.
    pub created_at: Option<String>,
}

impl From<VpsSnapshot> for VpsInfo {
    fn from(snapshot: VpsSnapshot) -> Self {
        let record = snapshot.record;
        Self {
            gateway: NetworkSpec::for_address(record.ip_address, &[])
                .gateway
                .to_string(),
            ssh: format!("ssh root@{}", record.ip_address),
            ip: record.ip_address.to_string(),
            vps_id: record.id,
            owner_id: record.owner_id,
            root_password: record.root_password,
            os_type: record.os_type,
            os_release: record.os_release,
            ram_gb: record.ram_gb,
            cpu_cores: record.cpu_cores,
            disk_gb: record.disk_gb,
            status: snapshot.status.to_string(),
            state: snapshot.state.to_string(),
            created_at: record.created_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Result of provision or reinstall.
#[derive(Debug, Serialize, JsonSchema)]
pub struct LifecycleResult {
    /// The VPS as it now stands.
    pub vps: VpsInfo,
    /// Steps that failed without failing the operation.
    pub warnings: Vec<String>,
}

/// Result of a power action.
#[derive(Debug, Serialize, JsonSchema)]
pub struct PowerResult {
    /// Target VPS id.
    pub vps_id: String,
    /// Live status after the action.
    pub status: String,
}

/// Result of operations with no payload.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SuccessResult {
    /// Whether the operation succeeded.
    pub success: bool,
}

/// Result of listing VPSes.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListVpsResult {
    /// VPS ids owned by the caller, sorted.
    pub vps_ids: Vec<String>,
}

/// Error payload returned to the tool caller.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ToolError {
    /// Stable machine-readable kind.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

impl ToolError {
    /// Error for malformed tool arguments.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self {
            error: "invalid_arguments".into(),
            message: message.into(),
        }
    }
}

impl From<CoreError> for ToolError {
    fn from(e: CoreError) -> Self {
        let kind = match &e {
            CoreError::AuthorizationDenied { .. } => "authorization_denied",
            CoreError::NotFound(_) => "not_found",
            CoreError::AlreadyExists(_) => "already_exists",
            CoreError::PoolExhausted { .. } => "pool_exhausted",
            CoreError::AutoDetectFailed(_) => "auto_detect_failed",
            CoreError::Runtime(RuntimeError::TimedOut { .. }) => "timed_out",
            CoreError::Runtime(_) => "runtime_command_failed",
            CoreError::GuestExec { .. } => "guest_exec_failed",
            CoreError::NotRunning { .. } => "not_running",
            CoreError::PartialFailure { .. } => "partial_failure",
            CoreError::Busy { .. } => "busy",
            CoreError::InvalidRequest(_) => "invalid_request",
            CoreError::Registry { .. }
            | CoreError::PoolCursor { .. }
            | CoreError::Json(_)
            | CoreError::Io(_) => "internal",
        };
        Self {
            error: kind.into(),
            message: e.to_string(),
        }
    }
}
