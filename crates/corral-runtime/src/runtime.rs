//! The backend-agnostic container runtime contract.

use crate::command::{CommandOutput, CommandRunner, GuestCommand};
use crate::config::{Backend, RuntimeConfig};
use crate::error::{Result, RuntimeError};
use crate::image::OsImage;
use crate::lxc::LxcRuntime;
use crate::lxd::LxdRuntime;
use crate::status::ContainerStatus;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Container runtime adapter trait.
///
/// One method per lifecycle verb. Every backend must honour the same
/// semantics so callers stay backend-agnostic:
///
/// - non-zero exits surface as [`RuntimeError::CommandFailed`] carrying the
///   tool's diagnostic text
/// - every external invocation is bounded; overruns surface as
///   [`RuntimeError::TimedOut`]
/// - [`status`](Self::status) never fails
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Instantiate an unconfigured, stopped container from an OS template.
    async fn create_base(&self, id: &str, image: &OsImage, disk_gb: u32) -> Result<()>;

    /// Set memory/CPU limits and attach the guest to the host segment with a
    /// static address, gateway and DNS. Safe to re-run.
    async fn apply_resources_and_network(
        &self,
        id: &str,
        ip: Ipv4Addr,
        ram_gb: u32,
        cpu_cores: u32,
    ) -> Result<()>;

    /// Start the container.
    async fn start(&self, id: &str) -> Result<()>;

    /// Stop the container, forcing termination after the grace period.
    async fn stop(&self, id: &str) -> Result<()>;

    /// Stop, then start.
    ///
    /// A start failure after a successful stop is reported as
    /// [`RuntimeError::RestartPartial`].
    async fn restart(&self, id: &str) -> Result<()> {
        self.stop(id).await?;
        self.start(id).await.map_err(|e| RuntimeError::RestartPartial {
            diagnostic: e.to_string(),
        })
    }

    /// Remove the container. Succeeds if it is already absent.
    async fn destroy(&self, id: &str) -> Result<()>;

    /// Run one command as root inside a running guest.
    ///
    /// Callers must check [`status`](Self::status) first; the behaviour
    /// against a guest that is not running is up to the tool.
    async fn exec_root(&self, id: &str, command: &GuestCommand) -> Result<CommandOutput>;

    /// Live status. Absence or tool failure collapses to `Unknown`.
    async fn status(&self, id: &str) -> ContainerStatus;

    /// Backend name (for logging).
    fn name(&self) -> &str;
}

/// Build the runtime selected by `config.backend`.
pub fn build_runtime(
    config: RuntimeConfig,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn ContainerRuntime> {
    tracing::info!(backend = %config.backend, "Creating container runtime");
    match config.backend {
        Backend::Lxd => Arc::new(LxdRuntime::new(config, runner)),
        Backend::Lxc => Arc::new(LxcRuntime::new(config, runner)),
    }
}
