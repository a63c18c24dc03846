//! LXD backend, driven through the `lxc` client.

use crate::command::{CommandOutput, CommandRunner, CommandSpec, GuestCommand};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::image::OsImage;
use crate::network::NetworkSpec;
use crate::runtime::ContainerRuntime;
use crate::status::ContainerStatus;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Client binary for LXD.
const LXC_CLIENT: &str = "lxc";

/// Guest NIC device name.
const NIC: &str = "eth0";

/// LXD-backed [`ContainerRuntime`].
pub struct LxdRuntime {
    config: RuntimeConfig,
    runner: Arc<dyn CommandRunner>,
}

impl LxdRuntime {
    /// Create a new LXD runtime.
    pub fn new(config: RuntimeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    fn client(&self, stage: &str) -> CommandSpec {
        CommandSpec::new(stage, LXC_CLIENT).timeout(self.config.command_timeout)
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let stage = spec.stage.clone();
        self.runner.run(spec).await?.into_result(&stage)
    }

    async fn set_config(&self, stage: &str, id: &str, key: &str, value: String) -> Result<()> {
        self.run_checked(self.client(stage).args(["config", "set", id, key]).arg(value))
            .await?;
        Ok(())
    }

    async fn set_nic(&self, stage: &str, id: &str, key: &str, value: String) -> Result<()> {
        self.run_checked(
            self.client(stage)
                .args(["config", "device", "set", id, NIC, key])
                .arg(value),
        )
        .await?;
        Ok(())
    }

    /// Whether the guest NIC device is already attached.
    async fn has_nic(&self, id: &str) -> Result<bool> {
        let out = self
            .run_checked(self.client("list-devices").args(["config", "device", "list", id]))
            .await?;
        Ok(out.stdout.lines().any(|line| line.trim() == NIC))
    }
}

#[async_trait]
impl ContainerRuntime for LxdRuntime {
    async fn create_base(&self, id: &str, image: &OsImage, disk_gb: u32) -> Result<()> {
        tracing::info!(vps_id = %id, image = %image, disk_gb, "Creating LXD container");
        self.run_checked(
            self.client("create")
                .arg("init")
                .arg(image.lxd_alias())
                .arg(id)
                .arg("--device")
                .arg(format!("root,size={disk_gb}GB")),
        )
        .await?;
        Ok(())
    }

    async fn apply_resources_and_network(
        &self,
        id: &str,
        ip: Ipv4Addr,
        ram_gb: u32,
        cpu_cores: u32,
    ) -> Result<()> {
        let net = NetworkSpec::for_address(ip, &self.config.dns_servers);
        tracing::info!(
            vps_id = %id,
            ip = %net.address,
            gateway = %net.gateway,
            ram_gb,
            cpu_cores,
            "Configuring LXD container"
        );

        self.set_config("set-memory", id, "limits.memory", format!("{ram_gb}GB"))
            .await?;
        self.set_config("set-cpu", id, "limits.cpu", cpu_cores.to_string())
            .await?;

        if self.has_nic(id).await? {
            tracing::debug!(vps_id = %id, "NIC already attached, skipping attach");
        } else {
            self.run_checked(self.client("attach-network").args([
                "network",
                "attach",
                self.config.network.as_str(),
                id,
                NIC,
            ]))
            .await?;
        }

        self.set_nic("set-ip", id, "ipv4.address", net.address.to_string())
            .await?;
        self.set_nic("set-gateway", id, "ipv4.gateway", net.gateway.to_string())
            .await?;
        self.set_nic("set-dns", id, "ipv4.dns.addresses", net.dns_joined(","))
            .await?;
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<()> {
        tracing::info!(vps_id = %id, "Starting container");
        self.run_checked(self.client("start").args(["start", id])).await?;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        tracing::info!(vps_id = %id, grace_secs = self.config.stop_grace.as_secs(), "Stopping container");
        let graceful = self
            .run_checked(
                self.client("stop")
                    .args(["stop", id, "--timeout"])
                    .arg(self.config.stop_grace.as_secs().to_string())
                    .timeout(self.config.stop_timeout()),
            )
            .await;

        match graceful {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { diagnostic, .. })
                if diagnostic.to_lowercase().contains("already stopped") =>
            {
                tracing::debug!(vps_id = %id, "Container already stopped");
                Ok(())
            }
            Err(RuntimeError::CommandFailed { diagnostic, .. }) => {
                tracing::warn!(vps_id = %id, %diagnostic, "Clean shutdown failed, forcing stop");
                self.run_checked(self.client("force-stop").args(["stop", id, "--force"]))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        tracing::info!(vps_id = %id, "Destroying container");
        match self
            .run_checked(self.client("destroy").args(["delete", id, "--force"]))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_absent() => {
                tracing::debug!(vps_id = %id, "Container already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn exec_root(&self, id: &str, command: &GuestCommand) -> Result<CommandOutput> {
        tracing::debug!(vps_id = %id, program = ?command.argv.first(), "Executing in guest");
        let mut spec = self
            .client("exec")
            .args(["exec", id, "--"])
            .args(command.argv.iter().cloned());
        if let Some(stdin) = &command.stdin {
            spec = spec.stdin(stdin.clone());
        }
        self.run_checked(spec).await
    }

    async fn status(&self, id: &str) -> ContainerStatus {
        match self.runner.run(self.client("status").args(["info", id])).await {
            Ok(out) if out.success() => ContainerStatus::parse_keyed(&out.stdout, "Status"),
            Ok(out) => {
                tracing::debug!(vps_id = %id, diagnostic = %out.diagnostic(), "Status query failed");
                ContainerStatus::Unknown
            }
            Err(e) => {
                tracing::warn!(vps_id = %id, error = %e, "Status query failed");
                ContainerStatus::Unknown
            }
        }
    }

    fn name(&self) -> &str {
        "lxd"
    }
}
