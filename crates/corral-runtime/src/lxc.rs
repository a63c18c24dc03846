//! Classic LXC backend, driven through the `lxc-*` tools.
//!
//! Resources and networking are not settable through the tools, so
//! [`LxcRuntime::apply_resources_and_network`] rewrites the container's
//! config file instead. The rewrite drops every line it owns before
//! appending fresh ones, which makes it idempotent.

use crate::command::{CommandOutput, CommandRunner, CommandSpec, GuestCommand};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::image::OsImage;
use crate::network::NetworkSpec;
use crate::runtime::ContainerRuntime;
use crate::status::ContainerStatus;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Swap in new file content through a synced sibling temp file.
async fn replace_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("corral-tmp");
    {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Config key prefixes managed by this backend.
const MANAGED_PREFIXES: [&str; 4] = ["lxc.net.", "lxc.cgroup", "lxc.cap.", "lxc.apparmor."];

/// Classic-LXC-backed [`ContainerRuntime`].
pub struct LxcRuntime {
    config: RuntimeConfig,
    runner: Arc<dyn CommandRunner>,
}

impl LxcRuntime {
    /// Create a new LXC runtime.
    pub fn new(config: RuntimeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Path of a container's config file.
    pub fn config_path(&self, id: &str) -> PathBuf {
        self.config.lxc_root.join(id).join("config")
    }

    fn tool(&self, stage: &str, program: &str) -> CommandSpec {
        CommandSpec::new(stage, program).timeout(self.config.command_timeout)
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let stage = spec.stage.clone();
        self.runner.run(spec).await?.into_result(&stage)
    }
}

#[async_trait]
impl ContainerRuntime for LxcRuntime {
    async fn create_base(&self, id: &str, image: &OsImage, disk_gb: u32) -> Result<()> {
        tracing::info!(vps_id = %id, image = %image, disk_gb, "Creating LXC container");
        self.run_checked(
            self.tool("create", "lxc-create")
                .args(["-t", "download", "-n", id, "-B"])
                .arg(self.config.lxc_backing_store.clone())
                .arg("--fssize")
                .arg(format!("{disk_gb}G"))
                .args(["--", "-d", image.os_type.as_str(), "-r", image.release.as_str(), "-a"])
                .arg(self.config.arch.clone()),
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
        let path = self.config_path(id);
        tracing::info!(
            vps_id = %id,
            ip = %net.address,
            gateway = %net.gateway,
            ram_gb,
            cpu_cores,
            path = %path.display(),
            "Rewriting LXC container config"
        );

        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RuntimeError::CommandFailed {
                    stage: "configure".into(),
                    diagnostic: format!("LXC config not found at {}", path.display()),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let managed = managed_lines(&self.config.macvlan_link, &net, ram_gb, cpu_cores);
        let rewritten = rewrite_config(&existing, &managed);

        replace_file(&path, rewritten.as_bytes()).await?;
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<()> {
        tracing::info!(vps_id = %id, "Starting container");
        self.run_checked(self.tool("start", "lxc-start").args(["-n", id, "-d"]))
            .await?;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        tracing::info!(vps_id = %id, grace_secs = self.config.stop_grace.as_secs(), "Stopping container");
        // lxc-stop requests a clean shutdown and kills once the grace period lapses.
        let result = self
            .run_checked(
                self.tool("stop", "lxc-stop")
                    .args(["-n", id, "-t"])
                    .arg(self.config.stop_grace.as_secs().to_string())
                    .timeout(self.config.stop_timeout()),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { diagnostic, .. })
                if diagnostic.to_lowercase().contains("not running") =>
            {
                tracing::debug!(vps_id = %id, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        tracing::info!(vps_id = %id, "Destroying container");
        if let Err(e) = self.stop(id).await {
            tracing::debug!(vps_id = %id, error = %e, "Stop before destroy failed, continuing");
        }
        match self
            .run_checked(self.tool("destroy", "lxc-destroy").args(["-n", id]))
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
            .tool("exec", "lxc-attach")
            .args(["-n", id, "--"])
            .args(command.argv.iter().cloned());
        if let Some(stdin) = &command.stdin {
            spec = spec.stdin(stdin.clone());
        }
        self.run_checked(spec).await
    }

    async fn status(&self, id: &str) -> ContainerStatus {
        match self
            .runner
            .run(self.tool("status", "lxc-info").args(["-n", id, "-s"]))
            .await
        {
            Ok(out) if out.success() => ContainerStatus::parse_keyed(&out.stdout, "State"),
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
        "lxc"
    }
}

/// Config lines owned by this backend for one guest.
fn managed_lines(link: &str, net: &NetworkSpec, ram_gb: u32, cpu_cores: u32) -> Vec<String> {
    let memory_bytes = u64::from(ram_gb) * 1024 * 1024 * 1024;
    let cpuset = if cpu_cores > 1 {
        format!("0-{}", cpu_cores - 1)
    } else {
        "0".to_string()
    };
    vec![
        "lxc.net.0.type = macvlan".to_string(),
        format!("lxc.net.0.link = {link}"),
        "lxc.net.0.name = eth0".to_string(),
        "lxc.net.0.flags = up".to_string(),
        format!("lxc.net.0.ipv4.address = {}", net.cidr()),
        format!("lxc.net.0.ipv4.gateway = {}", net.gateway),
        format!("lxc.net.0.ipv4.dns = {}", net.dns_joined(" ")),
        "lxc.cgroup2.devices.allow = a".to_string(),
        "lxc.cap.drop =".to_string(),
        "lxc.apparmor.profile = unconfined".to_string(),
        format!("lxc.cgroup2.memory.max = {memory_bytes}"),
        format!("lxc.cgroup2.cpuset.cpus = {cpuset}"),
    ]
}

/// Drop managed lines from `existing` and append `managed`.
fn rewrite_config(existing: &str, managed: &[String]) -> String {
    let mut out = String::with_capacity(existing.len() + managed.len() * 40);
    for line in existing.lines() {
        let key = line.trim_start();
        if MANAGED_PREFIXES.iter().any(|p| key.starts_with(p)) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    for line in managed {
        out.push_str(line);
        out.push('\n');
    }
    out
}
