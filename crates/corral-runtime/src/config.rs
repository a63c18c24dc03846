//! Runtime adapter configuration.

use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which container tooling the host runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// LXD, driven through the `lxc` client.
    #[default]
    Lxd,
    /// Classic LXC, driven through the `lxc-*` tools.
    Lxc,
}

impl FromStr for Backend {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lxd" => Ok(Self::Lxd),
            "lxc" | "lxc-classic" => Ok(Self::Lxc),
            other => Err(RuntimeError::Config(format!(
                "unknown backend '{other}' (expected lxd or lxc)"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lxd => write!(f, "lxd"),
            Self::Lxc => write!(f, "lxc"),
        }
    }
}

/// Configuration shared by both backends.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Backend to drive (default: LXD).
    pub backend: Backend,
    /// LXD network the guest NIC attaches to (default: `macvlan_pub`).
    pub network: String,
    /// Host interface used as the macvlan parent on LXC (default: `eth0`).
    pub macvlan_link: String,
    /// Directory holding per-container LXC configs (default: `/var/lib/lxc`).
    pub lxc_root: PathBuf,
    /// LXC backing store, must support `--fssize` (default: `loop`).
    pub lxc_backing_store: String,
    /// Image architecture for the LXC download template (default: `amd64`).
    pub arch: String,
    /// DNS servers handed to guests (default: 8.8.8.8, 1.1.1.1).
    pub dns_servers: Vec<Ipv4Addr>,
    /// Grace period for a clean shutdown before forced stop (default: 30s).
    pub stop_grace: Duration,
    /// Upper bound on any single external invocation (default: 300s).
    pub command_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Lxd,
            network: "macvlan_pub".to_string(),
            macvlan_link: "eth0".to_string(),
            lxc_root: PathBuf::from("/var/lib/lxc"),
            lxc_backing_store: "loop".to_string(),
            arch: "amd64".to_string(),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)],
            stop_grace: Duration::from_secs(30),
            command_timeout: Duration::from_secs(300),
        }
    }
}

impl RuntimeConfig {
    /// Create a new config builder.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Process-level bound for a stop: grace period plus headroom for the
    /// forced phase.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_grace + Duration::from_secs(30)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        match self.backend {
            Backend::Lxd if self.network.trim().is_empty() => {
                return Err(RuntimeError::Config("network is required for lxd".into()));
            }
            Backend::Lxc if self.macvlan_link.trim().is_empty() => {
                return Err(RuntimeError::Config("macvlan_link is required for lxc".into()));
            }
            _ => {}
        }
        if self.dns_servers.is_empty() {
            return Err(RuntimeError::Config("at least one DNS server is required".into()));
        }
        if self.command_timeout.is_zero() {
            return Err(RuntimeError::Config("command_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for RuntimeConfig.
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the backend.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the LXD network name.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.config.network = network.into();
        self
    }

    /// Set the macvlan parent interface (LXC).
    pub fn macvlan_link(mut self, link: impl Into<String>) -> Self {
        self.config.macvlan_link = link.into();
        self
    }

    /// Set the LXC config root.
    pub fn lxc_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.lxc_root = path.into();
        self
    }

    /// Set the LXC backing store.
    pub fn lxc_backing_store(mut self, store: impl Into<String>) -> Self {
        self.config.lxc_backing_store = store.into();
        self
    }

    /// Set the image architecture.
    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.config.arch = arch.into();
        self
    }

    /// Set guest DNS servers.
    pub fn dns_servers(mut self, servers: Vec<Ipv4Addr>) -> Self {
        self.config.dns_servers = servers;
        self
    }

    /// Set the stop grace period.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = grace;
        self
    }

    /// Set the per-invocation timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Build the configuration, validating it.
    pub fn build(self) -> Result<RuntimeConfig, RuntimeError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.backend, Backend::Lxd);
        assert_eq!(config.network, "macvlan_pub");
        assert_eq!(config.macvlan_link, "eth0");
        assert_eq!(config.stop_grace, Duration::from_secs(30));
        assert_eq!(config.dns_servers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("lxd".parse::<Backend>().unwrap(), Backend::Lxd);
        assert_eq!("LXC".parse::<Backend>().unwrap(), Backend::Lxc);
        assert!("docker".parse::<Backend>().is_err());
        assert_eq!(Backend::Lxc.to_string(), "lxc");
    }

    #[test]
    fn test_builder_validation() {
        assert!(RuntimeConfig::builder().network("").build().is_err());
        assert!(RuntimeConfig::builder()
            .backend(Backend::Lxc)
            .network("")
            .build()
            .is_ok());
        assert!(RuntimeConfig::builder().dns_servers(vec![]).build().is_err());
        assert!(RuntimeConfig::builder()
            .command_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_stop_timeout_exceeds_grace() {
        let config = RuntimeConfig::builder()
            .stop_grace(Duration::from_secs(10))
            .build()
            .expect("valid config");
        assert!(config.stop_timeout() > config.stop_grace);
    }
}
