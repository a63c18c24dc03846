//! Configuration for the MCP server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use corral_core::{CoreConfig, CoreError, ReinstallOsPolicy};
use corral_runtime::{Backend, OsImage, RuntimeConfig, RuntimeError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Stdio only (a chat bridge running on the same host)
    Stdio,
    /// Streamable HTTP only
    Http,
    /// Both stdio and HTTP (default)
    #[default]
    Both,
}

impl TransportMode {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stdio" => Self::Stdio,
            "http" | "sse" | "remote" => Self::Http,
            _ => Self::Both,
        }
    }

    /// Check if stdio transport should be enabled.
    pub fn stdio_enabled(&self) -> bool {
        matches!(self, Self::Stdio | Self::Both)
    }

    /// Check if HTTP transport should be enabled.
    pub fn http_enabled(&self) -> bool {
        matches!(self, Self::Http | Self::Both)
    }
}

/// Configuration for the corral MCP server.
#[derive(Debug, Clone)]
pub struct CorralConfig {
    /// Container backend.
    pub backend: Backend,
    /// LXD network the guest NIC attaches to.
    pub network: String,
    /// Host interface classic LXC macvlan NICs attach to.
    pub macvlan_link: String,
    /// Classic LXC container root.
    pub lxc_root: PathBuf,
    /// Registry JSON file.
    pub registry_path: PathBuf,
    /// IP pool cursor file.
    pub pool_path: PathBuf,
    /// Operators holding the privileged role.
    pub admin_ids: Vec<u64>,
    /// Host address to bootstrap the pool from instead of probing routes.
    pub host_ip: Option<Ipv4Addr>,
    /// Guest DNS servers.
    pub dns_servers: Vec<Ipv4Addr>,
    /// Pause between start and the first in-guest command.
    pub settle_delay: Duration,
    /// OS used when a provision request names none.
    pub default_os: String,
    /// Image every reinstall uses; `None` keeps the recorded OS.
    pub reinstall_os: Option<OsImage>,
    /// Bound on each host tool invocation.
    pub command_timeout: Duration,
    /// Webhook receiving owner notifications; logged only when unset.
    pub webhook_url: Option<String>,
    /// Transport mode (default: both stdio and HTTP).
    pub transport_mode: TransportMode,
    /// HTTP server bind address.
    pub http_addr: SocketAddr,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no privileged operators configured (set CORRAL_ADMIN_IDS)")]
    NoAdmins,

    #[error("state directory not found: {0}")]
    MissingStateDir(PathBuf),

    #[error("LXC root not found: {0}")]
    MissingLxcRoot(PathBuf),

    #[error("invalid runtime configuration: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("invalid orchestrator configuration: {0}")]
    Core(#[from] CoreError),

    #[error("notifier setup failed: {0}")]
    Notifier(#[from] corral_core::NotifyError),
}

impl Default for CorralConfig {
    fn default() -> Self {
        let runtime = RuntimeConfig::default();
        let core = CoreConfig::default();
        Self {
            backend: runtime.backend,
            network: runtime.network,
            macvlan_link: runtime.macvlan_link,
            lxc_root: runtime.lxc_root,
            registry_path: core.registry_path,
            pool_path: core.pool_path,
            admin_ids: Vec::new(),
            host_ip: None,
            dns_servers: runtime.dns_servers,
            settle_delay: core.settle_delay,
            default_os: core.default_os,
            reinstall_os: None,
            command_timeout: runtime.command_timeout,
            webhook_url: None,
            transport_mode: TransportMode::Both,
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
        }
    }
}

impl CorralConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CORRAL_BACKEND` | `lxd` (lxd, lxc) |
    /// | `CORRAL_NETWORK` | `macvlan_pub` |
    /// | `CORRAL_MACVLAN_LINK` | `eth0` |
    /// | `CORRAL_LXC_ROOT` | `/var/lib/lxc` |
    /// | `CORRAL_REGISTRY` | `/var/lib/vps-db.json` |
    /// | `CORRAL_POOL` | `/var/lib/vps-ip-pool/next_ip.txt` |
    /// | `CORRAL_ADMIN_IDS` | none (comma-separated operator ids) |
    /// | `CORRAL_HOST_IP` | auto-detect from the default route |
    /// | `CORRAL_DNS` | `8.8.8.8,1.1.1.1` |
    /// | `CORRAL_SETTLE_SECS` | `10` |
    /// | `CORRAL_DEFAULT_OS` | `ubuntu` |
    /// | `CORRAL_REINSTALL_OS` | keep recorded OS (`debian` or `debian/12`) |
    /// | `CORRAL_COMMAND_TIMEOUT_SECS` | `300` |
    /// | `CORRAL_WEBHOOK_URL` | none (log only) |
    /// | `CORRAL_TRANSPORT` | `both` (stdio, http, both) |
    /// | `CORRAL_HTTP_HOST` | `127.0.0.1` |
    /// | `CORRAL_HTTP_PORT` | `8080` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        let http_host: IpAddr =
            parse_var(&lookup, "CORRAL_HTTP_HOST").unwrap_or(default.http_addr.ip());
        let http_port: u16 =
            parse_var(&lookup, "CORRAL_HTTP_PORT").unwrap_or(default.http_addr.port());

        Self {
            backend: parse_var(&lookup, "CORRAL_BACKEND").unwrap_or(default.backend),
            network: lookup("CORRAL_NETWORK").unwrap_or(default.network),
            macvlan_link: lookup("CORRAL_MACVLAN_LINK").unwrap_or(default.macvlan_link),
            lxc_root: lookup("CORRAL_LXC_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.lxc_root),
            registry_path: lookup("CORRAL_REGISTRY")
                .map(PathBuf::from)
                .unwrap_or(default.registry_path),
            pool_path: lookup("CORRAL_POOL")
                .map(PathBuf::from)
                .unwrap_or(default.pool_path),
            admin_ids: lookup("CORRAL_ADMIN_IDS")
                .map(|v| parse_list(&v, "CORRAL_ADMIN_IDS"))
                .unwrap_or(default.admin_ids),
            host_ip: parse_var(&lookup, "CORRAL_HOST_IP"),
            dns_servers: lookup("CORRAL_DNS")
                .map(|v| parse_list(&v, "CORRAL_DNS"))
                .filter(|servers: &Vec<Ipv4Addr>| !servers.is_empty())
                .unwrap_or(default.dns_servers),
            settle_delay: parse_var(&lookup, "CORRAL_SETTLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.settle_delay),
            default_os: lookup("CORRAL_DEFAULT_OS").unwrap_or(default.default_os),
            reinstall_os: lookup("CORRAL_REINSTALL_OS")
                .as_deref()
                .and_then(parse_image),
            command_timeout: parse_var(&lookup, "CORRAL_COMMAND_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.command_timeout),
            webhook_url: lookup("CORRAL_WEBHOOK_URL").filter(|v| !v.trim().is_empty()),
            transport_mode: lookup("CORRAL_TRANSPORT")
                .map(|v| TransportMode::parse(&v))
                .unwrap_or(default.transport_mode),
            http_addr: SocketAddr::new(http_host, http_port),
        }
    }

    /// Runtime layer configuration.
    pub fn runtime_config(&self) -> Result<RuntimeConfig, ConfigError> {
        Ok(RuntimeConfig::builder()
            .backend(self.backend)
            .network(self.network.clone())
            .macvlan_link(self.macvlan_link.clone())
            .lxc_root(self.lxc_root.clone())
            .dns_servers(self.dns_servers.clone())
            .command_timeout(self.command_timeout)
            .build()?)
    }

    /// Orchestrator configuration.
    pub fn core_config(&self) -> Result<CoreConfig, ConfigError> {
        let policy = match &self.reinstall_os {
            Some(image) => ReinstallOsPolicy::Fixed(image.clone()),
            None => ReinstallOsPolicy::PreserveRecorded,
        };
        Ok(CoreConfig::builder()
            .registry_path(self.registry_path.clone())
            .pool_path(self.pool_path.clone())
            .privileged_operators(self.admin_ids.clone())
            .settle_delay(self.settle_delay)
            .default_os(self.default_os.clone())
            .reinstall_policy(policy)
            .build()?)
    }

    /// Validate that the host is ready to serve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_ids.is_empty() {
            return Err(ConfigError::NoAdmins);
        }

        for path in [&self.registry_path, &self.pool_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                // The pool directory is created on first lease; its parent must exist
                let anchor = if path == &self.pool_path {
                    parent.parent().unwrap_or(parent)
                } else {
                    parent
                };
                if !anchor.exists() {
                    return Err(ConfigError::MissingStateDir(anchor.to_path_buf()));
                }
            }
        }

        if self.backend == Backend::Lxc && !self.lxc_root.exists() {
            return Err(ConfigError::MissingLxcRoot(self.lxc_root.clone()));
        }

        self.runtime_config()?;
        self.core_config()?;
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if let Err(e) = self.validate() {
            tracing::warn!(error = %e, "Configuration problem");
        }
        if self.webhook_url.is_none() {
            tracing::warn!("CORRAL_WEBHOOK_URL not set, owners are not sent their access details");
        }
        if !self.http_addr.ip().is_loopback() && self.transport_mode.http_enabled() {
            tracing::warn!(
                addr = %self.http_addr,
                "HTTP transport is not bound to loopback; it trusts caller_id, put it behind an authenticating proxy"
            );
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_list<T: std::str::FromStr>(value: &str, key: &str) -> Vec<T> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, item, "Ignoring unparsable list entry");
                None
            }
        })
        .collect()
}

/// `debian` or `debian/12`.
fn parse_image(value: &str) -> Option<OsImage> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some(match value.split_once('/') {
        Some((os, release)) => OsImage::new(os, release),
        None => OsImage::for_os(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CorralConfig::default();
        assert_eq!(config.backend, Backend::Lxd);
        assert_eq!(config.network, "macvlan_pub");
        assert_eq!(config.registry_path, PathBuf::from("/var/lib/vps-db.json"));
        assert_eq!(
            config.pool_path,
            PathBuf::from("/var/lib/vps-ip-pool/next_ip.txt")
        );
        assert!(config.admin_ids.is_empty());
        assert_eq!(config.settle_delay, Duration::from_secs(10));
        assert_eq!(config.transport_mode, TransportMode::Both);
        assert_eq!(config.http_addr.port(), 8080);
        assert!(config.http_addr.ip().is_loopback());
    }

    #[test]
    fn test_transport_mode_parsing() {
        assert_eq!(TransportMode::parse("stdio"), TransportMode::Stdio);
        assert_eq!(TransportMode::parse("HTTP"), TransportMode::Http);
        assert_eq!(TransportMode::parse("both"), TransportMode::Both);
        assert_eq!(TransportMode::parse("anything"), TransportMode::Both);
    }

    #[test]
    fn test_transport_mode_flags() {
        assert!(TransportMode::Stdio.stdio_enabled());
        assert!(!TransportMode::Stdio.http_enabled());
        assert!(!TransportMode::Http.stdio_enabled());
        assert!(TransportMode::Both.http_enabled());
    }

    #[test]
    fn test_from_lookup_uses_defaults() {
        let config = CorralConfig::from_lookup(lookup(&[]));
        let default = CorralConfig::default();
        assert_eq!(config.registry_path, default.registry_path);
        assert_eq!(config.dns_servers, default.dns_servers);
        assert!(config.reinstall_os.is_none());
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CorralConfig::from_lookup(lookup(&[
            ("CORRAL_BACKEND", "lxc"),
            ("CORRAL_ADMIN_IDS", "1, 2,bogus,3"),
            ("CORRAL_HOST_IP", "10.0.0.5"),
            ("CORRAL_DNS", "9.9.9.9"),
            ("CORRAL_SETTLE_SECS", "0"),
            ("CORRAL_REINSTALL_OS", "debian/12"),
            ("CORRAL_WEBHOOK_URL", "https://hooks.example/vps"),
            ("CORRAL_TRANSPORT", "http"),
            ("CORRAL_HTTP_PORT", "9090"),
        ]));

        assert_eq!(config.backend, Backend::Lxc);
        assert_eq!(config.admin_ids, vec![1, 2, 3]);
        assert_eq!(config.host_ip, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(config.dns_servers, vec![Ipv4Addr::new(9, 9, 9, 9)]);
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.reinstall_os, Some(OsImage::new("debian", "12")));
        assert_eq!(config.webhook_url.as_deref(), Some("https://hooks.example/vps"));
        assert_eq!(config.transport_mode, TransportMode::Http);
        assert_eq!(config.http_addr.port(), 9090);
    }

    #[test]
    fn test_parse_image() {
        assert_eq!(parse_image("ubuntu"), Some(OsImage::new("ubuntu", "22.04")));
        assert_eq!(parse_image("alpine/3.19"), Some(OsImage::new("alpine", "3.19")));
        assert_eq!(parse_image("  "), None);
    }

    #[test]
    fn test_validate_requires_admins() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CorralConfig {
            registry_path: dir.path().join("vps-db.json"),
            pool_path: dir.path().join("vps-ip-pool").join("next_ip.txt"),
            ..CorralConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoAdmins)));

        config.admin_ids = vec![1];
        config.validate().expect("valid configuration");
    }

    #[test]
    fn test_validate_missing_state_dir() {
        let config = CorralConfig {
            admin_ids: vec![1],
            registry_path: PathBuf::from("/nonexistent/corral/vps-db.json"),
            ..CorralConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingStateDir(_))
        ));
    }

    #[test]
    fn test_derived_configs() {
        let config = CorralConfig {
            admin_ids: vec![7],
            reinstall_os: Some(OsImage::new("debian", "12")),
            ..CorralConfig::default()
        };
        let core = config.core_config().unwrap();
        assert!(core.is_privileged(7));
        assert_eq!(
            core.reinstall_policy,
            ReinstallOsPolicy::Fixed(OsImage::new("debian", "12"))
        );
        let runtime = config.runtime_config().unwrap();
        assert_eq!(runtime.network, "macvlan_pub");
    }
}
