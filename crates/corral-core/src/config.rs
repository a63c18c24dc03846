//! Orchestrator configuration types.

use crate::error::CoreError;
use corral_runtime::OsImage;
use std::path::PathBuf;
use std::time::Duration;

/// Which image a reinstall recreates the guest from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReinstallOsPolicy {
    /// Reuse the OS type and release stored on the record.
    #[default]
    PreserveRecorded,
    /// Always reinstall onto this image and record it.
    Fixed(OsImage),
}

/// Configuration for the VPS orchestrator.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Registry JSON file (default: `/var/lib/vps-db.json`).
    pub registry_path: PathBuf,
    /// IP pool cursor file (default: `/var/lib/vps-ip-pool/next_ip.txt`).
    pub pool_path: PathBuf,
    /// Operators allowed to provision and to delete any VPS.
    pub privileged_operators: Vec<u64>,
    /// Pause between start and the first in-guest command (default: 10s).
    pub settle_delay: Duration,
    /// OS used when a provision request names none (default: `ubuntu`).
    pub default_os: String,
    /// Image selection for reinstall.
    pub reinstall_policy: ReinstallOsPolicy,
    /// Bound on host address detection (default: 10s).
    pub detect_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("/var/lib/vps-db.json"),
            pool_path: PathBuf::from("/var/lib/vps-ip-pool/next_ip.txt"),
            privileged_operators: Vec::new(),
            settle_delay: Duration::from_secs(10),
            default_os: "ubuntu".to_string(),
            reinstall_policy: ReinstallOsPolicy::default(),
            detect_timeout: Duration::from_secs(10),
        }
    }
}

impl CoreConfig {
    /// Create a new config builder.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Whether this operator holds the privileged role.
    pub fn is_privileged(&self, operator: u64) -> bool {
        self.privileged_operators.contains(&operator)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.registry_path.as_os_str().is_empty() {
            return Err(CoreError::InvalidRequest("registry_path is required".into()));
        }
        if self.pool_path.as_os_str().is_empty() {
            return Err(CoreError::InvalidRequest("pool_path is required".into()));
        }
        if self.registry_path == self.pool_path {
            return Err(CoreError::InvalidRequest(
                "registry_path and pool_path must differ".into(),
            ));
        }
        crate::record::validate_os_type(&self.default_os)?;
        if let ReinstallOsPolicy::Fixed(image) = &self.reinstall_policy {
            crate::record::validate_os_type(&image.os_type)?;
            if image.release.trim().is_empty() {
                return Err(CoreError::InvalidRequest(
                    "fixed reinstall image needs a release".into(),
                ));
            }
        }
        if self.detect_timeout.is_zero() {
            return Err(CoreError::InvalidRequest("detect_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for CoreConfig.
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// Set the registry file path.
    pub fn registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.registry_path = path.into();
        self
    }

    /// Set the pool cursor file path.
    pub fn pool_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pool_path = path.into();
        self
    }

    /// Place both state files under one directory, using the default file names.
    pub fn state_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.registry_path(dir.join("vps-db.json"))
            .pool_path(dir.join("vps-ip-pool").join("next_ip.txt"))
    }

    /// Grant the privileged role to an operator.
    pub fn privileged_operator(mut self, operator: u64) -> Self {
        if !self.config.privileged_operators.contains(&operator) {
            self.config.privileged_operators.push(operator);
        }
        self
    }

    /// Replace the privileged operator list.
    pub fn privileged_operators(mut self, operators: Vec<u64>) -> Self {
        self.config.privileged_operators = operators;
        self
    }

    /// Set the post-start settle delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    /// Set the default OS type.
    pub fn default_os(mut self, os_type: impl Into<String>) -> Self {
        self.config.default_os = os_type.into();
        self
    }

    /// Set the reinstall image policy.
    pub fn reinstall_policy(mut self, policy: ReinstallOsPolicy) -> Self {
        self.config.reinstall_policy = policy;
        self
    }

    /// Set the host address detection timeout.
    pub fn detect_timeout(mut self, timeout: Duration) -> Self {
        self.config.detect_timeout = timeout;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<CoreConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.registry_path, PathBuf::from("/var/lib/vps-db.json"));
        assert_eq!(
            config.pool_path,
            PathBuf::from("/var/lib/vps-ip-pool/next_ip.txt")
        );
        assert_eq!(config.settle_delay, Duration::from_secs(10));
        assert_eq!(config.default_os, "ubuntu");
        assert_eq!(config.reinstall_policy, ReinstallOsPolicy::PreserveRecorded);
        assert!(config.privileged_operators.is_empty());
    }

    #[test]
    fn test_builder_state_dir() {
        let config = CoreConfig::builder()
            .state_dir("/srv/corral")
            .privileged_operator(7)
            .privileged_operator(7)
            .build()
            .expect("should build successfully");

        assert_eq!(config.registry_path, PathBuf::from("/srv/corral/vps-db.json"));
        assert_eq!(
            config.pool_path,
            PathBuf::from("/srv/corral/vps-ip-pool/next_ip.txt")
        );
        assert_eq!(config.privileged_operators, vec![7]);
        assert!(config.is_privileged(7));
        assert!(!config.is_privileged(8));
    }

    #[test]
    fn test_builder_rejects_same_paths() {
        let result = CoreConfig::builder()
            .registry_path("/tmp/state")
            .pool_path("/tmp/state")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_bad_default_os() {
        assert!(CoreConfig::builder().default_os("").build().is_err());
        assert!(CoreConfig::builder().default_os("ubuntu; rm").build().is_err());
    }

    #[test]
    fn test_fixed_policy_needs_release() {
        let result = CoreConfig::builder()
            .reinstall_policy(ReinstallOsPolicy::Fixed(OsImage::new("debian", "")))
            .build();
        assert!(result.is_err());

        let config = CoreConfig::builder()
            .reinstall_policy(ReinstallOsPolicy::Fixed(OsImage::new("debian", "12")))
            .build()
            .expect("should build successfully");
        assert_eq!(
            config.reinstall_policy,
            ReinstallOsPolicy::Fixed(OsImage::new("debian", "12"))
        );
    }
}
