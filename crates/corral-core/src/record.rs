//! Persisted VPS record and input validation.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use corral_runtime::OsImage;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Operator identifier (opaque numeric id from the operator surface).
pub type OwnerId = u64;

/// Longest accepted VPS id; matches the host name limit.
pub const MAX_ID_LEN: usize = 63;

/// One registered VPS.
///
/// Field names on disk follow the registry format already deployed on
/// hosts (`name`, `ip`, `password`, `os`, `cpu`), so existing registries
/// load unchanged. The registry key is authoritative for the id.
///
/// `root_password` is stored in plaintext. The registry file must be
/// readable by the service account only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpsRecord {
    /// VPS id (also the container name)
    #[serde(rename = "name", default)]
    pub id: String,
    /// Operator who owns the VPS
    pub owner_id: OwnerId,
    /// Leased address, never reassigned
    #[serde(rename = "ip")]
    pub ip_address: Ipv4Addr,
    /// Current root password
    #[serde(rename = "password")]
    pub root_password: String,
    /// Distribution name
    #[serde(rename = "os", default = "default_os_type")]
    pub os_type: String,
    /// Distribution release; derived from `os_type` when absent on disk
    #[serde(default)]
    pub os_release: String,
    /// Memory limit in GB
    #[serde(default = "default_one")]
    pub ram_gb: u32,
    /// CPU core count
    #[serde(rename = "cpu", default = "default_one")]
    pub cpu_cores: u32,
    /// Root disk size in GB
    #[serde(default = "default_disk")]
    pub disk_gb: u32,
    /// Provision time, absent on records written by older tooling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_os_type() -> String {
    "ubuntu".to_string()
}

fn default_one() -> u32 {
    1
}

fn default_disk() -> u32 {
    10
}

impl VpsRecord {
    /// Image this record was installed from.
    pub fn image(&self) -> OsImage {
        if self.os_release.is_empty() {
            OsImage::for_os(&self.os_type)
        } else {
            OsImage::new(self.os_type.clone(), self.os_release.clone())
        }
    }

    /// Fill fields that older registry entries omit.
    pub(crate) fn normalize(&mut self, key: &str) {
        if self.id != key {
            if !self.id.is_empty() {
                tracing::warn!(key = %key, name = %self.id, "Registry entry name differs from key, using key");
            }
            self.id = key.to_string();
        }
        if self.os_release.is_empty() {
            self.os_release = OsImage::default_release(&self.os_type).to_string();
        }
    }
}

/// Check that an id is usable as a container name and a command argument.
pub fn validate_vps_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(CoreError::InvalidRequest(format!(
            "VPS id must be 1-{MAX_ID_LEN} characters"
        )));
    }
    if !id.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(CoreError::InvalidRequest(format!(
            "VPS id '{id}' must start with a letter"
        )));
    }
    if id.ends_with('-') || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(CoreError::InvalidRequest(format!(
            "VPS id '{id}' may contain only letters, digits and inner hyphens"
        )));
    }
    Ok(())
}

/// Check an OS type name before it reaches an image alias or template arg.
pub fn validate_os_type(os_type: &str) -> Result<(), CoreError> {
    let ok = !os_type.is_empty()
        && os_type
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_'));
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidRequest(format!(
            "unsupported OS type '{os_type}'"
        )))
    }
}

/// Check a root password before it is fed to `chpasswd`.
pub fn validate_password(password: &str) -> Result<(), CoreError> {
    if password.is_empty() {
        return Err(CoreError::InvalidRequest("password must not be empty".into()));
    }
    if password.contains(['\n', '\r', '\0']) {
        return Err(CoreError::InvalidRequest(
            "password must not contain line breaks or NUL".into(),
        ));
    }
    Ok(())
}
