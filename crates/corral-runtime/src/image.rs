//! OS image selection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An OS template: distribution plus release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsImage {
    /// Distribution name, e.g. `ubuntu`.
    pub os_type: String,
    /// Release, e.g. `22.04`.
    pub release: String,
}

impl OsImage {
    /// Image for `os_type` at its default release.
    pub fn for_os(os_type: &str) -> Self {
        Self {
            os_type: os_type.to_string(),
            release: Self::default_release(os_type).to_string(),
        }
    }

    /// Image with an explicit release.
    pub fn new(os_type: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            os_type: os_type.into(),
            release: release.into(),
        }
    }

    /// Release used when none is recorded: `22.04` for Ubuntu, `12` otherwise.
    pub fn default_release(os_type: &str) -> &'static str {
        if os_type == "ubuntu" {
            "22.04"
        } else {
            "12"
        }
    }

    /// LXD remote image alias, `images:<os>/<release>`.
    pub fn lxd_alias(&self) -> String {
        format!("images:{}/{}", self.os_type, self.release)
    }
}

impl fmt::Display for OsImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.os_type, self.release)
    }
}
