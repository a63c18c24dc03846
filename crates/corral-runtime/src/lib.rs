//! # corral-runtime
//!
//! Container runtime layer for corral VPS hosts.
//! Translates lifecycle intents into invocations of the host's container
//! tooling, behind a single backend-agnostic trait.
//!
//! ## Quick Start
//!
//! ```no_run
//! use corral_runtime::{build_runtime, GuestCommand, OsImage, RuntimeConfig, SystemRunner};
//! use std::sync::Arc;
//!
//! # async fn example() -> corral_runtime::Result<()> {
//! let config = RuntimeConfig::builder().network("macvlan_pub").build()?;
//! let runtime = build_runtime(config, Arc::new(SystemRunner::new()));
//!
//! runtime.create_base("web1", &OsImage::for_os("ubuntu"), 20).await?;
//! runtime
//!     .apply_resources_and_network("web1", "10.0.0.100".parse().unwrap(), 2, 1)
//!     .await?;
//! runtime.start("web1").await?;
//!
//! let out = runtime.exec_root("web1", &GuestCommand::new(["uname", "-a"])).await?;
//! println!("{}", out.stdout);
//!
//! runtime.destroy("web1").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - **LXD** (`lxc` client): image-based launch, device/config keys
//! - **LXC** (`lxc-*` tools): download template, config-file rewrite
//!
//! Both satisfy the same [`ContainerRuntime`] contract.

mod command;
mod config;
mod error;
mod image;
mod lxc;
mod lxd;
mod network;
mod runtime;
mod status;

#[cfg(test)]
mod testing;

pub use command::{CommandOutput, CommandRunner, CommandSpec, GuestCommand, SystemRunner};
pub use config::{Backend, RuntimeConfig, RuntimeConfigBuilder};
pub use error::{Result, RuntimeError};
pub use image::OsImage;
pub use lxc::LxcRuntime;
pub use lxd::LxdRuntime;
pub use network::NetworkSpec;
pub use runtime::{build_runtime, ContainerRuntime};
pub use status::ContainerStatus;
