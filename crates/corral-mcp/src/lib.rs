//! # corral-mcp
//!
//! MCP (Model Context Protocol) server exposing corral VPS operations.
//!
//! A chat bridge (or any MCP client) drives VPS provisioning, power
//! control, reinstall, password rotation and deletion through this server.
//! Every tool takes the id of the operator on whose behalf it is called.
//!
//! ## Quick Start
//!
//! ```bash
//! export CORRAL_ADMIN_IDS=1
//! export CORRAL_BACKEND=lxd
//! export CORRAL_NETWORK=macvlan_pub
//! cargo run -p corral-mcp
//! ```
//!
//! ## MCP Tools
//!
//! | Tool | Who | Description |
//! |------|-----|-------------|
//! | `provision_vps` | privileged | Create, configure and start a VPS |
//! | `describe_vps` | owner | Record plus live status |
//! | `start_vps` | owner | Start |
//! | `stop_vps` | owner | Stop |
//! | `restart_vps` | owner | Stop then start |
//! | `reinstall_vps` | owner | Wipe and recreate, same id/IP/resources |
//! | `change_password` | owner | Rotate the root password (guest must run) |
//! | `delete_vps` | owner or privileged | Destroy and unregister |
//! | `list_vps` | anyone | The caller's VPS ids |

mod config;
pub mod http;
mod server;
mod types;

pub use config::{ConfigError, CorralConfig, TransportMode};
pub use server::CorralServer;
pub use types::*;
