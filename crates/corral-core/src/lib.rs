//! # corral-core
//!
//! VPS lifecycle orchestration for corral hosts.
//!
//! This crate turns operator intents (provision, power actions, reinstall,
//! password change, delete) into ordered runtime calls, and keeps the
//! durable host state: an IPv4 lease pool and a JSON registry of VPS
//! records.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  corral-core (host)                    │
//! ├────────────────────────────────────────────────────────┤
//! │                                                        │
//! │  ┌──────────────────┐     ┌────────────────────────┐   │
//! │  │ VpsOrchestrator  │────▶│ RegistryStore          │   │
//! │  │  - provision()   │     │  (vps-db.json)         │   │
//! │  │  - start/stop()  │     └────────────────────────┘   │
//! │  │  - reinstall()   │     ┌────────────────────────┐   │
//! │  │  - delete()      │────▶│ IpPool                 │   │
//! │  └──────────────────┘     │  (next_ip.txt)         │   │
//! │           │               └────────────────────────┘   │
//! │           ▼                                            │
//! │  ┌──────────────────┐     ┌────────────────────────┐   │
//! │  │ ContainerRuntime │     │ OwnerNotifier          │   │
//! │  │ (corral-runtime) │     │  (log / webhook)       │   │
//! │  └──────────────────┘     └────────────────────────┘   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use corral_core::{CoreConfig, LogNotifier, ProvisionRequest, RouteDetector, VpsOrchestrator};
//! use corral_runtime::{build_runtime, RuntimeConfig, SystemRunner};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> corral_core::Result<()> {
//! let runner = Arc::new(SystemRunner::new());
//! let runtime = build_runtime(RuntimeConfig::default(), runner.clone());
//! let config = CoreConfig::builder().privileged_operator(1).build()?;
//! let orchestrator = VpsOrchestrator::new(
//!     config,
//!     runtime,
//!     Arc::new(RouteDetector::new(runner, Duration::from_secs(10))),
//!     Arc::new(LogNotifier),
//! );
//!
//! let report = orchestrator
//!     .provision(1, ProvisionRequest::new("web1", 42, "s3cret").ram_gb(2))
//!     .await?;
//! println!("web1 is at {}", report.record.ip_address);
//!
//! orchestrator.restart(42, "web1").await?;
//! orchestrator.delete(42, "web1").await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod ip_pool;
mod notify;
mod orchestrator;
mod persist;
mod record;
mod registry;

pub use config::{CoreConfig, CoreConfigBuilder, ReinstallOsPolicy};
pub use error::{CoreError, Result};
pub use ip_pool::{
    parse_route_source, FixedAddress, HostAddressDetector, IpPool, RouteDetector,
    EXHAUSTED_OCTET, FIRST_LEASE_OCTET,
};
pub use notify::{access_message, LogNotifier, NotifyError, OwnerNotifier, WebhookNotifier};
pub use orchestrator::{LifecycleReport, ProvisionRequest, VpsOrchestrator, VpsSnapshot, VpsState};
pub use record::{
    validate_os_type, validate_password, validate_vps_id, OwnerId, VpsRecord, MAX_ID_LEN,
};
pub use registry::{Registry, RegistryStore};
