//! VPS lifecycle orchestration.
//!
//! [`VpsOrchestrator`] composes the IP pool, the registry and a
//! [`ContainerRuntime`] into the operator-facing operations. It owns
//! authorization, ordering, rollback on failed provisioning, and
//! partial-failure reporting.

use crate::config::{CoreConfig, ReinstallOsPolicy};
use crate::error::{CoreError, Result};
use crate::ip_pool::{HostAddressDetector, IpPool};
use crate::notify::OwnerNotifier;
use crate::record::{validate_os_type, validate_password, validate_vps_id, OwnerId, VpsRecord};
use crate::registry::RegistryStore;
use chrono::Utc;
use corral_runtime::{ContainerRuntime, ContainerStatus, GuestCommand, OsImage, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Externally visible lifecycle state of an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VpsState {
    /// Not registered
    Absent,
    /// Provision in flight
    Provisioning,
    /// Registered, no operation in flight
    Active,
    /// Power action, reinstall or password change in flight
    Reconfiguring,
    /// Delete in flight
    Deleting,
}

impl fmt::Display for VpsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "ABSENT",
            Self::Provisioning => "PROVISIONING",
            Self::Active => "ACTIVE",
            Self::Reconfiguring => "RECONFIGURING",
            Self::Deleting => "DELETING",
        };
        f.write_str(s)
    }
}

/// Parameters of a provision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// New VPS id
    pub id: String,
    /// Operator who will own it
    pub owner_id: OwnerId,
    /// Initial root password
    pub password: String,
    /// OS type; the configured default when absent
    #[serde(default)]
    pub os_type: Option<String>,
    /// Memory limit in GB
    pub ram_gb: u32,
    /// CPU core count
    pub cpu_cores: u32,
    /// Root disk size in GB
    pub disk_gb: u32,
}

impl ProvisionRequest {
    /// A request with the default shape: 1 GB RAM, 1 core, 10 GB disk.
    pub fn new(id: impl Into<String>, owner_id: OwnerId, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id,
            password: password.into(),
            os_type: None,
            ram_gb: 1,
            cpu_cores: 1,
            disk_gb: 10,
        }
    }

    /// Set the OS type.
    pub fn os(mut self, os_type: impl Into<String>) -> Self {
        self.os_type = Some(os_type.into());
        self
    }

    /// Set the memory limit.
    pub fn ram_gb(mut self, gb: u32) -> Self {
        self.ram_gb = gb;
        self
    }

    /// Set the CPU core count.
    pub fn cpu_cores(mut self, cores: u32) -> Self {
        self.cpu_cores = cores;
        self
    }

    /// Set the root disk size.
    pub fn disk_gb(mut self, gb: u32) -> Self {
        self.disk_gb = gb;
        self
    }

    /// Reject malformed requests before any side effect.
    pub fn validate(&self) -> Result<()> {
        validate_vps_id(&self.id)?;
        validate_password(&self.password)?;
        if let Some(os_type) = &self.os_type {
            validate_os_type(os_type)?;
        }
        if self.ram_gb == 0 || self.cpu_cores == 0 || self.disk_gb == 0 {
            return Err(CoreError::InvalidRequest(
                "ram_gb, cpu_cores and disk_gb must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// A record produced by an operation, with non-fatal problems encountered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    /// Record as persisted
    pub record: VpsRecord,
    /// Live container status at the end of the operation
    pub status: ContainerStatus,
    /// Steps that failed without failing the operation
    pub warnings: Vec<String>,
}

/// Read-only view of one VPS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpsSnapshot {
    /// Persisted record
    pub record: VpsRecord,
    /// Live container status
    pub status: ContainerStatus,
    /// Orchestrator lifecycle state
    pub state: VpsState,
}

#[derive(Debug, Clone, Copy)]
enum PowerAction {
    Start,
    Stop,
    Restart,
}

impl PowerAction {
    fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

type PhaseTable = Mutex<HashMap<String, VpsState>>;

/// Marks an id as busy until dropped.
struct PhaseGuard<'a> {
    table: &'a PhaseTable,
    id: String,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Orchestrates VPS lifecycles on one host.
///
/// # Concurrency
///
/// The pool and registry serialize their own file updates. On top of that
/// each id carries at most one in-flight provision, power action,
/// reconfiguration or delete; a second mutating call on the same id fails with
/// [`CoreError::Busy`] instead of interleaving with the first.
pub struct VpsOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    registry: RegistryStore,
    pool: IpPool,
    notifier: Arc<dyn OwnerNotifier>,
    config: CoreConfig,
    phases: PhaseTable,
}

impl VpsOrchestrator {
    /// Create an orchestrator over the state files named in `config`.
    pub fn new(
        config: CoreConfig,
        runtime: Arc<dyn ContainerRuntime>,
        detector: Arc<dyn HostAddressDetector>,
        notifier: Arc<dyn OwnerNotifier>,
    ) -> Self {
        tracing::info!(
            runtime = runtime.name(),
            registry = %config.registry_path.display(),
            pool = %config.pool_path.display(),
            privileged = config.privileged_operators.len(),
            "Creating VPS orchestrator"
        );
        Self {
            registry: RegistryStore::new(config.registry_path.clone()),
            pool: IpPool::new(config.pool_path.clone(), detector),
            runtime,
            notifier,
            config,
            phases: Mutex::new(HashMap::new()),
        }
    }

    /// Get the orchestrator configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The registry backing this orchestrator.
    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    /// The IP pool backing this orchestrator.
    pub fn pool(&self) -> &IpPool {
        &self.pool
    }

    /// Create, configure and start a new VPS.
    ///
    /// Privileged callers only. Any failure up to and including start, or a
    /// failure to save the record, removes the container again; the leased
    /// address is not returned.
    /// Failing to set the password or to notify the owner leaves the VPS
    /// in place and is reported in the warnings.
    pub async fn provision(
        &self,
        caller: OwnerId,
        request: ProvisionRequest,
    ) -> Result<LifecycleReport> {
        let started = Instant::now();
        if !self.config.is_privileged(caller) {
            return Err(CoreError::AuthorizationDenied {
                caller,
                action: "provision",
                id: request.id,
            });
        }
        request.validate()?;
        let id = request.id.clone();
        let _phase = self.begin(&id, VpsState::Provisioning)?;

        if self.registry.get(&id).await?.is_some() {
            return Err(CoreError::AlreadyExists(id));
        }
        let existing = self.runtime.status(&id).await;
        if existing != ContainerStatus::Unknown {
            tracing::warn!(vps_id = %id, status = %existing, "Unregistered container with this id exists on host");
            return Err(CoreError::AlreadyExists(id));
        }

        let os_type = request
            .os_type
            .clone()
            .unwrap_or_else(|| self.config.default_os.clone());
        let image = OsImage::for_os(&os_type);
        tracing::info!(
            vps_id = %id,
            owner_id = request.owner_id,
            image = %image,
            ram_gb = request.ram_gb,
            cpu_cores = request.cpu_cores,
            disk_gb = request.disk_gb,
            "Provisioning VPS"
        );

        let ip = self.pool.allocate().await?;
        if let Err(e) = self
            .build_container(&id, &image, ip, request.ram_gb, request.cpu_cores, request.disk_gb)
            .await
        {
            tracing::error!(vps_id = %id, ip = %ip, error = %e, "Provisioning failed, rolling back container");
            self.destroy_best_effort(&id).await;
            return Err(e.into());
        }

        let mut warnings = Vec::new();
        self.settle().await;
        if let Err(e) = self.apply_password(&id, &request.password).await {
            tracing::warn!(vps_id = %id, error = %e, "Root password not set");
            warnings.push(format!("root password was not set: {e}"));
        }

        let record = VpsRecord {
            id: id.clone(),
            owner_id: request.owner_id,
            ip_address: ip,
            root_password: request.password,
            os_type: image.os_type.clone(),
            os_release: image.release.clone(),
            ram_gb: request.ram_gb,
            cpu_cores: request.cpu_cores,
            disk_gb: request.disk_gb,
            created_at: Some(Utc::now()),
        };
        let stored = record.clone();
        if let Err(e) = self
            .registry
            .update(move |reg| {
                reg.insert(stored.id.clone(), stored);
                Ok(())
            })
            .await
        {
            tracing::error!(vps_id = %id, ip = %ip, error = %e, "Record not saved, removing container");
            self.destroy_best_effort(&id).await;
            return Err(e);
        }

        if let Err(e) = self.notifier.notify_provisioned(&record).await {
            tracing::warn!(vps_id = %id, owner_id = record.owner_id, error = %e, "Owner notification failed");
            warnings.push(format!("owner {} was not notified: {e}", record.owner_id));
        }

        let status = self.runtime.status(&id).await;
        tracing::info!(
            vps_id = %id,
            ip = %ip,
            status = %status,
            warnings = warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "VPS provisioned"
        );
        Ok(LifecycleReport {
            record,
            status,
            warnings,
        })
    }

    /// Start a VPS. Owner only.
    pub async fn start(&self, caller: OwnerId, id: &str) -> Result<ContainerStatus> {
        self.power(caller, id, PowerAction::Start).await
    }

    /// Stop a VPS. Owner only.
    pub async fn stop(&self, caller: OwnerId, id: &str) -> Result<ContainerStatus> {
        self.power(caller, id, PowerAction::Stop).await
    }

    /// Restart a VPS. Owner only.
    ///
    /// A stop that succeeds followed by a start that fails leaves the guest
    /// stopped and is reported as [`CoreError::PartialFailure`].
    pub async fn restart(&self, caller: OwnerId, id: &str) -> Result<ContainerStatus> {
        self.power(caller, id, PowerAction::Restart).await
    }

    /// Wipe and recreate a VPS, keeping its id, address, resources and owner.
    ///
    /// Owner only. Once the old container is destroyed, any failure is a
    /// [`CoreError::PartialFailure`]: the record still exists but the
    /// container does not.
    pub async fn reinstall(&self, caller: OwnerId, id: &str) -> Result<LifecycleReport> {
        let record = self.load_record(id).await?;
        self.require_owner(&record, caller, "reinstall")?;
        let _phase = self.begin(id, VpsState::Reconfiguring)?;

        let image = match &self.config.reinstall_policy {
            ReinstallOsPolicy::PreserveRecorded => record.image(),
            ReinstallOsPolicy::Fixed(image) => image.clone(),
        };
        tracing::info!(vps_id = %id, image = %image, "Reinstalling VPS");

        self.runtime.destroy(id).await?;

        if let Err(e) = self
            .build_container(
                id,
                &image,
                record.ip_address,
                record.ram_gb,
                record.cpu_cores,
                record.disk_gb,
            )
            .await
        {
            tracing::error!(vps_id = %id, error = %e, "Reinstall failed after old container was removed");
            self.destroy_best_effort(id).await;
            return Err(CoreError::PartialFailure {
                id: id.to_string(),
                reason: format!("old container removed but recreate failed: {e}"),
            });
        }

        let mut warnings = Vec::new();
        self.settle().await;
        if let Err(e) = self.apply_password(id, &record.root_password).await {
            tracing::warn!(vps_id = %id, error = %e, "Stored root password not re-applied");
            warnings.push(format!("stored root password was not re-applied: {e}"));
        }

        let updated = self
            .registry
            .update(|reg| {
                let entry = reg
                    .get_mut(id)
                    .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
                entry.os_type = image.os_type.clone();
                entry.os_release = image.release.clone();
                Ok(entry.clone())
            })
            .await?;

        let status = self.runtime.status(id).await;
        tracing::info!(vps_id = %id, status = %status, warnings = warnings.len(), "VPS reinstalled");
        Ok(LifecycleReport {
            record: updated,
            status,
            warnings,
        })
    }

    /// Set a new root password in a running guest and record it.
    ///
    /// Owner only. The record is only updated when the guest accepted the
    /// new password.
    pub async fn change_password(
        &self,
        caller: OwnerId,
        id: &str,
        new_password: &str,
    ) -> Result<()> {
        let record = self.load_record(id).await?;
        self.require_owner(&record, caller, "change the password of")?;
        validate_password(new_password)?;
        let _phase = self.begin(id, VpsState::Reconfiguring)?;

        self.apply_password(id, new_password).await?;

        self.registry
            .update(|reg| {
                let entry = reg
                    .get_mut(id)
                    .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
                entry.root_password = new_password.to_string();
                Ok(())
            })
            .await?;

        tracing::info!(vps_id = %id, "Root password changed");
        Ok(())
    }

    /// Destroy a VPS and remove its record. Owner or privileged.
    ///
    /// The record is removed only after the container is gone.
    pub async fn delete(&self, caller: OwnerId, id: &str) -> Result<()> {
        let record = self.load_record(id).await?;
        if record.owner_id != caller && !self.config.is_privileged(caller) {
            return Err(CoreError::AuthorizationDenied {
                caller,
                action: "delete",
                id: id.to_string(),
            });
        }
        let _phase = self.begin(id, VpsState::Deleting)?;

        self.runtime.destroy(id).await?;
        self.registry
            .update(|reg| {
                reg.remove(id);
                Ok(())
            })
            .await?;

        tracing::info!(vps_id = %id, ip = %record.ip_address, "VPS deleted");
        Ok(())
    }

    /// Record plus live status. Owner only.
    pub async fn describe(&self, caller: OwnerId, id: &str) -> Result<VpsSnapshot> {
        let record = self.load_record(id).await?;
        self.require_owner(&record, caller, "describe")?;
        let status = self.runtime.status(id).await;
        let state = self.phase_of(id).unwrap_or(VpsState::Active);
        Ok(VpsSnapshot {
            record,
            status,
            state,
        })
    }

    /// Ids owned by `caller`, sorted.
    pub async fn list(&self, caller: OwnerId) -> Result<Vec<String>> {
        let registry = self.registry.load().await?;
        Ok(registry
            .into_iter()
            .filter(|(_, record)| record.owner_id == caller)
            .map(|(id, _)| id)
            .collect())
    }

    /// Lifecycle state of an id, for any caller.
    pub async fn lifecycle_state(&self, id: &str) -> Result<VpsState> {
        if let Some(phase) = self.phase_of(id) {
            return Ok(phase);
        }
        Ok(match self.registry.get(id).await? {
            Some(_) => VpsState::Active,
            None => VpsState::Absent,
        })
    }

    async fn power(&self, caller: OwnerId, id: &str, action: PowerAction) -> Result<ContainerStatus> {
        let record = self.load_record(id).await?;
        self.require_owner(&record, caller, action.verb())?;
        let _phase = self.begin(id, VpsState::Reconfiguring)?;

        tracing::info!(vps_id = %id, action = action.verb(), "Power action");
        let result = match action {
            PowerAction::Start => self.runtime.start(id).await,
            PowerAction::Stop => self.runtime.stop(id).await,
            PowerAction::Restart => self.runtime.restart(id).await,
        };
        match result {
            Ok(()) => Ok(self.runtime.status(id).await),
            Err(RuntimeError::RestartPartial { diagnostic }) => {
                tracing::error!(vps_id = %id, diagnostic = %diagnostic, "Restart left guest stopped");
                Err(CoreError::PartialFailure {
                    id: id.to_string(),
                    reason: format!("stopped but failed to start again: {diagnostic}"),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn build_container(
        &self,
        id: &str,
        image: &OsImage,
        ip: Ipv4Addr,
        ram_gb: u32,
        cpu_cores: u32,
        disk_gb: u32,
    ) -> std::result::Result<(), RuntimeError> {
        self.runtime.create_base(id, image, disk_gb).await?;
        self.runtime
            .apply_resources_and_network(id, ip, ram_gb, cpu_cores)
            .await?;
        self.runtime.start(id).await
    }

    /// Set the root password; the guest must be running.
    async fn apply_password(&self, id: &str, password: &str) -> Result<()> {
        let status = self.runtime.status(id).await;
        if !status.is_running() {
            return Err(CoreError::NotRunning {
                id: id.to_string(),
                status,
            });
        }
        let output = self
            .runtime
            .exec_root(id, &GuestCommand::set_root_password(password))
            .await?;
        if !output.success() {
            return Err(CoreError::GuestExec {
                id: id.to_string(),
                diagnostic: output.diagnostic(),
            });
        }
        Ok(())
    }

    async fn destroy_best_effort(&self, id: &str) {
        if let Err(e) = self.runtime.destroy(id).await {
            tracing::warn!(vps_id = %id, error = %e, "Rollback destroy failed, container may be orphaned");
        }
    }

    async fn settle(&self) {
        if !self.config.settle_delay.is_zero() {
            tracing::debug!(delay_ms = self.config.settle_delay.as_millis() as u64, "Waiting for guest to settle");
            tokio::time::sleep(self.config.settle_delay).await;
        }
    }

    async fn load_record(&self, id: &str) -> Result<VpsRecord> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    fn require_owner(&self, record: &VpsRecord, caller: OwnerId, action: &'static str) -> Result<()> {
        if record.owner_id == caller {
            Ok(())
        } else {
            Err(CoreError::AuthorizationDenied {
                caller,
                action,
                id: record.id.clone(),
            })
        }
    }

    fn phase_of(&self, id: &str) -> Option<VpsState> {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    fn begin(&self, id: &str, phase: VpsState) -> Result<PhaseGuard<'_>> {
        let mut table = self.phases.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = table.get(id) {
            return Err(CoreError::Busy {
                id: id.to_string(),
                phase: current.to_string(),
            });
        }
        table.insert(id.to_string(), phase);
        Ok(PhaseGuard {
            table: &self.phases,
            id: id.to_string(),
        })
    }
}
