//! In-memory runtime and notifier shared by the orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use corral_core::{
    CoreConfig, FixedAddress, NotifyError, OwnerNotifier, VpsOrchestrator, VpsRecord,
};
use corral_runtime::{
    CommandOutput, ContainerRuntime, ContainerStatus, GuestCommand, OsImage, RuntimeError,
};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const ADMIN: u64 = 1;
pub const ALICE: u64 = 42;
pub const BOB: u64 = 43;

/// Container as the fake host sees it.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub image: OsImage,
    pub disk_gb: u32,
    pub ip: Option<Ipv4Addr>,
    pub ram_gb: u32,
    pub cpu_cores: u32,
    pub running: bool,
    pub root_password: Option<String>,
}

/// Scripted runtime: keeps containers in a map, logs every call and fails
/// the verbs named in `fail`.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    calls: Mutex<Vec<String>>,
    fail: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<&'static str, (Arc<Notify>, Arc<Notify>)>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later call of `verb` fail.
    pub fn fail(&self, verb: &'static str) {
        self.fail.lock().unwrap().insert(verb);
    }

    pub fn heal(&self, verb: &'static str) {
        self.fail.lock().unwrap().remove(verb);
    }

    /// Park the next call of `verb` until `release` is notified; `entered`
    /// fires once it is parked.
    pub fn gate(&self, verb: &'static str) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(verb, (entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn gate_create(&self) -> (Arc<Notify>, Arc<Notify>) {
        self.gate("create")
    }

    async fn pass_gate(&self, verb: &str) {
        let gate = self.gates.lock().unwrap().remove(verb);
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.containers.lock().unwrap().get(id).cloned()
    }

    /// Insert a container behind the orchestrator's back.
    pub fn plant(&self, id: &str) {
        self.containers.lock().unwrap().insert(
            id.to_string(),
            FakeContainer {
                image: OsImage::for_os("ubuntu"),
                disk_gb: 10,
                ip: None,
                ram_gb: 1,
                cpu_cores: 1,
                running: false,
                root_password: None,
            },
        );
    }

    fn record(&self, verb: &str, id: &str) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("{verb} {id}"));
        if self.fail.lock().unwrap().contains(verb) {
            return Err(RuntimeError::CommandFailed {
                stage: verb.to_string(),
                diagnostic: format!("injected {verb} failure"),
            });
        }
        Ok(())
    }

    fn with_container<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut FakeContainer) -> R,
    ) -> Result<R, RuntimeError> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::CommandFailed {
                stage: "lookup".into(),
                diagnostic: format!("container {id} not found"),
            })?;
        Ok(f(container))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_base(&self, id: &str, image: &OsImage, disk_gb: u32) -> Result<(), RuntimeError> {
        self.pass_gate("create").await;
        self.record("create", id)?;
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(id) {
            return Err(RuntimeError::CommandFailed {
                stage: "create".into(),
                diagnostic: format!("container {id} already exists"),
            });
        }
        containers.insert(
            id.to_string(),
            FakeContainer {
                image: image.clone(),
                disk_gb,
                ip: None,
                ram_gb: 0,
                cpu_cores: 0,
                running: false,
                root_password: None,
            },
        );
        Ok(())
    }

    async fn apply_resources_and_network(
        &self,
        id: &str,
        ip: Ipv4Addr,
        ram_gb: u32,
        cpu_cores: u32,
    ) -> Result<(), RuntimeError> {
        self.record("apply", id)?;
        self.with_container(id, |c| {
            c.ip = Some(ip);
            c.ram_gb = ram_gb;
            c.cpu_cores = cpu_cores;
        })
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.record("start", id)?;
        self.with_container(id, |c| c.running = true)
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.pass_gate("stop").await;
        self.record("stop", id)?;
        self.with_container(id, |c| c.running = false)
    }

    async fn destroy(&self, id: &str) -> Result<(), RuntimeError> {
        self.record("destroy", id)?;
        self.containers.lock().unwrap().remove(id);
        Ok(())
    }

    async fn exec_root(
        &self,
        id: &str,
        command: &GuestCommand,
    ) -> Result<CommandOutput, RuntimeError> {
        self.record("exec", id)?;
        let password = match (command.argv.as_slice(), command.stdin.as_deref()) {
            ([program], Some(input)) if program == "chpasswd" => input
                .trim_end_matches('\n')
                .strip_prefix("root:")
                .map(str::to_string),
            _ => None,
        };
        match password {
            Some(pw) => {
                self.with_container(id, |c| c.root_password = Some(pw))?;
                Ok(CommandOutput::ok(""))
            }
            None => Ok(CommandOutput::failed(127, "unsupported guest command")),
        }
    }

    async fn status(&self, id: &str) -> ContainerStatus {
        self.calls.lock().unwrap().push(format!("status {id}"));
        match self.containers.lock().unwrap().get(id) {
            Some(c) if c.running => ContainerStatus::Running,
            Some(_) => ContainerStatus::Stopped,
            None => ContainerStatus::Unknown,
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Collects notifications; optionally refuses them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<VpsRecord>>,
    pub refuse: Mutex<bool>,
}

#[async_trait]
impl OwnerNotifier for RecordingNotifier {
    async fn notify_provisioned(&self, record: &VpsRecord) -> Result<(), NotifyError> {
        if *self.refuse.lock().unwrap() {
            return Err(NotifyError::SendFailed("owner has direct messages disabled".into()));
        }
        self.sent.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Orchestrator wired to fakes, with state files in a temp dir.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub runtime: Arc<FakeRuntime>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<VpsOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|b| b)
    }

    pub fn with_config(
        customize: impl FnOnce(corral_core::CoreConfigBuilder) -> corral_core::CoreConfigBuilder,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = customize(
            CoreConfig::builder()
                .state_dir(dir.path())
                .privileged_operator(ADMIN),
        )
        .build()
        .unwrap();
        let runtime = FakeRuntime::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Arc::new(VpsOrchestrator::new(
            config,
            runtime.clone(),
            Arc::new(FixedAddress(Ipv4Addr::new(10, 0, 0, 5))),
            notifier.clone(),
        ));
        Self {
            dir,
            runtime,
            notifier,
            orchestrator,
        }
    }
}
