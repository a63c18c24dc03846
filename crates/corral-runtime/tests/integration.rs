//! Integration tests for corral-runtime.
//!
//! These tests require:
//! - Linux with LXD (or classic LXC) installed and initialised
//! - Network access to the `images:` remote
//! - A macvlan network / parent interface matching the configuration
//!
//! Run with: `cargo test -p corral-runtime -- --ignored`

use corral_runtime::{
    build_runtime, Backend, ContainerStatus, GuestCommand, OsImage, RuntimeConfig, SystemRunner,
};
use std::net::Ipv4Addr;
use std::sync::Arc;

fn backend() -> Backend {
    std::env::var("CORRAL_TEST_BACKEND")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Backend::Lxd)
}

fn test_ip() -> Ipv4Addr {
    std::env::var("CORRAL_TEST_IP")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Ipv4Addr::new(192, 168, 1, 250))
}

fn runtime() -> Arc<dyn corral_runtime::ContainerRuntime> {
    let config = RuntimeConfig::builder()
        .backend(backend())
        .network(std::env::var("CORRAL_TEST_NETWORK").unwrap_or_else(|_| "macvlan_pub".into()))
        .build()
        .expect("valid runtime config");
    build_runtime(config, Arc::new(SystemRunner::new()))
}

/// Full lifecycle: create -> configure -> start -> exec -> stop -> destroy
#[tokio::test]
#[ignore = "requires Linux + LXD/LXC + images remote"]
async fn test_container_lifecycle() {
    let rt = runtime();
    let id = "corral-it-lifecycle";

    rt.create_base(id, &OsImage::for_os("debian"), 4)
        .await
        .expect("Failed to create container");
    rt.apply_resources_and_network(id, test_ip(), 1, 1)
        .await
        .expect("Failed to configure container");
    rt.start(id).await.expect("Failed to start container");
    assert_eq!(rt.status(id).await, ContainerStatus::Running);

    let out = rt
        .exec_root(id, &GuestCommand::new(["id", "-u"]))
        .await
        .expect("Failed to exec in guest");
    assert_eq!(out.stdout.trim(), "0");

    rt.stop(id).await.expect("Failed to stop container");
    assert_eq!(rt.status(id).await, ContainerStatus::Stopped);

    rt.destroy(id).await.expect("Failed to destroy container");
    assert_eq!(rt.status(id).await, ContainerStatus::Unknown);
}

/// Destroy of a container that never existed is not an error
#[tokio::test]
#[ignore = "requires Linux + LXD/LXC"]
async fn test_destroy_absent_container() {
    let rt = runtime();
    rt.destroy("corral-it-never-created")
        .await
        .expect("destroy of an absent container should succeed");
}

/// Status of an absent container is UNKNOWN, never an error
#[tokio::test]
#[ignore = "requires Linux + LXD/LXC"]
async fn test_status_absent_container() {
    let rt = runtime();
    assert_eq!(
        rt.status("corral-it-never-created").await,
        ContainerStatus::Unknown
    );
}
