//! Sequential IPv4 lease allocator backed by a one-line cursor file.
//!
//! The cursor file holds the next address to hand out. When it is absent
//! the pool bootstraps from the host's primary address: the first lease is
//! `a.b.c.100`. Leases are never returned; an exhausted pool must be
//! reseeded by hand.

use crate::error::{CoreError, Result};
use crate::persist::write_atomic;
use async_trait::async_trait;
use corral_runtime::{CommandRunner, CommandSpec};
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Last octet of the first lease on a freshly bootstrapped pool.
pub const FIRST_LEASE_OCTET: u8 = 100;

/// A cursor at or past this last octet cannot be handed out.
pub const EXHAUSTED_OCTET: u8 = 254;

/// Finds the host's primary IPv4 address.
#[async_trait]
pub trait HostAddressDetector: Send + Sync {
    /// Detect the address, or fail with [`CoreError::AutoDetectFailed`].
    async fn detect(&self) -> Result<Ipv4Addr>;
}

/// Reads the source address of the default route (`ip route get 1`).
pub struct RouteDetector {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl RouteDetector {
    /// Create a detector that runs `ip` through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl HostAddressDetector for RouteDetector {
    async fn detect(&self) -> Result<Ipv4Addr> {
        let spec = CommandSpec::new("detect-host-ip", "ip")
            .args(["route", "get", "1"])
            .timeout(self.timeout);
        let output = self
            .runner
            .run(spec)
            .await
            .map_err(|e| CoreError::AutoDetectFailed(e.to_string()))?;
        if !output.success() {
            return Err(CoreError::AutoDetectFailed(output.diagnostic()));
        }
        parse_route_source(&output.stdout).ok_or_else(|| {
            CoreError::AutoDetectFailed("no source address in routing table output".into())
        })
    }
}

/// Uses an operator-supplied host address instead of probing.
#[derive(Debug, Clone, Copy)]
pub struct FixedAddress(pub Ipv4Addr);

#[async_trait]
impl HostAddressDetector for FixedAddress {
    async fn detect(&self) -> Result<Ipv4Addr> {
        Ok(self.0)
    }
}

/// Extract the address following `src` in `ip route get` output.
pub fn parse_route_source(output: &str) -> Option<Ipv4Addr> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "src" {
            return tokens.next().and_then(|t| t.parse().ok());
        }
    }
    None
}

/// Persistent, serialized IPv4 allocator.
pub struct IpPool {
    path: PathBuf,
    detector: Arc<dyn HostAddressDetector>,
    lock: Mutex<()>,
}

impl IpPool {
    /// Create a pool over the cursor file at `path`.
    pub fn new(path: impl Into<PathBuf>, detector: Arc<dyn HostAddressDetector>) -> Self {
        Self {
            path: path.into(),
            detector,
            lock: Mutex::new(()),
        }
    }

    /// Cursor file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lease the next address.
    ///
    /// The cursor is advanced on disk before the address is returned, so a
    /// crash after this call may leak one address but never hands it out
    /// twice.
    pub async fn allocate(&self) -> Result<Ipv4Addr> {
        let _guard = self.lock.lock().await;

        let leased = match self.read_cursor().await? {
            Some(cursor) => {
                let [a, b, c, d] = cursor.octets();
                if d >= EXHAUSTED_OCTET {
                    tracing::error!(cursor = %cursor, path = %self.path.display(), "IP pool exhausted");
                    return Err(CoreError::PoolExhausted { last: cursor });
                }
                self.write_cursor(Ipv4Addr::new(a, b, c, d + 1)).await?;
                cursor
            }
            None => {
                let host = self.detector.detect().await?;
                let [a, b, c, _] = host.octets();
                let first = Ipv4Addr::new(a, b, c, FIRST_LEASE_OCTET);
                tracing::info!(host = %host, first = %first, "Bootstrapping IP pool from host address");
                self.write_cursor(Ipv4Addr::new(a, b, c, FIRST_LEASE_OCTET + 1))
                    .await?;
                first
            }
        };

        tracing::debug!(ip = %leased, "Leased address");
        Ok(leased)
    }

    /// Next address the pool would hand out, without leasing it.
    pub async fn peek(&self) -> Result<Option<Ipv4Addr>> {
        let _guard = self.lock.lock().await;
        self.read_cursor().await
    }

    async fn read_cursor(&self) -> Result<Option<Ipv4Addr>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = content.trim();
        if text.is_empty() {
            return Err(CoreError::PoolCursor {
                path: self.path.clone(),
                reason: "file is empty; write the next address to lease into it".into(),
            });
        }
        text.parse().map(Some).map_err(|_| CoreError::PoolCursor {
            path: self.path.clone(),
            reason: format!("'{text}' is not an IPv4 address"),
        })
    }

    async fn write_cursor(&self, next: Ipv4Addr) -> Result<()> {
        write_atomic(&self.path, next.to_string().as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_in(dir: &tempfile::TempDir, host: Ipv4Addr) -> IpPool {
        IpPool::new(
            dir.path().join("vps-ip-pool").join("next_ip.txt"),
            Arc::new(FixedAddress(host)),
        )
    }

    #[test]
    fn test_parse_route_source() {
        let out = "1.0.0.0 via 10.0.0.1 dev eth0 src 10.0.0.5 uid 0 \n    cache \n";
        assert_eq!(parse_route_source(out), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(parse_route_source("unreachable"), None);
        assert_eq!(parse_route_source("1.0.0.0 dev eth0 src"), None);
    }

    #[tokio::test]
    async fn test_bootstrap_then_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, Ipv4Addr::new(10, 0, 0, 5));

        assert_eq!(pool.peek().await.unwrap(), None);
        assert_eq!(pool.allocate().await.unwrap(), Ipv4Addr::new(10, 0, 0, 100));
        assert_eq!(pool.peek().await.unwrap(), Some(Ipv4Addr::new(10, 0, 0, 101)));
        assert_eq!(pool.allocate().await.unwrap(), Ipv4Addr::new(10, 0, 0, 101));
        assert_eq!(
            tokio::fs::read_to_string(pool.path()).await.unwrap(),
            "10.0.0.102"
        );
    }

    #[tokio::test]
    async fn test_exhaustion_after_154_leases() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, Ipv4Addr::new(192, 168, 1, 20));

        for expected in 100..=253u8 {
            assert_eq!(
                pool.allocate().await.unwrap(),
                Ipv4Addr::new(192, 168, 1, expected)
            );
        }
        let err = pool.allocate().await.unwrap_err();
        assert!(matches!(err, CoreError::PoolExhausted { last } if last == Ipv4Addr::new(192, 168, 1, 254)));
        // Exhaustion leaves the cursor untouched
        assert_eq!(pool.peek().await.unwrap(), Some(Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[tokio::test]
    async fn test_existing_cursor_skips_detection() {
        struct Failing;
        #[async_trait]
        impl HostAddressDetector for Failing {
            async fn detect(&self) -> Result<Ipv4Addr> {
                Err(CoreError::AutoDetectFailed("no route".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("next_ip.txt");
        tokio::fs::write(&path, "172.16.0.150\n").await.unwrap();
        let pool = IpPool::new(&path, Arc::new(Failing));

        assert_eq!(pool.allocate().await.unwrap(), Ipv4Addr::new(172, 16, 0, 150));

        let empty = IpPool::new(dir.path().join("missing.txt"), Arc::new(Failing));
        assert!(matches!(
            empty.allocate().await,
            Err(CoreError::AutoDetectFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_cursor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("next_ip.txt");
        let pool = IpPool::new(&path, Arc::new(FixedAddress(Ipv4Addr::new(10, 0, 0, 5))));

        tokio::fs::write(&path, "").await.unwrap();
        assert!(matches!(pool.allocate().await, Err(CoreError::PoolCursor { .. })));

        tokio::fs::write(&path, "not-an-ip").await.unwrap();
        assert!(matches!(pool.allocate().await, Err(CoreError::PoolCursor { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(pool_in(&dir, Ipv4Addr::new(10, 1, 2, 3)));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.allocate().await.unwrap() })
            })
            .collect();

        let mut leased = Vec::new();
        for handle in handles {
            leased.push(handle.await.unwrap());
        }
        leased.sort();
        leased.dedup();
        assert_eq!(leased.len(), 20);
    }
}
