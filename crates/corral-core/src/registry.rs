//! Durable mapping from VPS id to [`VpsRecord`], stored as one JSON document.

use crate::error::{CoreError, Result};
use crate::persist::write_atomic;
use crate::record::VpsRecord;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// In-memory view of the registry, ordered by id.
pub type Registry = BTreeMap<String, VpsRecord>;

/// Whole-file registry store.
///
/// Every mutation is a read-modify-write under one lock, written back
/// atomically. A missing file reads as an empty registry; a file that does
/// not parse is an error and is never overwritten.
pub struct RegistryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RegistryStore {
    /// Create a store over the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Registry file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record.
    pub async fn load(&self) -> Result<Registry> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Look up one record.
    pub async fn get(&self, id: &str) -> Result<Option<VpsRecord>> {
        Ok(self.load().await?.remove(id))
    }

    /// Replace the whole registry.
    pub async fn save(&self, registry: &Registry) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(registry).await
    }

    /// Apply `f` to the current registry and persist the result.
    ///
    /// Nothing is written when `f` returns an error.
    pub async fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Registry) -> Result<R>,
    {
        let _guard = self.lock.lock().await;
        let mut registry = self.read().await?;
        let out = f(&mut registry)?;
        self.write(&registry).await?;
        Ok(out)
    }

    async fn read(&self) -> Result<Registry> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Registry::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Registry::new());
        }

        let mut registry: Registry =
            serde_json::from_str(&content).map_err(|e| CoreError::Registry {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        for (key, record) in registry.iter_mut() {
            record.normalize(key);
        }
        Ok(registry)
    }

    async fn write(&self, registry: &Registry) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(registry)?;
        json.push(b'\n');
        write_atomic(&self.path, &json).await?;
        tracing::debug!(path = %self.path.display(), records = registry.len(), "Registry saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn record(id: &str, owner: u64, last: u8) -> VpsRecord {
        VpsRecord {
            id: id.to_string(),
            owner_id: owner,
            ip_address: Ipv4Addr::new(10, 0, 0, last),
            root_password: "pw".into(),
            os_type: "ubuntu".into(),
            os_release: "22.04".into(),
            ram_gb: 1,
            cpu_cores: 1,
            disk_gb: 10,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("vps-db.json"));
        assert!(store.load().await.unwrap().is_empty());
        assert!(store.get("web1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("vps-db.json"));

        store
            .update(|reg| {
                reg.insert("web1".into(), record("web1", 1, 100));
                reg.insert("db".into(), record("db", 2, 101));
                Ok(())
            })
            .await
            .unwrap();

        let reopened = RegistryStore::new(store.path());
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["db", "web1"]);
        assert_eq!(loaded["web1"], record("web1", 1, 100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(RegistryStore::new(dir.path().join("vps-db.json")));

        let handles: Vec<_> = (0..16u8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let id = format!("vps{i}");
                    store
                        .update(move |reg| {
                            reg.insert(id.clone(), record(&id, 1, 100 + i));
                            Ok(())
                        })
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = RegistryStore::new(store.path()).load().await.unwrap();
        assert_eq!(loaded.len(), 16);
        assert_eq!(loaded["vps7"].ip_address, Ipv4Addr::new(10, 0, 0, 107));
    }

    #[tokio::test]
    async fn test_failed_update_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("vps-db.json"));
        let mut initial = Registry::new();
        initial.insert("web1".into(), record("web1", 1, 100));
        store.save(&initial).await.unwrap();

        let result: Result<()> = store
            .update(|reg| {
                reg.clear();
                Err(CoreError::NotFound("web2".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.load().await.unwrap(), initial);
    }

    #[tokio::test]
    async fn test_malformed_file_fails_and_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vps-db.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let store = RegistryStore::new(&path);

        assert!(matches!(store.load().await, Err(CoreError::Registry { .. })));
        let result = store.update(|_| Ok(())).await;
        assert!(matches!(result, Err(CoreError::Registry { .. })));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn test_reads_legacy_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vps-db.json");
        let legacy = r#"{
            "web1": {"name": "web1", "owner_id": 42, "ip": "10.0.0.100",
                     "password": "pw", "os": "debian", "ram_gb": 2, "cpu": 2, "disk_gb": 20}
        }"#;
        tokio::fs::write(&path, legacy).await.unwrap();

        let loaded = RegistryStore::new(&path).load().await.unwrap();
        let web1 = &loaded["web1"];
        assert_eq!(web1.owner_id, 42);
        assert_eq!(web1.os_release, "12");
        assert_eq!(web1.cpu_cores, 2);
    }
}
