//! Named set of pack stores

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use zori_core::config::{expand_home, StoreConfig};
use zori_core::{ZoriError, ZoriResult};

use crate::backend::PackStore;
use crate::local::LocalPackStore;

/// Stores a pack is replicated to, keyed by name.
///
/// Owned by the caller and passed to the pack writer, so independent engines
/// (and tests) each see only their own stores.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: BTreeMap<String, Arc<dyn PackStore>>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stores.keys()).finish()
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a store, returning whatever was registered under `name` before.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        store: Arc<dyn PackStore>,
    ) -> Option<Arc<dyn PackStore>> {
        self.stores.insert(name.into(), store)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn PackStore>> {
        self.stores.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PackStore>> {
        self.stores.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn PackStore>)> {
        self.stores.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// `put` the file into every registered store; the first failure wins.
    pub fn put_all(&self, bucket: &str, object: &str, local_path: &Path) -> ZoriResult<()> {
        for (name, store) in &self.stores {
            store
                .put(bucket, object, local_path)
                .map_err(|e| ZoriError::store(format!("store {name}: {e}")))?;
        }
        Ok(())
    }

    /// `get` from the first store that holds the object.
    pub fn get_any(&self, bucket: &str, object: &str, local_path: &Path) -> ZoriResult<()> {
        for (name, store) in &self.stores {
            match store.contains(bucket, object) {
                Ok(true) => return store.get(bucket, object, local_path),
                Ok(false) => {}
                Err(e) => warn!(store = %name, error = %e, "store lookup failed"),
            }
        }
        Err(ZoriError::store(format!(
            "{bucket}/{object} not found in any store"
        )))
    }

    /// Names of stores that cannot even list their buckets.
    pub fn unhealthy(&self) -> Vec<String> {
        self.stores
            .iter()
            .filter_map(|(name, store)| match store.list_buckets() {
                Ok(_) => None,
                Err(e) => {
                    warn!(store = %name, error = %e, "store health check failed");
                    Some(name.clone())
                }
            })
            .collect()
    }
}

/// One [`LocalPackStore`] per configured pack directory, named `local:<path>`.
pub fn build_registry(cfg: &StoreConfig) -> ZoriResult<StoreRegistry> {
    let mut registry = StoreRegistry::new();
    for dir in &cfg.pack_dirs {
        let root = expand_home(dir);
        std::fs::create_dir_all(&root)?;
        let name = format!("local:{}", root.display());
        info!(store = %name, "registered pack store");
        registry.register(name, Arc::new(LocalPackStore::new(root)));
    }
    if registry.is_empty() {
        warn!("no pack stores configured; packs will only exist in the staging directory");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Store that records puts and can be told to fail.
    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl PackStore for RecordingStore {
        fn put(&self, bucket: &str, object: &str, _local_path: &Path) -> ZoriResult<()> {
            if self.fail {
                return Err(ZoriError::store("offline"));
            }
            self.puts
                .lock()
                .unwrap()
                .push((bucket.to_string(), object.to_string()));
            Ok(())
        }

        fn get(&self, _bucket: &str, _object: &str, _local_path: &Path) -> ZoriResult<()> {
            Err(ZoriError::store("write-only"))
        }

        fn list_buckets(&self) -> ZoriResult<Vec<String>> {
            if self.fail {
                return Err(ZoriError::store("offline"));
            }
            Ok(vec![])
        }

        fn list_objects(&self, _bucket: &str) -> ZoriResult<Vec<String>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_register_unregister() {
        let mut reg = StoreRegistry::new();
        assert!(reg.is_empty());

        let a: Arc<dyn PackStore> = Arc::new(RecordingStore::default());
        assert!(reg.register("a", a.clone()).is_none());
        assert!(reg.register("a", a).is_some(), "re-register returns previous");
        assert_eq!(reg.len(), 1);
        assert!(reg.get("a").is_some());

        assert!(reg.unregister("a").is_some());
        assert!(reg.get("a").is_none());
        assert!(reg.unregister("a").is_none());
    }

    #[test]
    fn test_registries_are_independent() {
        let mut one = StoreRegistry::new();
        let two = StoreRegistry::new();
        one.register("only-in-one", Arc::new(RecordingStore::default()));
        assert!(two.get("only-in-one").is_none());
    }

    #[test]
    fn test_put_all_reaches_every_store() {
        let a = Arc::new(RecordingStore::default());
        let b = Arc::new(RecordingStore::default());
        let mut reg = StoreRegistry::new();
        reg.register("a", a.clone());
        reg.register("b", b.clone());

        reg.put_all("bucket", "obj", &PathBuf::from("/dev/null")).unwrap();

        for store in [a, b] {
            assert_eq!(
                *store.puts.lock().unwrap(),
                vec![("bucket".to_string(), "obj".to_string())]
            );
        }
    }

    #[test]
    fn test_put_all_reports_failing_store() {
        let mut reg = StoreRegistry::new();
        reg.register(
            "broken",
            Arc::new(RecordingStore {
                fail: true,
                ..Default::default()
            }),
        );
        let err = reg.put_all("b", "o", Path::new("/dev/null")).unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert_eq!(reg.unhealthy(), vec!["broken"]);
    }

    #[test]
    fn test_get_any_uses_store_holding_object() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"pack").unwrap();

        let empty = LocalPackStore::new(dir.path().join("empty"));
        let full = LocalPackStore::new(dir.path().join("full"));
        full.put("b", "o", &src).unwrap();

        let mut reg = StoreRegistry::new();
        reg.register("1-empty", Arc::new(empty));
        reg.register("2-full", Arc::new(full));

        let out = dir.path().join("out");
        reg.get_any("b", "o", &out).unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"pack");
        assert!(reg.get_any("b", "missing", &dir.path().join("x")).is_err());
    }

    #[test]
    fn test_build_registry_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            documents: dir.path().join("db"),
            pack_dirs: vec![dir.path().join("p1"), dir.path().join("p2")],
            bucket: None,
        };
        let reg = build_registry(&cfg).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(dir.path().join("p1").is_dir());
        assert!(reg.unhealthy().is_empty());
    }
}
