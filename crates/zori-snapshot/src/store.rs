//! Document persistence for envelopes, trees, snapshots and bookkeeping records.
//!
//! Two backends are available:
//!   - **Memory**: a mutex-guarded map, for tests and dry runs.
//!   - **JSON directory**: one file per document, written atomically via
//!     temp file + rename so a crash never leaves a half-written record.
//!
//! Ids are `/`-separated (`tree/sha256-…`); the JSON backend maps each segment
//! to a directory level.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use zori_core::{ZoriError, ZoriResult};

/// Key/value store for JSON documents.
pub trait DocumentStore: Send + Sync {
    fn fetch(&self, id: &str) -> ZoriResult<Option<Value>>;

    /// Insert or replace; returns `true` when a document already existed.
    fn upsert(&self, id: &str, doc: Value) -> ZoriResult<bool>;

    fn contains(&self, id: &str) -> ZoriResult<bool> {
        Ok(self.fetch(id)?.is_some())
    }
}

/// Fetch and deserialize a document.
pub fn fetch_doc<T: DeserializeOwned>(store: &dyn DocumentStore, id: &str) -> ZoriResult<Option<T>> {
    match store.fetch(id)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and upsert a document.
pub fn upsert_doc<T: Serialize>(store: &dyn DocumentStore, id: &str, doc: &T) -> ZoriResult<bool> {
    store.upsert(id, serde_json::to_value(doc)?)
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ZoriResult<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.docs
            .lock()
            .map_err(|_| ZoriError::store("document store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids starting with `prefix`, sorted.
    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .map(|d| d.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn fetch(&self, id: &str) -> ZoriResult<Option<Value>> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn upsert(&self, id: &str, doc: Value) -> ZoriResult<bool> {
        Ok(self.lock()?.insert(id.to_string(), doc).is_some())
    }

    fn contains(&self, id: &str) -> ZoriResult<bool> {
        Ok(self.lock()?.contains_key(id))
    }
}

/// One JSON file per document under a root directory.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> ZoriResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, id: &str) -> ZoriResult<PathBuf> {
        let mut path = self.root.clone();
        let mut segments = id.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segment.is_empty()
                || segment.starts_with('.')
                || segment.contains(['\\', '\0'])
            {
                return Err(ZoriError::store(format!("invalid document id: {id:?}")));
            }
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{segment}.json"));
            }
        }
        Ok(path)
    }
}

impl DocumentStore for JsonDirStore {
    fn fetch(&self, id: &str) -> ZoriResult<Option<Value>> {
        let path = self.doc_path(id)?;
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ZoriError::format(format!("parsing {}: {e}", path.display())))
    }

    fn upsert(&self, id: &str, doc: Value) -> ZoriResult<bool> {
        let path = self.doc_path(id)?;
        let existed = path.exists();
        let dir = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, &doc)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(existed)
    }

    fn contains(&self, id: &str) -> ZoriResult<bool> {
        Ok(self.doc_path(id)?.is_file())
    }
}
