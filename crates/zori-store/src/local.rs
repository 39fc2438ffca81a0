//! Directory-backed pack store: `<root>/<bucket>/<object>`.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use zori_core::{ZoriError, ZoriResult};

use crate::backend::{validate_name, PackStore};

#[derive(Debug, Clone)]
pub struct LocalPackStore {
    root: PathBuf,
}

impl LocalPackStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, object: &str) -> ZoriResult<PathBuf> {
        validate_name("bucket", bucket)?;
        validate_name("object", object)?;
        Ok(self.root.join(bucket).join(object))
    }
}

/// Copy `src` to `dest` through a temp file in `dest`'s directory.
fn copy_atomic(src: &Path, dest: &Path) -> ZoriResult<u64> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let bytes = io::copy(&mut File::open(src)?, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(bytes)
}

/// Sorted names of the entries in `dir` matching `keep`, skipping dotfiles.
fn list_names(dir: &Path, keep: impl Fn(&fs::FileType) -> bool) -> ZoriResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !keep(&entry.file_type()?) {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            if !name.starts_with('.') {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

impl PackStore for LocalPackStore {
    fn put(&self, bucket: &str, object: &str, local_path: &Path) -> ZoriResult<()> {
        let dest = self.object_path(bucket, object)?;
        let bytes = copy_atomic(local_path, &dest)?;
        debug!(root = %self.root.display(), bucket, object, bytes, "stored pack");
        Ok(())
    }

    fn get(&self, bucket: &str, object: &str, local_path: &Path) -> ZoriResult<()> {
        let src = self.object_path(bucket, object)?;
        if !src.is_file() {
            return Err(ZoriError::store(format!(
                "no object {bucket}/{object} in {}",
                self.root.display()
            )));
        }
        copy_atomic(&src, local_path)?;
        Ok(())
    }

    fn list_buckets(&self) -> ZoriResult<Vec<String>> {
        list_names(&self.root, |t| t.is_dir())
    }

    fn list_objects(&self, bucket: &str) -> ZoriResult<Vec<String>> {
        validate_name("bucket", bucket)?;
        list_names(&self.root.join(bucket), |t| t.is_file())
    }

    fn contains(&self, bucket: &str, object: &str) -> ZoriResult<bool> {
        Ok(self.object_path(bucket, object)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, data).unwrap();
        p
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalPackStore::new(dir.path().join("store"));
        let src = source(dir.path(), "pack", b"pack bytes");

        store.put("bucket-a", "sha256-01", &src).unwrap();
        let out = dir.path().join("fetched/pack");
        store.get("bucket-a", "sha256-01", &out).unwrap();

        assert_eq!(fs::read(out).unwrap(), b"pack bytes");
        assert!(store.contains("bucket-a", "sha256-01").unwrap());
        assert!(!store.contains("bucket-a", "sha256-02").unwrap());
    }

    #[test]
    fn test_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalPackStore::new(dir.path().join("store"));
        let src = source(dir.path(), "pack", b"x");

        assert!(store.list_buckets().unwrap().is_empty());
        assert!(store.list_objects("nothing").unwrap().is_empty());

        store.put("b2", "o2", &src).unwrap();
        store.put("b1", "o1", &src).unwrap();
        store.put("b1", "o0", &src).unwrap();

        assert_eq!(store.list_buckets().unwrap(), vec!["b1", "b2"]);
        assert_eq!(store.list_objects("b1").unwrap(), vec!["o0", "o1"]);
    }

    #[test]
    fn test_put_replaces_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalPackStore::new(dir.path().join("store"));
        store.put("b", "o", &source(dir.path(), "one", b"1")).unwrap();
        store.put("b", "o", &source(dir.path(), "two", b"2")).unwrap();

        let out = dir.path().join("out");
        store.get("b", "o", &out).unwrap();
        assert_eq!(fs::read(out).unwrap(), b"2");
        assert_eq!(store.list_objects("b").unwrap(), vec!["o"]);
    }

    #[test]
    fn test_get_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalPackStore::new(dir.path());
        let err = store.get("b", "missing", &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ZoriError::Store(_)));
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalPackStore::new(dir.path().join("store"));
        let src = source(dir.path(), "pack", b"x");
        assert!(store.put("..", "o", &src).is_err());
        assert!(store.put("b", "../escape", &src).is_err());
        assert!(!dir.path().join("escape").exists());
    }
}
