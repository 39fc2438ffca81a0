use std::path::Path;

use zori_core::{ZoriError, ZoriResult};

/// A place packs can be copied to and fetched from.
///
/// Objects are immutable once written; `put` of an existing object replaces
/// it with identical bytes.
pub trait PackStore: Send + Sync {
    /// Upload the file at `local_path` as `bucket/object`.
    fn put(&self, bucket: &str, object: &str, local_path: &Path) -> ZoriResult<()>;

    /// Download `bucket/object` to `local_path`.
    fn get(&self, bucket: &str, object: &str, local_path: &Path) -> ZoriResult<()>;

    fn list_buckets(&self) -> ZoriResult<Vec<String>>;

    /// Object names in `bucket`; an unknown bucket has none.
    fn list_objects(&self, bucket: &str) -> ZoriResult<Vec<String>>;

    fn contains(&self, bucket: &str, object: &str) -> ZoriResult<bool> {
        Ok(self.list_objects(bucket)?.iter().any(|o| o == object))
    }
}

/// Bucket and object names become single path components or URL segments.
pub fn validate_name(kind: &str, name: &str) -> ZoriResult<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(ZoriError::store(format!("invalid {kind} name: {name:?}")))
    }
}
