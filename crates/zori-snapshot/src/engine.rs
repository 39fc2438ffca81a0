//! Snapshot engine: directory walk → content-addressed trees → snapshot history
//!
//!   - `take_snapshot`: walk a directory, chunk and pack new file content,
//!     commit trees bottom-up and seal a snapshot linked to its parent
//!   - `find_changed_files`: lockstep diff of two snapshots' trees
//!   - `backup`: snapshot a configured data set and advance its head
//!
//! Nothing that references a pack is written until the pack is stored:
//! file records and trees are buffered during the walk and committed only
//! after the packer has flushed.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use zori_chunks::{find_chunks_and_digest, Chunk, ChunkSizes};
use zori_core::config::{expand_home, DataSetConfig, EngineConfig};
use zori_core::{Algorithm, ContentAddress, ZoriError, ZoriResult};

use crate::model::{
    ids, mod_time_of, DataSet, EntryReference, FileChunk, FileRecord, Snapshot, Tree, TreeEntry,
};
use crate::pack_sink::PackSink;
use crate::store::{fetch_doc, upsert_doc, DocumentStore};

pub struct SnapshotEngine {
    docs: Arc<dyn DocumentStore>,
    algorithm: Algorithm,
    small_file_threshold: u64,
    chunk_sizes: ChunkSizes,
    excludes: Vec<glob::Pattern>,
    packer: Option<PackSink>,
}

/// State accumulated over one walk.
struct Walk {
    excludes: Vec<glob::Pattern>,
    /// Documents to commit once packs are flushed, children before parents
    pending: Vec<(String, Value)>,
    file_count: u64,
    errors: u64,
}

impl Walk {
    fn is_excluded(&self, name: &str, rel_path: &Path) -> bool {
        self.excludes
            .iter()
            .any(|p| p.matches(name) || p.matches_path(rel_path))
    }

    /// Record an unreadable entry and keep walking.
    fn error(&mut self, path: &Path, err: impl std::fmt::Display) -> EntryReference {
        warn!(path = %path.display(), error = %err, "recording unreadable entry");
        self.errors += 1;
        EntryReference::Error(err.to_string())
    }
}

/// A regular file, read but not yet committed.
enum FileCapture {
    Small(Vec<u8>),
    /// Content whose file record (and chunks, when packing) already exist
    Known(ContentAddress),
    Chunked { record: FileRecord, chunks: Vec<Chunk> },
}

/// Compile glob exclude patterns.
pub fn compile_excludes(patterns: &[String]) -> ZoriResult<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| ZoriError::Config(format!("invalid exclude pattern {p:?}: {e}")))
        })
        .collect()
}

/// Directory entries sorted by name.
fn list_dir(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        out.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    out.sort();
    Ok(out)
}

#[cfg(unix)]
fn os_bytes(s: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_bytes(s: &OsStr) -> Vec<u8> {
    s.to_string_lossy().into_owned().into_bytes()
}

impl SnapshotEngine {
    pub fn new(docs: Arc<dyn DocumentStore>, config: &EngineConfig) -> Self {
        Self {
            docs,
            algorithm: config.hash_algorithm,
            small_file_threshold: config.small_file_threshold,
            chunk_sizes: ChunkSizes::for_average(64 * 1024),
            excludes: Vec::new(),
            packer: None,
        }
    }

    pub fn with_chunk_sizes(mut self, sizes: ChunkSizes) -> Self {
        self.chunk_sizes = sizes;
        self
    }

    /// Skip entries whose name or base-relative path matches any pattern.
    pub fn with_excludes(mut self, patterns: &[String]) -> ZoriResult<Self> {
        self.excludes = compile_excludes(patterns)?;
        Ok(self)
    }

    /// Pack new chunks through `packer`; without one only metadata is recorded.
    pub fn with_packer(mut self, packer: PackSink) -> Self {
        self.packer = Some(packer);
        self
    }

    pub fn packer(&self) -> Option<&PackSink> {
        self.packer.as_ref()
    }

    pub fn docs(&self) -> &Arc<dyn DocumentStore> {
        &self.docs
    }

    /// Walk `base_path` and commit a snapshot whose parent is `parent`.
    pub fn take_snapshot(
        &mut self,
        base_path: &Path,
        parent: Option<&ContentAddress>,
    ) -> ZoriResult<ContentAddress> {
        self.snapshot_with(base_path, parent, &[])
    }

    fn snapshot_with(
        &mut self,
        base_path: &Path,
        parent: Option<&ContentAddress>,
        extra_excludes: &[glob::Pattern],
    ) -> ZoriResult<ContentAddress> {
        if let Some(parent) = parent {
            if !self.docs.contains(&ids::snapshot(parent))? {
                return Err(ZoriError::store(format!("parent snapshot {parent} not found")));
            }
        }

        let start_time = Utc::now();
        let mut walk = Walk {
            excludes: self.excludes.iter().chain(extra_excludes).cloned().collect(),
            pending: Vec::new(),
            file_count: 0,
            errors: 0,
        };

        let listing = list_dir(base_path)?;
        let tree = self.walk_dir(base_path, Path::new(""), listing, &mut walk)?;

        if let Some(packer) = &mut self.packer {
            packer.flush()?;
        }
        let committed = walk.pending.len();
        for (id, doc) in walk.pending.drain(..) {
            self.docs.upsert(&id, doc)?;
        }

        let snapshot = Snapshot::seal(
            parent.cloned(),
            start_time,
            Some(Utc::now()),
            walk.file_count,
            tree,
        )?;
        upsert_doc(self.docs.as_ref(), &ids::snapshot(&snapshot.checksum), &snapshot)?;

        info!(
            snapshot = %snapshot.checksum,
            tree = %snapshot.tree,
            path = %base_path.display(),
            files = walk.file_count,
            errors = walk.errors,
            documents = committed,
            "committed snapshot"
        );
        Ok(snapshot.checksum)
    }

    fn walk_dir(
        &mut self,
        dir: &Path,
        rel: &Path,
        listing: Vec<(String, PathBuf)>,
        walk: &mut Walk,
    ) -> ZoriResult<ContentAddress> {
        let mut entries = Vec::with_capacity(listing.len());

        let mut listing = listing.into_iter().peekable();
        while let Some((name, path)) = listing.next() {
            // Distinct non-UTF-8 names can convert to the same string.
            let mut collisions = 0;
            while listing.next_if(|(next, _)| *next == name).is_some() {
                collisions += 1;
            }

            let rel_path = rel.join(&name);
            if walk.is_excluded(&name, &rel_path) {
                debug!(path = %rel_path.display(), "excluded");
                continue;
            }
            if collisions > 0 {
                let reference = walk.error(
                    &path,
                    format!("{} entries share this name after UTF-8 conversion", collisions + 1),
                );
                entries.push(TreeEntry {
                    name,
                    mod_time: Default::default(),
                    reference,
                });
                continue;
            }

            let meta = match std::fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    let reference = walk.error(&path, e);
                    entries.push(TreeEntry {
                        name,
                        mod_time: Default::default(),
                        reference,
                    });
                    continue;
                }
            };
            let mod_time = meta.modified().map(mod_time_of).unwrap_or_default();
            let file_type = meta.file_type();

            let reference = if file_type.is_symlink() {
                match std::fs::read_link(&path) {
                    Ok(target) => EntryReference::link(&os_bytes(target.as_os_str())),
                    Err(e) => walk.error(&path, e),
                }
            } else if file_type.is_dir() {
                match list_dir(&path) {
                    Ok(children) => {
                        EntryReference::Tree(self.walk_dir(&path, &rel_path, children, walk)?)
                    }
                    Err(e) => walk.error(&path, e),
                }
            } else if file_type.is_file() {
                match self.read_file(&path, meta.len()) {
                    Ok(capture) => self.commit_file(capture, walk)?,
                    Err(e) => walk.error(&path, e),
                }
            } else {
                debug!(path = %path.display(), "skipping special file");
                continue;
            };

            entries.push(TreeEntry {
                name,
                mod_time,
                reference,
            });
        }

        let tree = Tree::new(entries);
        let address = tree.address(self.algorithm)?;
        debug!(
            tree = %address,
            path = %dir.display(),
            entries = tree.entries().len(),
            "built tree"
        );
        walk.pending.push((ids::tree(&address), serde_json::to_value(&tree)?));
        Ok(address)
    }

    /// Read, hash and chunk one file. Errors here only affect this entry.
    ///
    /// `len` is only a hint from the directory walk; the bytes actually read
    /// decide between inline and chunked storage.
    fn read_file(&self, path: &Path, len: u64) -> ZoriResult<FileCapture> {
        if len <= self.small_file_threshold {
            let mut bytes = Vec::with_capacity(len as usize);
            File::open(path)?
                .take(self.small_file_threshold.saturating_add(1))
                .read_to_end(&mut bytes)?;
            if bytes.len() as u64 <= self.small_file_threshold {
                return Ok(FileCapture::Small(bytes));
            }
            debug!(path = %path.display(), "file grew past inline threshold");
        }

        let (address, chunks) = find_chunks_and_digest(path, self.chunk_sizes, self.algorithm)?;
        if self.is_captured(&address)? {
            debug!(path = %path.display(), file = %address, "content already stored");
            return Ok(FileCapture::Known(address));
        }

        let record = FileRecord {
            address,
            length: chunks.iter().map(|c| c.size as u64).sum(),
            chunks: chunks
                .iter()
                .map(|c| FileChunk {
                    offset: c.offset,
                    size: c.size,
                    content_hash: c.content_hash.clone(),
                })
                .collect(),
        };
        Ok(FileCapture::Chunked { record, chunks })
    }

    /// Whether a previous walk fully recorded this content.
    fn is_captured(&self, address: &ContentAddress) -> ZoriResult<bool> {
        let Some(record) = fetch_doc::<FileRecord>(self.docs.as_ref(), &ids::file(address))? else {
            return Ok(false);
        };
        if self.packer.is_none() {
            return Ok(true);
        }
        for chunk in &record.chunks {
            if !self.docs.contains(&ids::chunk(&chunk.content_hash))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Hand new chunks to the packer and queue the file record. Packing
    /// failures abort the snapshot.
    fn commit_file(&mut self, capture: FileCapture, walk: &mut Walk) -> ZoriResult<EntryReference> {
        walk.file_count += 1;
        match capture {
            FileCapture::Small(bytes) => Ok(EntryReference::small(&bytes)),
            FileCapture::Known(address) => Ok(EntryReference::File(address)),
            FileCapture::Chunked { record, chunks } => {
                if let Some(packer) = &mut self.packer {
                    for chunk in chunks {
                        packer.add(chunk)?;
                    }
                }
                let address = record.address.clone();
                walk.pending.push((ids::file(&address), serde_json::to_value(&record)?));
                Ok(EntryReference::File(address))
            }
        }
    }

    /// Paths whose reference differs between two snapshots, with their new reference.
    ///
    /// Unchanged entries and deleted paths are not reported. Subtrees present
    /// on both sides are diffed recursively; a directory that is new, or that
    /// replaced a non-directory, is reported leaf by leaf (an empty one as
    /// itself).
    pub fn find_changed_files(
        &self,
        old: &ContentAddress,
        new: &ContentAddress,
    ) -> ZoriResult<BTreeMap<PathBuf, EntryReference>> {
        let old = self.load_snapshot(old)?;
        let new = self.load_snapshot(new)?;
        let mut changes = BTreeMap::new();
        if old.tree != new.tree {
            self.diff_trees(&old.tree, &new.tree, Path::new(""), &mut changes)?;
        }
        Ok(changes)
    }

    fn diff_trees(
        &self,
        old: &ContentAddress,
        new: &ContentAddress,
        prefix: &Path,
        out: &mut BTreeMap<PathBuf, EntryReference>,
    ) -> ZoriResult<()> {
        let old_tree = self.load_tree(old)?;
        let new_tree = self.load_tree(new)?;
        let mut old_entries = old_tree.entries().iter().peekable();

        for entry in new_tree.entries() {
            while old_entries.next_if(|o| o.name < entry.name).is_some() {}
            let previous = old_entries.next_if(|o| o.name == entry.name);
            let path = prefix.join(&entry.name);

            match (previous.map(|o| &o.reference), &entry.reference) {
                (Some(before), after) if before == after => {}
                (Some(EntryReference::Tree(before)), EntryReference::Tree(after)) => {
                    self.diff_trees(before, after, &path, out)?
                }
                (_, EntryReference::Tree(after)) => self.expand_tree(after, &path, out)?,
                (_, after) => {
                    out.insert(path, after.clone());
                }
            }
        }
        Ok(())
    }

    fn expand_tree(
        &self,
        address: &ContentAddress,
        path: &Path,
        out: &mut BTreeMap<PathBuf, EntryReference>,
    ) -> ZoriResult<()> {
        let tree = self.load_tree(address)?;
        if tree.entries().is_empty() {
            out.insert(path.to_path_buf(), EntryReference::Tree(address.clone()));
            return Ok(());
        }
        for entry in tree.entries() {
            let child = path.join(&entry.name);
            match &entry.reference {
                EntryReference::Tree(sub) => self.expand_tree(sub, &child, out)?,
                other => {
                    out.insert(child, other.clone());
                }
            }
        }
        Ok(())
    }

    /// Load a snapshot and check it against its address.
    pub fn load_snapshot(&self, address: &ContentAddress) -> ZoriResult<Snapshot> {
        let snapshot: Snapshot = fetch_doc(self.docs.as_ref(), &ids::snapshot(address))?
            .ok_or_else(|| ZoriError::store(format!("snapshot {address} not found")))?;
        snapshot.verify()?;
        if &snapshot.checksum != address {
            return Err(ZoriError::format(format!(
                "document snapshot/{address} holds snapshot {}",
                snapshot.checksum
            )));
        }
        Ok(snapshot)
    }

    /// Load a tree and check it against its address.
    pub fn load_tree(&self, address: &ContentAddress) -> ZoriResult<Tree> {
        let tree: Tree = fetch_doc(self.docs.as_ref(), &ids::tree(address))?
            .ok_or_else(|| ZoriError::store(format!("tree {address} not found")))?;
        let actual = tree.address(address.algorithm())?;
        if &actual != address {
            return Err(ZoriError::format(format!(
                "tree {address} does not match its contents ({actual})"
            )));
        }
        Ok(tree)
    }

    /// Snapshots from `head` back to the first one.
    pub fn history(&self, head: Option<ContentAddress>) -> History<'_> {
        History {
            engine: self,
            next: head,
        }
    }

    pub fn dataset(&self, key: &str) -> ZoriResult<Option<DataSet>> {
        fetch_doc(self.docs.as_ref(), &ids::dataset(key))
    }

    /// Snapshot a data set on top of its current head, then advance the head.
    pub fn backup(&mut self, dataset: &DataSetConfig) -> ZoriResult<ContentAddress> {
        let head = self.dataset(&dataset.key)?.and_then(|d| d.latest_snapshot);
        let base_path = expand_home(&dataset.base_path);
        let excludes = compile_excludes(&dataset.excludes)?;

        let checksum = self.snapshot_with(&base_path, head.as_ref(), &excludes)?;

        upsert_doc(
            self.docs.as_ref(),
            &ids::dataset(&dataset.key),
            &DataSet {
                key: dataset.key.clone(),
                base_path,
                latest_snapshot: Some(checksum.clone()),
            },
        )?;
        info!(
            dataset = %dataset.key,
            snapshot = %checksum,
            parent = ?head.as_ref().map(|h| h.to_string()),
            "advanced data set head"
        );
        Ok(checksum)
    }
}

/// Iterator over a snapshot chain, newest first.
pub struct History<'a> {
    engine: &'a SnapshotEngine,
    next: Option<ContentAddress>,
}

impl Iterator for History<'_> {
    type Item = ZoriResult<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.next.take()?;
        let result = self.engine.load_snapshot(&address);
        if let Ok(snapshot) = &result {
            self.next = snapshot.parent.clone();
        }
        Some(result)
    }
}
