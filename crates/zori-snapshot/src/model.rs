//! Persisted records: trees, snapshots, file layouts, packed chunks, data sets.
//!
//! Trees and snapshots are addressed by a digest of their canonical JSON, so
//! the field order of these structs is part of the on-disk contract.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use zori_chunks::digest;
use zori_core::{Algorithm, ContentAddress, ZoriError, ZoriResult};

/// Document ids for each record kind.
pub mod ids {
    use zori_core::ContentAddress;

    pub fn tree(addr: &ContentAddress) -> String {
        format!("tree/{addr}")
    }

    pub fn snapshot(addr: &ContentAddress) -> String {
        format!("snapshot/{addr}")
    }

    pub fn file(addr: &ContentAddress) -> String {
        format!("file/{addr}")
    }

    pub fn chunk(addr: &ContentAddress) -> String {
        format!("chunk/{addr}")
    }

    pub fn dataset(key: &str) -> String {
        format!("dataset/{key}")
    }

    pub const INSTALLATION: &str = "installation";
}

/// What a directory entry points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum EntryReference {
    /// Regular file above the inline threshold, by content address
    File(ContentAddress),
    /// Subdirectory, by tree address
    Tree(ContentAddress),
    /// Symlink target path, base64
    Link(String),
    /// Inlined file bytes, base64
    Small(String),
    /// Entry that could not be read
    Error(String),
}

impl EntryReference {
    pub fn link(target: &[u8]) -> Self {
        Self::Link(BASE64.encode(target))
    }

    pub fn small(bytes: &[u8]) -> Self {
        Self::Small(BASE64.encode(bytes))
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree(_))
    }

    /// Raw bytes of a `Link` target or `Small` payload.
    pub fn decoded_bytes(&self) -> ZoriResult<Option<Vec<u8>>> {
        match self {
            Self::Link(b64) | Self::Small(b64) => BASE64
                .decode(b64)
                .map(Some)
                .map_err(|e| ZoriError::format(format!("invalid base64 in tree entry: {e}"))),
            _ => Ok(None),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Tree(_) => "tree",
            Self::Link(_) => "link",
            Self::Small(_) => "small",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    /// UTC, whole seconds
    pub mod_time: DateTime<Utc>,
    pub reference: EntryReference,
}

/// Convert a filesystem timestamp to whole-second UTC.
pub fn mod_time_of(t: SystemTime) -> DateTime<Utc> {
    let secs = match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// A directory listing, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn address(&self, algorithm: Algorithm) -> ZoriResult<ContentAddress> {
        Ok(digest(algorithm, &serde_json::to_vec(self)?))
    }
}

/// One point in a data set's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Digest of every other field
    pub checksum: ContentAddress,
    pub parent: Option<ContentAddress>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub file_count: u64,
    pub tree: ContentAddress,
}

#[derive(Serialize)]
struct SnapshotBody<'a> {
    parent: &'a Option<ContentAddress>,
    start_time: &'a DateTime<Utc>,
    end_time: &'a Option<DateTime<Utc>>,
    file_count: u64,
    tree: &'a ContentAddress,
}

impl Snapshot {
    /// Build a snapshot and compute its checksum with the tree's algorithm.
    pub fn seal(
        parent: Option<ContentAddress>,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        file_count: u64,
        tree: ContentAddress,
    ) -> ZoriResult<Self> {
        let checksum = Self::compute_checksum(
            tree.algorithm(),
            &parent,
            &start_time,
            &end_time,
            file_count,
            &tree,
        )?;
        Ok(Self {
            checksum,
            parent,
            start_time,
            end_time,
            file_count,
            tree,
        })
    }

    fn compute_checksum(
        algorithm: Algorithm,
        parent: &Option<ContentAddress>,
        start_time: &DateTime<Utc>,
        end_time: &Option<DateTime<Utc>>,
        file_count: u64,
        tree: &ContentAddress,
    ) -> ZoriResult<ContentAddress> {
        let body = SnapshotBody {
            parent,
            start_time,
            end_time,
            file_count,
            tree,
        };
        Ok(digest(algorithm, &serde_json::to_vec(&body)?))
    }

    /// Fails with `Format` if the stored checksum does not match the fields.
    pub fn verify(&self) -> ZoriResult<()> {
        let expected = Self::compute_checksum(
            self.checksum.algorithm(),
            &self.parent,
            &self.start_time,
            &self.end_time,
            self.file_count,
            &self.tree,
        )?;
        if expected != self.checksum {
            return Err(ZoriError::format(format!(
                "snapshot {} does not match its contents ({expected})",
                self.checksum
            )));
        }
        Ok(())
    }
}

/// Where a chunk of a file starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub offset: u64,
    pub size: u32,
    pub content_hash: ContentAddress,
}

/// Chunk layout of one file content, stored under `file/<address>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub address: ContentAddress,
    pub length: u64,
    pub chunks: Vec<FileChunk>,
}

/// A chunk that is durably stored, under `chunk/<content_hash>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub content_hash: ContentAddress,
    pub pack: ContentAddress,
    pub ordinal: u32,
}

/// A backed-up directory and the head of its history, under `dataset/<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSet {
    pub key: String,
    pub base_path: PathBuf,
    pub latest_snapshot: Option<ContentAddress>,
}

/// Per-installation identity, under `installation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    pub bucket: String,
}
