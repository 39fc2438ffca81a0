//! Batches new chunks into packs and ships them to every pack store.
//!
//! A chunk is new when neither the current batch nor a `chunk/<hash>` record
//! knows it. Once the batch reaches `pack_size` bytes it is written to the
//! staging directory (encrypted when keys are set), `put` to every registered
//! store, and only then recorded as `ChunkRecord`s, so a record always points
//! at a pack that exists.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use zori_chunks::Chunk;
use zori_core::config::{expand_home, PackConfig};
use zori_core::{ContentAddress, ZoriResult};
use zori_crypto::MasterKeyPair;
use zori_pack::{pack_chunks, pack_chunks_encrypted, PackInfo};
use zori_store::StoreRegistry;

use crate::model::{ids, ChunkRecord};
use crate::store::{upsert_doc, DocumentStore};

/// Counters for one sink's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    pub packs_written: u64,
    pub chunks_packed: u64,
    pub chunks_deduplicated: u64,
    pub bytes_packed: u64,
}

pub struct PackSink {
    docs: Arc<dyn DocumentStore>,
    stores: StoreRegistry,
    bucket: String,
    staging_dir: PathBuf,
    pack_size: u64,
    keys: Option<MasterKeyPair>,
    pending: Vec<Chunk>,
    pending_hashes: HashSet<ContentAddress>,
    pending_bytes: u64,
    stats: PackStats,
}

impl std::fmt::Debug for PackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackSink")
            .field("stores", &self.stores)
            .field("bucket", &self.bucket)
            .field("staging_dir", &self.staging_dir)
            .field("pack_size", &self.pack_size)
            .field("encrypted", &self.keys.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl PackSink {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        stores: StoreRegistry,
        bucket: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
        pack_size: u64,
    ) -> Self {
        Self {
            docs,
            stores,
            bucket: bucket.into(),
            staging_dir: staging_dir.into(),
            pack_size: pack_size.max(1),
            keys: None,
            pending: Vec::new(),
            pending_hashes: HashSet::new(),
            pending_bytes: 0,
            stats: PackStats::default(),
        }
    }

    /// Sink configured from the `[pack]` section; keys are applied only
    /// when `encrypt` is set.
    pub fn from_config(
        docs: Arc<dyn DocumentStore>,
        stores: StoreRegistry,
        bucket: impl Into<String>,
        cfg: &PackConfig,
        keys: Option<MasterKeyPair>,
    ) -> Self {
        let sink = Self::new(docs, stores, bucket, expand_home(&cfg.staging_dir), cfg.pack_size);
        match keys {
            Some(keys) if cfg.encrypt => sink.with_keys(keys),
            _ => sink,
        }
    }

    /// Encrypt every pack with `keys`.
    pub fn with_keys(mut self, keys: MasterKeyPair) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn stats(&self) -> PackStats {
        self.stats
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Queue `chunk` unless it is already stored or queued; returns whether it was queued.
    pub fn add(&mut self, chunk: Chunk) -> ZoriResult<bool> {
        if self.pending_hashes.contains(&chunk.content_hash)
            || self.docs.contains(&ids::chunk(&chunk.content_hash))?
        {
            self.stats.chunks_deduplicated += 1;
            return Ok(false);
        }

        self.pending_bytes += chunk.size as u64;
        self.pending_hashes.insert(chunk.content_hash.clone());
        self.pending.push(chunk);

        if self.pending_bytes >= self.pack_size {
            self.seal()?;
        }
        Ok(true)
    }

    /// Write out whatever is queued.
    pub fn flush(&mut self) -> ZoriResult<Option<PackInfo>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.seal().map(Some)
    }

    fn seal(&mut self) -> ZoriResult<PackInfo> {
        std::fs::create_dir_all(&self.staging_dir)?;
        let staged = self
            .staging_dir
            .join(format!("building-{}.pack", uuid::Uuid::now_v7().simple()));

        let info = match &self.keys {
            Some(keys) => pack_chunks_encrypted(&self.pending, &staged, keys),
            None => pack_chunks(&self.pending, &staged),
        };
        let info = match info {
            Ok(info) => info,
            Err(e) => {
                let _ = std::fs::remove_file(&staged);
                return Err(e);
            }
        };

        let object = info.address.to_string();
        let published = self.staging_dir.join(&object);
        std::fs::rename(&staged, &published)?;

        self.stores.put_all(&self.bucket, &object, &published)?;
        for packed in &info.chunks {
            upsert_doc(
                self.docs.as_ref(),
                &ids::chunk(&packed.content_hash),
                &ChunkRecord {
                    content_hash: packed.content_hash.clone(),
                    pack: info.address.clone(),
                    ordinal: packed.ordinal,
                },
            )?;
        }

        // Keep the staged copy only when it is the sole copy.
        if !self.stores.is_empty() {
            std::fs::remove_file(&published)?;
        } else {
            debug!(path = %published.display(), "no pack stores; pack kept in staging");
        }

        self.stats.packs_written += 1;
        self.stats.chunks_packed += info.chunks.len() as u64;
        self.stats.bytes_packed += self.pending_bytes;
        info!(
            pack = %info.address,
            bucket = %self.bucket,
            chunks = info.chunks.len(),
            bytes = self.pending_bytes,
            encrypted = self.keys.is_some(),
            "committed pack"
        );

        self.pending.clear();
        self.pending_hashes.clear();
        self.pending_bytes = 0;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fetch_doc, MemoryDocumentStore};
    use std::path::Path;
    use zori_chunks::find_chunks;
    use zori_crypto::generate_master_keys;
    use zori_pack::{unpack_chunks, unpack_chunks_encrypted};
    use zori_store::{LocalPackStore, PackStore};

    fn noisy(len: usize, seed: u64) -> Vec<u8> {
        let mut x = seed | 1;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                (x >> 24) as u8
            })
            .collect()
    }

    fn chunks_of(dir: &Path, name: &str, data: &[u8]) -> Vec<Chunk> {
        let p = dir.join(name);
        std::fs::write(&p, data).unwrap();
        find_chunks(&p, 4096).unwrap()
    }

    fn registry(root: &Path) -> (StoreRegistry, Arc<LocalPackStore>) {
        let store = Arc::new(LocalPackStore::new(root));
        let mut reg = StoreRegistry::new();
        reg.register("local", store.clone());
        (reg, store)
    }

    #[test]
    fn test_flush_publishes_pack_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let docs = Arc::new(MemoryDocumentStore::new());
        let (reg, store) = registry(&dir.path().join("packs"));
        let chunks = chunks_of(dir.path(), "f", &noisy(64 * 1024, 1));

        let mut sink = PackSink::new(docs.clone(), reg, "bucket", dir.path().join("staging"), 1 << 30);
        for c in &chunks {
            assert!(sink.add(c.clone()).unwrap());
        }
        assert_eq!(sink.stats().packs_written, 0);
        let info = sink.flush().unwrap().unwrap();
        assert!(sink.flush().unwrap().is_none());

        assert_eq!(store.list_objects("bucket").unwrap(), vec![info.address.to_string()]);
        for (i, c) in chunks.iter().enumerate() {
            let rec: ChunkRecord = fetch_doc(docs.as_ref(), &ids::chunk(&c.content_hash))
                .unwrap()
                .unwrap();
            assert_eq!(rec.pack, info.address);
            assert_eq!(rec.ordinal, i as u32);
        }
        // Staging is cleaned once a store holds the pack.
        assert_eq!(std::fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);
    }

    #[test]
    fn test_duplicates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let docs = Arc::new(MemoryDocumentStore::new());
        let (reg, _) = registry(&dir.path().join("packs"));
        let data = noisy(32 * 1024, 2);
        let a = chunks_of(dir.path(), "a", &data);
        let b = chunks_of(dir.path(), "b", &data);

        let mut sink = PackSink::new(docs.clone(), reg, "bucket", dir.path().join("staging"), 1 << 30);
        for c in a.iter().chain(&b) {
            sink.add(c.clone()).unwrap();
        }
        sink.flush().unwrap();
        assert_eq!(sink.stats().chunks_packed, a.len() as u64);
        assert_eq!(sink.stats().chunks_deduplicated, b.len() as u64);

        // A later run sees the chunk records.
        for c in &a {
            assert!(!sink.add(c.clone()).unwrap());
        }
        assert!(sink.flush().unwrap().is_none());
    }

    #[test]
    fn test_pack_size_splits_batches() {
        let dir = tempfile::tempdir().unwrap();
        let docs = Arc::new(MemoryDocumentStore::new());
        let (reg, store) = registry(&dir.path().join("packs"));
        let chunks = chunks_of(dir.path(), "f", &noisy(256 * 1024, 3));

        let mut sink = PackSink::new(docs, reg, "bucket", dir.path().join("staging"), 64 * 1024);
        for c in &chunks {
            sink.add(c.clone()).unwrap();
        }
        sink.flush().unwrap();

        let packs = store.list_objects("bucket").unwrap();
        assert!(packs.len() >= 3, "got {} packs", packs.len());
        assert_eq!(sink.stats().packs_written, packs.len() as u64);
        assert_eq!(sink.stats().bytes_packed, 256 * 1024);
    }

    #[test]
    fn test_encrypted_packs_roundtrip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let docs = Arc::new(MemoryDocumentStore::new());
        let (reg, store) = registry(&dir.path().join("packs"));
        let keys = generate_master_keys();
        let chunks = chunks_of(dir.path(), "f", &noisy(40 * 1024, 4));

        let mut sink = PackSink::new(docs, reg, "bucket", dir.path().join("staging"), 1 << 30)
            .with_keys(keys.clone());
        for c in &chunks {
            sink.add(c.clone()).unwrap();
        }
        let info = sink.flush().unwrap().unwrap();

        let fetched = dir.path().join("fetched.pack");
        store.get("bucket", &info.address.to_string(), &fetched).unwrap();
        assert!(unpack_chunks(&fetched, &dir.path().join("x")).is_err());
        let addrs = unpack_chunks_encrypted(&fetched, &dir.path().join("out"), &keys).unwrap();
        let expected: Vec<_> = chunks.iter().map(|c| c.content_hash.clone()).collect();
        assert_eq!(addrs, expected);
    }

    #[test]
    fn test_without_stores_pack_stays_in_staging() {
        let dir = tempfile::tempdir().unwrap();
        let docs = Arc::new(MemoryDocumentStore::new());
        let chunks = chunks_of(dir.path(), "f", &noisy(8 * 1024, 5));

        let mut sink = PackSink::new(docs, StoreRegistry::new(), "b", dir.path().join("staging"), 1 << 30);
        for c in &chunks {
            sink.add(c.clone()).unwrap();
        }
        let info = sink.flush().unwrap().unwrap();
        assert!(dir.path().join("staging").join(info.address.to_string()).is_file());
    }

    #[test]
    fn test_failed_pack_leaves_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let docs = Arc::new(MemoryDocumentStore::new());
        let (reg, _) = registry(&dir.path().join("packs"));
        let src = dir.path().join("f");
        let chunks = chunks_of(dir.path(), "f", &noisy(8 * 1024, 6));
        std::fs::write(&src, b"changed underneath").unwrap();

        let mut sink = PackSink::new(docs.clone(), reg, "b", dir.path().join("staging"), 1 << 30);
        for c in &chunks {
            sink.add(c.clone()).unwrap();
        }
        assert!(sink.flush().is_err());
        assert!(docs.ids_with_prefix("chunk/").is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);
    }
}
