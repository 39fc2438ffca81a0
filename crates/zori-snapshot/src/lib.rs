//! zori-snapshot: directory snapshots over a content-addressed document store
//!
//! # Overview
//! - `model`: trees, snapshots, file layouts and chunk records
//! - `store`: JSON document persistence (memory and directory backends)
//! - `pack_sink`: batches new chunks into packs and records where they landed
//! - `keys`: master key envelope and installation bootstrap
//! - `engine`: directory walk, snapshot commit, history and diff

pub mod engine;
pub mod keys;
pub mod model;
pub mod pack_sink;
pub mod store;

pub use engine::{compile_excludes, History, SnapshotEngine};
pub use keys::{load_or_create_installation, load_or_create_master_keys};
pub use model::{
    ids, ChunkRecord, DataSet, EntryReference, FileChunk, FileRecord, Installation, Snapshot, Tree,
    TreeEntry,
};
pub use pack_sink::{PackSink, PackStats};
pub use store::{fetch_doc, upsert_doc, DocumentStore, JsonDirStore, MemoryDocumentStore};
