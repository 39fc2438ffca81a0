//! zori-chunks: content addressing and content-defined chunking
//!
//! # Overview
//! - `digest`: SHA-1/SHA-256 hashing of slices, readers and files (content identity)
//! - `chunker`: FastCDC chunking, stable boundaries even with inserts

pub mod chunker;
pub mod digest;

// Convenience re-exports for the most common operations
pub use chunker::{
    chunk_slice, find_chunks, find_chunks_and_digest, find_chunks_with, Chunk, ChunkSizes,
};
pub use digest::{digest, digest_file, digest_reader, Hasher, HashingWriter};
