//! FastCDC content-defined chunking
//!
//! Splits files into variable-size chunks whose boundaries depend only on the
//! bytes and the target average size, so inserting bytes near the start of a
//! file doesn't move every later boundary.
//!
//! Files are streamed; memory use is bounded by the maximum chunk size.
//! Each chunk is content-addressed independently, so identical byte runs in
//! different files share one address.

use fastcdc::v2020::{FastCDC, StreamCDC};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

use zori_core::{Algorithm, ContentAddress, ZoriResult};

use crate::digest::{digest, Hasher, READ_BUFFER_SIZE};

// FastCDC 2020 accepts sizes only within these bounds.
const MIN_SIZE_RANGE: (u32, u32) = (64, 1_048_576);
const AVG_SIZE_RANGE: (u32, u32) = (256, 4_194_304);
const MAX_SIZE_RANGE: (u32, u32) = (1024, 16_777_216);

/// A span of a source file, addressed by the digest of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// File the bytes come from
    pub source_path: PathBuf,
    /// Byte offset within the source file
    pub offset: u64,
    /// Chunk length in bytes
    pub size: u32,
    /// Digest of this chunk's bytes
    pub content_hash: ContentAddress,
}

/// Chunk size configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizes {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl ChunkSizes {
    /// Bounds derived from a target average: min = avg/4, max = avg*4.
    pub fn for_average(avg_size: u32) -> Self {
        Self::new(avg_size / 4, avg_size, avg_size.saturating_mul(4))
    }

    /// Explicit bounds, clamped into the ranges FastCDC accepts.
    pub fn new(min_size: u32, avg_size: u32, max_size: u32) -> Self {
        let avg_size = avg_size.clamp(AVG_SIZE_RANGE.0, AVG_SIZE_RANGE.1);
        let min_size = min_size.clamp(MIN_SIZE_RANGE.0, MIN_SIZE_RANGE.1).min(avg_size);
        let max_size = max_size.clamp(MAX_SIZE_RANGE.0, MAX_SIZE_RANGE.1).max(avg_size);
        Self {
            min_size,
            avg_size,
            max_size,
        }
    }

    /// Build from optional configured bounds.
    pub fn from_config(cfg: &zori_core::config::ChunkingConfig) -> Self {
        let defaults = Self::for_average(cfg.avg_size);
        Self::new(
            cfg.min_size.unwrap_or(defaults.min_size),
            cfg.avg_size,
            cfg.max_size.unwrap_or(defaults.max_size),
        )
    }
}

/// Chunk a file with bounds derived from `target_avg_size`, hashing with SHA-256.
pub fn find_chunks(path: &Path, target_avg_size: u32) -> ZoriResult<Vec<Chunk>> {
    find_chunks_with(path, ChunkSizes::for_average(target_avg_size), Algorithm::Sha256)
}

/// Chunk a file with explicit bounds and digest algorithm.
///
/// Chunks are ordered by offset and cover the file exactly; the last one may
/// be shorter than `min_size`. An empty file yields no chunks.
pub fn find_chunks_with(
    path: &Path,
    sizes: ChunkSizes,
    algorithm: Algorithm,
) -> ZoriResult<Vec<Chunk>> {
    stream_chunks(path, sizes, algorithm, None)
}

/// Chunk a file and digest the whole of it in the same read.
///
/// The returned address covers exactly the bytes the chunks were cut from,
/// even if the file changes underneath a concurrent reader.
pub fn find_chunks_and_digest(
    path: &Path,
    sizes: ChunkSizes,
    algorithm: Algorithm,
) -> ZoriResult<(ContentAddress, Vec<Chunk>)> {
    let mut whole = Hasher::new(algorithm);
    let chunks = stream_chunks(path, sizes, algorithm, Some(&mut whole))?;
    Ok((whole.finalize(), chunks))
}

fn stream_chunks(
    path: &Path,
    sizes: ChunkSizes,
    algorithm: Algorithm,
    mut whole: Option<&mut Hasher>,
) -> ZoriResult<Vec<Chunk>> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let chunker = StreamCDC::new(reader, sizes.min_size, sizes.avg_size, sizes.max_size);

    let mut chunks = Vec::new();
    for result in chunker {
        let data = result.map_err(|e| match e {
            fastcdc::v2020::Error::IoError(io) => io,
            other => std::io::Error::other(format!("chunking {}: {other:?}", path.display())),
        })?;
        if let Some(hasher) = whole.as_deref_mut() {
            hasher.update(&data.data);
        }
        chunks.push(Chunk {
            source_path: path.to_path_buf(),
            offset: data.offset,
            size: data.length as u32,
            content_hash: digest(algorithm, &data.data),
        });
    }

    debug!(
        path = %path.display(),
        chunks = chunks.len(),
        avg = sizes.avg_size,
        "chunked file"
    );
    Ok(chunks)
}

/// Split an in-memory buffer; chunks carry an empty `source_path`.
pub fn chunk_slice(data: &[u8], sizes: ChunkSizes, algorithm: Algorithm) -> Vec<Chunk> {
    if data.is_empty() {
        return vec![];
    }

    FastCDC::new(data, sizes.min_size, sizes.avg_size, sizes.max_size)
        .map(|c| Chunk {
            source_path: PathBuf::new(),
            offset: c.offset as u64,
            size: c.length as u32,
            content_hash: digest(algorithm, &data[c.offset..c.offset + c.length]),
        })
        .collect()
}
