//! Plaintext packs
//!
//! Writing streams every chunk from its source file through a bounded buffer,
//! re-hashing each payload so a source that changed since it was chunked is
//! caught before the pack is published. Packs are built in a temp file next
//! to the destination and renamed into place, so a failed write leaves
//! nothing behind.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use zori_chunks::digest::READ_BUFFER_SIZE;
use zori_chunks::{Chunk, Hasher, HashingWriter};
use zori_core::{Algorithm, ContentAddress, ZoriError, ZoriResult};

use crate::format::{
    copy_exact, read_pack_header, read_u32, PackHeader, PackInfo, PackedChunk, PACK_VERSION,
};

/// Write `chunks` into a new pack at `output`.
///
/// Every `content_hash` is checked for a well-formed digest before anything
/// is written. Records keep the input order; the pack address is the SHA-256
/// of the finished file.
pub fn pack_chunks(chunks: &[Chunk], output: &Path) -> ZoriResult<PackInfo> {
    validate_chunks(chunks)?;

    let tmp = NamedTempFile::new_in(parent_dir(output))?;
    let mut writer = HashingWriter::new(
        BufWriter::with_capacity(READ_BUFFER_SIZE, tmp),
        Algorithm::Sha256,
    );
    let packed = write_records(chunks, &mut writer)?;
    let bytes = writer.written();
    let (buffered, address) = writer.finish();
    persist(buffered, output)?;

    debug!(
        pack = %address,
        chunks = packed.len(),
        bytes,
        path = %output.display(),
        "wrote pack"
    );
    Ok(PackInfo {
        address,
        chunks: packed,
    })
}

/// Extract every record into `output_dir`, naming each file by its SHA-256.
pub fn unpack_chunks(pack: &Path, output_dir: &Path) -> ZoriResult<Vec<ContentAddress>> {
    unpack_chunks_with(pack, output_dir, Algorithm::Sha256)
}

/// Like [`unpack_chunks`], naming files by a digest of `algorithm`.
pub fn unpack_chunks_with(
    pack: &Path,
    output_dir: &Path,
    algorithm: Algorithm,
) -> ZoriResult<Vec<ContentAddress>> {
    let file = File::open(pack)?;
    let addresses = unpack_reader(
        BufReader::with_capacity(READ_BUFFER_SIZE, file),
        output_dir,
        algorithm,
    )?;
    debug!(
        path = %pack.display(),
        chunks = addresses.len(),
        "unpacked pack"
    );
    Ok(addresses)
}

pub(crate) fn validate_chunks(chunks: &[Chunk]) -> ZoriResult<()> {
    if u32::try_from(chunks.len()).is_err() {
        return Err(ZoriError::format(format!(
            "{} chunks do not fit in one pack",
            chunks.len()
        )));
    }
    for chunk in chunks {
        chunk.content_hash.ensure_well_formed()?;
    }
    Ok(())
}

/// Header plus one record per chunk, streamed from the chunks' source files.
pub(crate) fn write_records<W: Write>(chunks: &[Chunk], w: &mut W) -> ZoriResult<Vec<PackedChunk>> {
    PackHeader {
        version: PACK_VERSION,
        count: chunks.len() as u32,
    }
    .write_to(&mut *w)?;

    let mut source: Option<(PathBuf, BufReader<File>)> = None;
    let mut packed = Vec::with_capacity(chunks.len());

    for (ordinal, chunk) in chunks.iter().enumerate() {
        let reader = match &mut source {
            Some((path, reader)) if *path == chunk.source_path => reader,
            slot => {
                let file = File::open(&chunk.source_path)?;
                let opened = BufReader::with_capacity(READ_BUFFER_SIZE, file);
                &mut slot.insert((chunk.source_path.clone(), opened)).1
            }
        };
        reader.seek(SeekFrom::Start(chunk.offset))?;

        w.write_all(&chunk.size.to_le_bytes())?;
        let mut hasher = Hasher::new(chunk.content_hash.algorithm());
        let copied = copy_exact(reader, w, chunk.size as u64, |b| hasher.update(b))?;
        if copied < chunk.size as u64 {
            return Err(ZoriError::ChunkIntegrity(format!(
                "{}: expected {} bytes at offset {}, source ended after {copied}",
                chunk.source_path.display(),
                chunk.size,
                chunk.offset
            )));
        }
        let actual = hasher.finalize();
        if actual != chunk.content_hash {
            return Err(ZoriError::ChunkIntegrity(format!(
                "{} at offset {}: declared {}, read {actual}",
                chunk.source_path.display(),
                chunk.offset,
                chunk.content_hash
            )));
        }

        packed.push(PackedChunk {
            content_hash: chunk.content_hash.clone(),
            ordinal: ordinal as u32,
        });
    }
    Ok(packed)
}

/// Read a plaintext pack from `r`, writing one file per record into `output_dir`.
/// Records are staged in a hidden directory under `output_dir` and only
/// moved into place once the whole pack has parsed, so a malformed pack
/// leaves no chunk files behind.
pub(crate) fn unpack_reader(
    mut r: impl Read,
    output_dir: &Path,
    algorithm: Algorithm,
) -> ZoriResult<Vec<ContentAddress>> {
    let header = read_pack_header(&mut r)?;
    std::fs::create_dir_all(output_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempdir_in(output_dir)?;

    // count comes from the file; don't trust it for the allocation
    let mut addresses = Vec::with_capacity((header.count as usize).min(1024));
    for index in 0..header.count {
        let len = read_u32(&mut r, "record length")?;

        let mut out =
            BufWriter::with_capacity(READ_BUFFER_SIZE, NamedTempFile::new_in(staging.path())?);
        let mut hasher = Hasher::new(algorithm);
        let copied = copy_exact(&mut r, &mut out, len as u64, |b| hasher.update(b))?;
        if copied < len as u64 {
            return Err(ZoriError::format(format!(
                "truncated record {index}: expected {len} bytes, got {copied}"
            )));
        }

        let address = hasher.finalize();
        persist(out, &staging.path().join(address.to_string()))?;
        addresses.push(address);
    }

    let mut trailing = [0u8; 1];
    if r.read(&mut trailing)? != 0 {
        return Err(ZoriError::format(format!(
            "unexpected data after record {}",
            header.count
        )));
    }

    // A pack may repeat a record; each staged file moves once.
    let mut placed = HashSet::with_capacity(addresses.len());
    for address in &addresses {
        let name = address.to_string();
        if placed.insert(name.clone()) {
            std::fs::rename(staging.path().join(&name), output_dir.join(&name))?;
        }
    }
    Ok(addresses)
}

/// Flush a buffered temp file and rename it over `dest`.
pub(crate) fn persist(buffered: BufWriter<NamedTempFile>, dest: &Path) -> ZoriResult<()> {
    let tmp = buffered.into_inner().map_err(|e| e.into_error())?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
