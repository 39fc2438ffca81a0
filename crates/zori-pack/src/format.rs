use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use zori_chunks::digest::READ_BUFFER_SIZE;
use zori_core::{ContentAddress, ZoriError, ZoriResult};

pub const PACK_MAGIC: &[u8; 4] = b"P4CK";
pub const ENCRYPTED_PACK_MAGIC: &[u8; 4] = b"P4CE";
pub const PACK_VERSION: u32 = 1;

/// magic + version + count
pub const PACK_HEADER_LEN: usize = 12;

/// Where a chunk landed inside a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedChunk {
    pub content_hash: ContentAddress,
    /// Zero-based record position
    pub ordinal: u32,
}

/// Result of writing a pack: its address and the chunks it holds, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackInfo {
    pub address: ContentAddress,
    pub chunks: Vec<PackedChunk>,
}

impl PackInfo {
    pub fn ordinal_of(&self, content_hash: &ContentAddress) -> Option<u32> {
        self.chunks
            .iter()
            .find(|c| &c.content_hash == content_hash)
            .map(|c| c.ordinal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    pub version: u32,
    pub count: u32,
}

impl PackHeader {
    pub fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(PACK_MAGIC)?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&self.count.to_le_bytes())?;
        Ok(())
    }
}

/// Read and validate a plaintext pack header.
///
/// Short input or wrong magic is a `Format` error; any version other than 1
/// is `UnsupportedVersion`.
pub fn read_pack_header(mut r: impl Read) -> ZoriResult<PackHeader> {
    let mut magic = [0u8; 4];
    read_exact_or(&mut r, &mut magic, "pack header")?;
    if &magic != PACK_MAGIC {
        return Err(ZoriError::format(format!(
            "bad pack magic {:?}",
            String::from_utf8_lossy(&magic)
        )));
    }
    let version = read_u32(&mut r, "pack header")?;
    if version != PACK_VERSION {
        return Err(ZoriError::UnsupportedVersion(version));
    }
    let count = read_u32(&mut r, "pack header")?;
    Ok(PackHeader { version, count })
}

/// `read_exact` that reports EOF as a truncated `what`.
pub(crate) fn read_exact_or(r: &mut impl Read, buf: &mut [u8], what: &str) -> ZoriResult<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ZoriError::format(format!("truncated {what}")),
        _ => ZoriError::Io(e),
    })
}

pub(crate) fn read_u32(r: &mut impl Read, what: &str) -> ZoriResult<u32> {
    let mut b = [0u8; 4];
    read_exact_or(r, &mut b, what)?;
    Ok(u32::from_le_bytes(b))
}

/// Move exactly `len` bytes from `r` to `w`, showing each buffer to `inspect`.
///
/// Returns the number of bytes actually moved; less than `len` means `r` hit EOF.
pub(crate) fn copy_exact(
    r: &mut impl Read,
    w: &mut impl Write,
    len: u64,
    mut inspect: impl FnMut(&[u8]),
) -> io::Result<u64> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match r.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        inspect(&buf[..n]);
        w.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(len - remaining)
}
