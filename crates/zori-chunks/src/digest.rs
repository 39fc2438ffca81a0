//! SHA-1 / SHA-256 content addressing for byte slices, streams and files
//!
//! Every digest is returned as a [`ContentAddress`] tagged with its algorithm,
//! so identical bytes hash to the same address no matter where they came from.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use zori_core::{Algorithm, ContentAddress, ZoriResult};

/// Read buffer used when streaming files through a hasher.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental hasher for either supported algorithm.
#[derive(Clone)]
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Hasher::Sha1(_) => Algorithm::Sha1,
            Hasher::Sha256(_) => Algorithm::Sha256,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> ContentAddress {
        match self {
            Hasher::Sha1(h) => ContentAddress::new(Algorithm::Sha1, h.finalize().to_vec()),
            Hasher::Sha256(h) => ContentAddress::new(Algorithm::Sha256, h.finalize().to_vec()),
        }
    }
}

/// Hash a byte slice in memory.
pub fn digest(algorithm: Algorithm, data: &[u8]) -> ContentAddress {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hash everything a reader yields, 64KB at a time.
pub fn digest_reader<R: Read>(algorithm: Algorithm, mut reader: R) -> ZoriResult<ContentAddress> {
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Hash a file from disk using the streaming interface.
pub fn digest_file(algorithm: Algorithm, path: &Path) -> ZoriResult<ContentAddress> {
    let file = File::open(path)?;
    digest_reader(algorithm, file)
}

/// Write adapter that feeds every forwarded byte into a hasher.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W, algorithm: Algorithm) -> Self {
        Self {
            inner,
            hasher: Hasher::new(algorithm),
            written: 0,
        }
    }

    /// Bytes forwarded so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Finish hashing and hand back the inner writer.
    pub fn finish(self) -> (W, ContentAddress) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
