//! Encrypted packs
//!
//! An encrypted pack wraps a complete plaintext pack: the plaintext is built
//! in an anonymous temp file, then streamed through AES-256-CTR (`master1`)
//! while HMAC-SHA256 (`master2`) accumulates over `iv ‖ ciphertext`.
//!
//! Reading verifies the MAC over the whole file before a single byte is
//! decrypted; a pack that fails authentication produces no output at all.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use zori_chunks::digest::READ_BUFFER_SIZE;
use zori_chunks::{Chunk, HashingWriter};
use zori_core::{Algorithm, ContentAddress, ZoriError, ZoriResult};
use zori_crypto::{
    generate_iv, MasterKeyPair, PackAuthenticator, PackDecryptor, PackEncryptor, IV_SIZE,
    MAC_SIZE,
};

use crate::format::{
    copy_exact, read_exact_or, read_u32, PackInfo, ENCRYPTED_PACK_MAGIC, PACK_VERSION,
};
use crate::plain::{parent_dir, persist, unpack_reader, validate_chunks, write_records};

/// magic + version + iv
const CIPHERTEXT_OFFSET: u64 = 8 + IV_SIZE as u64;

/// Write `chunks` into a new encrypted pack at `output`.
///
/// The returned address is the SHA-256 of the encrypted file, so two
/// encryptions of the same chunks (fresh IVs) have different addresses.
pub fn pack_chunks_encrypted(
    chunks: &[Chunk],
    output: &Path,
    keys: &MasterKeyPair,
) -> ZoriResult<PackInfo> {
    validate_chunks(chunks)?;
    let dir = parent_dir(output);

    let mut plaintext = tempfile::tempfile_in(dir)?;
    let packed = {
        let mut w = BufWriter::with_capacity(READ_BUFFER_SIZE, &mut plaintext);
        let packed = write_records(chunks, &mut w)?;
        w.flush()?;
        packed
    };
    plaintext.seek(SeekFrom::Start(0))?;

    let iv = generate_iv();
    let mut writer = HashingWriter::new(
        BufWriter::with_capacity(READ_BUFFER_SIZE, NamedTempFile::new_in(dir)?),
        Algorithm::Sha256,
    );
    writer.write_all(ENCRYPTED_PACK_MAGIC)?;
    writer.write_all(&PACK_VERSION.to_le_bytes())?;
    writer.write_all(&iv)?;

    let mut encryptor = PackEncryptor::new(keys, &iv)?;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match plaintext.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        encryptor.encrypt_in_place(&mut buf[..n]);
        writer.write_all(&buf[..n])?;
    }
    writer.write_all(&encryptor.finalize())?;

    let bytes = writer.written();
    let (buffered, address) = writer.finish();
    persist(buffered, output)?;

    debug!(
        pack = %address,
        chunks = packed.len(),
        bytes,
        path = %output.display(),
        "wrote encrypted pack"
    );
    Ok(PackInfo {
        address,
        chunks: packed,
    })
}

/// Authenticate, decrypt and extract an encrypted pack into `output_dir`,
/// naming each file by its SHA-256.
///
/// Wrong keys and altered bytes both fail with `Authentication`; a file too
/// short to hold its IV and MAC is a `Format` error.
pub fn unpack_chunks_encrypted(
    pack: &Path,
    output_dir: &Path,
    keys: &MasterKeyPair,
) -> ZoriResult<Vec<ContentAddress>> {
    unpack_chunks_encrypted_with(pack, output_dir, keys, Algorithm::Sha256)
}

/// Like [`unpack_chunks_encrypted`], naming files by a digest of `algorithm`.
pub fn unpack_chunks_encrypted_with(
    pack: &Path,
    output_dir: &Path,
    keys: &MasterKeyPair,
    algorithm: Algorithm,
) -> ZoriResult<Vec<ContentAddress>> {
    let file = File::open(pack)?;
    let len = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    let mut magic = [0u8; 4];
    read_exact_or(&mut reader, &mut magic, "encrypted pack header")?;
    if &magic != ENCRYPTED_PACK_MAGIC {
        return Err(ZoriError::format(format!(
            "bad encrypted pack magic {:?}",
            String::from_utf8_lossy(&magic)
        )));
    }
    let version = read_u32(&mut reader, "encrypted pack header")?;
    if version != PACK_VERSION {
        return Err(ZoriError::UnsupportedVersion(version));
    }
    let mut iv = [0u8; IV_SIZE];
    read_exact_or(&mut reader, &mut iv, "encrypted pack IV")?;

    let ciphertext_len = len
        .checked_sub(CIPHERTEXT_OFFSET + MAC_SIZE as u64)
        .ok_or_else(|| ZoriError::format("truncated encrypted pack MAC"))?;

    let mut auth = PackAuthenticator::new(keys, &iv)?;
    let seen = copy_exact(&mut reader, &mut io::sink(), ciphertext_len, |b| auth.update(b))?;
    if seen < ciphertext_len {
        return Err(ZoriError::format("encrypted pack shrank while reading"));
    }
    let mut tag = [0u8; MAC_SIZE];
    read_exact_or(&mut reader, &mut tag, "encrypted pack MAC")?;
    auth.verify(&tag)?;

    std::fs::create_dir_all(output_dir)?;
    reader.seek(SeekFrom::Start(CIPHERTEXT_OFFSET))?;

    let mut plaintext = tempfile::tempfile_in(output_dir)?;
    {
        let mut decryptor = PackDecryptor::new(keys, &iv)?;
        let mut ciphertext = (&mut reader).take(ciphertext_len);
        let mut w = BufWriter::with_capacity(READ_BUFFER_SIZE, &mut plaintext);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = match ciphertext.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            decryptor.decrypt_in_place(&mut buf[..n]);
            w.write_all(&buf[..n])?;
        }
        w.flush()?;
    }
    plaintext.seek(SeekFrom::Start(0))?;

    let addresses = unpack_reader(
        BufReader::with_capacity(READ_BUFFER_SIZE, plaintext),
        output_dir,
        algorithm,
    )?;
    debug!(
        path = %pack.display(),
        chunks = addresses.len(),
        "unpacked encrypted pack"
    );
    Ok(addresses)
}
