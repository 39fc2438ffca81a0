//! Streaming pack encryption: AES-256-CTR keyed by `master1`, authenticated
//! with HMAC-SHA256 keyed by `master2` over `iv ‖ ciphertext`.
//!
//! CTR mode lets callers encrypt or decrypt a pack of any size through a
//! fixed buffer, one slice at a time.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use zori_core::{ZoriError, ZoriResult};

use crate::keys::MasterKeyPair;
use crate::{IV_SIZE, MAC_SIZE};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Fresh random initialization vector for one pack.
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn pack_ctr(keys: &MasterKeyPair, iv: &[u8; IV_SIZE]) -> ZoriResult<Aes256Ctr> {
    Aes256Ctr::new_from_slices(keys.master1(), iv)
        .map_err(|e| anyhow::anyhow!("AES-256-CTR init: {e}").into())
}

fn pack_mac(keys: &MasterKeyPair, iv: &[u8; IV_SIZE]) -> ZoriResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(keys.master2())
        .map_err(|e| anyhow::anyhow!("HMAC init: {e}"))?;
    mac.update(iv);
    Ok(mac)
}

/// Encrypts successive plaintext buffers in place and accumulates the MAC.
pub struct PackEncryptor {
    ctr: Aes256Ctr,
    mac: HmacSha256,
}

impl PackEncryptor {
    pub fn new(keys: &MasterKeyPair, iv: &[u8; IV_SIZE]) -> ZoriResult<Self> {
        Ok(Self {
            ctr: pack_ctr(keys, iv)?,
            mac: pack_mac(keys, iv)?,
        })
    }

    pub fn encrypt_in_place(&mut self, buf: &mut [u8]) {
        self.ctr.apply_keystream(buf);
        self.mac.update(buf);
    }

    /// The tag to append after the last ciphertext byte.
    pub fn finalize(self) -> [u8; MAC_SIZE] {
        self.mac.finalize().into_bytes().into()
    }
}

/// Accumulates the MAC over ciphertext and checks it in constant time.
pub struct PackAuthenticator {
    mac: HmacSha256,
}

impl PackAuthenticator {
    pub fn new(keys: &MasterKeyPair, iv: &[u8; IV_SIZE]) -> ZoriResult<Self> {
        Ok(Self {
            mac: pack_mac(keys, iv)?,
        })
    }

    pub fn update(&mut self, ciphertext: &[u8]) {
        self.mac.update(ciphertext);
    }

    /// Fails with `Authentication` for the wrong keys or any altered byte.
    pub fn verify(self, tag: &[u8]) -> ZoriResult<()> {
        self.mac
            .verify_slice(tag)
            .map_err(|_| ZoriError::Authentication)
    }
}

/// Decrypts successive ciphertext buffers in place.
pub struct PackDecryptor {
    ctr: Aes256Ctr,
}

impl PackDecryptor {
    pub fn new(keys: &MasterKeyPair, iv: &[u8; IV_SIZE]) -> ZoriResult<Self> {
        Ok(Self {
            ctr: pack_ctr(keys, iv)?,
        })
    }

    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        self.ctr.apply_keystream(buf);
    }
}
