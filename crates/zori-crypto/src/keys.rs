//! The master key pair: two independent 256-bit root keys.
//!
//! `master1` keys the pack stream cipher (AES-256-CTR); `master2` keys the
//! pack MAC (HMAC-SHA256). Both are only ever persisted inside an
//! [`EncryptionEnvelope`](crate::envelope::EncryptionEnvelope).

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::KEY_SIZE;

/// Zeroized on drop; `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterKeyPair {
    master1: [u8; KEY_SIZE],
    master2: [u8; KEY_SIZE],
}

impl MasterKeyPair {
    pub fn from_bytes(master1: [u8; KEY_SIZE], master2: [u8; KEY_SIZE]) -> Self {
        Self { master1, master2 }
    }

    pub fn master1(&self) -> &[u8; KEY_SIZE] {
        &self.master1
    }

    pub fn master2(&self) -> &[u8; KEY_SIZE] {
        &self.master2
    }

    /// `master1 ‖ master2`
    pub(crate) fn to_plaintext(&self) -> Zeroizing<[u8; 2 * KEY_SIZE]> {
        let mut out = Zeroizing::new([0u8; 2 * KEY_SIZE]);
        out[..KEY_SIZE].copy_from_slice(&self.master1);
        out[KEY_SIZE..].copy_from_slice(&self.master2);
        out
    }

    /// First 32 bytes become `master1`, last 32 bytes `master2`.
    pub(crate) fn from_plaintext(plain: &[u8; 2 * KEY_SIZE]) -> Self {
        let mut master1 = [0u8; KEY_SIZE];
        let mut master2 = [0u8; KEY_SIZE];
        master1.copy_from_slice(&plain[..KEY_SIZE]);
        master2.copy_from_slice(&plain[KEY_SIZE..]);
        Self { master1, master2 }
    }
}

impl std::fmt::Debug for MasterKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeyPair")
            .field("master1", &"[REDACTED]")
            .field("master2", &"[REDACTED]")
            .finish()
    }
}

/// Generate two independent random 256-bit keys from OS entropy.
pub fn generate_master_keys() -> MasterKeyPair {
    let mut master1 = [0u8; KEY_SIZE];
    let mut master2 = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut master1);
    OsRng.fill_bytes(&mut master2);
    MasterKeyPair { master1, master2 }
}
