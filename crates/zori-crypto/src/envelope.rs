//! Password envelope for the master key pair
//!
//! Envelope fields (persisted as base64 strings):
//! ```text
//! salt        16 bytes   Argon2id salt
//! iv          16 bytes   AES-256-CTR initial counter block
//! hmac        32 bytes   HMAC-SHA256(derived key, iv ‖ ciphertext)
//! ciphertext  64 bytes   AES-256-CTR(derived key, iv, master1 ‖ master2)
//! ```
//!
//! `open` verifies the MAC in constant time before decrypting, so a wrong
//! password can never yield a plausible-looking key pair.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use zori_core::{ZoriError, ZoriResult};

use crate::kdf::{derive_key, DerivedKey, KdfParams};
use crate::keys::MasterKeyPair;
use crate::{IV_SIZE, KEY_SIZE, MAC_SIZE, SALT_SIZE};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Document id under which the envelope is stored.
pub const ENVELOPE_DOC_ID: &str = "encryption";

const PLAINTEXT_SIZE: usize = 2 * KEY_SIZE;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvelopeDoc", into = "EnvelopeDoc")]
pub struct EncryptionEnvelope {
    pub salt: [u8; SALT_SIZE],
    pub iv: [u8; IV_SIZE],
    pub hmac: [u8; MAC_SIZE],
    pub ciphertext: [u8; PLAINTEXT_SIZE],
}

impl std::fmt::Debug for EncryptionEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionEnvelope")
            .field("salt", &hex::encode(self.salt))
            .field("iv", &hex::encode(self.iv))
            .finish_non_exhaustive()
    }
}

/// Seals and opens master key envelopes with a fixed set of KDF parameters.
///
/// The parameters are not recorded in the envelope; an installation must keep
/// using the ones it sealed with.
#[derive(Debug, Clone, Default)]
pub struct KeyVault {
    params: KdfParams,
}

impl KeyVault {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// Encrypt `keys` under a key derived from `password` and a fresh salt.
    pub fn seal(
        &self,
        password: &SecretString,
        keys: &MasterKeyPair,
    ) -> ZoriResult<EncryptionEnvelope> {
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = derive_key(password, &salt, &self.params)?;

        let plaintext = keys.to_plaintext();
        let mut ciphertext = [0u8; PLAINTEXT_SIZE];
        ciphertext.copy_from_slice(&plaintext[..]);
        apply_ctr(&key, &iv, &mut ciphertext)?;

        let mut hmac = [0u8; MAC_SIZE];
        hmac.copy_from_slice(&envelope_mac(&key, &iv, &ciphertext)?.finalize().into_bytes());

        debug!("sealed master key envelope");
        Ok(EncryptionEnvelope {
            salt,
            iv,
            hmac,
            ciphertext,
        })
    }

    /// Recover the key pair, or fail with `Authentication` on any mismatch.
    pub fn open(
        &self,
        password: &SecretString,
        envelope: &EncryptionEnvelope,
    ) -> ZoriResult<MasterKeyPair> {
        let key = derive_key(password, &envelope.salt, &self.params)?;

        envelope_mac(&key, &envelope.iv, &envelope.ciphertext)?
            .verify_slice(&envelope.hmac)
            .map_err(|_| ZoriError::Authentication)?;

        let mut plaintext = Zeroizing::new(envelope.ciphertext);
        apply_ctr(&key, &envelope.iv, &mut plaintext[..])?;
        Ok(MasterKeyPair::from_plaintext(&plaintext))
    }
}

fn apply_ctr(key: &DerivedKey, iv: &[u8; IV_SIZE], buf: &mut [u8]) -> ZoriResult<()> {
    let mut cipher = Aes256Ctr::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| anyhow::anyhow!("AES-256-CTR init: {e}"))?;
    cipher.apply_keystream(buf);
    Ok(())
}

fn envelope_mac(key: &DerivedKey, iv: &[u8], ciphertext: &[u8]) -> ZoriResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| anyhow::anyhow!("HMAC init: {e}"))?;
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac)
}

/// Serialized form: base64 fields.
#[derive(Serialize, Deserialize)]
struct EnvelopeDoc {
    salt: String,
    iv: String,
    hmac: String,
    ciphertext: String,
}

impl From<EncryptionEnvelope> for EnvelopeDoc {
    fn from(env: EncryptionEnvelope) -> Self {
        Self {
            salt: base64_encode(&env.salt),
            iv: base64_encode(&env.iv),
            hmac: base64_encode(&env.hmac),
            ciphertext: base64_encode(&env.ciphertext),
        }
    }
}

impl TryFrom<EnvelopeDoc> for EncryptionEnvelope {
    type Error = ZoriError;

    fn try_from(doc: EnvelopeDoc) -> ZoriResult<Self> {
        Ok(Self {
            salt: decode_fixed("salt", &doc.salt)?,
            iv: decode_fixed("iv", &doc.iv)?,
            hmac: decode_fixed("hmac", &doc.hmac)?,
            ciphertext: decode_fixed("ciphertext", &doc.ciphertext)?,
        })
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

fn decode_fixed<const N: usize>(field: &str, s: &str) -> ZoriResult<[u8; N]> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| ZoriError::format(format!("envelope {field}: invalid base64: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        ZoriError::format(format!(
            "envelope {field}: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}
