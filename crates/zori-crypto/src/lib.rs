//! zori-crypto: key management and pack encryption
//!
//! Key hierarchy:
//! ```text
//! Password ──Argon2id(salt)──▶ envelope key
//!   └── EncryptionEnvelope: AES-256-CTR + HMAC-SHA256 over (master1 ‖ master2)
//!         ├── master1: pack cipher key   (AES-256-CTR)
//!         └── master2: pack MAC key      (HMAC-SHA256 over iv ‖ ciphertext)
//! ```
//!
//! The master keys are generated once per installation and never change; the
//! password only ever protects the envelope.

pub mod cipher;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use cipher::{generate_iv, PackAuthenticator, PackDecryptor, PackEncryptor};
pub use envelope::{EncryptionEnvelope, KeyVault, ENVELOPE_DOC_ID};
pub use kdf::{derive_key, DerivedKey, KdfParams};
pub use keys::{generate_master_keys, MasterKeyPair};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an Argon2id salt
pub const SALT_SIZE: usize = 16;

/// Size of an AES-CTR initial counter block
pub const IV_SIZE: usize = 16;

/// Size of an HMAC-SHA256 tag
pub const MAC_SIZE: usize = 32;
