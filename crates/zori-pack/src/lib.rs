//! zori-pack: binary containers bundling chunk payloads
//!
//! # Layouts (little-endian)
//! ```text
//! plaintext   "P4CK" | u32 version | u32 count | count × (u32 length | bytes)
//! encrypted   "P4CE" | u32 version | 16B iv | AES-256-CTR(plaintext pack) | 32B HMAC-SHA256
//! ```
//!
//! A pack is identified by the SHA-256 of its own file bytes, so an encrypted
//! pack and the plaintext pack it wraps have different addresses.

pub mod encrypted;
pub mod format;
pub mod plain;

pub use encrypted::{
    pack_chunks_encrypted, unpack_chunks_encrypted, unpack_chunks_encrypted_with,
};
pub use format::{read_pack_header, PackHeader, PackInfo, PackedChunk};
pub use plain::{pack_chunks, unpack_chunks, unpack_chunks_with};
