//! Content addresses: algorithm-tagged digests that name data by its bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ZoriError, ZoriResult};

/// Digest algorithms a content address may be tagged with.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha1,
    #[default]
    Sha256,
}

impl Algorithm {
    /// Length in bytes of a digest produced by this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            Algorithm::Sha1 => 20,
            Algorithm::Sha256 => 32,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ZoriError;

    fn from_str(s: &str) -> ZoriResult<Self> {
        match s {
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            other => Err(ZoriError::format(format!("unknown digest algorithm: {other}"))),
        }
    }
}

/// `<algorithm>-<hex digest>`, e.g. `sha256-095964d0…`.
///
/// Parsing only checks that the digest is hex; use
/// [`ContentAddress::ensure_well_formed`] where the digest length matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentAddress {
    algorithm: Algorithm,
    digest: Vec<u8>,
}

impl ContentAddress {
    pub fn new(algorithm: Algorithm, digest: Vec<u8>) -> Self {
        Self { algorithm, digest }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Fails with `ChunkIntegrity` when the digest length does not match the algorithm.
    pub fn ensure_well_formed(&self) -> ZoriResult<()> {
        let want = self.algorithm.digest_len();
        if self.digest.len() != want {
            return Err(ZoriError::ChunkIntegrity(format!(
                "{self}: {} digest must be {want} bytes, got {}",
                self.algorithm,
                self.digest.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm, hex::encode(&self.digest))
    }
}

impl FromStr for ContentAddress {
    type Err = ZoriError;

    fn from_str(s: &str) -> ZoriResult<Self> {
        let (alg, hex_digest) = s
            .split_once('-')
            .ok_or_else(|| ZoriError::format(format!("content address missing '-': {s}")))?;
        let algorithm = alg.parse::<Algorithm>()?;
        let digest = hex::decode(hex_digest)
            .map_err(|e| ZoriError::format(format!("invalid hex in content address {s}: {e}")))?;
        Ok(Self { algorithm, digest })
    }
}

impl TryFrom<String> for ContentAddress {
    type Error = ZoriError;

    fn try_from(s: String) -> ZoriResult<Self> {
        s.parse()
    }
}

impl From<ContentAddress> for String {
    fn from(addr: ContentAddress) -> String {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_and_display() {
        let s = "sha1-b14c4909c3fce2483cd54b328ada88f5ef5e8f96";
        let addr: ContentAddress = s.parse().unwrap();
        assert_eq!(addr.algorithm(), Algorithm::Sha1);
        assert_eq!(addr.digest().len(), 20);
        assert_eq!(addr.to_string(), s);
        addr.ensure_well_formed().unwrap();
    }

    #[test]
    fn algorithm_is_part_of_identity() {
        let a = ContentAddress::new(Algorithm::Sha1, vec![0xab; 20]);
        let b = ContentAddress::new(Algorithm::Sha256, vec![0xab; 20]);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let err = "md5-d41d8cd98f00b204e9800998ecf8427e"
            .parse::<ContentAddress>()
            .unwrap_err();
        assert!(matches!(err, ZoriError::Format(_)));
    }

    #[test]
    fn rejects_missing_separator_and_bad_hex() {
        assert!("sha256".parse::<ContentAddress>().is_err());
        assert!("sha256-zz".parse::<ContentAddress>().is_err());
    }

    #[test]
    fn wrong_length_is_integrity_error() {
        let addr: ContentAddress = "sha256-deadbeef".parse().unwrap();
        let err = addr.ensure_well_formed().unwrap_err();
        assert!(matches!(err, ZoriError::ChunkIntegrity(_)));
    }

    #[test]
    fn serde_uses_string_form() {
        let addr = ContentAddress::new(Algorithm::Sha256, vec![1u8; 32]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let back: ContentAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    proptest! {
        #[test]
        fn display_parse_roundtrip(digest in proptest::collection::vec(any::<u8>(), 20..=20)) {
            let addr = ContentAddress::new(Algorithm::Sha1, digest);
            let back: ContentAddress = addr.to_string().parse().unwrap();
            prop_assert_eq!(back, addr);
        }
    }
}
