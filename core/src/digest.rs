//! Content digests.
//!
//! Every layer, chain and cache identity is a SHA256 digest rendered as
//! `sha256:<64 hex chars>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{CimgError, Result};

const ALGORITHM: &str = "sha256";

/// A validated `sha256:<hex>` digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest {
    hex: String,
}

impl ContentDigest {
    /// Digest of raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self {
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Build from an already computed hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CimgError::InvalidDigest(hex.to_string()));
        }
        Ok(Self {
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Parse `sha256:<hex>`.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo, hex) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| CimgError::InvalidDigest(s.to_string()))?;
        if algo != ALGORITHM {
            return Err(CimgError::InvalidDigest(format!(
                "unsupported algorithm '{}' in {}",
                algo, s
            )));
        }
        Self::from_hex(hex)
    }

    /// Hex portion without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", ALGORITHM, self.hex)
    }
}

impl FromStr for ContentDigest {
    type Err = CimgError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_from_bytes() {
        let digest = ContentDigest::from_bytes(b"hello");
        assert_eq!(digest.hex(), HELLO);
        assert_eq!(digest.to_string(), format!("sha256:{}", HELLO));
    }

    #[test]
    fn test_parse_roundtrip() {
        let digest = ContentDigest::parse(&format!("sha256:{}", HELLO)).unwrap();
        assert_eq!(digest, ContentDigest::from_bytes(b"hello"));
    }

    #[test]
    fn test_parse_rejects_other_algorithm() {
        assert!(ContentDigest::parse(&format!("md5:{}", HELLO)).is_err());
    }

    #[test]
    fn test_parse_rejects_short_hex() {
        assert!(ContentDigest::parse("sha256:abc123").is_err());
        assert!(ContentDigest::parse("abc123").is_err());
    }

    #[test]
    fn test_from_hex_lowercases() {
        let digest = ContentDigest::from_hex(&HELLO.to_uppercase()).unwrap();
        assert_eq!(digest.hex(), HELLO);
    }

    #[test]
    fn test_serde_as_string() {
        let digest = ContentDigest::from_bytes(b"hello");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"sha256:{}\"", HELLO));
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
