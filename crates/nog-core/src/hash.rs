//! SHA-1 content identity.
//!
//! Every entry and blob in the store is identified by the SHA-1 of its
//! canonical encoding (see [`crate::codec`]). `Sha1` is a thin, validated
//! wrapper around the 20-byte digest so callers can't accidentally pass a
//! raw, un-hex-decoded string across the API boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// The sentinel used in the idversion-0 wire format to mean "no blob".
pub const NULL_SHA1: Sha1 = Sha1([0u8; 20]);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha1([u8; 20]);

impl Sha1 {
    pub fn from_bytes(digest: [u8; 20]) -> Self {
        Sha1(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        *self == NULL_SHA1
    }

    /// Hash of the given bytes, for content that is hashed directly
    /// (blobs) rather than through the canonical JSON codec (entries).
    pub fn digest(data: &[u8]) -> Self {
        use sha1::{Digest, Sha1 as Sha1Hasher};
        let mut hasher = Sha1Hasher::new();
        hasher.update(data);
        let out = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&out);
        Sha1(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Sha1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1({})", self.to_hex())
    }
}

impl fmt::Display for Sha1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Sha1 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(Error::InvalidSha1(s.to_string()));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::InvalidSha1(s.to_string()))?;
        Ok(Sha1(bytes))
    }
}

impl Serialize for Sha1 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha1 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sha1_is_all_zero_hex() {
        assert_eq!(NULL_SHA1.to_hex(), "0".repeat(40));
    }

    #[test]
    fn roundtrips_through_hex() {
        let sha1 = Sha1::digest(b"hello");
        let hex = sha1.to_hex();
        let parsed: Sha1 = hex.parse().unwrap();
        assert_eq!(sha1, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("deadbeef".parse::<Sha1>().is_err());
    }
}
