//! Opaque blob payloads. Unlike entries, a blob's identity is the SHA-1 of
//! its raw bytes directly -- it never goes through the canonical JSON
//! codec.

use crate::hash::Sha1;

#[derive(Debug, Clone)]
pub struct BlobMeta {
    pub sha1: Sha1,
    pub size: u64,
    pub name: Option<String>,
}

impl BlobMeta {
    pub fn from_bytes(data: &[u8], name: Option<String>) -> Self {
        BlobMeta {
            sha1: Sha1::digest(data),
            size: data.len() as u64,
            name,
        }
    }
}
