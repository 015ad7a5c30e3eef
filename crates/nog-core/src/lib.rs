//! Canonical JSON codec, SHA-1 content identity, and the Commit/Tree/Object
//! data model shared by the cache and client crates.

mod blob;
mod codec;
mod entry;
mod error;
mod hash;
mod lifecycle;

pub use blob::BlobMeta;
pub use codec::{content_id, strip_identity_keys, to_canonical_bytes, to_pretty_string};
pub use entry::{
    commit_idversion_for_date, entry_sha1, glob_match, Commit, EntryKind, IdVersion, ObjectEntry, Tree, TreeEntry,
};
pub use error::Error;
pub use hash::{Sha1, NULL_SHA1};
pub use lifecycle::Entry;

/// A reference (branch or tag) pointing at a commit, keyed by name within a
/// repo. Updated only through compare-and-swap (see `nog_client::repo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub commit: Sha1,
}
