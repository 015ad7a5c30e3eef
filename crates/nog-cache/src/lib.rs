//! Two-tier content-addressed caches for entries (JSON) and blobs (raw
//! bytes), both sharded on disk by the first byte of their sha1.

mod blob_cache;
mod entry_cache;
mod error;

pub use blob_cache::BlobCache;
pub use entry_cache::EntryCache;
pub use error::CacheError;
