//! Vault credential-lease manager and the document-lock helper daemons
//! rely on for safe concurrent access.

pub mod doclock;
mod error;
pub mod lease;

pub use doclock::{DocLocker, LockEntry, LockStore};
pub use error::VaultError;
pub use lease::{Destination, KeyMap, LeaseData, VaultBackend, VaultManager};
