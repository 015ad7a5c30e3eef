//! Signed transport, the per-repo HTTP facade, the publication pipeline,
//! and the multi-part blob uploader.

pub mod config;
pub mod error;
pub mod graph;
pub mod poststream;
pub mod repo;
pub mod signer;
pub mod transport;
pub mod upload;

pub use config::Config;
pub use error::{ClientError, ErrataPolicy};
pub use graph::{build_stage_graph, commit_wire, PostNode, PostObject, PostTree};
pub use poststream::{post_order, PostStream, StageNode};
pub use repo::RemoteRepo;
pub use signer::Signer;
pub use transport::Transport;
pub use upload::BlobUploader;
