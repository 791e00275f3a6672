pub mod backend;
pub mod error;
mod metadata;
mod path;

pub use crate::backend::{
    Capabilities, Conflict, DeleteOptions, DownloadOptions, Provider, ProviderIdentity, list_revisions,
};
pub use crate::metadata::{FileMetadata, FolderMetadata, LATEST_REVISION, Metadata, Revision};
pub use crate::path::{Addressing, PathPart, ProviderPath};
use std::sync::Arc;

pub type ProviderHandle = Arc<dyn Provider>;
