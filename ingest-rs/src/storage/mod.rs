//! Blob storage for accepted messages
//!
//! - [`filesystem`]: directory tree with atomic tmp-then-link writes
//! - [`memory`]: in-process store

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemBlobStore;
pub use memory::MemoryBlobStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata stored alongside every blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub content_type: String,
    pub size: usize,
    pub headers: HashMap<String, String>,
}

/// Object store keyed by (namespace, key).
///
/// Blobs are write-once: a put for a key that is already stored succeeds
/// and leaves the first blob in place.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        content_type: &str,
        size: usize,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<()>;
}
