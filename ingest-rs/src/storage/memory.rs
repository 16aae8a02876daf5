use super::{BlobMetadata, BlobStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps blobs in a map; counts every put, including ones for stored keys.
#[derive(Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(String, String), (BlobMetadata, Vec<u8>)>>>,
    puts: Arc<AtomicUsize>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Option<(BlobMetadata, Vec<u8>)> {
        self.blobs
            .read()
            .await
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// Distinct (namespace, key) pairs stored
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        content_type: &str,
        size: usize,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<()> {
        let meta = BlobMetadata {
            content_type: content_type.to_string(),
            size,
            headers: headers.clone(),
        };
        self.blobs
            .write()
            .await
            .entry((namespace.to_string(), key.to_string()))
            .or_insert_with(|| (meta, body.to_vec()));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
