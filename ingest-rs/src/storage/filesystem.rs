use super::{BlobMetadata, BlobStore};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Stores each blob as `<base>/<namespace>/<key>.eml` with a JSON
/// metadata sidecar at `<key>.json`. Neither file is ever replaced.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub async fn read(&self, namespace: &str, key: &str) -> Result<(BlobMetadata, Vec<u8>)> {
        let dir = self.namespace_path(namespace)?;
        let body = match fs::read(dir.join(format!("{}.eml", key))).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestError::NotFound(format!("blob {}/{}", namespace, key)))
            }
            Err(e) => return Err(e.into()),
        };
        let meta = fs::read(dir.join(format!("{}.json", key))).await?;
        Ok((serde_json::from_slice(&meta)?, body))
    }

    fn namespace_path(&self, namespace: &str) -> Result<PathBuf> {
        check_component(namespace)?;
        Ok(self.base_path.join(namespace))
    }

    async fn ensure_structure(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join("tmp");
        if !tmp.exists() {
            fs::create_dir_all(&tmp).await.map_err(|e| {
                IngestError::Storage(format!("Failed to create directory {:?}: {}", tmp, e))
            })?;
        }
        Ok(())
    }

    /// Write into `tmp/` then link into place, so readers never see a
    /// partial file and an existing file is never replaced. Returns whether
    /// this call created the file.
    async fn write_once(&self, dir: &Path, filename: &str, data: &[u8]) -> Result<bool> {
        let tmp_path = dir.join("tmp").join(format!("{}.{}", filename, Uuid::new_v4()));
        let final_path = dir.join(filename);

        fs::write(&tmp_path, data).await?;
        let linked = fs::hard_link(&tmp_path, &final_path).await;
        let _ = fs::remove_file(&tmp_path).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(IngestError::Storage(format!(
                "Failed to move {:?} into place: {}",
                final_path, e
            ))),
        }
    }
}

fn check_component(part: &str) -> Result<()> {
    if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
        return Err(IngestError::Storage(format!(
            "invalid blob path component: {:?}",
            part
        )));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        content_type: &str,
        size: usize,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<()> {
        check_component(key)?;
        let dir = self.namespace_path(namespace)?;
        self.ensure_structure(&dir).await?;

        let meta = BlobMetadata {
            content_type: content_type.to_string(),
            size,
            headers: headers.clone(),
        };

        // Sidecar first: a body file on disk always has its metadata.
        self.write_once(&dir, &format!("{}.json", key), &serde_json::to_vec(&meta)?)
            .await?;
        if !self.write_once(&dir, &format!("{}.eml", key), body).await? {
            debug!("Blob {}/{} already stored, keeping it", namespace, key);
            return Ok(());
        }

        debug!("Wrote {} bytes to {}/{}", size, namespace, key);
        info!("Stored blob {}/{}", namespace, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn headers() -> HashMap<String, String> {
        HashMap::from([("message-id".to_string(), "abc@example.com".to_string())])
    }

    #[tokio::test]
    async fn test_put_and_read() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        let body = b"Subject: hi\r\n\r\nhello\r\n";

        store
            .put("list-1", "YWJj", "text/plain", body.len(), &headers(), body)
            .await
            .unwrap();

        let (meta, stored) = store.read("list-1", "YWJj").await.unwrap();
        assert_eq!(stored, body);
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.size, body.len());
        assert_eq!(meta.headers.get("message-id").unwrap(), "abc@example.com");

        let leftovers = std::fs::read_dir(dir.path().join("list-1").join("tmp"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_second_put_keeps_first_blob() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(dir.path());

        store
            .put("list-1", "key", "text/plain", 5, &headers(), b"hello")
            .await
            .unwrap();
        store
            .put("list-1", "key", "text/html", 7, &HashMap::new(), b"goodbye")
            .await
            .unwrap();

        let (meta, stored) = store.read("list-1", "key").await.unwrap();
        assert_eq!(stored, b"hello");
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.size, 5);

        let leftovers = std::fs::read_dir(dir.path().join("list-1").join("tmp"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(dir.path());

        let result = store
            .put("..", "key", "text/plain", 1, &HashMap::new(), b"x")
            .await;
        assert!(matches!(result, Err(IngestError::Storage(_))));

        let result = store
            .put("list", "a/b", "text/plain", 1, &HashMap::new(), b"x")
            .await;
        assert!(matches!(result, Err(IngestError::Storage(_))));
    }

    #[tokio::test]
    async fn test_read_missing() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        assert!(store.read("list", "nope").await.unwrap_err().is_not_found());
    }
}
