//! Filesystem-backed blob store.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{BlobStore, object_path};
use crate::channels::MessageKind;
use crate::error::StorageError;

/// Writes uploads under a directory and serves them from `public_base`.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(
        &self,
        kind: MessageKind,
        mime_type: Option<&str>,
        bytes: Vec<u8>,
        key_prefix: &str,
    ) -> Result<String, StorageError> {
        let path = object_path(key_prefix, kind, mime_type);
        let target = self.root.join(&path);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| StorageError::UploadFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        debug!(path = %path, size = bytes.len(), "Stored upload locally");
        Ok(format!("{}/{path}", self.public_base.trim_end_matches('/')))
    }
}
