//! Object-storage blob store speaking the Supabase storage API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{BlobStore, content_type, object_path};
use crate::channels::MessageKind;
use crate::error::StorageError;

/// Uploads to `{base}/storage/v1/object/{bucket}/{path}` with a service key.
pub struct HttpBlobStore {
    base_url: String,
    bucket: String,
    service_key: SecretString,
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, bucket: &str, service_key: SecretString) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            service_key,
            client: reqwest::Client::new(),
        }
    }

    fn upload_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{path}", self.base_url, self.bucket)
    }

    /// Public URL of a stored object.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{path}",
            self.base_url, self.bucket
        )
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(
        &self,
        kind: MessageKind,
        mime_type: Option<&str>,
        bytes: Vec<u8>,
        key_prefix: &str,
    ) -> Result<String, StorageError> {
        let path = object_path(key_prefix, kind, mime_type);
        let size = bytes.len();

        let resp = self
            .client
            .post(self.upload_url(&path))
            .bearer_auth(self.service_key.expose_secret())
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type(kind, mime_type))
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::UploadFailed {
                path,
                reason: format!("{status}: {body}"),
            });
        }

        debug!(path = %path, size, "Uploaded object");
        Ok(self.public_url(&path))
    }
}
