//! Blob storage for uploaded documents.

pub mod http;
pub mod local;

use async_trait::async_trait;

use crate::channels::MessageKind;
use crate::error::StorageError;

pub use http::HttpBlobStore;
pub use local::LocalBlobStore;

/// Destination for uploaded files. Returns a URL the dashboard can open.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        kind: MessageKind,
        mime_type: Option<&str>,
        bytes: Vec<u8>,
        key_prefix: &str,
    ) -> Result<String, StorageError>;
}

/// File extension for an upload.
///
/// Images are always stored as `jpg` and videos as `mp4`; documents use the
/// mime subtype when it is a plain token.
pub fn extension(kind: MessageKind, mime_type: Option<&str>) -> String {
    match kind {
        MessageKind::Image => "jpg".into(),
        MessageKind::Video => "mp4".into(),
        MessageKind::Document | MessageKind::Text => mime_type
            .and_then(|m| m.split_once('/'))
            .map(|(_, sub)| sub.to_ascii_lowercase())
            .filter(|sub| !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "bin".into()),
    }
}

/// Content type sent alongside the bytes.
pub fn content_type(kind: MessageKind, mime_type: Option<&str>) -> String {
    if let Some(mime) = mime_type {
        return mime.to_string();
    }
    match kind {
        MessageKind::Image => "image/jpeg",
        MessageKind::Video => "video/mp4",
        MessageKind::Document | MessageKind::Text => "application/octet-stream",
    }
    .to_string()
}

/// Object path `{key_prefix}_{millis}.{ext}`.
pub fn object_path(key_prefix: &str, kind: MessageKind, mime_type: Option<&str>) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{key_prefix}_{millis}.{}", extension(kind, mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_by_kind() {
        assert_eq!(extension(MessageKind::Image, Some("image/png")), "jpg");
        assert_eq!(extension(MessageKind::Video, None), "mp4");
        assert_eq!(extension(MessageKind::Document, Some("application/pdf")), "pdf");
        assert_eq!(extension(MessageKind::Document, None), "bin");
        assert_eq!(
            extension(
                MessageKind::Document,
                Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
            ),
            "bin"
        );
    }

    #[test]
    fn object_path_shape() {
        let path = object_path("62811/kk", MessageKind::Image, None);
        assert!(path.starts_with("62811/kk_"));
        assert!(path.ends_with(".jpg"));
        let millis = &path["62811/kk_".len()..path.len() - 4];
        assert!(millis.parse::<i64>().is_ok());
    }

    #[test]
    fn content_type_prefers_mime() {
        assert_eq!(content_type(MessageKind::Document, Some("application/pdf")), "application/pdf");
        assert_eq!(content_type(MessageKind::Image, None), "image/jpeg");
    }
}
