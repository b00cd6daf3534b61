//! Channel abstraction for message I/O.

pub mod cli;
pub mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

pub use cli::CliChannel;
pub use telegram::TelegramChannel;

/// How the transport classified an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Document,
    Video,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
        };
        write!(f, "{s}")
    }
}

/// Opaque handle to an uploaded file, resolved by the channel that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

impl FileRef {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            mime_type: None,
            file_name: None,
        }
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// A message received from a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Stable identifier of the sender; also the address replies go to.
    pub user_id: String,
    pub user_name: Option<String>,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub file_ref: Option<FileRef>,
}

impl InboundMessage {
    pub fn text(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: None,
            kind: MessageKind::Text,
            text: Some(text.into()),
            file_ref: None,
        }
    }

    pub fn file(user_id: impl Into<String>, kind: MessageKind, file_ref: FileRef) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: None,
            kind,
            text: None,
            file_ref: Some(file_ref),
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    /// Message text, or the empty string for uploads without a caption.
    pub fn body(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Pairing/connection status reported to the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingStatus {
    pub paired: bool,
    pub detail: String,
}

pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// A chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send a text message to a user.
    async fn send_text(&self, user_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Fetch the bytes behind a file reference.
    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn pairing_status(&self) -> PairingStatus;
}
