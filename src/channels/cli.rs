//! CLI channel: stdin/stdout REPL for local testing.
//!
//! `/image <path>` and `/document <path>` send a local file as an upload.

use std::path::Path;

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{
    Channel, FileRef, InboundMessage, MessageKind, MessageStream, PairingStatus,
};
use crate::error::ChannelError;

const LOCAL_USER: &str = "local-user";

/// A simple CLI channel that reads from stdin and writes to stdout.
#[derive(Default)]
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

/// Turn one REPL line into an inbound message. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let upload = |kind: MessageKind, path: &str| {
        let path = path.trim();
        let mut file = FileRef::new(path);
        if let Some(name) = Path::new(path).file_name().and_then(|n| n.to_str()) {
            file = file.with_file_name(name);
        }
        if let Some(mime) = guess_mime(path) {
            file = file.with_mime_type(mime);
        }
        InboundMessage::file(LOCAL_USER, kind, file)
    };

    let msg = if let Some(path) = line.strip_prefix("/image ") {
        upload(MessageKind::Image, path)
    } else if let Some(path) = line.strip_prefix("/document ") {
        upload(MessageKind::Document, path)
    } else {
        InboundMessage::text(LOCAL_USER, line)
    };
    Some(msg.with_user_name("Local"))
}

fn guess_mime(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(msg) = parse_line(&line) else {
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_text(&self, _user_id: &str, text: &str) -> Result<(), ChannelError> {
        println!("\n{}\n", text);
        eprint!("> ");
        Ok(())
    }

    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, ChannelError> {
        tokio::fs::read(&file.file_id)
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                name: "cli".into(),
                reason: format!("{}: {e}", file.file_id),
            })
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn pairing_status(&self) -> PairingStatus {
        PairingStatus {
            paired: true,
            detail: "local terminal".into(),
        }
    }
}
