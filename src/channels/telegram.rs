//! Telegram channel: long-polls the Bot API for updates.
//!
//! Only private chats are handled. Photos, image documents, other documents
//! and videos are surfaced as uploads; files are fetched lazily through
//! `getFile` when the engine asks for them.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::channels::{
    Channel, FileRef, InboundMessage, MessageKind, MessageStream, PairingStatus,
};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const API_BASE: &str = "https://api.telegram.org";

/// Telegram channel connected to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.bot_token.expose_secret())
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{API_BASE}/file/bot{}/{file_path}",
            self.bot_token.expose_secret()
        )
    }

    /// Check if a username is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| send_failed(e.without_url().to_string()))?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| send_failed(e.without_url().to_string()))?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(send_failed(format!(
                "sendMessage failed (markdown: {markdown_status}, plain: {plain_err})"
            )));
        }

        Ok(())
    }

    /// Call a Bot API method and return its `result` payload.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, String> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;

        let status = resp.status();
        let data: Value = resp.json().await.map_err(|e| e.without_url().to_string())?;
        if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            return Err(format!("{method} returned {status}: {description}"));
        }
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason,
    }
}

fn download_failed(reason: String) -> ChannelError {
    ChannelError::DownloadFailed {
        name: "telegram".into(),
        reason,
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {}", e.without_url());
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {}", e.without_url());
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(message) = update.get("message") else {
                        continue;
                    };

                    let Some(incoming) = parse_message(message) else {
                        continue;
                    };

                    let username = message
                        .get("from")
                        .and_then(|f| f.get("username"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");

                    if !check_user_allowed(&allowed_users, [username, incoming.user_id.as_str()]) {
                        tracing::warn!(
                            "Telegram: ignoring message from unauthorized user: \
                             username={username}, user_id={}",
                            incoming.user_id
                        );
                        continue;
                    }

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_text(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        self.send_message(user_id, text).await
    }

    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, ChannelError> {
        let result = self
            .call("getFile", &serde_json::json!({ "file_id": file.file_id }))
            .await
            .map_err(download_failed)?;

        let file_path = result
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| download_failed("getFile returned no file_path".into()))?;

        let resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| download_failed(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            return Err(download_failed(format!(
                "file endpoint returned {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| download_failed(e.without_url().to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.call("getMe", &serde_json::json!({}))
            .await
            .map(|_| ())
            .map_err(|_| ChannelError::HealthCheckFailed {
                name: "telegram".into(),
            })
    }

    async fn pairing_status(&self) -> PairingStatus {
        match self.call("getMe", &serde_json::json!({})).await {
            Ok(me) => {
                let username = me
                    .get("username")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                PairingStatus {
                    paired: true,
                    detail: format!("@{username}"),
                }
            }
            Err(e) => PairingStatus {
                paired: false,
                detail: e,
            },
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Classify a Bot API `message` object. Group chats and unsupported
/// content (stickers, locations, ...) yield `None`.
fn parse_message(message: &Value) -> Option<InboundMessage> {
    let chat = message.get("chat")?;
    if chat.get("type").and_then(Value::as_str) != Some("private") {
        return None;
    }
    let chat_id = chat.get("id").and_then(Value::as_i64)?.to_string();

    let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(String::from);
    let caption = str_field(message, "caption");

    let mut incoming = if let Some(text) = str_field(message, "text") {
        InboundMessage::text(chat_id, text)
    } else if let Some(sizes) = message.get("photo").and_then(Value::as_array) {
        // Sizes are ordered smallest first.
        let largest = sizes.last()?;
        let file = FileRef::new(str_field(largest, "file_id")?).with_mime_type("image/jpeg");
        InboundMessage::file(chat_id, MessageKind::Image, file)
    } else if let Some(doc) = message.get("document") {
        let mut file = FileRef::new(str_field(doc, "file_id")?);
        let mime = str_field(doc, "mime_type");
        let kind = match mime.as_deref() {
            Some(m) if m.starts_with("image/") => MessageKind::Image,
            _ => MessageKind::Document,
        };
        if let Some(m) = mime {
            file = file.with_mime_type(m);
        }
        if let Some(name) = str_field(doc, "file_name") {
            file = file.with_file_name(name);
        }
        InboundMessage::file(chat_id, kind, file)
    } else if let Some(video) = message.get("video") {
        let mut file = FileRef::new(str_field(video, "file_id")?);
        if let Some(m) = str_field(video, "mime_type") {
            file = file.with_mime_type(m);
        }
        InboundMessage::file(chat_id, MessageKind::Video, file)
    } else {
        return None;
    };

    if incoming.text.is_none() {
        incoming.text = caption;
    }

    let from = message.get("from");
    let name = from
        .and_then(|f| str_field(f, "first_name"))
        .or_else(|| from.and_then(|f| str_field(f, "username")));
    if let Some(name) = name {
        incoming = incoming.with_user_name(name);
    }

    Some(incoming)
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let cut = match remaining.char_indices().nth(max_len) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(remaining.to_string());
                break;
            }
        };

        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
