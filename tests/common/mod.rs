//! Shared in-memory collaborators for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use intake_bot::channels::{
    Channel, FileRef, InboundMessage, MessageKind, MessageStream, PairingStatus,
};
use intake_bot::error::{ChannelError, DatabaseError, StorageError};
use intake_bot::intake::{
    Category, CompletedRecord, DatabaseCatalog, FieldRule, InputKind, IntakeEngine,
    SessionStore, StepDefinition,
};
use intake_bot::storage::{BlobStore, extension};
use intake_bot::store::{Database, LibSqlBackend, QuotaChange};

pub const SD_IDENTITY: &str = "Ana Putri#2016-05-02#SD#1234567890123456";
pub const SMP_IDENTITY: &str = "#Budi Santoso #2012-11-20 #SMP #3201 0123 4567 8901";

/// Steps 1 to 4 for everyone; SMP replaces step 4 with two extra documents.
pub fn ppdb_steps() -> Vec<StepDefinition> {
    vec![
        StepDefinition::text(1, "data_diri", "Kirim: #Nama #YYYY-MM-DD #Jenjang #NomorKK")
            .with_rule(FieldRule::CompositeIdentity),
        StepDefinition::upload(2, InputKind::Image, "kk", "Kirim foto Kartu Keluarga"),
        StepDefinition::upload(3, InputKind::Image, "akta", "Kirim foto akta kelahiran"),
        StepDefinition::upload(4, InputKind::Image, "foto", "Kirim pas foto 3x4").terminal(),
        StepDefinition::upload(4, InputKind::Document, "rapor", "Kirim rapor (PDF)")
            .with_category(Category::Smp),
        StepDefinition::upload(5, InputKind::Document, "ijazah", "Kirim ijazah SD (PDF)")
            .with_category(Category::Smp),
        StepDefinition::upload(6, InputKind::Image, "foto", "Kirim pas foto 3x4")
            .with_category(Category::Smp)
            .terminal(),
    ]
}

// ── Channel ─────────────────────────────────────────────────────────

/// Records every outbound message and serves uploads from memory.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, String)>>,
    pub healthy: AtomicBool,
    pub fail_send: AtomicBool,
    notify: Mutex<Option<mpsc::UnboundedSender<(String, String)>>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Receive a copy of every message sent from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<(String, String)> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notify.lock().unwrap() = Some(tx);
        rx
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send_text(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "send disabled".into(),
            });
        }
        let entry = (user_id.to_string(), text.to_string());
        self.sent.lock().unwrap().push(entry.clone());
        if let Some(tx) = self.notify.lock().unwrap().as_ref() {
            let _ = tx.send(entry);
        }
        Ok(())
    }

    /// File ids starting with `broken` fail to download.
    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, ChannelError> {
        if file.file_id.starts_with("broken") {
            return Err(ChannelError::DownloadFailed {
                name: "recording".into(),
                reason: "file expired".into(),
            });
        }
        Ok(file.file_id.as_bytes().to_vec())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: "recording".into(),
            })
        }
    }

    async fn pairing_status(&self) -> PairingStatus {
        PairingStatus {
            paired: self.healthy.load(Ordering::SeqCst),
            detail: "@ppdb_test_bot".into(),
        }
    }
}

// ── Blob store ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBlobStore {
    pub uploads: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        kind: MessageKind,
        mime_type: Option<&str>,
        _bytes: Vec<u8>,
        key_prefix: &str,
    ) -> Result<String, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Http("503 Service Unavailable".into()));
        }
        let url = format!("mem://{key_prefix}.{}", extension(kind, mime_type));
        self.uploads.lock().unwrap().push(url.clone());
        Ok(url)
    }
}

// ── Database ────────────────────────────────────────────────────────

/// In-memory libSQL with switchable failures on the commit path.
pub struct FlakyDatabase {
    inner: LibSqlBackend,
    pub fail_insert: AtomicBool,
    pub fail_decrement: AtomicBool,
    pub inserts: AtomicUsize,
}

impl FlakyDatabase {
    pub async fn new() -> Self {
        Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            fail_insert: AtomicBool::new(false),
            fail_decrement: AtomicBool::new(false),
            inserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Database for FlakyDatabase {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn list_steps(&self, step: u32) -> Result<Vec<StepDefinition>, DatabaseError> {
        self.inner.list_steps(step).await
    }

    async fn replace_steps(&self, steps: &[StepDefinition]) -> Result<(), DatabaseError> {
        self.inner.replace_steps(steps).await
    }

    async fn insert_record(&self, record: &CompletedRecord) -> Result<(), DatabaseError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("insert_record: disk I/O error".into()));
        }
        self.inner.insert_record(record).await
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<CompletedRecord>, DatabaseError> {
        self.inner.get_record(id).await
    }

    async fn records_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompletedRecord>, DatabaseError> {
        self.inner.records_for_user(user_id).await
    }

    async fn update_record_status(&self, id: Uuid, status: &str) -> Result<bool, DatabaseError> {
        self.inner.update_record_status(id, status).await
    }

    async fn set_quota(&self, category: Category, remaining: i64) -> Result<(), DatabaseError> {
        self.inner.set_quota(category, remaining).await
    }

    async fn get_quota(&self, category: Category) -> Result<Option<i64>, DatabaseError> {
        self.inner.get_quota(category).await
    }

    async fn decrement_quota(&self, category: Category) -> Result<QuotaChange, DatabaseError> {
        if self.fail_decrement.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("decrement_quota: database is locked".into()));
        }
        self.inner.decrement_quota(category).await
    }

    async fn get_faq(
        &self,
        keyword: &str,
        subkey: Option<&str>,
    ) -> Result<Option<String>, DatabaseError> {
        self.inner.get_faq(keyword, subkey).await
    }

    async fn set_faq(
        &self,
        keyword: &str,
        subkey: Option<&str>,
        content: &str,
    ) -> Result<(), DatabaseError> {
        self.inner.set_faq(keyword, subkey, content).await
    }

    async fn upsert_contact(&self, user_id: &str, name: &str) -> Result<(), DatabaseError> {
        self.inner.upsert_contact(user_id, name).await
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub engine: Arc<IntakeEngine>,
    pub db: Arc<FlakyDatabase>,
    pub channel: Arc<RecordingChannel>,
    pub blobs: Arc<MemoryBlobStore>,
    pub sessions: Arc<SessionStore>,
}

impl Harness {
    /// Engine over the PPDB catalog, with 10 seats per category.
    pub async fn new() -> Self {
        let db = Arc::new(FlakyDatabase::new().await);
        db.replace_steps(&ppdb_steps()).await.unwrap();
        for category in Category::ALL {
            db.set_quota(category, 10).await.unwrap();
        }

        let channel = Arc::new(RecordingChannel::new());
        let blobs = Arc::new(MemoryBlobStore::default());
        let sessions = Arc::new(SessionStore::new());
        let db_dyn: Arc<dyn Database> = db.clone();

        let engine = Arc::new(IntakeEngine::new(
            Arc::new(DatabaseCatalog::new(Arc::clone(&db_dyn))),
            db_dyn,
            blobs.clone(),
            channel.clone(),
            Arc::clone(&sessions),
        ));

        Self {
            engine,
            db,
            channel,
            blobs,
            sessions,
        }
    }
}

pub fn text(user: &str, body: &str) -> InboundMessage {
    InboundMessage::text(user, body).with_user_name("Ibu Sari")
}

pub fn image(user: &str, file_id: &str) -> InboundMessage {
    InboundMessage::file(
        user,
        MessageKind::Image,
        FileRef::new(file_id).with_mime_type("image/jpeg"),
    )
}

pub fn document(user: &str, file_id: &str) -> InboundMessage {
    InboundMessage::file(
        user,
        MessageKind::Document,
        FileRef::new(file_id).with_mime_type("application/pdf"),
    )
}
