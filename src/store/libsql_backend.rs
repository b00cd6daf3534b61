//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::intake::catalog::{FieldRule, InputKind, StepDefinition};
use crate::intake::category::Category;
use crate::intake::commit::CompletedRecord;
use crate::store::migrations;
use crate::store::traits::{Database, QuotaChange};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json(map: &BTreeMap<String, String>) -> Result<String, DatabaseError> {
    serde_json::to_string(map).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json(s: &str) -> BTreeMap<String, String> {
    serde_json::from_str(s).unwrap_or_default()
}

const STEP_COLUMNS: &str = "step, category, instruction, input_kind, field_key, rule, is_terminal";

/// Map a libsql Row to a StepDefinition. Column order matches STEP_COLUMNS.
///
/// Unknown category, input kind or rule values are errors: a typo'd
/// category must not turn into a fallback row.
fn row_to_step(row: &libsql::Row) -> Result<StepDefinition, String> {
    let step: i64 = row.get(0).map_err(|e| e.to_string())?;
    let category: Option<String> = row.get(1).ok();
    let input_kind: String = row.get(3).map_err(|e| e.to_string())?;
    let rule: String = row.get(5).map_err(|e| e.to_string())?;
    let terminal: i64 = row.get(6).map_err(|e| e.to_string())?;

    let category = match category.as_deref() {
        None => None,
        Some(code) => {
            Some(Category::from_code(code).ok_or_else(|| format!("unknown category: {code}"))?)
        }
    };

    Ok(StepDefinition {
        step: u32::try_from(step).map_err(|_| format!("invalid step number: {step}"))?,
        category,
        instruction: row.get(2).map_err(|e| e.to_string())?,
        input_kind: input_kind.parse()?,
        field_key: row.get(4).map_err(|e| e.to_string())?,
        rule: rule.parse()?,
        terminal: terminal != 0,
    })
}

const RECORD_COLUMNS: &str =
    "id, user_id, name, birthdate, category, family_id, attachments, answers, status, created_at";

/// Map a libsql Row to a CompletedRecord. Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<CompletedRecord, libsql::Error> {
    let id_str: String = row.get(0)?;
    let category: Option<String> = row.get(4).ok();
    let attachments: String = row.get(6)?;
    let answers: String = row.get(7)?;
    let created_str: String = row.get(9)?;

    Ok(CompletedRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id: row.get(1)?,
        name: row.get(2)?,
        birthdate: row.get(3)?,
        category: category.as_deref().and_then(Category::from_code),
        family_id: row.get(5)?,
        attachments: from_json(&attachments),
        answers: from_json(&answers),
        status: row.get(8)?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Step catalog ────────────────────────────────────────────────

    async fn list_steps(&self, step: u32) -> Result<Vec<StepDefinition>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {STEP_COLUMNS} FROM form_steps WHERE step = ?1 ORDER BY id ASC"),
                params![i64::from(step)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_steps: {e}")))?;

        let mut steps = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_steps: {e}")))?
        {
            match row_to_step(&row) {
                Ok(def) => steps.push(def),
                Err(e) => warn!(step, error = %e, "Skipping malformed form_steps row"),
            }
        }
        Ok(steps)
    }

    async fn replace_steps(&self, steps: &[StepDefinition]) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_steps: {e}")))?;

        tx.execute("DELETE FROM form_steps", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_steps: {e}")))?;

        for def in steps {
            tx.execute(
                "INSERT INTO form_steps (step, category, instruction, input_kind, field_key, rule, is_terminal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    i64::from(def.step),
                    opt_text(def.category.map(|c| c.code())),
                    def.instruction.as_str(),
                    def.input_kind.to_string(),
                    def.field_key.as_str(),
                    def.rule.to_string(),
                    i64::from(def.terminal),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_steps insert: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_steps commit: {e}")))?;

        info!(count = steps.len(), "Step catalog replaced");
        Ok(())
    }

    // ── Intake records ──────────────────────────────────────────────

    async fn insert_record(&self, record: &CompletedRecord) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let created = record.created_at.to_rfc3339();
        conn.execute(
            "INSERT INTO intake_records (id, user_id, name, birthdate, category, family_id,
                attachments, answers, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                record.id.to_string(),
                record.user_id.as_str(),
                record.name.as_str(),
                record.birthdate.as_str(),
                opt_text(record.category.map(|c| c.code())),
                record.family_id.as_str(),
                to_json(&record.attachments)?,
                to_json(&record.answers)?,
                record.status.as_str(),
                created,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_record: {e}")))?;

        debug!(record_id = %record.id, "Record inserted into DB");
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<CompletedRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM intake_records WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_record(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_record row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_record: {e}"))),
        }
    }

    async fn records_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompletedRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM intake_records WHERE user_id = ?1
                     ORDER BY created_at ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("records_for_user: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("records_for_user: {e}")))?
        {
            records.push(
                row_to_record(&row)
                    .map_err(|e| DatabaseError::Query(format!("records_for_user row parse: {e}")))?,
            );
        }
        Ok(records)
    }

    async fn update_record_status(&self, id: Uuid, status: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE intake_records SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status, now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_record_status: {e}")))?;
        Ok(changed > 0)
    }

    // ── Quotas ──────────────────────────────────────────────────────

    async fn set_quota(&self, category: Category, remaining: i64) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO category_quota (category, remaining, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(category) DO UPDATE SET remaining = excluded.remaining,
                updated_at = excluded.updated_at",
            params![category.code(), remaining, Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_quota: {e}")))?;
        Ok(())
    }

    async fn get_quota(&self, category: Category) -> Result<Option<i64>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT remaining FROM category_quota WHERE category = ?1",
                params![category.code()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_quota: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let remaining: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_quota row parse: {e}")))?;
                Ok(Some(remaining))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_quota: {e}"))),
        }
    }

    async fn decrement_quota(&self, category: Category) -> Result<QuotaChange, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "UPDATE category_quota SET remaining = remaining - 1, updated_at = ?2
                 WHERE category = ?1 AND remaining > 0
                 RETURNING remaining",
                params![category.code(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("decrement_quota: {e}")))?;

        let updated = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("decrement_quota: {e}")))?;

        if let Some(row) = updated {
            let remaining: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("decrement_quota row parse: {e}")))?;
            return Ok(QuotaChange::Decremented { remaining });
        }
        drop(rows);

        match self.get_quota(category).await? {
            Some(_) => Ok(QuotaChange::Exhausted),
            None => Ok(QuotaChange::Missing),
        }
    }

    // ── FAQ ─────────────────────────────────────────────────────────

    async fn get_faq(
        &self,
        keyword: &str,
        subkey: Option<&str>,
    ) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT content FROM faq WHERE keyword = ?1 AND subkey = ?2",
                params![keyword, subkey.unwrap_or("")],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_faq: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_faq: {e}"))),
        }
    }

    async fn set_faq(
        &self,
        keyword: &str,
        subkey: Option<&str>,
        content: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO faq (keyword, subkey, content) VALUES (?1, ?2, ?3)
             ON CONFLICT(keyword, subkey) DO UPDATE SET content = excluded.content",
            params![keyword, subkey.unwrap_or(""), content],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_faq: {e}")))?;
        Ok(())
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn upsert_contact(&self, user_id: &str, name: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO contacts (user_id, name, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET name = excluded.name,
                last_seen = excluded.last_seen",
            params![user_id, name, Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_contact: {e}")))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
