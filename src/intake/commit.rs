//! Commit coordinator: turns a finished session into a stored record.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::category::Category;
use super::session::Session;
use crate::error::IntakeError;
use crate::store::{Database, QuotaChange};

/// Status every new record is created with.
pub const STATUS_PENDING: &str = "pending";

/// Stored in place of any expected value the session never collected.
pub const PLACEHOLDER: &str = "BELUM ADA";

/// Field keys that hold the applicant's identity.
pub mod keys {
    pub const NAME: &str = "name";
    pub const BIRTHDATE: &str = "birthdate";
    pub const CATEGORY: &str = "category";
    pub const FAMILY_ID: &str = "family_id";
}

/// Document uploads every record reports, collected or not.
pub const DOCUMENT_KEYS: [&str; 5] = ["kk", "akta", "rapor", "ijazah", "foto"];

/// The persisted shape of a completed intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub birthdate: String,
    pub category: Option<Category>,
    pub family_id: String,
    /// Upload URLs keyed by document key.
    pub attachments: BTreeMap<String, String>,
    /// Every other collected field.
    pub answers: BTreeMap<String, String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl CompletedRecord {
    /// Flatten a session into a record with a fresh id and `pending` status.
    pub fn from_session(session: &Session) -> Self {
        let text = |key: &str| {
            session
                .fields
                .get(key)
                .cloned()
                .unwrap_or_else(|| PLACEHOLDER.to_string())
        };

        let mut attachments: BTreeMap<String, String> = DOCUMENT_KEYS
            .iter()
            .map(|k| (k.to_string(), PLACEHOLDER.to_string()))
            .collect();
        let mut answers = BTreeMap::new();

        for (key, value) in &session.fields {
            match key.as_str() {
                keys::NAME | keys::BIRTHDATE | keys::CATEGORY | keys::FAMILY_ID => {}
                k if DOCUMENT_KEYS.contains(&k) => {
                    attachments.insert(key.clone(), value.clone());
                }
                _ => {
                    answers.insert(key.clone(), value.clone());
                }
            }
        }

        Self {
            id: Uuid::new_v4(),
            user_id: session.user_id.clone(),
            name: text(keys::NAME),
            birthdate: text(keys::BIRTHDATE),
            category: session.category,
            family_id: text(keys::FAMILY_ID),
            attachments,
            answers,
            status: STATUS_PENDING.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Writes a completed session exactly once and releases the session.
pub struct CommitCoordinator {
    db: Arc<dyn Database>,
}

impl CommitCoordinator {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Persist the session held in `slot`.
    ///
    /// The slot is emptied after the insert attempt whatever its outcome, so
    /// a failed commit never leaves the user stuck mid-flow. The quota
    /// decrement is best-effort and never undoes a successful insert.
    pub async fn commit(&self, slot: &mut Option<Session>) -> Result<Uuid, IntakeError> {
        let Some(session) = slot.as_ref() else {
            return Err(IntakeError::Persist("no session to commit".into()));
        };
        let record = CompletedRecord::from_session(session);

        let inserted = self.db.insert_record(&record).await;
        *slot = None;

        if let Err(e) = inserted {
            error!(
                user_id = %record.user_id,
                category = ?record.category,
                error = %e,
                persist_failure = true,
                "Failed to insert intake record"
            );
            return Err(IntakeError::Persist(e.to_string()));
        }

        info!(
            record_id = %record.id,
            user_id = %record.user_id,
            category = ?record.category,
            "Intake record created"
        );

        if let Some(category) = record.category {
            self.take_seat(category).await;
        }

        Ok(record.id)
    }

    async fn take_seat(&self, category: Category) {
        match self.db.decrement_quota(category).await {
            Ok(QuotaChange::Decremented { remaining }) => {
                info!(%category, remaining, "Quota decremented");
            }
            Ok(QuotaChange::Exhausted) => {
                warn!(%category, "Quota already exhausted");
            }
            Ok(QuotaChange::Missing) => {
                warn!(%category, "No quota configured for category");
            }
            Err(e) => {
                warn!(%category, error = %e, "Failed to decrement quota");
            }
        }
    }
}
