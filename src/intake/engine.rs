//! The intake state machine: one inbound message in, one reply out.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::catalog::{FieldRule, StepCatalog, StepDefinition};
use super::category::Category;
use super::commit::{CommitCoordinator, keys};
use super::responder::Reply;
use super::session::{Session, SessionStore};
use super::validator::{self, ValidationFailure};
use crate::channels::{Channel, InboundMessage, MessageKind};
use crate::error::IntakeError;
use crate::storage::BlobStore;
use crate::store::Database;

/// Whole-message commands that abandon any session and show the menu.
const RESET_COMMANDS: [&str; 4] = ["menu", "help", "start", "mulai"];

/// Substring that starts a new intake.
const START_TRIGGER: &str = "daftar";

/// Substring that asks for the remaining capacity per category.
const QUOTA_TRIGGER: &str = "kuota";

/// FAQ keywords, checked in order. Matched before the start trigger, so
/// "pendaftaran" is answered from the FAQ rather than starting an intake.
const FAQ_KEYWORDS: [&str; 7] = [
    "syarat",
    "jadwal",
    "kontak",
    "biaya",
    "alamat",
    "beasiswa",
    "pendaftaran",
];

/// FAQ keywords whose entries may be specialised per category.
const CATEGORY_FAQ_KEYWORDS: [&str; 2] = ["biaya", "syarat"];

/// Display name stored for senders the transport gives no name for.
const UNNAMED_CONTACT: &str = "Tanpa Nama";

pub fn is_reset_command(text: &str) -> bool {
    let text = text.trim();
    RESET_COMMANDS.iter().any(|c| c.eq_ignore_ascii_case(text))
}

fn category_label(category: Option<Category>) -> String {
    category.map_or_else(|| "none".to_string(), |c| c.code().to_string())
}

/// Drives every user's intake conversation.
pub struct IntakeEngine {
    catalog: Arc<dyn StepCatalog>,
    db: Arc<dyn Database>,
    blobs: Arc<dyn BlobStore>,
    channel: Arc<dyn Channel>,
    sessions: Arc<SessionStore>,
    committer: CommitCoordinator,
}

impl IntakeEngine {
    pub fn new(
        catalog: Arc<dyn StepCatalog>,
        db: Arc<dyn Database>,
        blobs: Arc<dyn BlobStore>,
        channel: Arc<dyn Channel>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let committer = CommitCoordinator::new(Arc::clone(&db));
        Self {
            catalog,
            db,
            blobs,
            channel,
            sessions,
            committer,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one inbound message.
    ///
    /// The user's session lock is held for the whole call, so messages from
    /// the same user never interleave. Every failure becomes a reply.
    pub async fn handle(&self, msg: &InboundMessage) -> Reply {
        self.remember_contact(msg).await;

        let reply = {
            let mut guard = self.sessions.lock(&msg.user_id).await;
            self.route(&mut guard, msg).await
        };
        // Messages that leave no session behind leave no slot either.
        self.sessions.release(&msg.user_id).await;
        reply
    }

    async fn route(&self, slot: &mut Option<Session>, msg: &InboundMessage) -> Reply {
        let text = msg.body().trim();

        if msg.kind == MessageKind::Text && is_reset_command(text) {
            if slot.take().is_some() {
                info!(user_id = %msg.user_id, "Session reset by user");
            }
            return Reply::Help;
        }

        if slot.is_none() {
            return self.handle_idle(slot, msg, text).await;
        }

        if let Some(session) = slot.as_mut() {
            session.touch();
        }
        self.handle_answer(slot, msg).await
    }

    /// No session: quota listing, FAQ, start trigger, or the menu.
    async fn handle_idle(
        &self,
        slot: &mut Option<Session>,
        msg: &InboundMessage,
        text: &str,
    ) -> Reply {
        if msg.kind != MessageKind::Text {
            return Reply::Help;
        }
        let lower = text.to_lowercase();

        if lower.contains(QUOTA_TRIGGER) {
            return Reply::Quota(self.quotas().await);
        }

        if let Some(keyword) = FAQ_KEYWORDS.iter().find(|k| lower.contains(*k)) {
            return Reply::Faq(self.faq(keyword, text).await);
        }

        if !lower.contains(START_TRIGGER) {
            return Reply::Help;
        }

        match self.catalog.lookup(1, None).await {
            Some(first) => {
                *slot = Some(Session::new(&msg.user_id));
                info!(user_id = %msg.user_id, "Intake started");
                Reply::Instruction(first.instruction)
            }
            None => {
                warn!(user_id = %msg.user_id, "First step is not defined; intake not started");
                Reply::StepUnavailable
            }
        }
    }

    /// A session exists: treat the message as the answer to its current step.
    async fn handle_answer(&self, slot: &mut Option<Session>, msg: &InboundMessage) -> Reply {
        let Some(session) = slot.as_mut() else {
            return Reply::Help;
        };
        let step = session.step;

        let Some(current) = self.catalog.lookup(step, session.category).await else {
            let err = IntakeError::LookupInconsistency {
                step,
                category: category_label(session.category),
            };
            error!(user_id = %msg.user_id, error = %err, "Current step no longer resolves; session cleared");
            *slot = None;
            return Reply::InstructionMissing;
        };

        match self.collect(&current, session, msg).await {
            Ok(()) => {}
            Err(IntakeError::Validation(failure)) => {
                debug!(user_id = %msg.user_id, step, failure = %failure, "Answer rejected");
                return Reply::Invalid {
                    failure,
                    instruction: current.instruction,
                };
            }
            Err(e) => {
                warn!(user_id = %msg.user_id, step, error = %e, "Upload failed; step not advanced");
                return Reply::UploadFailed;
            }
        }

        let category = session.category;
        match self.catalog.lookup(step + 1, category).await {
            Some(next) => {
                session.advance();
                debug!(user_id = %msg.user_id, step = session.step, category = ?category, "Step advanced");
                Reply::Instruction(next.instruction)
            }
            None if current.terminal => match self.committer.commit(slot).await {
                Ok(_) => Reply::Committed,
                Err(_) => Reply::CommitFailed,
            },
            None => {
                let err = IntakeError::LookupInconsistency {
                    step: step + 1,
                    category: category_label(category),
                };
                error!(
                    user_id = %msg.user_id,
                    field_key = %current.field_key,
                    error = %err,
                    "Flow ended before the terminal step; session cleared without commit"
                );
                *slot = None;
                Reply::NextStepMissing
            }
        }
    }

    /// Validate the answer to `def` and write it into the session.
    ///
    /// On any error the session is left exactly as it was.
    async fn collect(
        &self,
        def: &StepDefinition,
        session: &mut Session,
        msg: &InboundMessage,
    ) -> Result<(), IntakeError> {
        validator::kind(msg.kind, def.input_kind)?;

        if def.input_kind.is_file() {
            let file = msg.file_ref.as_ref().ok_or(ValidationFailure::WrongKind {
                expected: def.input_kind,
                received: msg.kind,
            })?;

            let bytes = self
                .channel
                .download(file)
                .await
                .map_err(|e| IntakeError::Upload(e.to_string()))?;
            let prefix = format!("{}/{}", session.user_id, def.field_key);
            let url = self
                .blobs
                .upload(msg.kind, file.mime_type.as_deref(), bytes, &prefix)
                .await
                .map_err(|e| IntakeError::Upload(e.to_string()))?;

            info!(user_id = %session.user_id, field_key = %def.field_key, "Upload stored");
            session.fields.insert(def.field_key.clone(), url);
            return Ok(());
        }

        let raw = msg.body();
        let value = match def.rule {
            FieldRule::FreeText => validator::text(raw)?,
            FieldRule::Date => validator::date(raw)?,
            FieldRule::FamilyId => validator::family_id(raw)?,
            FieldRule::Category => {
                let category = validator::category(raw)?;
                session.check_category(category)?;
                session.category = Some(category);
                category.code().to_string()
            }
            FieldRule::CompositeIdentity => {
                let identity = validator::composite_identity(raw)?;
                session.check_category(identity.category)?;
                session.category = Some(identity.category);
                session.fields.extend([
                    (keys::NAME.to_string(), identity.name),
                    (keys::BIRTHDATE.to_string(), identity.birthdate),
                    (
                        keys::CATEGORY.to_string(),
                        identity.category.code().to_string(),
                    ),
                    (keys::FAMILY_ID.to_string(), identity.family_id),
                ]);
                return Ok(());
            }
        };
        session.fields.insert(def.field_key.clone(), value);
        Ok(())
    }

    async fn faq(&self, keyword: &str, text: &str) -> Option<String> {
        let category = CATEGORY_FAQ_KEYWORDS
            .contains(&keyword)
            .then(|| Category::find_in(text))
            .flatten();

        if let Some(category) = category {
            match self.db.get_faq(keyword, Some(category.code())).await {
                Ok(Some(content)) => return Some(content),
                Ok(None) => {}
                Err(e) => {
                    warn!(keyword, %category, error = %e, "FAQ lookup failed");
                }
            }
        }

        match self.db.get_faq(keyword, None).await {
            Ok(content) => content,
            Err(e) => {
                warn!(keyword, error = %e, "FAQ lookup failed");
                None
            }
        }
    }

    async fn quotas(&self) -> Vec<(Category, Option<i64>)> {
        let mut quotas = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let remaining = self.db.get_quota(category).await.unwrap_or_else(|e| {
                warn!(%category, error = %e, "Quota lookup failed");
                None
            });
            quotas.push((category, remaining));
        }
        quotas
    }

    async fn remember_contact(&self, msg: &InboundMessage) {
        let name = msg.user_name.as_deref().unwrap_or(UNNAMED_CONTACT);
        if let Err(e) = self.db.upsert_contact(&msg.user_id, name).await {
            warn!(user_id = %msg.user_id, error = %e, "Failed to record contact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_commands_are_whole_message_and_case_insensitive() {
        assert!(is_reset_command("MENU"));
        assert!(is_reset_command("  Mulai "));
        assert!(!is_reset_command("menu dong"));
        assert!(!is_reset_command("daftar"));
    }

    #[test]
    fn faq_keywords_shadow_start_trigger() {
        let lower = "info pendaftaran";
        assert!(lower.contains(START_TRIGGER));
        assert_eq!(
            FAQ_KEYWORDS.iter().find(|k| lower.contains(*k)),
            Some(&"pendaftaran")
        );
    }

    #[test]
    fn category_label_for_missing_category() {
        assert_eq!(category_label(None), "none");
        assert_eq!(category_label(Some(Category::Smp)), "SMP");
    }
}
