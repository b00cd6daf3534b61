//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::intake::catalog::StepDefinition;
use crate::intake::category::Category;
use crate::intake::commit::CompletedRecord;

/// Result of asking the store to take one seat from a category's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaChange {
    /// One seat taken; `remaining` seats are left.
    Decremented { remaining: i64 },
    /// The quota was already at zero and was left untouched.
    Exhausted,
    /// No quota row exists for the category.
    Missing,
}

/// Backend-agnostic database trait covering the catalog, records, quotas,
/// FAQ entries, and the contact book.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Step catalog ────────────────────────────────────────────────

    /// All definitions for a step number, in insertion order.
    async fn list_steps(&self, step: u32) -> Result<Vec<StepDefinition>, DatabaseError>;

    /// Replace the whole catalog with `steps`.
    async fn replace_steps(&self, steps: &[StepDefinition]) -> Result<(), DatabaseError>;

    // ── Intake records ──────────────────────────────────────────────

    async fn insert_record(&self, record: &CompletedRecord) -> Result<(), DatabaseError>;

    async fn get_record(&self, id: Uuid) -> Result<Option<CompletedRecord>, DatabaseError>;

    /// Every record submitted by a user, oldest first.
    async fn records_for_user(&self, user_id: &str)
    -> Result<Vec<CompletedRecord>, DatabaseError>;

    /// Set a record's status. Returns `false` when no record has that id.
    async fn update_record_status(&self, id: Uuid, status: &str) -> Result<bool, DatabaseError>;

    // ── Quotas ──────────────────────────────────────────────────────

    async fn set_quota(&self, category: Category, remaining: i64) -> Result<(), DatabaseError>;

    async fn get_quota(&self, category: Category) -> Result<Option<i64>, DatabaseError>;

    /// Take one seat, never going below zero.
    async fn decrement_quota(&self, category: Category) -> Result<QuotaChange, DatabaseError>;

    // ── FAQ ─────────────────────────────────────────────────────────

    async fn get_faq(
        &self,
        keyword: &str,
        subkey: Option<&str>,
    ) -> Result<Option<String>, DatabaseError>;

    async fn set_faq(
        &self,
        keyword: &str,
        subkey: Option<&str>,
        content: &str,
    ) -> Result<(), DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Remember the display name last seen for a user.
    async fn upsert_contact(&self, user_id: &str, name: &str) -> Result<(), DatabaseError>;
}
