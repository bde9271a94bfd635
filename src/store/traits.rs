//! `FollowUpStore` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{FollowUpRecord, FollowUpStatus};

/// A stored follow-up body template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    pub body: String,
}

/// Backend-agnostic store for follow-up records and templates.
///
/// The store is the single source of truth: all status mutations go through
/// `update_status`, which is atomic per record.
#[async_trait]
pub trait FollowUpStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Follow-ups ──────────────────────────────────────────────────

    /// Insert a new record. Fails with `DuplicateKey` when a record with
    /// the same correlation key already exists.
    async fn create(&self, record: &FollowUpRecord) -> Result<Uuid, StoreError>;

    /// Get a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<FollowUpRecord>, StoreError>;

    /// Get a record by correlation key.
    async fn get_by_key(&self, key: &str) -> Result<Option<FollowUpRecord>, StoreError>;

    /// Set a record's status, optionally incrementing the follow-up count.
    /// Always stamps `last_checked_at`. Fails with `NotFound` for an
    /// unknown id.
    async fn update_status(
        &self,
        id: Uuid,
        status: FollowUpStatus,
        increment_count: bool,
    ) -> Result<(), StoreError>;

    /// All pending records whose `followup_at` has elapsed, ascending by
    /// `followup_at` (oldest obligation first).
    async fn query_pending(&self, now: DateTime<Utc>)
    -> Result<Vec<FollowUpRecord>, StoreError>;

    /// All records, newest first, with pagination.
    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<FollowUpRecord>, StoreError>;

    /// Delete a record. External management operation — the lifecycle
    /// engine never deletes.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    // ── Templates ───────────────────────────────────────────────────

    /// Insert or update a named template.
    async fn save_template(&self, template: &EmailTemplate) -> Result<(), StoreError>;

    /// Get a template by name.
    async fn get_template(&self, name: &str) -> Result<Option<EmailTemplate>, StoreError>;
}
