//! Follow-up lifecycle engine — registers tracked emails, reconciles them
//! against the inbox, and dispatches follow-up messages.
//!
//! Collaborators (store, mailbox reader/sender, classifier) are injected at
//! construction so tests can substitute fakes. Observable events go out on
//! a broadcast channel; nothing in the engine depends on anyone listening.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::ReplyClassifier;
use crate::config::{DEFAULT_DATE_FORMAT, DEFAULT_FOLLOWUP_TEMPLATE};
use crate::error::EngineError;
use crate::mail::imap::MailboxReader;
use crate::mail::smtp::{MailboxSender, validate_address};
use crate::mail::types::{OutgoingMail, SearchCriteria, sanitize_subject};
use crate::model::{FollowUpRecord, FollowUpStatus, NewFollowUp};
use crate::store::FollowUpStore;
use crate::template;

/// Observable lifecycle events. Notifications only — correctness never
/// depends on a consumer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CycleStarted,
    CycleCompleted { success: bool },
    FollowupSent { record_id: Uuid },
    ResponseDetected { record_id: Uuid },
    Error { message: String },
}

/// Engine rendering settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fallback body template when the record's named template is not in
    /// the store.
    pub followup_template: String,
    /// Format for dates rendered into follow-up bodies.
    pub date_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            followup_template: DEFAULT_FOLLOWUP_TEMPLATE.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

/// Status summary for an interactive caller.
#[derive(Debug, Clone)]
pub struct FollowUpSummary {
    pub id: Uuid,
    pub status: FollowUpStatus,
    pub followup_count: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Orchestrates the follow-up lifecycle.
pub struct FollowUpEngine {
    store: Arc<dyn FollowUpStore>,
    reader: Arc<dyn MailboxReader>,
    sender: Arc<dyn MailboxSender>,
    classifier: ReplyClassifier,
    config: EngineConfig,
    events: broadcast::Sender<EngineEvent>,
}

impl FollowUpEngine {
    pub fn new(
        store: Arc<dyn FollowUpStore>,
        reader: Arc<dyn MailboxReader>,
        sender: Arc<dyn MailboxSender>,
        classifier: ReplyClassifier,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            reader,
            sender,
            classifier,
            config,
            events,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        // Send fails only when no receiver is subscribed; that's fine.
        let _ = self.events.send(event);
    }

    // ── Registration ────────────────────────────────────────────────

    /// Register a new tracked email. Returns the record id.
    pub async fn register(&self, new: NewFollowUp) -> Result<Uuid, EngineError> {
        if new.sender.trim().is_empty() {
            return Err(EngineError::InvalidInput("sender must not be empty".into()));
        }
        if new.subject.trim().is_empty() {
            return Err(EngineError::InvalidInput("subject must not be empty".into()));
        }
        if !validate_address(&new.recipient) {
            return Err(EngineError::InvalidInput(format!(
                "invalid recipient address: {}",
                new.recipient
            )));
        }
        if new.delay_days < 1 {
            return Err(EngineError::InvalidInput(format!(
                "delay must be at least 1 day, got {}",
                new.delay_days
            )));
        }

        let Some(record) = FollowUpRecord::from_new(new) else {
            return Err(EngineError::InvalidInput(
                "follow-up date overflows the supported range".into(),
            ));
        };
        if self
            .store
            .get_by_key(&record.correlation_key)
            .await?
            .is_some()
        {
            return Err(EngineError::DuplicateRecord(record.correlation_key));
        }

        match self.store.create(&record).await {
            Ok(id) => {
                info!(
                    id = %id,
                    recipient = %record.recipient,
                    followup_at = %record.followup_at,
                    "Follow-up registered"
                );
                Ok(id)
            }
            // The UNIQUE constraint is the authoritative duplicate check;
            // the lookup above only gives a friendlier fast path.
            Err(crate::error::StoreError::DuplicateKey(key)) => {
                Err(EngineError::DuplicateRecord(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Reconciliation ──────────────────────────────────────────────

    /// Check the inbox for a genuine reply to `record`.
    ///
    /// Marks the record `responded` and returns true on the first candidate
    /// that classifies as a non-automatic reply; otherwise leaves the
    /// status unchanged and returns false.
    pub async fn check_for_response(&self, record: &FollowUpRecord) -> Result<bool, EngineError> {
        let criteria = SearchCriteria::with_subject(sanitize_subject(&record.subject));
        let candidates = self.reader.search(criteria).await;

        for mail in &candidates {
            let classification = self.classifier.classify(mail, &record.correlation_key);
            if classification.is_genuine_reply() {
                self.store
                    .update_status(record.id, FollowUpStatus::Responded, false)
                    .await?;
                info!(id = %record.id, from = %mail.from, "Response detected");
                self.emit(EngineEvent::ResponseDetected {
                    record_id: record.id,
                });
                return Ok(true);
            }
            if classification.is_reply {
                debug!(id = %record.id, from = %mail.from, "Ignoring automatic reply");
            }
        }

        Ok(false)
    }

    /// Send the follow-up for a due pending record.
    ///
    /// Always re-checks for a response first — a reply that arrived since
    /// the last pass suppresses the send. Returns true when the record no
    /// longer needs attention (responded or follow-up sent); false when the
    /// transport failed and the record stays pending for the next cycle.
    pub async fn send_followup(&self, record: &FollowUpRecord) -> Result<bool, EngineError> {
        if self.check_for_response(record).await? {
            return Ok(true);
        }

        let body = self.render_body(record).await?;
        let outgoing = OutgoingMail {
            to: record.recipient.clone(),
            subject: format!("Re: {}", record.subject),
            body,
            references: record
                .metadata
                .original_message_id
                .iter()
                .cloned()
                .collect(),
            in_reply_to: record.metadata.original_message_id.clone(),
            ..OutgoingMail::default()
        };

        match self.sender.send(&outgoing).await {
            Ok(message_id) => {
                self.store
                    .update_status(record.id, FollowUpStatus::Sent, true)
                    .await?;
                info!(id = %record.id, message_id = %message_id, "Follow-up sent");
                self.emit(EngineEvent::FollowupSent {
                    record_id: record.id,
                });
                Ok(true)
            }
            Err(e) => {
                // Transient by policy: the record stays pending and the
                // next reconciliation pass retries.
                warn!(id = %record.id, "Follow-up send failed, will retry next cycle: {e}");
                Ok(false)
            }
        }
    }

    /// Process every due pending record, oldest obligation first.
    ///
    /// Per-record failures are isolated: logged, emitted as events, and the
    /// pass continues. A store query failure fails the whole cycle.
    pub async fn reconcile(&self) -> Result<(), EngineError> {
        self.reconcile_at(Utc::now()).await
    }

    /// Reconcile against an explicit clock (tests drive time through here).
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let pending = self.store.query_pending(now).await?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "Processing due follow-ups");
        }

        for record in &pending {
            if let Err(e) = self.send_followup(record).await {
                error!(id = %record.id, "Follow-up processing failed: {e}");
                self.emit(EngineEvent::Error {
                    message: format!("follow-up {} failed: {e}", record.id),
                });
            }
        }

        Ok(())
    }

    /// Current status of a tracked email.
    pub async fn status(&self, id: Uuid) -> Result<Option<FollowUpSummary>, EngineError> {
        Ok(self.store.get(id).await?.map(|r| FollowUpSummary {
            id: r.id,
            status: r.status,
            followup_count: r.followup_count,
            last_checked_at: r.last_checked_at,
        }))
    }

    // ── Rendering ───────────────────────────────────────────────────

    async fn render_body(&self, record: &FollowUpRecord) -> Result<String, EngineError> {
        let template_body = match self
            .store
            .get_template(&record.metadata.template_name)
            .await?
        {
            Some(t) => t.body,
            None => self.config.followup_template.clone(),
        };

        // Custom variables first; built-ins always win.
        let mut vars: HashMap<String, String> = record.metadata.variables.clone();
        vars.insert("recipient".into(), record.recipient.clone());
        vars.insert("subject".into(), record.subject.clone());
        vars.insert(
            "sent_date".into(),
            template::format_date(record.sent_at, &self.config.date_format),
        );
        vars.insert(
            "followup_date".into(),
            template::format_date(record.followup_at, &self.config.date_format),
        );
        vars.insert("sender".into(), record.sender.clone());

        Ok(template::render(&template_body, &vars))
    }
}
