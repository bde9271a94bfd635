//! Follow-up record model — one record per tracked outbound email.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a follow-up record.
///
/// Transitions are forward-only: `Pending → Sent`, `Pending → Responded`,
/// `Sent → Responded`. `Responded` and `Failed` are terminal. `Failed` is
/// reserved for external management (manual abandonment) — the engine never
/// sets it; a transport failure leaves the record `Pending` for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowUpStatus {
    /// Awaiting a reply; a follow-up may still be sent.
    Pending,
    /// A follow-up was transmitted; the record is still checked for replies.
    Sent,
    /// A genuine reply arrived. Terminal.
    Responded,
    /// Abandoned by external intervention. Terminal.
    Failed,
}

impl FollowUpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Responded => "responded",
            Self::Failed => "failed",
        }
    }

    /// Parse a status string from the DB. Unknown values fall back to Pending.
    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "responded" => Self::Responded,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Responded | Self::Failed)
    }
}

/// Open metadata attached to a follow-up record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowUpMetadata {
    /// Message-ID of the original outbound email, used for threading headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_id: Option<String>,
    /// Name of the template used for the follow-up body.
    #[serde(default = "default_template_name")]
    pub template_name: String,
    /// Caller-supplied template substitution values.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
}

fn default_template_name() -> String {
    "default".to_string()
}

impl FollowUpMetadata {
    pub fn new() -> Self {
        Self {
            original_message_id: None,
            template_name: default_template_name(),
            variables: HashMap::new(),
        }
    }
}

/// Input for registering a new tracked email.
#[derive(Debug, Clone)]
pub struct NewFollowUp {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
    pub delay_days: i64,
    pub metadata: FollowUpMetadata,
}

impl NewFollowUp {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        sent_at: DateTime<Utc>,
        delay_days: i64,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            sent_at,
            delay_days,
            metadata: FollowUpMetadata::new(),
        }
    }

    pub fn with_original_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.metadata.original_message_id = Some(message_id.into());
        self
    }

    pub fn with_template(mut self, name: impl Into<String>) -> Self {
        self.metadata.template_name = name.into();
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.variables.insert(key.into(), value.into());
        self
    }
}

/// A tracked outbound email awaiting a reply or follow-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpRecord {
    pub id: Uuid,
    /// Deterministic key over (sender, subject, sent_at); unique per record.
    pub correlation_key: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
    /// Earliest time a follow-up may be sent: `sent_at + delay_days`.
    pub followup_at: DateTime<Utc>,
    pub delay_days: i64,
    pub status: FollowUpStatus,
    /// Number of follow-up messages actually transmitted.
    pub followup_count: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub metadata: FollowUpMetadata,
    pub created_at: DateTime<Utc>,
}

impl FollowUpRecord {
    /// Build a fresh pending record from registration input. `None` when
    /// the delay pushes the follow-up date outside the representable range.
    pub fn from_new(new: NewFollowUp) -> Option<Self> {
        let correlation_key = correlation_key(&new.sender, &new.subject, new.sent_at);
        let followup_at = followup_date(new.sent_at, new.delay_days)?;
        Some(Self {
            id: Uuid::new_v4(),
            correlation_key,
            sender: new.sender,
            recipient: new.recipient,
            subject: new.subject,
            sent_at: new.sent_at,
            followup_at,
            delay_days: new.delay_days,
            status: FollowUpStatus::Pending,
            followup_count: 0,
            last_checked_at: None,
            metadata: new.metadata,
            created_at: Utc::now(),
        })
    }

    /// Whether the follow-up delay has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.followup_at <= now
    }
}

/// Deterministic correlation key over (sender, subject, sent_at).
///
/// UUIDv5 over the OID namespace — same registration input always yields
/// the same key, so duplicate registrations collide on the store's UNIQUE
/// constraint.
pub fn correlation_key(sender: &str, subject: &str, sent_at: DateTime<Utc>) -> String {
    let seed = format!("{sender}|{subject}|{}", sent_at.to_rfc3339());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}

/// Compute the follow-up date from the sent date and delay in whole days.
/// `None` when the result overflows the representable time range.
pub fn followup_date(sent_at: DateTime<Utc>, delay_days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(delay_days).and_then(|d| sent_at.checked_add_signed(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sent_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap()
    }

    #[test]
    fn correlation_key_is_deterministic() {
        let a = correlation_key("me@example.com", "Quarterly report", sent_at());
        let b = correlation_key("me@example.com", "Quarterly report", sent_at());
        assert_eq!(a, b);
    }

    #[test]
    fn correlation_key_differs_per_input() {
        let base = correlation_key("me@example.com", "Quarterly report", sent_at());
        assert_ne!(
            base,
            correlation_key("other@example.com", "Quarterly report", sent_at())
        );
        assert_ne!(
            base,
            correlation_key("me@example.com", "Other subject", sent_at())
        );
        assert_ne!(
            base,
            correlation_key(
                "me@example.com",
                "Quarterly report",
                sent_at() + Duration::seconds(1)
            )
        );
    }

    #[test]
    fn followup_date_adds_whole_days() {
        let due = followup_date(sent_at(), 7).unwrap();
        assert_eq!(due, sent_at() + Duration::days(7));
        assert!(due >= sent_at());
    }

    #[test]
    fn followup_date_overflow_is_none() {
        assert!(followup_date(sent_at(), i64::MAX).is_none());
        assert!(followup_date(DateTime::<Utc>::MAX_UTC, 1).is_none());
    }

    #[test]
    fn record_from_new_starts_pending() {
        let rec = FollowUpRecord::from_new(NewFollowUp::new(
            "me@example.com",
            "you@example.com",
            "Hello",
            sent_at(),
            3,
        ))
        .unwrap();
        assert_eq!(rec.status, FollowUpStatus::Pending);
        assert_eq!(rec.followup_count, 0);
        assert_eq!(rec.followup_at, sent_at() + Duration::days(3));
        assert!(rec.last_checked_at.is_none());
    }

    #[test]
    fn record_due_at_exact_boundary() {
        let rec = FollowUpRecord::from_new(NewFollowUp::new(
            "me@example.com",
            "you@example.com",
            "Hello",
            sent_at(),
            1,
        ))
        .unwrap();
        assert!(!rec.is_due(sent_at()));
        assert!(rec.is_due(sent_at() + Duration::days(1)));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            FollowUpStatus::Pending,
            FollowUpStatus::Sent,
            FollowUpStatus::Responded,
            FollowUpStatus::Failed,
        ] {
            assert_eq!(FollowUpStatus::parse(status.as_str()), status);
        }
        assert_eq!(FollowUpStatus::parse("bogus"), FollowUpStatus::Pending);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!FollowUpStatus::Pending.is_terminal());
        assert!(!FollowUpStatus::Sent.is_terminal());
        assert!(FollowUpStatus::Responded.is_terminal());
        assert!(FollowUpStatus::Failed.is_terminal());
    }

    #[test]
    fn metadata_defaults_on_deserialize() {
        let meta: FollowUpMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(meta.template_name, "default");
        assert!(meta.original_message_id.is_none());
        assert!(meta.variables.is_empty());
    }
}
