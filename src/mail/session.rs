//! Connection bootstrap — both transports must come up before any
//! lifecycle operation runs.

use std::sync::Arc;

use tracing::info;

use crate::config::MailConfig;
use crate::error::MailError;
use crate::mail::imap::{ImapReader, MailboxReader};
use crate::mail::smtp::{MailboxSender, SmtpSender};

/// A verified pair of mailbox capabilities (read + send).
pub struct MailSession {
    reader: Arc<ImapReader>,
    sender: Arc<SmtpSender>,
    username: String,
}

impl MailSession {
    /// Connect and verify both the IMAP and SMTP sides.
    ///
    /// Fails if either transport cannot authenticate — the lifecycle engine
    /// must never run half-connected.
    pub async fn connect(config: &MailConfig) -> Result<Self, MailError> {
        let reader = ImapReader::new(config);
        reader.check_connection().await?;

        let sender = SmtpSender::new(config);
        sender.check_connection().await?;

        info!(username = %config.username, "Connected to mail servers");
        Ok(Self {
            reader: Arc::new(reader),
            sender: Arc::new(sender),
            username: config.username.clone(),
        })
    }

    pub fn reader(&self) -> Arc<dyn MailboxReader> {
        Arc::clone(&self.reader) as Arc<dyn MailboxReader>
    }

    pub fn sender(&self) -> Arc<dyn MailboxSender> {
        Arc::clone(&self.sender) as Arc<dyn MailboxSender>
    }

    /// Release both transports.
    ///
    /// Sessions are opened per operation, so there is no long-lived
    /// connection to tear down — this just logs the release.
    pub fn disconnect(self) {
        info!(username = %self.username, "Disconnected from mail servers");
    }
}
