//! Mailbox send side — SMTP via lettre with STARTTLS.

use std::sync::LazyLock;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use uuid::Uuid;

use crate::config::MailConfig;
use crate::error::MailError;
use crate::mail::types::OutgoingMail;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
        .expect("email regex must compile")
});

/// Syntactic address check (local-part, domain, TLD).
pub fn validate_address(address: &str) -> bool {
    EMAIL_REGEX.is_match(address)
}

/// Capability to compose and transmit a message.
#[async_trait]
pub trait MailboxSender: Send + Sync {
    /// Send a message, returning the transport-assigned Message-ID.
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError>;
}

/// SMTP sender using lettre with STARTTLS.
#[derive(Clone)]
pub struct SmtpSender {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    from_address: String,
}

impl SmtpSender {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            host: config.server.smtp_host.clone(),
            port: config.server.smtp_port,
            username: config.username.clone(),
            password: config.password.clone(),
            from_address: config.from_address.clone(),
        }
    }

    fn transport(&self) -> Result<SmtpTransport, MailError> {
        let creds = Credentials::new(
            self.username.clone(),
            self.password.expose_secret().to_string(),
        );
        Ok(SmtpTransport::starttls_relay(&self.host)
            .map_err(|e| MailError::Connect {
                host: self.host.clone(),
                reason: e.to_string(),
            })?
            .port(self.port)
            .credentials(creds)
            .build())
    }

    /// Verify SMTP connectivity and credentials.
    pub async fn check_connection(&self) -> Result<(), MailError> {
        let sender = self.clone();
        let ok = tokio::task::spawn_blocking(move || {
            sender.transport().map(|t| t.test_connection().unwrap_or(false))
        })
        .await
        .map_err(|e| MailError::Connect {
            host: self.host.clone(),
            reason: format!("task panicked: {e}"),
        })??;

        if ok {
            Ok(())
        } else {
            Err(MailError::Connect {
                host: self.host.clone(),
                reason: "SMTP connection test failed".into(),
            })
        }
    }

    fn build_message(&self, mail: &OutgoingMail) -> Result<(Message, String), MailError> {
        let domain = self
            .from_address
            .rsplit('@')
            .next()
            .unwrap_or("localhost");
        let message_id = format!("<{}@{}>", Uuid::new_v4(), domain);

        let mut builder = Message::builder()
            .from(parse_mailbox(&self.from_address)?)
            .to(parse_mailbox(&mail.to)?)
            .subject(&mail.subject)
            .date_now()
            .message_id(Some(message_id.clone()));

        for cc in &mail.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }
        for bcc in &mail.bcc {
            builder = builder.bcc(parse_mailbox(bcc)?);
        }
        if let Some(reply_to) = &mail.reply_to {
            builder = builder.reply_to(parse_mailbox(reply_to)?);
        }
        if let Some(in_reply_to) = &mail.in_reply_to {
            builder = builder.in_reply_to(in_reply_to.clone());
        }
        if !mail.references.is_empty() {
            builder = builder.references(mail.references.join(" "));
        }

        let message = builder
            .body(mail.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        Ok((message, message_id))
    }
}

fn parse_mailbox(address: &str) -> Result<lettre::message::Mailbox, MailError> {
    address
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}

#[async_trait]
impl MailboxSender for SmtpSender {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError> {
        if !validate_address(&mail.to) {
            return Err(MailError::InvalidAddress(mail.to.clone()));
        }

        let (message, message_id) = self.build_message(mail)?;
        let sender = self.clone();
        let to = mail.to.clone();

        tokio::task::spawn_blocking(move || {
            sender
                .transport()?
                .send(&message)
                .map_err(|e| MailError::Send(e.to_string()))
        })
        .await
        .map_err(|e| MailError::Send(format!("task panicked: {e}")))??;

        info!(to = %to, message_id = %message_id, "Email sent");
        Ok(message_id)
    }
}
