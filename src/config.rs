//! Configuration — environment-driven settings with provider presets.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Floor for the reconciliation interval.
pub const MIN_CHECK_INTERVAL_SECS: u64 = 60;

/// Default reconciliation interval (30 minutes).
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 1800;

/// Default number of consecutive failed cycles before the scheduler halts.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Date format used when rendering dates into follow-up bodies.
pub const DEFAULT_DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Default follow-up body template.
pub const DEFAULT_FOLLOWUP_TEMPLATE: &str = "\
Hello,

I am following up on my email from {sent_date} regarding \"{subject}\".

Not having heard back, I wanted to make sure my message reached you and
ask whether you had a chance to look at it.

Best regards,
{sender}
";

/// Body phrases that mark a message as an automatic reply.
///
/// Detection data, not logic — extend freely. Locale-specific entries are
/// intentional.
pub fn default_auto_reply_phrases() -> Vec<String> {
    [
        "absent du bureau",
        "out of office",
        "en congés",
        "automatique",
        "automatic reply",
        "vacation response",
        "accusé de réception automatique",
        "message automatique",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// IMAP/SMTP endpoints for a mail provider.
#[derive(Debug, Clone)]
pub struct ServerPreset {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl ServerPreset {
    pub fn gmail() -> Self {
        Self {
            imap_host: "imap.gmail.com".into(),
            imap_port: 993,
            smtp_host: "smtp.gmail.com".into(),
            smtp_port: 587,
        }
    }

    pub fn outlook() -> Self {
        Self {
            imap_host: "outlook.office365.com".into(),
            imap_port: 993,
            smtp_host: "smtp.office365.com".into(),
            smtp_port: 587,
        }
    }

    /// Resolve a preset by provider name. `custom` requires explicit hosts.
    pub fn for_provider(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gmail" => Some(Self::gmail()),
            "outlook" => Some(Self::outlook()),
            _ => None,
        }
    }
}

/// Mailbox connection settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub username: String,
    pub password: SecretString,
    /// From address for outbound follow-ups; defaults to `username`.
    pub from_address: String,
    pub server: ServerPreset,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub mail: MailConfig,
    pub check_interval: Duration,
    pub max_consecutive_errors: u32,
    pub auto_reply_phrases: Vec<String>,
    pub followup_template: String,
    pub date_format: String,
}

impl Config {
    /// Build config from `FOLLOWMAIL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = require_env("FOLLOWMAIL_USERNAME")?;
        let password = SecretString::from(require_env("FOLLOWMAIL_PASSWORD")?);
        let from_address =
            std::env::var("FOLLOWMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        let provider =
            std::env::var("FOLLOWMAIL_PROVIDER").unwrap_or_else(|_| "gmail".to_string());
        let server = match ServerPreset::for_provider(&provider) {
            Some(mut preset) => {
                // Explicit hosts/ports override the preset.
                if let Ok(host) = std::env::var("FOLLOWMAIL_IMAP_HOST") {
                    preset.imap_host = host;
                }
                if let Some(port) = parse_env("FOLLOWMAIL_IMAP_PORT")? {
                    preset.imap_port = port;
                }
                if let Ok(host) = std::env::var("FOLLOWMAIL_SMTP_HOST") {
                    preset.smtp_host = host;
                }
                if let Some(port) = parse_env("FOLLOWMAIL_SMTP_PORT")? {
                    preset.smtp_port = port;
                }
                preset
            }
            None if provider.eq_ignore_ascii_case("custom") => ServerPreset {
                imap_host: require_env("FOLLOWMAIL_IMAP_HOST")?,
                imap_port: parse_env("FOLLOWMAIL_IMAP_PORT")?.unwrap_or(993),
                smtp_host: require_env("FOLLOWMAIL_SMTP_HOST")?,
                smtp_port: parse_env("FOLLOWMAIL_SMTP_PORT")?.unwrap_or(587),
            },
            None => return Err(ConfigError::UnknownProvider(provider)),
        };

        let check_interval_secs: u64 = parse_env("FOLLOWMAIL_CHECK_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS)
            .max(MIN_CHECK_INTERVAL_SECS);

        let max_consecutive_errors: u32 = parse_env("FOLLOWMAIL_MAX_CONSECUTIVE_ERRORS")?
            .unwrap_or(DEFAULT_MAX_CONSECUTIVE_ERRORS)
            .max(1);

        Ok(Self {
            db_path: std::env::var("FOLLOWMAIL_DB_PATH")
                .unwrap_or_else(|_| "./data/followmail.db".to_string()),
            mail: MailConfig {
                username,
                password,
                from_address,
                server,
            },
            check_interval: Duration::from_secs(check_interval_secs),
            max_consecutive_errors,
            auto_reply_phrases: default_auto_reply_phrases(),
            followup_template: DEFAULT_FOLLOWUP_TEMPLATE.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        })
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("cannot parse {raw:?}"),
            }),
        Err(_) => Ok(None),
    }
}
