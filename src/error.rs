//! Error types for followmail.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown mail provider: {0} (expected gmail, outlook, or custom)")]
    UnknownProvider(String),
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Duplicate correlation key: {0}")]
    DuplicateKey(String),

    #[error("Follow-up not found: {0}")]
    NotFound(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mail transport errors (IMAP read side and SMTP send side).
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("Authentication failed for {username}")]
    Auth { username: String },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),
}

/// Lifecycle engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("A follow-up already exists for correlation key {0}")]
    DuplicateRecord(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler halted after {consecutive} consecutive failed cycles")]
    Fault { consecutive: u32 },
}

/// Result type alias for followmail.
pub type Result<T> = std::result::Result<T, Error>;
