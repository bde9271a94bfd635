//! Mail layer — parsed message types, IMAP read side, SMTP send side, and
//! the connection bootstrap tying them together.

pub mod imap;
pub mod session;
pub mod smtp;
pub mod types;

pub use imap::{ImapReader, MailboxReader};
pub use session::MailSession;
pub use smtp::{MailboxSender, SmtpSender, validate_address};
pub use types::{OutgoingMail, ParsedMail, SearchCriteria, sanitize_subject};
