//! Reply classification — genuine human reply vs automated response.

use crate::mail::types::ParsedMail;

/// Header names that mark a message as automatically generated.
/// Matched case-insensitively, with or without an `x-` prefix.
const AUTO_REPLY_HEADERS: [&str; 4] = [
    "auto-submitted",
    "auto-response-suppress",
    "autorespond",
    "autoreply",
];

/// Classification outcome for a candidate inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// The message references the tracked email.
    pub is_reply: bool,
    /// The message is an automated response (out-of-office and friends).
    pub is_automatic: bool,
}

impl Classification {
    /// Only a non-automatic reply counts as "a response was received".
    pub fn is_genuine_reply(&self) -> bool {
        self.is_reply && !self.is_automatic
    }
}

/// Pure decision function over a candidate message and the tracked email's
/// correlation key.
#[derive(Debug, Clone)]
pub struct ReplyClassifier {
    /// Lower-cased body phrases that mark an automatic reply.
    phrases: Vec<String>,
}

impl ReplyClassifier {
    pub fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Classify a candidate message against a tracked email.
    ///
    /// A message is a candidate reply only when the correlation key appears
    /// in its references chain or in-reply-to field. A candidate is
    /// reclassified as automatic when an auto-reply marker header is
    /// present or the lower-cased body contains a configured phrase.
    pub fn classify(&self, mail: &ParsedMail, correlation_key: &str) -> Classification {
        let referenced = mail
            .references
            .iter()
            .any(|r| r.contains(correlation_key))
            || mail
                .in_reply_to
                .as_deref()
                .is_some_and(|r| r.contains(correlation_key));

        if !referenced {
            return Classification {
                is_reply: false,
                is_automatic: false,
            };
        }

        let is_automatic = self.has_auto_header(mail) || self.has_auto_phrase(&mail.body);
        Classification {
            is_reply: true,
            is_automatic,
        }
    }

    fn has_auto_header(&self, mail: &ParsedMail) -> bool {
        mail.headers.keys().any(|name| {
            let name = name.to_ascii_lowercase();
            let bare = name.strip_prefix("x-").unwrap_or(&name);
            AUTO_REPLY_HEADERS.contains(&bare)
        })
    }

    fn has_auto_phrase(&self, body: &str) -> bool {
        let body = body.to_lowercase();
        self.phrases.iter().any(|p| body.contains(p))
    }
}

impl Default for ReplyClassifier {
    fn default() -> Self {
        Self::new(crate::config::default_auto_reply_phrases())
    }
}
