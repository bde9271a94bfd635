//! Mail types — parsed inbound messages, search criteria, outbound mail.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use mail_parser::{HeaderValue, MessageParser};

/// An inbound message with the headers the classifier cares about.
#[derive(Debug, Clone, Default)]
pub struct ParsedMail {
    pub subject: String,
    pub from: String,
    pub date: Option<DateTime<Utc>>,
    /// Plain-text body (HTML-stripped when no text part exists).
    pub body: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    /// Message-IDs from the References header, oldest first.
    pub references: Vec<String>,
    /// All headers, names lowercased, values as display text.
    pub headers: HashMap<String, String>,
}

/// Search criteria for the mailbox reader.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub since: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
}

impl SearchCriteria {
    pub fn with_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..Self::default()
        }
    }

    /// Build the IMAP SEARCH query for these criteria.
    pub fn to_imap_query(&self) -> String {
        let mut parts = Vec::new();
        if let Some(subject) = &self.subject {
            parts.push(format!("SUBJECT \"{}\"", escape_quotes(subject)));
        }
        if let Some(from) = &self.from {
            parts.push(format!("FROM \"{}\"", escape_quotes(from)));
        }
        if let Some(to) = &self.to {
            parts.push(format!("TO \"{}\"", escape_quotes(to)));
        }
        if let Some(since) = &self.since {
            parts.push(format!("SINCE {}", since.format("%d-%b-%Y")));
        }
        if let Some(before) = &self.before {
            parts.push(format!("BEFORE {}", before.format("%d-%b-%Y")));
        }
        if parts.is_empty() {
            "ALL".to_string()
        } else {
            parts.join(" ")
        }
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// An outbound message for the mailbox sender.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    /// Message-IDs for the References threading header.
    pub references: Vec<String>,
    pub in_reply_to: Option<String>,
}

/// Strip leading reply/forward prefixes from a subject, case-insensitively.
///
/// `"Re: Fwd: Hello"` → `"Hello"`.
pub fn sanitize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_ascii_lowercase();
        let stripped = ["re:", "fwd:", "fw:", "forward:"]
            .iter()
            .find(|p| lower.starts_with(**p))
            .map(|p| s[p.len()..].trim_start());
        match stripped {
            Some(rest) => s = rest,
            None => break,
        }
    }
    s.to_string()
}

/// Parse a raw RFC 822 message into a `ParsedMail`.
///
/// Returns `None` when the bytes are not parseable as a message.
pub fn parse_mail(raw: &[u8]) -> Option<ParsedMail> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default();

    let subject = parsed.subject().unwrap_or_default().to_string();

    let body = parsed
        .body_text(0)
        .map(|t| t.to_string())
        .or_else(|| parsed.body_html(0).map(|h| strip_html(h.as_ref())))
        .unwrap_or_default();

    let message_id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_default();

    let in_reply_to = header_ids(parsed.header("In-Reply-To")).into_iter().next();
    let references = header_ids(parsed.header("References"));

    let date = parsed.date().and_then(mail_parser_date_to_utc);

    let mut headers = HashMap::new();
    for header in parsed.headers() {
        let name = header.name().to_ascii_lowercase();
        let value = header_display(header.value());
        headers.entry(name).or_insert(value);
    }

    Some(ParsedMail {
        subject,
        from,
        date,
        body,
        message_id,
        in_reply_to,
        references,
        headers,
    })
}

/// Collect message-ids from a Text or TextList header value.
fn header_ids(value: Option<&HeaderValue>) -> Vec<String> {
    match value {
        Some(HeaderValue::Text(t)) => t.split_whitespace().map(|s| s.to_string()).collect(),
        Some(HeaderValue::TextList(list)) => list.iter().map(|t| t.to_string()).collect(),
        _ => Vec::new(),
    }
}

/// Render a header value as display text (empty for structured values).
fn header_display(value: &HeaderValue) -> String {
    match value {
        HeaderValue::Text(t) => t.to_string(),
        HeaderValue::TextList(list) => list.join(" "),
        _ => String::new(),
    }
}

fn mail_parser_date_to_utc(d: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    // to_timestamp resolves the header's zone offset to epoch seconds.
    DateTime::from_timestamp(d.to_timestamp(), 0)
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
