//! Mailbox read side — IMAP over TLS, searched per reconciliation pass.
//!
//! The reader opens a fresh session per call (connect, LOGIN, SELECT INBOX,
//! SEARCH, FETCH, LOGOUT) and runs it under `spawn_blocking`. Transport
//! errors are logged and yield an empty result — they never cross the
//! `MailboxReader` boundary, so a broken connection can only ever look like
//! "no replies found this cycle".

use std::net::TcpStream;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error};

use crate::config::MailConfig;
use crate::error::MailError;
use crate::mail::types::{ParsedMail, SearchCriteria, parse_mail};

/// Capability to search and fetch mailbox messages.
#[async_trait]
pub trait MailboxReader: Send + Sync {
    /// Search the inbox. Empty on transport error (logged), never an error.
    async fn search(&self, criteria: SearchCriteria) -> Vec<ParsedMail>;
}

/// IMAP-over-TLS reader.
#[derive(Clone)]
pub struct ImapReader {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
}

impl ImapReader {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            host: config.server.imap_host.clone(),
            port: config.server.imap_port,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    /// Verify the connection by logging in and out once.
    pub async fn check_connection(&self) -> Result<(), MailError> {
        let reader = self.clone();
        tokio::task::spawn_blocking(move || reader.login_check())
            .await
            .map_err(|e| MailError::Connect {
                host: self.host.clone(),
                reason: format!("task panicked: {e}"),
            })?
    }

    fn login_check(&self) -> Result<(), MailError> {
        let mut session = ImapSession::open(self)?;
        session.logout();
        Ok(())
    }

    fn search_blocking(&self, criteria: &SearchCriteria) -> Result<Vec<ParsedMail>, MailError> {
        let mut session = ImapSession::open(self)?;
        let result = session.search_fetch(&criteria.to_imap_query());
        session.logout();
        result
    }
}

#[async_trait]
impl MailboxReader for ImapReader {
    async fn search(&self, criteria: SearchCriteria) -> Vec<ParsedMail> {
        let reader = self.clone();
        let result =
            tokio::task::spawn_blocking(move || reader.search_blocking(&criteria)).await;

        match result {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                error!("IMAP search failed: {e}");
                Vec::new()
            }
            Err(e) => {
                error!("IMAP search task panicked: {e}");
                Vec::new()
            }
        }
    }
}

// ── Blocking IMAP session ───────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A logged-in IMAP session with INBOX selected.
struct ImapSession {
    tls: TlsStream,
    tag_counter: u32,
}

impl ImapSession {
    /// Connect, authenticate, and select INBOX.
    fn open(reader: &ImapReader) -> Result<Self, MailError> {
        let tcp = TcpStream::connect((&*reader.host, reader.port)).map_err(|e| {
            MailError::Connect {
                host: reader.host.clone(),
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))
            .map_err(|e| MailError::Connect {
                host: reader.host.clone(),
                reason: e.to_string(),
            })?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = std::sync::Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(reader.host.clone()).map_err(|e| {
                MailError::Connect {
                    host: reader.host.clone(),
                    reason: e.to_string(),
                }
            })?;
        let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| {
            MailError::Connect {
                host: reader.host.clone(),
                reason: e.to_string(),
            }
        })?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let mut session = Self { tls, tag_counter: 1 };

        // Greeting, then LOGIN and SELECT.
        session.read_line()?;
        let login = session.command(&format!(
            "LOGIN \"{}\" \"{}\"",
            reader.username,
            reader.password.expose_secret()
        ))?;
        if !login.last().is_some_and(|l| l.contains("OK")) {
            return Err(MailError::Auth {
                username: reader.username.clone(),
            });
        }
        session.command("SELECT \"INBOX\"")?;
        Ok(session)
    }

    /// SEARCH with `query`, FETCH each hit, parse into `ParsedMail`s.
    fn search_fetch(&mut self, query: &str) -> Result<Vec<ParsedMail>, MailError> {
        let search_resp = self.command(&format!("SEARCH {query}"))?;

        let mut seqs: Vec<String> = Vec::new();
        for line in &search_resp {
            if line.starts_with("* SEARCH") {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() > 2 {
                    seqs.extend(parts[2..].iter().map(|s| (*s).to_string()));
                }
            }
        }

        debug!(hits = seqs.len(), query, "IMAP search");

        let mut results = Vec::new();
        for seq in &seqs {
            let fetch_resp = self.command(&format!("FETCH {seq} RFC822"))?;
            let raw = extract_fetch_body(&fetch_resp);

            if let Some(mail) = parse_mail(raw.as_bytes()) {
                results.push(mail);
            }
        }

        Ok(results)
    }

    fn logout(&mut self) {
        let _ = self.command("LOGOUT");
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => return Err(MailError::Fetch("IMAP connection closed".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(MailError::Fetch(e.to_string())),
            }
        }
    }

    /// Send a tagged command and collect lines up to the tagged completion.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, MailError> {
        use std::io::Write as IoWrite;

        let tag = format!("A{}", self.tag_counter);
        self.tag_counter += 1;

        let full = format!("{tag} {cmd}\r\n");
        IoWrite::write_all(&mut self.tls, full.as_bytes())
            .map_err(|e| MailError::Fetch(e.to_string()))?;
        IoWrite::flush(&mut self.tls).map_err(|e| MailError::Fetch(e.to_string()))?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(lines)
    }
}

/// Pull the raw message out of a FETCH response: drop the untagged FETCH
/// line, the closing `)` frame, and the tagged completion line.
fn extract_fetch_body(lines: &[String]) -> String {
    let inner = lines
        .get(1..lines.len().saturating_sub(1))
        .unwrap_or_default();
    let inner = match inner.last() {
        Some(line) if line.trim() == ")" => &inner[..inner.len() - 1],
        _ => inner,
    };
    inner.concat()
}
