//! libSQL store — async `FollowUpStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! RFC 3339 with fixed-width fractional seconds so lexicographic comparison
//! in SQL matches chronological order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{FollowUpMetadata, FollowUpRecord, FollowUpStatus};
use crate::store::migrations;
use crate::store::traits::{EmailTemplate, FollowUpStore};

const RECORD_COLUMNS: &str = "id, correlation_key, sender, recipient, subject, sent_at, \
     followup_at, delay_days, status, followup_count, last_checked_at, metadata, created_at";

/// libSQL-backed follow-up store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp write format: RFC 3339, microseconds, `Z` suffix.
fn to_db(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql row (RECORD_COLUMNS order) to a FollowUpRecord.
fn row_to_record(row: &libsql::Row) -> Result<FollowUpRecord, StoreError> {
    let query = |e: libsql::Error| StoreError::Query(e.to_string());

    let id_str: String = row.get(0).map_err(query)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| StoreError::Serialization(format!("bad record id {id_str:?}: {e}")))?;

    let sent_at: String = row.get(5).map_err(query)?;
    let followup_at: String = row.get(6).map_err(query)?;
    let status: String = row.get(8).map_err(query)?;
    let last_checked_at: Option<String> = row.get(10).ok();
    let metadata_json: String = row.get(11).map_err(query)?;
    let metadata: FollowUpMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| StoreError::Serialization(format!("bad metadata: {e}")))?;
    let created_at: String = row.get(12).map_err(query)?;

    Ok(FollowUpRecord {
        id,
        correlation_key: row.get(1).map_err(query)?,
        sender: row.get(2).map_err(query)?,
        recipient: row.get(3).map_err(query)?,
        subject: row.get(4).map_err(query)?,
        sent_at: parse_datetime(&sent_at),
        followup_at: parse_datetime(&followup_at),
        delay_days: row.get::<i64>(7).map_err(query)?,
        status: FollowUpStatus::parse(&status),
        followup_count: row.get::<i64>(9).map_err(query)?.max(0) as u32,
        last_checked_at: last_checked_at.as_deref().map(parse_datetime),
        metadata,
        created_at: parse_datetime(&created_at),
    })
}

async fn collect_records(mut rows: libsql::Rows) -> Result<Vec<FollowUpRecord>, StoreError> {
    let mut records = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?
    {
        records.push(row_to_record(&row)?);
    }
    Ok(records)
}

#[async_trait]
impl FollowUpStore for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run(self.conn()).await
    }

    async fn create(&self, record: &FollowUpRecord) -> Result<Uuid, StoreError> {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = self
            .conn()
            .execute(
                &format!("INSERT INTO followups ({RECORD_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
                params![
                    record.id.to_string(),
                    record.correlation_key.clone(),
                    record.sender.clone(),
                    record.recipient.clone(),
                    record.subject.clone(),
                    to_db(record.sent_at),
                    to_db(record.followup_at),
                    record.delay_days,
                    record.status.as_str(),
                    i64::from(record.followup_count),
                    record.last_checked_at.map(to_db),
                    metadata,
                    to_db(record.created_at),
                ],
            )
            .await;

        match result {
            Ok(_) => {
                debug!(id = %record.id, key = %record.correlation_key, "Follow-up created");
                Ok(record.id)
            }
            Err(e) if e.to_string().contains("UNIQUE constraint failed") => {
                Err(StoreError::DuplicateKey(record.correlation_key.clone()))
            }
            Err(e) => Err(StoreError::Query(e.to_string())),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<FollowUpRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM followups WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<FollowUpRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM followups WHERE correlation_key = ?1"),
                params![key],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: FollowUpStatus,
        increment_count: bool,
    ) -> Result<(), StoreError> {
        let sql = if increment_count {
            "UPDATE followups SET status = ?1, followup_count = followup_count + 1, \
             last_checked_at = ?2 WHERE id = ?3"
        } else {
            "UPDATE followups SET status = ?1, last_checked_at = ?2 WHERE id = ?3"
        };

        let changed = self
            .conn()
            .execute(sql, params![status.as_str(), to_db(Utc::now()), id.to_string()])
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        debug!(id = %id, status = status.as_str(), "Follow-up status updated");
        Ok(())
    }

    async fn query_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FollowUpRecord>, StoreError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM followups \
                     WHERE status = 'pending' AND followup_at <= ?1 \
                     ORDER BY followup_at ASC, id ASC"
                ),
                params![to_db(now)],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        collect_records(rows).await
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<FollowUpRecord>, StoreError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM followups \
                     ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                ),
                params![i64::from(limit), i64::from(offset)],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        collect_records(rows).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM followups WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        info!(id = %id, "Follow-up deleted");
        Ok(())
    }

    async fn save_template(&self, template: &EmailTemplate) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO templates (name, subject, body) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(name) DO UPDATE SET \
                     subject = excluded.subject, \
                     body = excluded.body, \
                     updated_at = datetime('now')",
                params![
                    template.name.clone(),
                    template.subject.clone(),
                    template.body.clone()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_template(&self, name: &str) -> Result<Option<EmailTemplate>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT name, subject, body FROM templates WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(EmailTemplate {
                name: row.get(0).map_err(|e| StoreError::Query(e.to_string()))?,
                subject: row.get(1).map_err(|e| StoreError::Query(e.to_string()))?,
                body: row.get(2).map_err(|e| StoreError::Query(e.to_string()))?,
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::model::NewFollowUp;

    fn sample(subject: &str, sent_at: DateTime<Utc>, delay_days: i64) -> FollowUpRecord {
        FollowUpRecord::from_new(NewFollowUp::new(
            "me@example.com",
            "you@example.com",
            subject,
            sent_at,
            delay_days,
        ))
        .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = LibSqlStore::memory().await.unwrap();
        let record = sample("Hello", t0(), 3);

        let id = store.create(&record).await.unwrap();
        assert_eq!(id, record.id);

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.correlation_key, record.correlation_key);
        assert_eq!(loaded.subject, "Hello");
        assert_eq!(loaded.sent_at, record.sent_at);
        assert_eq!(loaded.followup_at, record.followup_at);
        assert_eq!(loaded.status, FollowUpStatus::Pending);
        assert_eq!(loaded.followup_count, 0);
        assert!(loaded.last_checked_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_correlation_key_rejected() {
        let store = LibSqlStore::memory().await.unwrap();
        let first = sample("Hello", t0(), 3);
        store.create(&first).await.unwrap();

        // Same registration input, new record id — same correlation key.
        let second = sample("Hello", t0(), 5);
        let err = store.create(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(k) if k == first.correlation_key));
    }

    #[tokio::test]
    async fn get_by_key_finds_record() {
        let store = LibSqlStore::memory().await.unwrap();
        let record = sample("Hello", t0(), 3);
        store.create(&record).await.unwrap();

        let found = store
            .get_by_key(&record.correlation_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);
        assert!(store.get_by_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_increments_count_and_stamps_check() {
        let store = LibSqlStore::memory().await.unwrap();
        let record = sample("Hello", t0(), 3);
        store.create(&record).await.unwrap();

        store
            .update_status(record.id, FollowUpStatus::Sent, true)
            .await
            .unwrap();

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, FollowUpStatus::Sent);
        assert_eq!(loaded.followup_count, 1);
        assert!(loaded.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn update_status_without_increment() {
        let store = LibSqlStore::memory().await.unwrap();
        let record = sample("Hello", t0(), 3);
        store.create(&record).await.unwrap();

        store
            .update_status(record.id, FollowUpStatus::Responded, false)
            .await
            .unwrap();

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, FollowUpStatus::Responded);
        assert_eq!(loaded.followup_count, 0);
    }

    #[tokio::test]
    async fn update_status_unknown_id_is_not_found() {
        let store = LibSqlStore::memory().await.unwrap();
        let err = store
            .update_status(Uuid::new_v4(), FollowUpStatus::Sent, false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_pending_filters_and_orders() {
        let store = LibSqlStore::memory().await.unwrap();

        let due_late = sample("Late", t0(), 5);
        let due_early = sample("Early", t0() - Duration::days(2), 1);
        let not_due = sample("Future", t0(), 30);
        let responded = sample("Done", t0() - Duration::days(3), 1);

        for r in [&due_late, &due_early, &not_due, &responded] {
            store.create(r).await.unwrap();
        }
        store
            .update_status(responded.id, FollowUpStatus::Responded, false)
            .await
            .unwrap();

        let now = t0() + Duration::days(10);
        let pending = store.query_pending(now).await.unwrap();

        let subjects: Vec<&str> = pending.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Early", "Late"]);
    }

    #[tokio::test]
    async fn query_pending_boundary_is_inclusive() {
        let store = LibSqlStore::memory().await.unwrap();
        let record = sample("Boundary", t0() - Duration::days(1), 1);
        store.create(&record).await.unwrap();

        // followup_at == now exactly
        let pending = store.query_pending(t0()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, record.id);
    }

    #[tokio::test]
    async fn list_paginates_newest_first() {
        let store = LibSqlStore::memory().await.unwrap();
        for i in 0..5 {
            store
                .create(&sample(&format!("Subject {i}"), t0() + Duration::hours(i), 1))
                .await
                .unwrap();
        }

        let page = store.list(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        let rest = store.list(10, 2).await.unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = LibSqlStore::memory().await.unwrap();
        let record = sample("Hello", t0(), 1);
        store.create(&record).await.unwrap();

        store.delete(record.id).await.unwrap();
        assert!(store.get(record.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete(record.id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn template_upsert_and_get() {
        let store = LibSqlStore::memory().await.unwrap();
        let template = EmailTemplate {
            name: "default".into(),
            subject: "Re: {subject}".into(),
            body: "First version".into(),
        };
        store.save_template(&template).await.unwrap();

        let updated = EmailTemplate {
            body: "Second version".into(),
            ..template.clone()
        };
        store.save_template(&updated).await.unwrap();

        let loaded = store.get_template("default").await.unwrap().unwrap();
        assert_eq!(loaded.body, "Second version");
        assert!(store.get_template("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("followmail.db");

        let record = sample("Hello", t0(), 3);
        {
            let store = LibSqlStore::open(&path).await.unwrap();
            store.create(&record).await.unwrap();
        }

        let store = LibSqlStore::open(&path).await.unwrap();
        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.correlation_key, record.correlation_key);
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let store = LibSqlStore::memory().await.unwrap();
        let record = FollowUpRecord::from_new(
            NewFollowUp::new("me@example.com", "you@example.com", "Hello", t0(), 2)
                .with_original_message_id("<orig@example.com>")
                .with_template("reminder")
                .with_variable("project", "Apollo"),
        )
        .unwrap();
        store.create(&record).await.unwrap();

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(
            loaded.metadata.original_message_id.as_deref(),
            Some("<orig@example.com>")
        );
        assert_eq!(loaded.metadata.template_name, "reminder");
        assert_eq!(
            loaded.metadata.variables.get("project").map(String::as_str),
            Some("Apollo")
        );
    }
}
