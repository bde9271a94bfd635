//! Version-tracked database migrations for the libSQL store.
//!
//! Each migration has a version number and SQL. `run()` checks the current
//! version and applies only the new ones sequentially.

use libsql::Connection;
use tracing::info;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS followups (
            id TEXT PRIMARY KEY,
            correlation_key TEXT NOT NULL UNIQUE,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            followup_at TEXT NOT NULL,
            delay_days INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            followup_count INTEGER NOT NULL DEFAULT 0,
            last_checked_at TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_followups_status ON followups(status);
        CREATE INDEX IF NOT EXISTS idx_followups_followup_at ON followups(followup_at);

        CREATE TABLE IF NOT EXISTS templates (
            name TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
    "#,
}];

/// Apply all pending migrations on `conn`.
pub async fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(e.to_string()))?;

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    let current: i64 = match rows
        .next()
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?
    {
        Some(row) => row.get(0).map_err(|e| StoreError::Migration(e.to_string()))?,
        None => 0,
    };

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| {
                StoreError::Migration(format!("{} failed: {e}", migration.name))
            })?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
    }

    Ok(())
}
