use std::sync::Arc;

use followmail::classify::ReplyClassifier;
use followmail::config::Config;
use followmail::engine::{EngineConfig, EngineEvent, FollowUpEngine};
use followmail::mail::MailSession;
use followmail::scheduler::{Scheduler, SchedulerConfig};
use followmail::store::{FollowUpStore, LibSqlStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export FOLLOWMAIL_USERNAME=you@example.com");
        eprintln!("  export FOLLOWMAIL_PASSWORD=app-password");
        std::process::exit(1);
    });

    eprintln!("📬 followmail v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Account: {}", config.mail.username);
    eprintln!(
        "   IMAP: {}:{}  SMTP: {}:{}",
        config.mail.server.imap_host,
        config.mail.server.imap_port,
        config.mail.server.smtp_host,
        config.mail.server.smtp_port,
    );
    eprintln!("   Check interval: {}s", config.check_interval.as_secs());

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let store: Arc<dyn FollowUpStore> =
        Arc::new(LibSqlStore::open(db_path).await.unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {}: {e}", config.db_path);
            std::process::exit(1);
        }));
    eprintln!("   Database: {}", config.db_path);

    // ── Mail session ─────────────────────────────────────────────────────
    let session = MailSession::connect(&config.mail).await.unwrap_or_else(|e| {
        eprintln!("Error: Could not connect to mail servers: {e}");
        std::process::exit(1);
    });

    // ── Engine ───────────────────────────────────────────────────────────
    let classifier = ReplyClassifier::new(config.auto_reply_phrases.clone());
    let engine_config = EngineConfig {
        followup_template: config.followup_template.clone(),
        date_format: config.date_format.clone(),
    };
    let engine = Arc::new(FollowUpEngine::new(
        Arc::clone(&store),
        session.reader(),
        session.sender(),
        classifier,
        engine_config,
    ));

    // Log lifecycle events as they happen
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::FollowupSent { record_id }) => {
                    tracing::info!(id = %record_id, "Follow-up dispatched");
                }
                Ok(EngineEvent::ResponseDetected { record_id }) => {
                    tracing::info!(id = %record_id, "Reply received, tracking closed");
                }
                Ok(EngineEvent::Error { message }) => {
                    tracing::error!("{message}");
                }
                Ok(EngineEvent::CycleStarted | EngineEvent::CycleCompleted { .. }) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event consumer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Scheduler ────────────────────────────────────────────────────────
    let scheduler = Scheduler::new(
        Arc::clone(&engine),
        SchedulerConfig {
            interval: config.check_interval,
            max_consecutive_errors: config.max_consecutive_errors,
        },
    );
    scheduler.start();
    eprintln!("   Scheduler: running. Ctrl-C to exit.\n");

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down");
    scheduler.stop();
    session.disconnect();

    Ok(())
}
