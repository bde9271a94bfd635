//! Integration tests for the scheduler loop.
//!
//! Uses a controllable store fake so cycles can be made to fail on demand,
//! and short intervals so the loop runs in test time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use followmail::classify::ReplyClassifier;
use followmail::engine::{EngineConfig, EngineEvent, FollowUpEngine};
use followmail::error::{MailError, StoreError};
use followmail::mail::{MailboxReader, MailboxSender, OutgoingMail, ParsedMail, SearchCriteria};
use followmail::model::{FollowUpRecord, FollowUpStatus};
use followmail::scheduler::{MIN_INTERVAL, Scheduler, SchedulerConfig};
use followmail::store::{EmailTemplate, FollowUpStore};

/// Maximum time any wait loop may spin before the test is considered hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Fakes ───────────────────────────────────────────────────────────

/// Store fake: counts pending queries and fails on demand, either
/// unconditionally or for an exact number of queries.
#[derive(Default)]
struct FakeStore {
    queries: AtomicU32,
    fail: AtomicBool,
    fail_remaining: AtomicU32,
}

impl FakeStore {
    fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl FollowUpStore for FakeStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create(&self, record: &FollowUpRecord) -> Result<Uuid, StoreError> {
        Ok(record.id)
    }

    async fn get(&self, _id: Uuid) -> Result<Option<FollowUpRecord>, StoreError> {
        Ok(None)
    }

    async fn get_by_key(&self, _key: &str) -> Result<Option<FollowUpRecord>, StoreError> {
        Ok(None)
    }

    async fn update_status(
        &self,
        id: Uuid,
        _status: FollowUpStatus,
        _increment_count: bool,
    ) -> Result<(), StoreError> {
        Err(StoreError::NotFound(id))
    }

    async fn query_pending(
        &self,
        _now: DateTime<Utc>,
    ) -> Result<Vec<FollowUpRecord>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Query("disk I/O error".to_string()));
        }
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Query("disk I/O error".to_string()));
        }
        Ok(Vec::new())
    }

    async fn list(&self, _limit: u32, _offset: u32) -> Result<Vec<FollowUpRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        Err(StoreError::NotFound(id))
    }

    async fn save_template(&self, _template: &EmailTemplate) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_template(&self, _name: &str) -> Result<Option<EmailTemplate>, StoreError> {
        Ok(None)
    }
}

struct NullReader;

#[async_trait]
impl MailboxReader for NullReader {
    async fn search(&self, _criteria: SearchCriteria) -> Vec<ParsedMail> {
        Vec::new()
    }
}

struct NullSender;

#[async_trait]
impl MailboxSender for NullSender {
    async fn send(&self, _mail: &OutgoingMail) -> Result<String, MailError> {
        Ok("<null@test>".to_string())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

fn build(interval: Duration, max_errors: u32) -> (Scheduler, Arc<FollowUpEngine>, Arc<FakeStore>) {
    let store = Arc::new(FakeStore::default());
    let engine = Arc::new(FollowUpEngine::new(
        Arc::clone(&store) as Arc<dyn FollowUpStore>,
        Arc::new(NullReader),
        Arc::new(NullSender),
        ReplyClassifier::default(),
        EngineConfig::default(),
    ));
    let scheduler = Scheduler::new(
        Arc::clone(&engine),
        SchedulerConfig {
            interval,
            max_consecutive_errors: max_errors,
        },
    );
    (scheduler, engine, store)
}

async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {TEST_TIMEOUT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn runs_cycles_on_the_interval() {
    let (scheduler, _engine, store) = build(Duration::from_millis(10), 3);

    scheduler.start();
    assert!(scheduler.is_running());

    wait_until(|| store.queries() >= 3).await;
    assert!(scheduler.last_run_at().is_some());
    assert!(scheduler.next_check_at().is_some());

    scheduler.stop();
}

#[tokio::test]
async fn start_is_idempotent() {
    let (scheduler, _engine, store) = build(Duration::from_millis(10), 3);

    scheduler.start();
    scheduler.start();
    wait_until(|| store.queries() >= 2).await;
    assert!(scheduler.is_running());

    scheduler.stop();
}

#[tokio::test]
async fn stop_halts_the_loop() {
    let (scheduler, _engine, store) = build(Duration::from_millis(10), 3);

    scheduler.start();
    wait_until(|| store.queries() >= 1).await;
    scheduler.stop();
    assert!(!scheduler.is_running());
    assert!(scheduler.next_check_at().is_none());

    // No new fire after stop settles.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = store.queries();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.queries(), settled);
}

#[tokio::test]
async fn halts_after_max_consecutive_errors_with_one_fatal_event() {
    let (scheduler, engine, store) = build(Duration::from_millis(10), 3);
    let mut events = engine.subscribe();
    store.fail.store(true, Ordering::SeqCst);

    scheduler.start();
    wait_until(|| !scheduler.is_running()).await;

    // Exactly three failed cycles ran, then the loop gave up.
    assert_eq!(store.queries(), 3);

    // Loop is dead: no further cycles.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.queries(), 3);

    let mut starts = 0;
    let mut failures = 0;
    let mut fatal = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::CycleStarted => starts += 1,
            EngineEvent::CycleCompleted { success: false } => failures += 1,
            EngineEvent::Error { .. } => fatal += 1,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(starts, 3);
    assert_eq!(failures, 3);
    assert_eq!(fatal, 1, "exactly one fatal notification");
}

#[tokio::test]
async fn successful_cycle_resets_the_error_count() {
    let (scheduler, _engine, store) = build(Duration::from_millis(10), 3);

    // Two failures, then recovery: the counter must reset, so two more
    // failures later still do not reach the bound of three.
    store.fail_next(2);
    scheduler.start();
    wait_until(|| store.queries() >= 3).await;
    assert!(scheduler.is_running());

    store.fail_next(2);
    let failing_at = store.queries();
    wait_until(|| store.queries() >= failing_at + 3).await;
    assert!(scheduler.is_running());

    scheduler.stop();
}

#[tokio::test]
async fn force_check_runs_while_stopped() {
    let (scheduler, _engine, store) = build(Duration::from_secs(3600), 3);

    assert!(!scheduler.is_running());
    scheduler.force_check().await.unwrap();
    assert_eq!(store.queries(), 1);
    assert!(scheduler.last_run_at().is_some());
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn force_check_propagates_cycle_errors_without_halting() {
    let (scheduler, engine, store) = build(Duration::from_secs(3600), 3);
    let mut events = engine.subscribe();
    store.fail.store(true, Ordering::SeqCst);

    scheduler.start();
    wait_until(|| store.queries() >= 1).await;

    // Errors from forced cycles never count toward the fatal bound.
    for _ in 0..5 {
        assert!(scheduler.force_check().await.is_err());
    }
    assert!(scheduler.is_running());

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, EngineEvent::Error { .. }),
            "forced cycles must not raise a fatal notification"
        );
    }

    scheduler.stop();
}

#[tokio::test]
async fn set_interval_clamps_to_the_floor() {
    let (scheduler, _engine, store) = build(Duration::from_secs(3600), 3);

    scheduler.start();
    wait_until(|| store.queries() >= 1).await;
    wait_until(|| scheduler.last_run_at().is_some()).await;

    scheduler.set_interval(Duration::from_secs(5));

    let last = scheduler.last_run_at().unwrap();
    let next = scheduler.next_check_at().unwrap();
    assert_eq!(
        next - last,
        chrono::Duration::from_std(MIN_INTERVAL).unwrap()
    );

    scheduler.stop();
}
