//! Scheduler loop — drives engine reconciliation on a fixed interval.
//!
//! A single logical worker: timer fires and `force_check()` share one cycle
//! mutex, so reconciliations never overlap. Consecutive cycle failures are
//! counted; at the configured bound the loop emits one fatal error event
//! and halts itself — operator restart required.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::engine::{EngineEvent, FollowUpEngine};
use crate::error::{EngineError, SchedulerError};

/// Floor for the reconciliation interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(crate::config::MIN_CHECK_INTERVAL_SECS);

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between reconciliation cycles.
    pub interval: Duration,
    /// Consecutive failed cycles before the loop halts itself.
    pub max_consecutive_errors: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::config::DEFAULT_CHECK_INTERVAL_SECS),
            max_consecutive_errors: crate::config::DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

/// Shared state between the scheduler handle and its loop task.
struct Shared {
    engine: Arc<FollowUpEngine>,
    running: AtomicBool,
    /// Bumped on every `start()`; a loop task exits once it is stale.
    epoch: AtomicU32,
    consecutive_errors: AtomicU32,
    max_consecutive_errors: u32,
    last_run_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    /// Serializes timer fires with `force_check` — one in-flight cycle.
    cycle_lock: Mutex<()>,
}

/// Periodic driver for the follow-up engine.
pub struct Scheduler {
    shared: Arc<Shared>,
    interval_tx: watch::Sender<Duration>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(engine: Arc<FollowUpEngine>, config: SchedulerConfig) -> Self {
        let (interval_tx, _) = watch::channel(config.interval);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                engine,
                running: AtomicBool::new(false),
                epoch: AtomicU32::new(0),
                consecutive_errors: AtomicU32::new(0),
                max_consecutive_errors: config.max_consecutive_errors.max(1),
                last_run_at: std::sync::Mutex::new(None),
                cycle_lock: Mutex::new(()),
            }),
            interval_tx,
            shutdown_tx,
        }
    }

    /// Start the loop. No-op when already running. The first cycle runs
    /// immediately; subsequent cycles follow at the configured interval.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }
        self.shared.consecutive_errors.store(0, Ordering::SeqCst);
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.shutdown_tx.send(false);

        let shared = Arc::clone(&self.shared);
        let interval_rx = self.interval_tx.subscribe();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(run_loop(shared, epoch, interval_rx, shutdown_rx));

        info!(
            interval_secs = self.interval_tx.borrow().as_secs(),
            "Scheduler started"
        );
    }

    /// Stop the loop. No further fire starts; an in-flight cycle completes.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        info!("Scheduler stopped");
    }

    /// Run one reconciliation cycle now, serialized with the timer loop.
    ///
    /// Does not disturb the interval schedule or the error counter, and
    /// works whether or not the loop is running.
    pub async fn force_check(&self) -> Result<(), EngineError> {
        let _guard = self.shared.cycle_lock.lock().await;
        info!("Forced reconciliation");
        run_cycle(&self.shared).await
    }

    /// Update the interval, clamped to the 60-second floor. Takes effect on
    /// the next scheduled fire.
    pub fn set_interval(&self, interval: Duration) {
        let clamped = interval.max(MIN_INTERVAL);
        if clamped != interval {
            warn!(
                requested_secs = interval.as_secs(),
                "Interval below floor, clamped to {}s",
                MIN_INTERVAL.as_secs()
            );
        }
        let _ = self.interval_tx.send(clamped);
        info!(interval_secs = clamped.as_secs(), "Check interval updated");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Timestamp of the most recent completed cycle.
    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_run_at.lock().unwrap()
    }

    /// Expected time of the next scheduled fire, when running.
    pub fn next_check_at(&self) -> Option<DateTime<Utc>> {
        if !self.is_running() {
            return None;
        }
        let interval = *self.interval_tx.borrow();
        self.last_run_at()
            .map(|last| last + chrono::Duration::from_std(interval).unwrap_or_default())
    }
}

/// One reconciliation cycle: events around `engine.reconcile()`, last-run
/// stamp. Caller holds the cycle lock.
async fn run_cycle(shared: &Shared) -> Result<(), EngineError> {
    shared.engine.emit(EngineEvent::CycleStarted);
    debug!("Reconciliation cycle started");

    let result = shared.engine.reconcile().await;

    *shared.last_run_at.lock().unwrap() = Some(Utc::now());
    shared.engine.emit(EngineEvent::CycleCompleted {
        success: result.is_ok(),
    });

    match &result {
        Ok(()) => debug!("Reconciliation cycle completed"),
        Err(e) => error!("Reconciliation cycle failed: {e}"),
    }
    result
}

/// The loop task: cycle, then wait for the next fire or shutdown.
async fn run_loop(
    shared: Arc<Shared>,
    epoch: u32,
    mut interval_rx: watch::Receiver<Duration>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let stale = |shared: &Shared| {
        shared.epoch.load(Ordering::SeqCst) != epoch || !shared.running.load(Ordering::SeqCst)
    };

    loop {
        {
            let _guard = shared.cycle_lock.lock().await;

            // stop() (or a restart) may have won the lock race; never
            // start a fire after it.
            if stale(&shared) {
                return;
            }

            match run_cycle(&shared).await {
                Ok(()) => {
                    shared.consecutive_errors.store(0, Ordering::SeqCst);
                }
                Err(e) => {
                    let failures = shared.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures >= shared.max_consecutive_errors {
                        let fault = SchedulerError::Fault {
                            consecutive: failures,
                        };
                        error!("{fault}: {e}");
                        shared.engine.emit(EngineEvent::Error {
                            message: fault.to_string(),
                        });
                        shared.running.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }

        // Wait out the interval; restart the wait when it changes.
        let mut remaining = *interval_rx.borrow_and_update();
        loop {
            tokio::select! {
                () = tokio::time::sleep(remaining) => break,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || stale(&shared) {
                        debug!("Scheduler loop exiting");
                        return;
                    }
                }
                changed = interval_rx.changed() => {
                    if changed.is_ok() {
                        remaining = *interval_rx.borrow_and_update();
                    }
                }
            }
        }
    }
}
