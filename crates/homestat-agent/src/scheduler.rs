//! Poll scheduling.
//!
//! The scheduler ticks on a fixed granularity. On each tick every source
//! that is inside its active window, due, and idle gets one poll cycle
//! spawned as its own task, bounded by the source timeout. A tick never
//! waits for a poll.
//!
//! Due time is the dispatch time of the previous poll plus the interval.
//! After a long stall a source is therefore polled once, not once per
//! missed interval.

use chrono::{DateTime, Local};
use homestat_core::SourceConfig;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Default tick granularity.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Something the scheduler can poll.
pub trait PollTask: Send + Sync + 'static {
    /// Source being polled; supplies window, interval and timeout.
    fn source(&self) -> &SourceConfig;

    /// Run one poll cycle. Failures are handled inside the cycle.
    fn poll(&self, cycle_id: Uuid) -> impl Future<Output = ()> + Send;

    /// Called when cycle `cycle_id` was cancelled for exceeding the source
    /// timeout.
    fn timed_out(&self, cycle_id: Uuid, deadline: Duration);
}

struct Slot<T> {
    task: Arc<T>,
    in_flight: Arc<AtomicBool>,
    last_dispatch: Option<DateTime<Local>>,
}

impl<T: PollTask> Slot<T> {
    fn is_due(&self, now: DateTime<Local>) -> bool {
        let source = self.task.source();
        if !source.is_active_at(now.time()) {
            return false;
        }
        match self.last_dispatch {
            None => true,
            // A clock stepped backwards counts as due.
            Some(last) => (now - last)
                .to_std()
                .map_or(true, |elapsed| elapsed >= source.poll_interval),
        }
    }
}

/// Marks a source busy until dropped.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives poll cycles for a set of sources.
pub struct Scheduler<T> {
    slots: Vec<Slot<T>>,
}

impl<T: PollTask> Scheduler<T> {
    /// Schedule the given tasks, in order.
    #[must_use]
    pub fn new(tasks: impl IntoIterator<Item = Arc<T>>) -> Self {
        Self {
            slots: tasks
                .into_iter()
                .map(|task| Slot {
                    task,
                    in_flight: Arc::new(AtomicBool::new(false)),
                    last_dispatch: None,
                })
                .collect(),
        }
    }

    /// Number of scheduled sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of polls currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.in_flight.load(Ordering::Acquire))
            .count()
    }

    /// Dispatch every due source and return their ids.
    ///
    /// Must be called from within a tokio runtime.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<String> {
        let mut dispatched = Vec::new();

        for slot in &mut self.slots {
            if !slot.is_due(now) {
                continue;
            }
            let Some(guard) = InFlight::acquire(&slot.in_flight) else {
                tracing::debug!(source = %slot.task.source().id, "Previous poll still running, skipping");
                continue;
            };

            slot.last_dispatch = Some(now);
            let task = Arc::clone(&slot.task);
            let deadline = task.source().timeout;
            dispatched.push(task.source().id.clone());

            let cycle_id = Uuid::new_v4();

            tokio::spawn(async move {
                let _guard = guard;
                if tokio::time::timeout(deadline, task.poll(cycle_id))
                    .await
                    .is_err()
                {
                    task.timed_out(cycle_id, deadline);
                }
            });
        }

        if !dispatched.is_empty() {
            tracing::debug!(sources = ?dispatched, "Dispatched polls");
        }
        dispatched
    }

    /// Tick every `granularity` until `shutdown` resolves.
    pub async fn run(mut self, granularity: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(granularity);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(sources = self.slots.len(), ?granularity, "Scheduler running");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(Local::now());
                }
            }
        }
    }
}
