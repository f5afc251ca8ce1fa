//! The device the executor queue lives in.
//!
//! The queue reads the clock through it, publishes its state to it after
//! every mutation, and asks it for timed wakeups when the next entry is not
//! yet due. `SystemStation` is the plain wall-clock implementation;
//! `ManualStation` drives time by hand and records everything it is told.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::audit::QueueSnapshot;

/// What a scheduled wakeup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    /// The front entry's start time is near.
    NextStart,
    /// The front entry's end time is near.
    NextEnd,
}

pub trait Station: Send + Sync {
    /// Current time, unix seconds.
    fn now(&self) -> f64;

    /// Receive the queue state after a mutation.
    fn publish(&self, _snapshot: &QueueSnapshot) {}

    /// Request a re-evaluation at `at`, unix seconds.
    fn schedule_wakeup(&self, _at: f64, _event: WakeEvent) {}
}

/// Wall clock; publications and wakeups are only logged.
#[derive(Debug, Default)]
pub struct SystemStation;

impl Station for SystemStation {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn publish(&self, snapshot: &QueueSnapshot) {
        debug!(
            queue = %snapshot.name,
            pending = snapshot.pending.len(),
            removed = snapshot.removed.len(),
            executed = snapshot.executed.len(),
            "queue state published"
        );
    }

    fn schedule_wakeup(&self, at: f64, event: WakeEvent) {
        debug!(at, ?event, "wakeup requested");
    }
}

/// Hand-driven clock that remembers every publication and wakeup request.
#[derive(Debug, Default)]
pub struct ManualStation {
    now: Mutex<f64>,
    published: Mutex<Vec<QueueSnapshot>>,
    wakeups: Mutex<Vec<(f64, WakeEvent)>>,
}

impl ManualStation {
    pub fn new(now: f64) -> Self {
        Self {
            now: Mutex::new(now),
            ..Self::default()
        }
    }

    pub fn set_now(&self, now: f64) {
        if let Ok(mut t) = self.now.lock() {
            *t = now;
        }
    }

    pub fn advance(&self, secs: f64) {
        if let Ok(mut t) = self.now.lock() {
            *t += secs;
        }
    }

    /// Most recent publication.
    pub fn last_published(&self) -> Option<QueueSnapshot> {
        self.published.lock().ok().and_then(|p| p.last().cloned())
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn wakeups(&self) -> Vec<(f64, WakeEvent)> {
        self.wakeups.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl Station for ManualStation {
    fn now(&self) -> f64 {
        self.now.lock().map(|t| *t).unwrap_or(0.0)
    }

    fn publish(&self, snapshot: &QueueSnapshot) {
        if let Ok(mut p) = self.published.lock() {
            p.push(snapshot.clone());
        }
    }

    fn schedule_wakeup(&self, at: f64, event: WakeEvent) {
        if let Ok(mut w) = self.wakeups.lock() {
            w.push((at, event));
        }
    }
}
