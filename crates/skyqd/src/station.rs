//! Station backing the daemon's queues.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use skyq_queue::{QueueSnapshot, Station, SystemStation, WakeEvent};

/// Wall clock. Wakeup requests are forwarded to the daemon loop.
pub struct DaemonStation {
    clock: SystemStation,
    wakeups: mpsc::UnboundedSender<(f64, WakeEvent)>,
}

impl DaemonStation {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(f64, WakeEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                clock: SystemStation,
                wakeups: tx,
            },
            rx,
        )
    }
}

impl Station for DaemonStation {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn publish(&self, snapshot: &QueueSnapshot) {
        debug!(
            queue = %snapshot.name,
            pending = snapshot.pending.len(),
            removed = snapshot.removed.len(),
            executed = snapshot.executed.len(),
            "queue state"
        );
        if let Ok(json) = serde_json::to_string(&snapshot.pending) {
            trace!(queue = %snapshot.name, pending = %json, "pending entries");
        }
    }

    fn schedule_wakeup(&self, at: f64, event: WakeEvent) {
        if self.wakeups.send((at, event)).is_err() {
            debug!(at, ?event, "daemon loop gone, wakeup dropped");
        }
    }
}
