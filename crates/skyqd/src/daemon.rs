//! The daemon loop.
//!
//! Queues are asked for work in configuration order; the first selection
//! wins. The executor is simulated: a selected target "runs" for its
//! estimated observation length and is then finished, or is cut short
//! when the entry behind it in the same queue becomes due.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use skyq_core::{Observatory, TargetId};
use skyq_queue::{ExecutorQueue, NextObservation, Qid, Station, WakeEvent};

/// Observation length used when the observatory has no estimate.
const FALLBACK_LENGTH_SECS: f64 = 60.0;

/// The observation the simulated executor is working on.
#[derive(Debug, Clone, PartialEq)]
pub struct Running {
    pub queue: usize,
    pub qid: Qid,
    pub target: TargetId,
    pub started: f64,
    pub until: f64,
}

pub struct Daemon {
    queues: Vec<ExecutorQueue>,
    observatory: Arc<dyn Observatory>,
    running: Option<Running>,
}

impl Daemon {
    pub fn new(queues: Vec<ExecutorQueue>, observatory: Arc<dyn Observatory>) -> Self {
        Self {
            queues,
            observatory,
            running: None,
        }
    }

    pub fn queues(&self) -> &[ExecutorQueue] {
        &self.queues
    }

    pub fn queue_mut(&mut self, name: &str) -> Option<&mut ExecutorQueue> {
        self.queues.iter_mut().find(|q| q.name() == name)
    }

    pub fn running(&self) -> Option<&Running> {
        self.running.as_ref()
    }

    /// One pass of the control loop at `now`.
    ///
    /// A running observation ends when its length has elapsed or when the
    /// next entry of its queue is due. Both count as executed: the
    /// observation started, so the entry goes to the executed log.
    pub fn tick(&mut self, now: f64) {
        if let Some(running) = self.running.clone() {
            let queue = &mut self.queues[running.queue];
            if now >= running.until {
                info!(queue = %queue.name(), qid = running.qid, target = running.target, "observation finished");
            } else if queue.front_time_expires(now) {
                warn!(queue = %queue.name(), qid = running.qid, target = running.target, "successor due, interrupting observation");
            } else {
                return;
            }
            queue.finish_current(now);
            self.running = None;
        }

        for (index, queue) in self.queues.iter_mut().enumerate() {
            match queue.select_next_observation(None) {
                NextObservation::Selected(selection) => {
                    if let Err(e) = queue.set_current_target(selection.qid) {
                        warn!(queue = %queue.name(), error = %e, "selected entry vanished");
                        continue;
                    }
                    let length = self
                        .observatory
                        .observation_length(selection.target, None)
                        .unwrap_or(FALLBACK_LENGTH_SECS);
                    info!(
                        queue = %queue.name(),
                        qid = selection.qid,
                        target = selection.target,
                        name = %selection.name,
                        hard = selection.hard,
                        length,
                        "observation started"
                    );
                    self.running = Some(Running {
                        queue: index,
                        qid: selection.qid,
                        target: selection.target,
                        started: now,
                        until: now + length,
                    });
                    return;
                }
                NextObservation::Waiting(next) => {
                    debug!(queue = %queue.name(), ?next, "nothing to observe");
                }
            }
        }
    }

    /// Drive the queues until `shutdown` flips.
    ///
    /// Ticks on `interval`, at the end of the running observation, and at
    /// wakeups requested by the queues.
    pub async fn run(
        mut self,
        clock: Arc<dyn Station>,
        interval: Duration,
        mut wakeups: mpsc::UnboundedReceiver<(f64, WakeEvent)>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        info!(queues = self.queues.len(), interval_ms = interval.as_millis() as u64, "daemon loop started");
        let mut ticker = tokio::time::interval(interval);
        let mut wake_at: Option<f64> = None;
        loop {
            let deadline = [wake_at, self.running.as_ref().map(|r| r.until)]
                .into_iter()
                .flatten()
                .reduce(f64::min)
                .map(|at| Instant::now() + Duration::from_secs_f64((at - clock.now()).max(0.0)));

            tokio::select! {
                _ = ticker.tick() => self.tick(clock.now()),
                _ = sleep_until(deadline) => {
                    wake_at = None;
                    self.tick(clock.now());
                }
                Some((at, event)) = wakeups.recv() => {
                    debug!(at, ?event, "wakeup requested");
                    wake_at = Some(wake_at.map_or(at, |w| w.min(at)));
                }
                _ = shutdown.changed() => {
                    info!("daemon loop shutting down");
                    break;
                }
            }
        }
        self
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
