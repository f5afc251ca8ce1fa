//! Queue entries.
//!
//! A `QueuedTarget` refers to its target by id only; the catalog owns the
//! target record. Queue ids come from a process-wide atomic counter so they
//! stay unique across every queue of the daemon.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use skyq_core::{Target, TargetId, WatchId};

/// Queue entry id, unique within a process run.
pub type Qid = u32;

static QID_SEQ: AtomicU32 = AtomicU32::new(0);

/// Allocate the next queue id.
pub fn next_qid() -> Qid {
    QID_SEQ.fetch_add(1, Ordering::Relaxed) + 1
}

/// A target waiting in a queue, with its scheduling constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTarget {
    pub qid: Qid,
    pub target: TargetId,
    /// Target name, resolved when the entry was created.
    pub name: String,
    /// Earliest start, unix seconds.
    pub t_start: Option<f64>,
    /// Latest end, unix seconds.
    pub t_end: Option<f64>,
    pub plan_id: Option<i32>,
    /// Pinned: exempt from automatic reordering and visibility removal.
    pub hard: bool,
    /// External condition the entry's constraints depend on.
    pub watch: Option<WatchId>,
    pub unobservable_reported: bool,
    /// A hard interruption for this entry was already handed out.
    pub interrupt_issued: bool,
}

impl QueuedTarget {
    pub fn new(target: &Target, t_start: Option<f64>, t_end: Option<f64>) -> Self {
        Self {
            qid: next_qid(),
            target: target.id,
            name: target.name.clone(),
            t_start,
            t_end,
            plan_id: None,
            hard: false,
            watch: None,
            unobservable_reported: false,
            interrupt_issued: false,
        }
    }

    pub fn with_plan(mut self, plan_id: Option<i32>) -> Self {
        self.plan_id = plan_id;
        self
    }

    pub fn with_hard(mut self, hard: bool) -> Self {
        self.hard = hard;
        self
    }

    pub fn with_watch(mut self, watch: Option<WatchId>) -> Self {
        self.watch = watch;
        self
    }

    /// True when the entry's window is open at `now`: the start is unset or
    /// reached and the end is unset or still ahead.
    pub fn not_expired(&self, now: f64) -> bool {
        self.t_start.is_none_or(|s| s <= now) && self.t_end.is_none_or(|e| e > now)
    }

    /// True when the start constraint is set and has been reached.
    pub fn start_arrived(&self, now: f64) -> bool {
        self.t_start.is_some_and(|s| s <= now)
    }

    /// True when the end constraint is set and has passed.
    pub fn end_passed(&self, now: f64) -> bool {
        self.t_end.is_some_and(|e| e <= now)
    }
}
