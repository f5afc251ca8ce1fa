//! Audit trail and published queue state.
//!
//! Every entry that leaves a pending sequence is reported once through a
//! `RemovalSink`. The executor queue turns those reports into the
//! append-only removed/executed logs; a forecast keeps them to itself.

use serde::{Deserialize, Serialize};

use skyq_core::TargetId;

use crate::job::{Qid, QueuedTarget};

/// Why an entry left the pending sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// End time passed.
    TimesExpired,
    /// Handed to the executor.
    Started,
    /// Preempted by a later entry whose start time arrived.
    NextNeeded,
    /// Dropped while below horizon or outside constraints.
    Unobservable,
    /// Failed constraint revalidation after a watched condition changed.
    ConstraintsViolated,
    /// Dropped by `clear_next`.
    Cleared,
    /// Removed by an explicit command.
    Operator,
}

impl RemovalReason {
    /// Whether the entry goes to the executed log rather than the removed log.
    pub fn is_execution(&self) -> bool {
        matches!(self, RemovalReason::Started)
    }

    /// Numeric code published to device clients. Executions are positive.
    pub fn code(&self) -> i32 {
        match self {
            RemovalReason::TimesExpired => -1,
            RemovalReason::Started => 1,
            RemovalReason::NextNeeded => 2,
            RemovalReason::Unobservable => -2,
            RemovalReason::ConstraintsViolated => -3,
            RemovalReason::Cleared => -4,
            RemovalReason::Operator => -5,
        }
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemovalReason::TimesExpired => "times expired",
            RemovalReason::Started => "started",
            RemovalReason::NextNeeded => "next needed",
            RemovalReason::Unobservable => "unobservable",
            RemovalReason::ConstraintsViolated => "constraints violated",
            RemovalReason::Cleared => "cleared",
            RemovalReason::Operator => "operator",
        };
        f.write_str(s)
    }
}

/// Receives every entry removed from a queue, with its last position.
pub trait RemovalSink {
    fn removed(&mut self, job: QueuedTarget, position: usize, reason: RemovalReason);
}

/// Collects removals in order.
impl RemovalSink for Vec<(QueuedTarget, RemovalReason)> {
    fn removed(&mut self, job: QueuedTarget, _position: usize, reason: RemovalReason) {
        self.push((job, reason));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedEntry {
    pub qid: Qid,
    pub target: TargetId,
    pub name: String,
    pub time: f64,
    pub reason: RemovalReason,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedEntry {
    pub qid: Qid,
    pub target: TargetId,
    pub name: String,
    pub time: f64,
    pub position: usize,
}

/// Append-only removed/executed logs. Unbounded for the process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLog {
    removed: Vec<RemovedEntry>,
    executed: Vec<ExecutedEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, job: &QueuedTarget, position: usize, reason: RemovalReason, time: f64) {
        if reason.is_execution() {
            self.executed.push(ExecutedEntry {
                qid: job.qid,
                target: job.target,
                name: job.name.clone(),
                time,
                position,
            });
        } else {
            self.removed.push(RemovedEntry {
                qid: job.qid,
                target: job.target,
                name: job.name.clone(),
                time,
                reason,
                position,
            });
        }
    }

    pub fn removed(&self) -> &[RemovedEntry] {
        &self.removed
    }

    pub fn executed(&self) -> &[ExecutedEntry] {
        &self.executed
    }

    /// Total number of entries that left the queue.
    pub fn len(&self) -> usize {
        self.removed.len() + self.executed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Published view of one pending entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub qid: Qid,
    pub target: TargetId,
    pub name: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub plan_id: Option<i32>,
    pub hard: bool,
    pub position: usize,
}

impl PendingEntry {
    pub fn from_job(job: &QueuedTarget, position: usize) -> Self {
        Self {
            qid: job.qid,
            target: job.target,
            name: job.name.clone(),
            start: job.t_start,
            end: job.t_end,
            plan_id: job.plan_id,
            hard: job.hard,
            position,
        }
    }
}

/// Externally visible queue state, rebuilt by `ExecutorQueue::update_vals`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub pending: Vec<PendingEntry>,
    pub removed: Vec<RemovedEntry>,
    pub executed: Vec<ExecutedEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyq_core::Target;

    fn job(id: TargetId) -> QueuedTarget {
        QueuedTarget::new(
            &Target {
                id,
                name: format!("t{id}"),
                priority: 0.0,
            },
            None,
            None,
        )
    }

    #[test]
    fn started_goes_to_executed_log() {
        let mut log = AuditLog::new();
        let j = job(1);
        log.record(&j, 0, RemovalReason::Started, 100.0);
        assert_eq!(log.executed().len(), 1);
        assert!(log.removed().is_empty());
        assert_eq!(log.executed()[0].qid, j.qid);
    }

    #[test]
    fn other_reasons_go_to_removed_log() {
        let mut log = AuditLog::new();
        for reason in [
            RemovalReason::TimesExpired,
            RemovalReason::NextNeeded,
            RemovalReason::Unobservable,
            RemovalReason::ConstraintsViolated,
            RemovalReason::Cleared,
            RemovalReason::Operator,
        ] {
            log.record(&job(2), 3, reason, 5.0);
        }
        assert_eq!(log.removed().len(), 6);
        assert!(log.executed().is_empty());
        assert_eq!(log.removed()[0].reason, RemovalReason::TimesExpired);
        assert_eq!(log.removed()[0].position, 3);
        assert_eq!(log.len(), 6);
    }

    #[test]
    fn reason_codes_sign_matches_log() {
        assert!(RemovalReason::Started.code() > 0);
        assert!(RemovalReason::TimesExpired.code() < 0);
        assert_eq!(RemovalReason::TimesExpired.to_string(), "times expired");
    }

    #[test]
    fn snapshot_serializes() {
        let snap = QueueSnapshot {
            name: "plan".to_string(),
            pending: vec![PendingEntry::from_job(&job(4), 0)],
            ..QueueSnapshot::default()
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["pending"][0]["target"], 4);
        assert!(json["pending"][0]["start"].is_null());
    }
}
