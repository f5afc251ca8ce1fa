//! `ExecutorQueue`: the scheduler in front of a telescope executor.
//!
//! Owns one `TargetQueue` and everything around it:
//!
//! - **Commands**: insertion (front, index, first feasible slot), removal,
//!   bulk loads from text parameters, constraint revalidation
//! - **Selection**: picks the next observation and arms wakeups when
//!   nothing is due yet
//! - **Audit**: every entry leaving the queue lands in the removed or the
//!   executed log exactly once
//! - **Publication**: a `QueueSnapshot` is rebuilt and handed to the
//!   `Station` after every mutation
//!
//! # Architecture
//!
//! ```text
//!   commands ──▶ ExecutorQueue ──▶ TargetQueue ──▶ Observatory
//!                    │   │               │
//!                    │   └── Recorder ◀──┘ (RemovalSink)
//!                    │          │
//!                    │          └──▶ AuditLog
//!                    └──▶ Station (clock, publish, wakeups)
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use skyq_core::{
    julian_from_unix, FirstOrdering, Observatory, QueueConfig, QueueMode, QueuePolicy, Target,
    TargetId, WatchId,
};

use crate::audit::{AuditLog, PendingEntry, QueueSnapshot, RemovalReason, RemovalSink};
use crate::error::{QueueError, QueueResult};
use crate::ingest::{parse_qid_updates, parse_queue_load, QueueRequest};
use crate::job::{Qid, QueuedTarget};
use crate::ordering::WINDOW_STEP_SECS;
use crate::queue::TargetQueue;
use crate::station::{Station, WakeEvent};

/// Observation length assumed when the observatory cannot estimate one.
const DEFAULT_OBSERVATION_SECS: f64 = 60.0;

/// Wakeups are requested this long before the boundary they are for.
const WAKEUP_LEAD_SECS: f64 = 60.0;

/// The entry handed to the executor by `select_next_observation`.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub target: TargetId,
    pub qid: Qid,
    pub name: String,
    pub plan_id: Option<i32>,
    /// Interrupt whatever is running. Issued once per pinned, timed entry.
    pub hard: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextObservation {
    Selected(Selection),
    /// Nothing to run now; carries the front entry's start time when known.
    Waiting(Option<f64>),
}

impl NextObservation {
    pub fn selected(&self) -> Option<&Selection> {
        match self {
            NextObservation::Selected(s) => Some(s),
            NextObservation::Waiting(_) => None,
        }
    }
}

/// Outcome of a bulk load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub accepted: Vec<Qid>,
    pub failed: usize,
}

/// Turns removals into audit entries.
struct Recorder<'a> {
    audit: &'a mut AuditLog,
    current: &'a mut Option<Qid>,
    queue: &'a str,
    now: f64,
}

impl RemovalSink for Recorder<'_> {
    fn removed(&mut self, job: QueuedTarget, position: usize, reason: RemovalReason) {
        if reason.is_execution() {
            info!(queue = self.queue, qid = job.qid, target = job.target, name = %job.name, "target executed");
        } else {
            warn!(queue = self.queue, qid = job.qid, target = job.target, name = %job.name, %reason, position, "removing target");
        }
        if *self.current == Some(job.qid) {
            *self.current = None;
        }
        self.audit.record(&job, position, reason, self.now);
    }
}

pub struct ExecutorQueue {
    name: String,
    queue: TargetQueue,
    station: Arc<dyn Station>,
    audit: AuditLog,
    current: Option<Qid>,
    timer_added: Option<f64>,
    snapshot: QueueSnapshot,
}

impl ExecutorQueue {
    pub fn new(
        name: impl Into<String>,
        observatory: Arc<dyn Observatory>,
        policy: QueuePolicy,
        station: Arc<dyn Station>,
    ) -> Self {
        let name = name.into();
        Self {
            snapshot: QueueSnapshot {
                name: name.clone(),
                ..QueueSnapshot::default()
            },
            name,
            queue: TargetQueue::new(observatory, policy),
            station,
            audit: AuditLog::new(),
            current: None,
            timer_added: None,
        }
    }

    pub fn from_config(
        config: &QueueConfig,
        observatory: Arc<dyn Observatory>,
        station: Arc<dyn Station>,
    ) -> Self {
        Self::new(config.name.clone(), observatory, config.policy.clone(), station)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &TargetQueue {
        &self.queue
    }

    pub fn policy(&self) -> &QueuePolicy {
        self.queue.policy()
    }

    pub fn set_policy(&mut self, policy: QueuePolicy) {
        info!(queue = %self.name, %policy, "queue policy changed");
        self.queue.set_policy(policy);
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Last published state.
    pub fn snapshot(&self) -> &QueueSnapshot {
        &self.snapshot
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn now(&self) -> f64 {
        self.station.now()
    }

    fn resolve(&self, id: TargetId) -> QueueResult<Target> {
        self.queue
            .observatory()
            .resolve(id)
            .ok_or(QueueError::UnknownTarget(id))
    }

    /// Run `f` with the queue and a sink that audits at `now`.
    fn with_recorder<R>(
        &mut self,
        now: f64,
        f: impl FnOnce(&mut TargetQueue, &mut dyn RemovalSink) -> R,
    ) -> R {
        let mut recorder = Recorder {
            audit: &mut self.audit,
            current: &mut self.current,
            queue: &self.name,
            now,
        };
        f(&mut self.queue, &mut recorder)
    }

    // ── Insertion ──────────────────────────────────────────────────

    /// Insert `target` ahead of everything else.
    pub fn add_front(
        &mut self,
        target: TargetId,
        t_start: Option<f64>,
        t_end: Option<f64>,
    ) -> QueueResult<Qid> {
        let target = self.resolve(target)?;
        let job = QueuedTarget::new(&target, t_start, t_end);
        let qid = job.qid;
        info!(queue = %self.name, qid, target = target.id, name = %target.name, "target added to front");
        self.queue.insert(0, job);
        self.update_vals();
        Ok(qid)
    }

    /// Insert `target` at `index`, or at the back when no index is given.
    pub fn add_target(
        &mut self,
        target: TargetId,
        t_start: Option<f64>,
        t_end: Option<f64>,
        index: Option<usize>,
        plan_id: Option<i32>,
        hard: bool,
    ) -> QueueResult<Qid> {
        self.check_index(index)?;
        let target = self.resolve(target)?;
        let job = QueuedTarget::new(&target, t_start, t_end)
            .with_plan(plan_id)
            .with_hard(hard);
        let qid = self.place(job, index);
        self.update_vals();
        Ok(qid)
    }

    /// Insert at the first slot where the target is observable for its
    /// whole length and where `ordering` does not push it further back.
    /// Falls back to appending.
    pub fn add_first(
        &mut self,
        request: QueueRequest,
        ordering: FirstOrdering,
        reference_now: f64,
    ) -> QueueResult<Qid> {
        let target = self.resolve(request.target)?;
        let qid = self.place_first(&target, &request, None, ordering, reference_now);
        self.update_vals();
        Ok(qid)
    }

    fn check_index(&self, index: Option<usize>) -> QueueResult<()> {
        match index {
            Some(index) if index > self.queue.len() => Err(QueueError::IndexOutOfRange {
                index,
                len: self.queue.len(),
            }),
            _ => Ok(()),
        }
    }

    fn place(&mut self, job: QueuedTarget, index: Option<usize>) -> Qid {
        let qid = job.qid;
        info!(queue = %self.name, qid, target = job.target, name = %job.name, ?index, "target queued");
        match index {
            Some(index) => self.queue.insert(index, job),
            None => self.queue.push_back(job),
        }
        qid
    }

    fn place_first(
        &mut self,
        target: &Target,
        request: &QueueRequest,
        watch: Option<WatchId>,
        ordering: FirstOrdering,
        reference_now: f64,
    ) -> Qid {
        let job = QueuedTarget::new(target, request.t_start, request.t_end)
            .with_plan(request.plan_id)
            .with_hard(request.hard)
            .with_watch(watch);
        let observatory = Arc::clone(self.queue.observatory());
        let length = observatory
            .observation_length(target.id, None)
            .ok()
            .filter(|l| *l > 0.0)
            .unwrap_or(DEFAULT_OBSERVATION_SECS);

        let mut now = request.t_start.unwrap_or(reference_now);
        let mut slot = None;
        for (index, entry) in self.queue.iter().enumerate() {
            let to = entry.t_start.unwrap_or(now) + length;
            let feasible = observatory
                .satisfied_window(target.id, now, to, length, WINDOW_STEP_SECS)
                .is_ok_and(|w| w.is_observable());
            let skip = match ordering {
                FirstOrdering::None => false,
                FirstOrdering::Ha => {
                    let jd = julian_from_unix(now);
                    match (
                        observatory.hour_angle(target.id, jd),
                        observatory.hour_angle(entry.target, jd),
                    ) {
                        (Ok(new), Ok(queued)) => new > queued,
                        _ => false,
                    }
                }
                FirstOrdering::SetFirst => {
                    let new = self.queue.window(&job, now);
                    let queued = self.queue.window(entry, now);
                    (new.class(), new.remaining(now)) > (queued.class(), queued.remaining(now))
                }
            };
            if feasible && !skip {
                slot = Some(index);
                break;
            }
            now = to;
        }
        debug!(queue = %self.name, target = target.id, ?ordering, ?slot, "first possible slot");
        self.place(job, slot)
    }

    // ── Removal and lifecycle ──────────────────────────────────────

    /// Remove the entry at `index` on operator request.
    pub fn remove_index(&mut self, index: usize) -> QueueResult<Qid> {
        if index >= self.queue.len() {
            return Err(QueueError::IndexOutOfRange {
                index,
                len: self.queue.len(),
            });
        }
        let now = self.station.now();
        let qid = self
            .with_recorder(now, |q, sink| q.remove_at(index, RemovalReason::Operator, sink))
            .ok_or(QueueError::IndexOutOfRange {
                index,
                len: self.queue.len(),
            })?;
        self.update_vals();
        Ok(qid)
    }

    pub fn remove_qid(&mut self, qid: Qid) -> QueueResult<()> {
        let index = self.queue.find_by_qid(qid).ok_or(QueueError::UnknownQid(qid))?;
        self.remove_index(index).map(|_| ())
    }

    /// Record which entry the executor is running. The entry stays queued
    /// until `finish_current`.
    pub fn set_current_target(&mut self, qid: Qid) -> QueueResult<()> {
        if self.queue.find_by_qid(qid).is_none() {
            return Err(QueueError::UnknownQid(qid));
        }
        debug!(queue = %self.name, qid, "current target set");
        self.current = Some(qid);
        Ok(())
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// The entry the executor is running, while it is still queued.
    pub fn current(&self) -> Option<&QueuedTarget> {
        self.current
            .and_then(|qid| self.queue.find_by_qid(qid))
            .and_then(|index| self.queue.get(index))
    }

    /// Complete the running entry. Run-once queues move it to the executed
    /// log; a CIRCULAR queue that keeps entries rotates it to the back.
    pub fn finish_current(&mut self, now: f64) -> Option<Qid> {
        let qid = self.current.take()?;
        let Some(index) = self.queue.find_by_qid(qid) else {
            debug!(queue = %self.name, qid, "finished target already left the queue");
            return None;
        };
        if self.queue.policy().remove_after_execution {
            self.with_recorder(now, |q, sink| q.remove_at(index, RemovalReason::Started, sink));
        } else if self.queue.policy().mode == QueueMode::Circular {
            self.queue.move_to_back(index);
        }
        self.update_vals();
        Some(qid)
    }

    /// Drop every unpinned entry. Pinned entries stay.
    pub fn clear_next(&mut self) -> usize {
        let now = self.station.now();
        let removed =
            self.with_recorder(now, |q, sink| q.remove_where(RemovalReason::Cleared, sink, |j| !j.hard));
        info!(queue = %self.name, removed, kept = self.queue.len(), "queue cleared");
        self.update_vals();
        removed
    }

    // ── Idle tick ──────────────────────────────────────────────────

    /// Expiry and visibility filtering; publishes when anything changed.
    pub fn filter(&mut self, now: f64, max_length: Option<f64>) -> bool {
        let before = (self.queue.qids(), self.audit.len());
        let observable = self.with_recorder(now, |q, sink| q.filter(now, max_length, sink));
        if (self.queue.qids(), self.audit.len()) != before {
            self.update_vals();
        }
        observable
    }

    pub fn sort_queue(&mut self, now: f64) {
        let before = self.queue.qids();
        self.queue.sort_queue(now);
        if self.queue.qids() != before {
            self.update_vals();
        }
    }

    /// Whether the entry after the front is already due.
    pub fn front_time_expires(&self, now: f64) -> bool {
        self.queue.front_time_expires(now)
    }

    // ── Selection ──────────────────────────────────────────────────

    /// Pick the entry the executor should run next.
    ///
    /// A disabled or empty queue is left untouched. Otherwise the queue is
    /// filtered against `requested_length`, sorted and the first valid
    /// entry brought to the front; it is selected when it fits. When nothing is valid,
    /// a wakeup is requested shortly before the front entry's start (or
    /// end) and its start time is returned.
    pub fn select_next_observation(&mut self, requested_length: Option<f64>) -> NextObservation {
        if !self.queue.policy().enabled || self.queue.is_empty() {
            return NextObservation::Waiting(None);
        }
        let now = self.station.now();
        self.with_recorder(now, |q, sink| q.filter(now, requested_length, sink));
        self.queue.sort_queue(now);
        let valid = self.queue.before_change(now);
        let outcome = if valid {
            self.take_front(requested_length)
        } else {
            self.arm_timers(now)
        };
        self.update_vals();
        outcome
    }

    fn take_front(&mut self, requested_length: Option<f64>) -> NextObservation {
        let fits = match (requested_length, self.queue.front()) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(limit), Some(front)) => self
                .queue
                .maximal_duration(front, None)
                .is_some_and(|d| d < limit),
        };
        if !fits {
            debug!(queue = %self.name, ?requested_length, "front target does not fit requested length");
            return NextObservation::Waiting(self.queue.front().and_then(|f| f.t_start));
        }
        let Some(front) = self.queue.get_mut(0) else {
            return NextObservation::Waiting(None);
        };
        let hard = front.hard && front.t_start.is_some() && !front.interrupt_issued;
        if hard {
            front.interrupt_issued = true;
        }
        let selection = Selection {
            target: front.target,
            qid: front.qid,
            name: front.name.clone(),
            plan_id: front.plan_id,
            hard,
        };
        info!(queue = %self.name, qid = selection.qid, target = selection.target, name = %selection.name, hard, "next observation selected");
        NextObservation::Selected(selection)
    }

    fn arm_timers(&mut self, now: f64) -> NextObservation {
        let Some(front) = self.queue.front() else {
            return NextObservation::Waiting(None);
        };
        let horizon = now + WAKEUP_LEAD_SECS;
        let fresh = |t: &f64| *t > horizon && self.timer_added != Some(*t);
        let wakeup = match (front.t_start.filter(fresh), front.t_end.filter(fresh)) {
            (Some(start), _) => Some((start, WakeEvent::NextStart)),
            (None, Some(end)) => Some((end, WakeEvent::NextEnd)),
            (None, None) => None,
        };
        let next_start = front.t_start;
        if let Some((at, event)) = wakeup {
            self.station.schedule_wakeup(at - WAKEUP_LEAD_SECS, event);
            self.timer_added = Some(at);
        }
        NextObservation::Waiting(next_start)
    }

    // ── Bulk commands ──────────────────────────────────────────────

    /// Load targets from text parameters (see `ingest`).
    ///
    /// Entries that do not parse, name unknown targets or (with
    /// `test_constraints`) violate constraints at their start are counted
    /// as failed; the rest are queued from `index` on, at the back, or at
    /// their first possible slot from `night_start`.
    pub fn queue_from_conn(
        &mut self,
        params: &str,
        index: Option<usize>,
        with_times: bool,
        watch: Option<WatchId>,
        try_first_possible: bool,
        night_start: f64,
    ) -> QueueResult<IngestReport> {
        self.check_index(index)?;
        let load = parse_queue_load(params, with_times, try_first_possible);
        let mut report = IngestReport::default();
        let mut at = index;
        for request in load.requests {
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "rejecting queue entry");
                    report.failed += 1;
                    continue;
                }
            };
            let target = match self.resolve(request.target) {
                Ok(target) => target,
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "rejecting queue entry");
                    report.failed += 1;
                    continue;
                }
            };
            if self.queue.policy().test_constraints
                && self.violates_constraints(target.id, request.t_start.unwrap_or(night_start))
            {
                warn!(queue = %self.name, target = target.id, name = %target.name, "rejecting queue entry violating constraints");
                report.failed += 1;
                continue;
            }
            let qid = if try_first_possible {
                self.place_first(&target, &request, watch, load.ordering, night_start)
            } else {
                let job = QueuedTarget::new(&target, request.t_start, request.t_end)
                    .with_plan(request.plan_id)
                    .with_hard(request.hard)
                    .with_watch(watch);
                let qid = self.place(job, at);
                at = at.map(|i| i + 1);
                qid
            };
            report.accepted.push(qid);
        }
        info!(queue = %self.name, accepted = report.accepted.len(), failed = report.failed, "queue loaded");
        self.update_vals();
        Ok(report)
    }

    /// Apply `(qid target start end)` updates: qid 0 appends, a negative
    /// qid removes that entry and a positive one replaces its times.
    /// Nothing is applied unless every tuple parses.
    pub fn queue_from_conn_qids(&mut self, params: &str) -> QueueResult<IngestReport> {
        let updates = parse_qid_updates(params)?;
        let now = self.station.now();
        let mut report = IngestReport::default();
        for update in updates {
            if update.qid == 0 {
                match self.resolve(update.target) {
                    Ok(target) => {
                        let job = QueuedTarget::new(&target, update.t_start, update.t_end);
                        report.accepted.push(self.place(job, None));
                    }
                    Err(e) => {
                        warn!(queue = %self.name, error = %e, "rejecting queue entry");
                        report.failed += 1;
                    }
                }
                continue;
            }
            let position = Qid::try_from(update.qid.unsigned_abs())
                .ok()
                .and_then(|qid| self.queue.find_by_qid(qid).map(|index| (qid, index)));
            let Some((qid, index)) = position else {
                warn!(queue = %self.name, qid = update.qid, "no queue entry for update");
                report.failed += 1;
                continue;
            };
            if update.qid < 0 {
                self.with_recorder(now, |q, sink| q.remove_at(index, RemovalReason::Operator, sink));
                report.accepted.push(qid);
                continue;
            }
            match self.queue.get_mut(index) {
                Some(job) if job.target == update.target => {
                    job.t_start = update.t_start;
                    job.t_end = update.t_end;
                    job.unobservable_reported = false;
                    report.accepted.push(qid);
                }
                _ => {
                    warn!(queue = %self.name, qid, target = update.target, "queue entry target mismatch");
                    report.failed += 1;
                }
            }
        }
        self.update_vals();
        Ok(report)
    }

    fn violates_constraints(&self, target: TargetId, at: f64) -> bool {
        match self
            .queue
            .observatory()
            .violated_constraints(target, julian_from_unix(at))
        {
            Ok(violated) => !violated.is_empty(),
            Err(e) => {
                warn!(target, error = %e, "constraint check failed");
                true
            }
        }
    }

    /// Re-check entries depending on the external condition `watch_id`.
    /// Unpinned violators are removed; pinned ones only logged.
    pub fn revalidate_constraints(&mut self, watch_id: WatchId) -> usize {
        let now = self.station.now();
        let jd = julian_from_unix(now);
        let observatory = Arc::clone(self.queue.observatory());
        let queue_name = self.name.clone();
        let removed = self.with_recorder(now, |q, sink| {
            q.remove_where(RemovalReason::ConstraintsViolated, sink, |job| {
                if job.watch != Some(watch_id) {
                    return false;
                }
                let violated = match observatory.violated_constraints(job.target, jd) {
                    Ok(violated) => !violated.is_empty(),
                    Err(e) => {
                        warn!(queue = %queue_name, qid = job.qid, error = %e, "constraint check failed");
                        true
                    }
                };
                if violated && job.hard {
                    warn!(queue = %queue_name, qid = job.qid, target = job.target, "pinned target violates constraints, keeping");
                    return false;
                }
                violated
            })
        });
        if removed > 0 {
            self.update_vals();
        }
        removed
    }

    // ── Publication ────────────────────────────────────────────────

    /// Rebuild the published state and hand it to the station.
    pub fn update_vals(&mut self) {
        self.snapshot = QueueSnapshot {
            name: self.name.clone(),
            pending: self
                .queue
                .iter()
                .enumerate()
                .map(|(position, job)| PendingEntry::from_job(job, position))
                .collect(),
            removed: self.audit.removed().to_vec(),
            executed: self.audit.executed().to_vec(),
        };
        self.station.publish(&self.snapshot);
    }
}

impl std::fmt::Debug for ExecutorQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorQueue")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::ManualStation;
    use skyq_core::testing::ScriptedSky;

    const NOW: f64 = 1_700_000_000.0;

    fn setup(policy: QueuePolicy) -> (ExecutorQueue, Arc<ScriptedSky>, Arc<ManualStation>) {
        let sky = ScriptedSky::new();
        for id in 1..=6 {
            sky.add(id, &format!("t{id}"));
        }
        let sky = Arc::new(sky);
        let station = Arc::new(ManualStation::new(NOW));
        let q = ExecutorQueue::new("plan", sky.clone(), policy, station.clone());
        (q, sky, station)
    }

    fn targets(q: &ExecutorQueue) -> Vec<TargetId> {
        q.queue().iter().map(|j| j.target).collect()
    }

    fn request(target: TargetId) -> QueueRequest {
        QueueRequest {
            target,
            t_start: None,
            t_end: None,
            plan_id: None,
            hard: false,
        }
    }

    #[test]
    fn unknown_target_is_rejected_without_mutation() {
        let (mut q, _, station) = setup(QueuePolicy::default());
        q.add_target(1, None, None, None, None, false).unwrap();
        let published = station.publish_count();
        assert!(matches!(q.add_target(99, None, None, None, None, false), Err(QueueError::UnknownTarget(99))));
        assert!(matches!(q.add_front(99, None, None), Err(QueueError::UnknownTarget(99))));
        assert!(q.add_first(request(99), FirstOrdering::None, NOW).is_err());
        assert_eq!(targets(&q), vec![1]);
        assert!(q.audit().is_empty());
        assert_eq!(station.publish_count(), published);
    }

    #[test]
    fn insertion_positions() {
        let (mut q, _, _) = setup(QueuePolicy::default());
        q.add_target(1, None, None, None, None, false).unwrap();
        q.add_target(2, None, None, None, None, false).unwrap();
        q.add_front(3, None, None).unwrap();
        q.add_target(4, None, None, Some(1), Some(8), true).unwrap();
        assert_eq!(targets(&q), vec![3, 4, 1, 2]);
        assert!(matches!(
            q.add_target(5, None, None, Some(9), None, false),
            Err(QueueError::IndexOutOfRange { index: 9, len: 4 })
        ));
        let entry = &q.snapshot().pending[1];
        assert_eq!(entry.plan_id, Some(8));
        assert!(entry.hard);
        assert_eq!(entry.position, 1);
    }

    #[test]
    fn add_first_set_first_goes_before_later_setting_entry() {
        let (mut q, sky, _) = setup(QueuePolicy::default());
        sky.update(2, |t| t.sets_at = Some(NOW + 600.0));
        sky.update(1, |t| t.sets_at = Some(NOW + 300.0));
        sky.update(3, |t| t.sets_at = Some(NOW + 1200.0));
        q.add_target(2, None, None, None, None, false).unwrap();
        q.add_first(request(1), FirstOrdering::SetFirst, NOW).unwrap();
        assert_eq!(targets(&q), vec![1, 2]);
        q.add_first(request(3), FirstOrdering::SetFirst, NOW).unwrap();
        assert_eq!(targets(&q), vec![1, 2, 3]);
    }

    #[test]
    fn add_first_ha_keeps_ascending_hour_angle() {
        let (mut q, sky, _) = setup(QueuePolicy::default());
        sky.update(1, |t| t.hour_angle = -20.0);
        sky.update(2, |t| t.hour_angle = 30.0);
        sky.update(3, |t| t.hour_angle = 5.0);
        q.add_target(1, None, None, None, None, false).unwrap();
        q.add_target(2, None, None, None, None, false).unwrap();
        q.add_first(request(3), FirstOrdering::Ha, NOW).unwrap();
        assert_eq!(targets(&q), vec![1, 3, 2]);
    }

    #[test]
    fn add_first_skips_infeasible_slots() {
        let (mut q, sky, _) = setup(QueuePolicy::default());
        sky.update(4, |t| t.visible = false);
        q.add_target(1, None, None, None, None, false).unwrap();
        q.add_first(request(4), FirstOrdering::None, NOW).unwrap();
        assert_eq!(targets(&q), vec![1, 4]);
        q.add_first(request(2), FirstOrdering::None, NOW).unwrap();
        assert_eq!(targets(&q), vec![2, 1, 4]);
    }

    #[test]
    fn select_on_empty_queue_waits() {
        let (mut q, _, station) = setup(QueuePolicy::default());
        assert_eq!(q.select_next_observation(None), NextObservation::Waiting(None));
        assert_eq!(station.publish_count(), 0);
        assert!(station.wakeups().is_empty());
    }

    #[test]
    fn disabled_queue_selects_nothing() {
        let (mut q, _, _) = setup(QueuePolicy {
            enabled: false,
            ..QueuePolicy::default()
        });
        q.add_target(1, None, None, None, None, false).unwrap();
        assert_eq!(q.select_next_observation(None), NextObservation::Waiting(None));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn select_returns_front_and_respects_length() {
        let (mut q, sky, _) = setup(QueuePolicy::default());
        sky.update(1, |t| t.duration = Some(600.0));
        q.add_target(1, None, None, None, Some(3), false).unwrap();
        assert_eq!(q.select_next_observation(Some(300.0)), NextObservation::Waiting(None));
        let next = q.select_next_observation(Some(900.0));
        let sel = next.selected().unwrap();
        assert_eq!(sel.target, 1);
        assert_eq!(sel.plan_id, Some(3));
        assert!(!sel.hard);
        // selection alone does not dequeue
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn shorter_entry_behind_long_front_is_selected() {
        let (mut q, sky, _) = setup(QueuePolicy::default());
        sky.update(1, |t| t.duration = Some(3600.0));
        q.add_target(1, None, None, None, None, false).unwrap();
        q.add_target(2, None, None, None, None, false).unwrap();
        let next = q.select_next_observation(Some(300.0));
        assert_eq!(next.selected().map(|s| s.target), Some(2));
        assert_eq!(targets(&q), vec![2, 1]);
        assert!(q.audit().is_empty());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn hard_interruption_is_issued_once() {
        let (mut q, _, _) = setup(QueuePolicy::default());
        q.add_target(1, Some(NOW - 10.0), Some(NOW + 600.0), None, None, true).unwrap();
        assert!(q.select_next_observation(None).selected().unwrap().hard);
        assert!(!q.select_next_observation(None).selected().unwrap().hard);
        assert!(q.queue().front().unwrap().hard);
    }

    #[test]
    fn future_start_arms_wakeup_once() {
        let (mut q, _, station) = setup(QueuePolicy::default());
        q.add_target(1, Some(NOW + 3600.0), None, None, None, false).unwrap();
        assert_eq!(q.select_next_observation(None), NextObservation::Waiting(Some(NOW + 3600.0)));
        assert_eq!(q.select_next_observation(None), NextObservation::Waiting(Some(NOW + 3600.0)));
        assert_eq!(station.wakeups(), vec![(NOW + 3540.0, WakeEvent::NextStart)]);
    }

    #[test]
    fn near_start_does_not_arm_wakeup() {
        let (mut q, _, station) = setup(QueuePolicy::default());
        q.add_target(1, Some(NOW + 30.0), None, None, None, false).unwrap();
        assert_eq!(q.select_next_observation(None), NextObservation::Waiting(Some(NOW + 30.0)));
        assert!(station.wakeups().is_empty());
    }

    #[test]
    fn unobservable_front_with_end_arms_end_wakeup() {
        let (mut q, sky, station) = setup(QueuePolicy::default());
        sky.update(1, |t| t.visible = false);
        q.add_target(1, None, Some(NOW + 7200.0), None, None, true).unwrap();
        assert_eq!(q.select_next_observation(None), NextObservation::Waiting(None));
        assert_eq!(station.wakeups(), vec![(NOW + 7140.0, WakeEvent::NextEnd)]);
    }

    #[test]
    fn finish_moves_entry_to_executed_log() {
        let (mut q, _, station) = setup(QueuePolicy::default());
        q.add_target(1, None, None, None, None, false).unwrap();
        q.add_target(2, None, None, None, None, false).unwrap();
        let sel = q.select_next_observation(None).selected().cloned().unwrap();
        q.set_current_target(sel.qid).unwrap();
        assert_eq!(q.current().unwrap().qid, sel.qid);
        assert_eq!(q.len(), 2);
        assert_eq!(q.finish_current(NOW + 60.0), Some(sel.qid));
        assert_eq!(targets(&q), vec![2]);
        assert_eq!(q.audit().executed().len(), 1);
        assert_eq!(q.audit().executed()[0].time, NOW + 60.0);
        let published = station.last_published().unwrap();
        assert_eq!(published.executed[0].qid, sel.qid);
        assert_eq!(published.pending.len(), 1);
        assert!(q.current().is_none());
    }

    #[test]
    fn circular_queue_rotates_finished_entry() {
        let (mut q, _, _) = setup(QueuePolicy {
            mode: QueueMode::Circular,
            remove_after_execution: false,
            ..QueuePolicy::default()
        });
        for id in 1..=3 {
            q.add_target(id, None, None, None, None, false).unwrap();
        }
        let sel = q.select_next_observation(None).selected().cloned().unwrap();
        q.set_current_target(sel.qid).unwrap();
        q.finish_current(NOW);
        assert_eq!(targets(&q), vec![2, 3, 1]);
        assert!(q.audit().is_empty());
    }

    #[test]
    fn set_current_requires_queued_entry() {
        let (mut q, _, _) = setup(QueuePolicy::default());
        assert!(matches!(q.set_current_target(12345), Err(QueueError::UnknownQid(12345))));
    }

    #[test]
    fn clear_next_keeps_pinned() {
        let (mut q, _, _) = setup(QueuePolicy::default());
        q.add_target(1, None, None, None, None, true).unwrap();
        q.add_target(2, None, None, None, None, false).unwrap();
        assert_eq!(q.clear_next(), 1);
        assert_eq!(targets(&q), vec![1]);
        assert_eq!(q.audit().removed()[0].reason, RemovalReason::Cleared);
        assert_eq!(q.audit().removed()[0].target, 2);
    }

    #[test]
    fn operator_removal() {
        let (mut q, _, _) = setup(QueuePolicy::default());
        let a = q.add_target(1, None, None, None, None, false).unwrap();
        q.add_target(2, None, None, None, None, false).unwrap();
        q.remove_qid(a).unwrap();
        assert!(matches!(q.remove_qid(a), Err(QueueError::UnknownQid(_))));
        assert!(matches!(q.remove_index(3), Err(QueueError::IndexOutOfRange { .. })));
        assert_eq!(q.remove_index(0).unwrap(), q.audit().removed()[1].qid);
        assert!(q.is_empty());
        assert!(q.audit().removed().iter().all(|r| r.reason == RemovalReason::Operator));
    }

    #[test]
    fn queue_from_conn_counts_failures() {
        let (mut q, sky, _) = setup(QueuePolicy::default());
        sky.update(3, |t| t.violated = vec!["airmass".to_string()]);
        let report = q
            .queue_from_conn("1 99 2 x 3 4", None, false, None, false, NOW)
            .unwrap();
        assert_eq!(report.failed, 3);
        assert_eq!(report.accepted.len(), 3);
        assert_eq!(targets(&q), vec![1, 2, 4]);
    }

    #[test]
    fn queue_from_conn_inserts_at_index_in_order() {
        let (mut q, _, _) = setup(QueuePolicy::default());
        q.add_target(1, None, None, None, None, false).unwrap();
        q.add_target(2, None, None, None, None, false).unwrap();
        q.queue_from_conn("5 6", Some(1), false, Some(4), false, NOW).unwrap();
        assert_eq!(targets(&q), vec![1, 5, 6, 2]);
        assert_eq!(q.queue().get(1).unwrap().watch, Some(4));
        assert!(q.queue_from_conn("5", Some(10), false, None, false, NOW).is_err());
    }

    #[test]
    fn queue_from_conn_first_possible() {
        let (mut q, sky, _) = setup(QueuePolicy::default());
        sky.update(1, |t| t.sets_at = Some(NOW + 3600.0));
        sky.update(2, |t| t.sets_at = Some(NOW + 600.0));
        q.add_target(1, None, None, None, None, false).unwrap();
        let report = q.queue_from_conn("2 2", None, false, None, true, NOW).unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(targets(&q), vec![2, 1]);
    }

    #[test]
    fn qid_updates_insert_remove_and_retime() {
        let (mut q, _, _) = setup(QueuePolicy::default());
        let a = q.add_target(1, None, None, None, None, false).unwrap();
        let b = q.add_target(2, None, None, None, None, false).unwrap();
        let params = format!("0 3 - - -{a} 1 - - {b} 2 100 200 {b} 5 - - 0 99 - -");
        let report = q.queue_from_conn_qids(&params).unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.accepted.len(), 3);
        assert_eq!(targets(&q), vec![2, 3]);
        let retimed = q.queue().front().unwrap();
        assert_eq!(retimed.t_start, Some(100.0));
        assert_eq!(retimed.t_end, Some(200.0));
        assert_eq!(q.audit().removed()[0].qid, a);

        assert!(q.queue_from_conn_qids("0 3").is_err());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn revalidation_removes_unpinned_watchers() {
        let (mut q, sky, _) = setup(QueuePolicy::default());
        q.queue_from_conn("1 2 3", None, false, Some(7), false, NOW).unwrap();
        q.add_target(4, None, None, None, None, false).unwrap();
        if let Some(job) = q.queue.get_mut(1) {
            job.hard = true;
        }
        for id in 1..=4 {
            sky.update(id, |t| t.violated = vec!["clouds".to_string()]);
        }
        assert_eq!(q.revalidate_constraints(7), 2);
        assert_eq!(targets(&q), vec![2, 4]);
        assert!(q
            .audit()
            .removed()
            .iter()
            .all(|r| r.reason == RemovalReason::ConstraintsViolated));
        assert_eq!(q.revalidate_constraints(8), 0);
    }

    #[test]
    fn filter_publishes_expiry() {
        let (mut q, _, station) = setup(QueuePolicy::default());
        q.add_target(1, None, Some(NOW + 10.0), None, None, false).unwrap();
        let published = station.publish_count();
        assert!(q.filter(NOW, None));
        assert_eq!(station.publish_count(), published);
        assert!(!q.filter(NOW + 10.0, None));
        assert_eq!(station.publish_count(), published + 1);
        let snapshot = station.last_published().unwrap();
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.removed[0].reason, RemovalReason::TimesExpired);
    }
}
