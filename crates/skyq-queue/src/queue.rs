//! `TargetQueue`: the ordered sequence of entries and the policy-neutral
//! filtering primitives.
//!
//! The sequence order is the intended execution order; the front entry is
//! the next candidate. Removals are reported through a `RemovalSink`, so
//! the same primitives serve the live executor queue (which audits them)
//! and forecast copies (which do not).

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use skyq_core::{julian_from_unix, Equatorial, Observatory, QueueMode, QueuePolicy, TargetId};

use crate::audit::{RemovalReason, RemovalSink};
use crate::job::{Qid, QueuedTarget};

#[derive(Clone)]
pub struct TargetQueue {
    entries: VecDeque<QueuedTarget>,
    observatory: Arc<dyn Observatory>,
    policy: QueuePolicy,
}

impl std::fmt::Debug for TargetQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetQueue")
            .field("entries", &self.entries)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TargetQueue {
    pub fn new(observatory: Arc<dyn Observatory>, policy: QueuePolicy) -> Self {
        Self {
            entries: VecDeque::new(),
            observatory,
            policy,
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: QueuePolicy) {
        self.policy = policy;
    }

    pub fn observatory(&self) -> &Arc<dyn Observatory> {
        &self.observatory
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&QueuedTarget> {
        self.entries.front()
    }

    pub fn get(&self, index: usize) -> Option<&QueuedTarget> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedTarget> {
        self.entries.iter()
    }

    /// Queue ids in current order.
    pub fn qids(&self) -> Vec<Qid> {
        self.entries.iter().map(|j| j.qid).collect()
    }

    // ── Lookup ─────────────────────────────────────────────────────

    /// Position of the first entry for `target`.
    pub fn find_by_target(&self, target: TargetId) -> Option<usize> {
        self.entries.iter().position(|j| j.target == target)
    }

    /// Position of the entry with queue id `qid`.
    pub fn find_by_qid(&self, qid: Qid) -> Option<usize> {
        self.entries.iter().position(|j| j.qid == qid)
    }

    // ── Structural mutation ────────────────────────────────────────

    /// Insert at `index`, clamped to the queue length.
    pub(crate) fn insert(&mut self, index: usize, job: QueuedTarget) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, job);
    }

    pub(crate) fn push_back(&mut self, job: QueuedTarget) {
        self.entries.push_back(job);
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut QueuedTarget> {
        self.entries.get_mut(index)
    }

    /// Remove the entry at `index` and report it to `sink`.
    pub(crate) fn remove_at(
        &mut self,
        index: usize,
        reason: RemovalReason,
        sink: &mut dyn RemovalSink,
    ) -> Option<Qid> {
        let job = self.entries.remove(index)?;
        let qid = job.qid;
        sink.removed(job, index, reason);
        Some(qid)
    }

    /// Move the entry at `index` to the back.
    pub(crate) fn move_to_back(&mut self, index: usize) {
        if let Some(job) = self.entries.remove(index) {
            self.entries.push_back(job);
        }
    }

    /// Remove every entry matching `pred`, front to back.
    pub(crate) fn remove_where(
        &mut self,
        reason: RemovalReason,
        sink: &mut dyn RemovalSink,
        mut pred: impl FnMut(&QueuedTarget) -> bool,
    ) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.entries.len() {
            if pred(&self.entries[i]) {
                self.remove_at(i, reason, sink);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Stable-reorder the queue to follow `list`. Each listed target claims
    /// the first entry for it not yet placed; unlisted entries keep their
    /// relative order behind the placed ones.
    pub fn order_by_external_list(&mut self, list: &[TargetId]) {
        let mut rest: Vec<Option<QueuedTarget>> = self.entries.drain(..).map(Some).collect();
        let mut ordered = VecDeque::with_capacity(rest.len());
        for id in list {
            let slot = rest
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|j| j.target == *id));
            if let Some(job) = slot.and_then(Option::take) {
                ordered.push_back(job);
            }
        }
        ordered.extend(rest.into_iter().flatten());
        self.entries = ordered;
    }

    /// Stable-sort the unpinned entries by `keys` (one per entry, in queue
    /// order). Pinned entries keep their positions; the unpinned ones are
    /// permuted among the remaining slots.
    pub(crate) fn sort_unpinned<K>(&mut self, keys: Vec<K>, cmp: impl Fn(&K, &K) -> std::cmp::Ordering) {
        debug_assert_eq!(keys.len(), self.entries.len());
        let mut slots: Vec<Option<QueuedTarget>> = self.entries.drain(..).map(Some).collect();
        let mut free = Vec::new();
        let mut movable = Vec::new();
        for (index, key) in keys.into_iter().enumerate() {
            if slots[index].as_ref().is_some_and(|j| !j.hard) {
                free.push(index);
                if let Some(job) = slots[index].take() {
                    movable.push((key, job));
                }
            }
        }
        movable.sort_by(|a, b| cmp(&a.0, &b.0));
        for (index, (_, job)) in free.into_iter().zip(movable) {
            slots[index] = Some(job);
        }
        self.entries = slots.into_iter().flatten().collect();
    }

    // ── Geometry helpers ───────────────────────────────────────────

    /// Estimated observation length of `job`, starting from `current`.
    pub fn maximal_duration(&self, job: &QueuedTarget, current: Option<&Equatorial>) -> Option<f64> {
        match self.observatory.observation_length(job.target, current) {
            Ok(length) => Some(length),
            Err(e) => {
                warn!(qid = job.qid, target = job.target, error = %e, "cannot estimate observation length");
                None
            }
        }
    }

    /// Horizon and constraint check for `job` at `jd`.
    ///
    /// If the entry starts after `jd`, `jd` is advanced to its start, so
    /// callers can continue timing from the returned value even when the
    /// check fails. Evaluation errors count as "not observable".
    pub fn is_above_horizon(&self, job: &QueuedTarget, jd: &mut f64) -> bool {
        if let Some(start) = job.t_start {
            let start_jd = julian_from_unix(start);
            if start_jd > *jd {
                *jd = start_jd;
            }
        }
        let hrz = match self.observatory.horizontal(job.target, *jd) {
            Ok(hrz) => hrz,
            Err(e) => {
                warn!(qid = job.qid, target = job.target, error = %e, "position unavailable, treating as unobservable");
                return false;
            }
        };
        if !self.observatory.above_horizon(job.target, &hrz) {
            return false;
        }
        if !self.policy.test_constraints {
            return true;
        }
        match self.observatory.violated_constraints(job.target, *jd) {
            Ok(violated) => violated.is_empty(),
            Err(e) => {
                warn!(qid = job.qid, target = job.target, error = %e, "constraint check failed, treating as unobservable");
                false
            }
        }
    }

    /// Window open and above horizon at `now`.
    fn is_valid_now(&self, job: &QueuedTarget, now: f64) -> bool {
        let mut jd = julian_from_unix(now);
        job.not_expired(now) && self.is_above_horizon(job, &mut jd)
    }

    // ── Selection support ──────────────────────────────────────────

    /// Bring the first currently valid entry to the front without removing
    /// anything. Returns whether the queue now has a valid front.
    pub fn before_change(&mut self, now: f64) -> bool {
        if self.policy.block_until_visible {
            return self.entries.front().is_some_and(|j| self.is_valid_now(j, now));
        }
        let found = self.entries.iter().position(|j| self.is_valid_now(j, now));
        match found {
            Some(0) => true,
            Some(index) => {
                if let Some(job) = self.entries.remove(index) {
                    debug!(qid = job.qid, target = job.target, from = index, "promoting valid entry to front");
                    self.entries.push_front(job);
                }
                true
            }
            None => false,
        }
    }

    /// True when the second entry's start time has passed, so holding the
    /// front any longer starves a time-critical successor.
    pub fn front_time_expires(&self, now: f64) -> bool {
        self.entries.get(1).is_some_and(|j| j.start_arrived(now))
    }

    // ── Filtering ──────────────────────────────────────────────────

    /// Remove expired entries, then drop or skip unobservable ones, until
    /// the sequence settles. Skipped entries are re-inserted right behind
    /// the observable front.
    ///
    /// Returns whether the front entry is observable (at its start time,
    /// if that lies in the future). Running it again with the same `now`
    /// leaves the sequence unchanged.
    pub fn filter(&mut self, now: f64, max_length: Option<f64>, sink: &mut dyn RemovalSink) -> bool {
        let mut observable = false;
        // every pass after the first needs a removal, so this bound is never hit
        for _ in 0..self.entries.len() + 2 {
            let before = self.qids();
            self.filter_expired(now, sink);
            let mut skipped = Vec::new();
            observable = self.filter_unobservable(now, max_length, &mut skipped, sink);
            let at = if self.entries.is_empty() { 0 } else { 1 };
            for (offset, job) in skipped.into_iter().enumerate() {
                self.entries.insert(at + offset, job);
            }
            if self.qids() == before {
                break;
            }
        }
        observable
    }

    /// Remove entries whose time is up.
    ///
    /// - FIFO: entries ahead of the last entry whose start time arrived
    ///   and which is observable now are preempted, pinned ones excepted
    /// - any entry whose end time passed
    /// - with `remove_after_execution`, entries whose observation started
    pub fn filter_expired(&mut self, now: f64, sink: &mut dyn RemovalSink) {
        if self.entries.is_empty() {
            return;
        }
        if self.policy.mode == QueueMode::Fifo {
            let claim = self
                .entries
                .iter()
                .rposition(|j| j.start_arrived(now) && self.is_valid_now(j, now));
            if let Some(mut claim) = claim {
                let mut i = 0;
                while i < claim {
                    if self.entries[i].hard {
                        i += 1;
                        continue;
                    }
                    self.remove_at(i, RemovalReason::NextNeeded, sink);
                    claim -= 1;
                }
            }
        }

        let remove_started = self.policy.remove_after_execution;
        let observatory = Arc::clone(&self.observatory);
        let mut i = 0;
        while i < self.entries.len() {
            let job = &self.entries[i];
            let reason = if job.end_passed(now) {
                Some(RemovalReason::TimesExpired)
            } else if remove_started && observatory.observation_started(job.target) {
                Some(RemovalReason::Started)
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    self.remove_at(i, reason, sink);
                }
                None => i += 1,
            }
        }
    }

    /// Scan from the front until an observable entry is found.
    ///
    /// Entries passed over are moved to `skipped` when the policy skips
    /// rather than removes, when they are pinned, or when a CIRCULAR entry
    /// waits for a future start; otherwise they are dropped as
    /// `Unobservable`. Observable entries longer than `max_length` are
    /// always skipped. With `block_until_visible` the scan stops at the
    /// front entry whatever its state.
    ///
    /// Returns whether the scan stopped at an observable entry.
    pub fn filter_unobservable(
        &mut self,
        now: f64,
        max_length: Option<f64>,
        skipped: &mut Vec<QueuedTarget>,
        sink: &mut dyn RemovalSink,
    ) -> bool {
        let jd = julian_from_unix(now);
        loop {
            let Some(job) = self.entries.front() else {
                return false;
            };
            let mut tjd = jd;
            let circular_wait =
                self.policy.mode == QueueMode::Circular && job.t_start.is_some_and(|s| s > now);
            if !circular_wait {
                let fits = match max_length {
                    None => true,
                    Some(limit) => self.maximal_duration(job, None).is_some_and(|d| d < limit),
                };
                let visible = self.is_above_horizon(job, &mut tjd);
                if fits && visible {
                    return true;
                }
                if self.policy.block_until_visible {
                    return false;
                }
                if visible {
                    // observable, only too long for the requested slot
                    if let Some(job) = self.entries.pop_front() {
                        debug!(qid = job.qid, target = job.target, ?max_length, "target too long, skipping");
                        skipped.push(job);
                    }
                    continue;
                }
            }

            let Some(mut job) = self.entries.pop_front() else {
                return false;
            };
            if self.policy.skip_below_horizon || circular_wait || job.hard {
                if !job.unobservable_reported {
                    warn!(qid = job.qid, target = job.target, name = %job.name, jd = tjd, "target unobservable, skipping");
                    job.unobservable_reported = true;
                }
                skipped.push(job);
            } else {
                warn!(qid = job.qid, target = job.target, name = %job.name, jd = tjd, "removing target below horizon");
                sink.removed(job, 0, RemovalReason::Unobservable);
            }
        }
    }
}
