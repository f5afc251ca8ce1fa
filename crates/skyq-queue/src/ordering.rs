//! Sort heuristics for `TargetQueue`.
//!
//! Every heuristic leaves pinned (hard) entries where they are and permutes
//! the rest. Keys are computed once per pass; a target whose geometry cannot
//! be evaluated sorts behind the ones that can.

use std::cmp::Ordering;

use tracing::{debug, warn};

use skyq_core::{julian_from_unix, unix_from_julian, QueueMode, Window};

use crate::job::QueuedTarget;
use crate::queue::TargetQueue;

/// How far ahead window evaluations look, seconds.
pub(crate) const LOOKAHEAD_SECS: f64 = 86_400.0;

/// Sampling step for window evaluations, seconds.
pub(crate) const WINDOW_STEP_SECS: f64 = 60.0;

struct MeridianKey {
    /// 0 west, 1 east, 2 unknown.
    side: u8,
    primary: f64,
    secondary: f64,
    priority: f64,
}

impl TargetQueue {
    /// Reorder the queue according to its mode. Does nothing while the
    /// queue blocks on its front entry.
    pub fn sort_queue(&mut self, now: f64) {
        if self.policy().block_until_visible || self.len() < 2 {
            return;
        }
        let jd = julian_from_unix(now);
        match self.policy().mode {
            QueueMode::Fifo | QueueMode::Circular => {}
            QueueMode::Highest => self.sort_highest(jd),
            QueueMode::WestEast => self.sort_west_east(jd),
            QueueMode::WestEastMeridian => self.sort_west_east_meridian(jd),
            QueueMode::OutOfLimits => self.sort_out_of_limits(jd),
        }
    }

    /// Observability window of `job` over the lookahead period from `from`.
    /// Evaluation errors are reported as `Window::Never`.
    pub fn window(&self, job: &QueuedTarget, from: f64) -> Window {
        match self.observatory().satisfied_window(
            job.target,
            from,
            from + LOOKAHEAD_SECS,
            0.0,
            WINDOW_STEP_SECS,
        ) {
            Ok(window) => window,
            Err(e) => {
                warn!(qid = job.qid, target = job.target, error = %e, "window evaluation failed");
                Window::Never
            }
        }
    }

    /// Seconds from `now` until `job` stops being observable.
    pub fn remaining_time(&self, job: &QueuedTarget, now: f64) -> f64 {
        self.window(job, now).remaining(now)
    }

    fn priority_of(&self, job: &QueuedTarget) -> f64 {
        self.observatory()
            .resolve(job.target)
            .map(|t| t.priority)
            .unwrap_or(f64::NEG_INFINITY)
    }

    fn altitude_of(&self, job: &QueuedTarget, jd: f64) -> Option<f64> {
        self.observatory().horizontal(job.target, jd).ok().map(|h| h.alt)
    }

    fn hour_angle_of(&self, job: &QueuedTarget, jd: f64) -> Option<f64> {
        self.observatory().hour_angle(job.target, jd).ok()
    }

    /// Highest priority first; higher altitude breaks ties.
    fn sort_highest(&mut self, jd: f64) {
        let keys: Vec<(f64, f64)> = self
            .iter()
            .map(|j| {
                (
                    self.priority_of(j),
                    self.altitude_of(j, jd).unwrap_or(f64::NEG_INFINITY),
                )
            })
            .collect();
        self.sort_unpinned(keys, |a, b| b.0.total_cmp(&a.0).then(b.1.total_cmp(&a.1)));
    }

    /// Westmost first, by descending hour angle.
    fn sort_west_east(&mut self, jd: f64) {
        let keys: Vec<Option<f64>> = self.iter().map(|j| self.hour_angle_of(j, jd)).collect();
        self.sort_unpinned(keys, |a, b| match (a, b) {
            (Some(a), Some(b)) => b.total_cmp(a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }

    /// Targets west of the meridian first, soonest to become unobservable
    /// first. Eastern targets follow, highest first, with the remaining
    /// time and then the priority breaking ties.
    pub fn sort_west_east_meridian(&mut self, jd: f64) {
        let now = unix_from_julian(jd);
        let keys: Vec<MeridianKey> = self
            .iter()
            .map(|j| {
                let priority = self.priority_of(j);
                match self.hour_angle_of(j, jd) {
                    Some(ha) if ha > 0.0 => MeridianKey {
                        side: 0,
                        primary: self.remaining_time(j, now),
                        secondary: 0.0,
                        priority,
                    },
                    Some(_) => MeridianKey {
                        side: 1,
                        primary: -self.altitude_of(j, jd).unwrap_or(f64::NEG_INFINITY),
                        secondary: self.remaining_time(j, now),
                        priority,
                    },
                    None => MeridianKey {
                        side: 2,
                        primary: 0.0,
                        secondary: 0.0,
                        priority,
                    },
                }
            })
            .collect();
        self.sort_unpinned(keys, |a, b| {
            a.side
                .cmp(&b.side)
                .then(a.primary.total_cmp(&b.primary))
                .then(a.secondary.total_cmp(&b.secondary))
                .then(b.priority.total_cmp(&a.priority))
        });
        debug!(entries = self.len(), "sorted west/east of meridian");
    }

    /// Earliest deadline first: ascending time until each target becomes
    /// unobservable. Never-observable targets go last; among equal
    /// deadlines the westmost goes first.
    pub fn sort_out_of_limits(&mut self, jd: f64) {
        let now = unix_from_julian(jd);
        let keys: Vec<(u8, f64, f64)> = self
            .iter()
            .map(|j| {
                let window = self.window(j, now);
                let ha = self.hour_angle_of(j, jd).unwrap_or(0.0);
                (window.class(), window.remaining(now), -ha)
            })
            .collect();
        self.sort_unpinned(keys, |a, b| {
            a.0.cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then(a.2.total_cmp(&b.2))
        });
        debug!(entries = self.len(), "sorted by time to limits");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use skyq_core::testing::ScriptedSky;
    use skyq_core::{QueuePolicy, TargetCatalog, TargetId};

    use super::*;

    const NOW: f64 = 1_700_000_000.0;

    fn sky(n: TargetId) -> Arc<ScriptedSky> {
        let sky = ScriptedSky::new();
        for id in 1..=n {
            sky.add(id, &format!("t{id}"));
        }
        Arc::new(sky)
    }

    fn queue(sky: &Arc<ScriptedSky>, mode: QueueMode, ids: &[TargetId]) -> TargetQueue {
        let mut q = TargetQueue::new(sky.clone(), QueuePolicy { mode, ..QueuePolicy::default() });
        for id in ids {
            q.push_back(QueuedTarget::new(&sky.resolve(*id).unwrap(), None, None));
        }
        q
    }

    fn targets(q: &TargetQueue) -> Vec<TargetId> {
        q.iter().map(|j| j.target).collect()
    }

    #[test]
    fn fifo_and_circular_keep_insertion_order() {
        let sky = sky(3);
        sky.update(3, |t| t.priority = 10.0);
        for mode in [QueueMode::Fifo, QueueMode::Circular] {
            let mut q = queue(&sky, mode, &[1, 2, 3]);
            q.sort_queue(NOW);
            assert_eq!(targets(&q), vec![1, 2, 3]);
        }
    }

    #[test]
    fn out_of_limits_puts_earliest_setting_first() {
        let sky = sky(2);
        // C sets in five minutes, D in an hour
        sky.update(1, |t| t.sets_at = Some(NOW + 300.0));
        sky.update(2, |t| t.sets_at = Some(NOW + 3600.0));
        let mut q = queue(&sky, QueueMode::OutOfLimits, &[2, 1]);
        q.sort_queue(NOW);
        assert_eq!(targets(&q), vec![1, 2]);
    }

    #[test]
    fn out_of_limits_remaining_is_non_decreasing() {
        let sky = sky(6);
        let sets = [Some(7200.0), None, Some(60.0), Some(1800.0), None, Some(600.0)];
        for (i, s) in sets.iter().enumerate() {
            sky.update(i as TargetId + 1, |t| t.sets_at = s.map(|d| NOW + d));
        }
        sky.update(5, |t| t.visible = false);
        let mut q = queue(&sky, QueueMode::OutOfLimits, &[1, 2, 3, 4, 5, 6]);
        q.sort_queue(NOW);
        let remaining: Vec<f64> = q.iter().map(|j| q.remaining_time(j, NOW)).collect();
        assert!(remaining.windows(2).all(|w| w[0] <= w[1]), "{remaining:?}");
        assert_eq!(targets(&q)[..4], [3, 6, 4, 1]);
        // always-observable before never-observable
        assert_eq!(targets(&q)[4..], [2, 5]);
    }

    #[test]
    fn west_precedes_east_in_meridian_sort() {
        let sky = sky(5);
        sky.update(1, |t| t.hour_angle = -30.0);
        sky.update(2, |t| {
            t.hour_angle = 20.0;
            t.sets_at = Some(NOW + 4000.0);
        });
        sky.update(3, |t| {
            t.hour_angle = -10.0;
            t.altitude = 70.0;
        });
        sky.update(4, |t| {
            t.hour_angle = 50.0;
            t.sets_at = Some(NOW + 900.0);
        });
        sky.update(5, |t| t.broken = true);
        let mut q = queue(&sky, QueueMode::WestEastMeridian, &[5, 1, 2, 3, 4]);
        q.sort_queue(NOW);
        assert_eq!(targets(&q), vec![4, 2, 3, 1, 5]);
    }

    #[test]
    fn meridian_sort_breaks_altitude_ties_by_remaining_time() {
        let sky = sky(2);
        sky.update(1, |t| t.hour_angle = -5.0);
        sky.update(2, |t| {
            t.hour_angle = -5.0;
            t.sets_at = Some(NOW + 7200.0);
        });
        let mut q = queue(&sky, QueueMode::WestEastMeridian, &[1, 2]);
        q.sort_queue(NOW);
        assert_eq!(targets(&q), vec![2, 1]);
    }

    #[test]
    fn highest_sorts_by_priority_then_altitude() {
        let sky = sky(3);
        sky.update(1, |t| t.priority = 1.0);
        sky.update(2, |t| {
            t.priority = 5.0;
            t.altitude = 20.0;
        });
        sky.update(3, |t| {
            t.priority = 5.0;
            t.altitude = 60.0;
        });
        let mut q = queue(&sky, QueueMode::Highest, &[1, 2, 3]);
        q.sort_queue(NOW);
        assert_eq!(targets(&q), vec![3, 2, 1]);
    }

    #[test]
    fn west_east_orders_by_hour_angle() {
        let sky = sky(3);
        sky.update(1, |t| t.hour_angle = -40.0);
        sky.update(2, |t| t.hour_angle = 10.0);
        sky.update(3, |t| t.hour_angle = 60.0);
        let mut q = queue(&sky, QueueMode::WestEast, &[1, 2, 3]);
        q.sort_queue(NOW);
        assert_eq!(targets(&q), vec![3, 2, 1]);
    }

    #[test]
    fn pinned_entries_keep_their_slots() {
        let sky = sky(4);
        for (id, p) in [(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)] {
            sky.update(id, |t| t.priority = p);
        }
        let mut q = queue(&sky, QueueMode::Highest, &[1, 2, 3, 4]);
        if let Some(j) = q.get_mut(1) {
            j.hard = true;
        }
        q.sort_queue(NOW);
        assert_eq!(targets(&q), vec![4, 2, 3, 1]);
    }

    #[test]
    fn blocking_queue_is_not_sorted() {
        let sky = sky(2);
        sky.update(2, |t| t.priority = 9.0);
        let mut q = queue(&sky, QueueMode::Highest, &[1, 2]);
        q.set_policy(QueuePolicy {
            mode: QueueMode::Highest,
            block_until_visible: true,
            ..QueuePolicy::default()
        });
        q.sort_queue(NOW);
        assert_eq!(targets(&q), vec![1, 2]);
    }
}
