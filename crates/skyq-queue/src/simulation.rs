//! Forecasting on a copy of the queue.
//!
//! A `SimulQueue` owns a clone of the live `TargetQueue` and walks it along
//! a hypothetical timeline. It only ever mutates its own copy: removals go
//! to its private list, never to the executor's audit log. The scheduler
//! takes part only through `SimulationPrimitives`.

use serde::Serialize;
use tracing::debug;

use skyq_core::{julian_from_unix, Equatorial, QueueMode, SimulationConfig, TargetId, Window};

use crate::audit::RemovalReason;
use crate::executor::ExecutorQueue;
use crate::job::{Qid, QueuedTarget};
use crate::ordering::WINDOW_STEP_SECS;
use crate::queue::TargetQueue;

/// Result of one simulated selection.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationStep {
    Selected {
        target: TargetId,
        qid: Qid,
        name: String,
        /// Simulated end of the observation, unix seconds.
        end: f64,
        /// Where the telescope points after the observation.
        position: Option<Equatorial>,
    },
    /// The front entry cannot run at `from`; `until` is its start time.
    Blocked { until: Option<f64> },
    /// Nothing left to simulate.
    Idle,
}

/// What a forecast needs from the scheduler.
pub trait SimulationPrimitives {
    /// Non-committing twin of `select_next_observation`: evaluate the
    /// forecast's front entry at `from`, mutating only `sq`.
    fn select_next_simulation(
        &self,
        sq: &mut SimulQueue,
        from: f64,
        to: f64,
        current: Option<&Equatorial>,
    ) -> SimulationStep;
}

/// One planned observation in a forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastEntry {
    pub qid: Qid,
    pub target: TargetId,
    pub name: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone)]
pub struct SimulQueue {
    pub(crate) queue: TargetQueue,
    pub(crate) removed: Vec<(QueuedTarget, RemovalReason)>,
    config: SimulationConfig,
}

impl SimulQueue {
    pub fn new(queue: TargetQueue, config: SimulationConfig) -> Self {
        Self {
            queue,
            removed: Vec::new(),
            config,
        }
    }

    pub fn queue(&self) -> &TargetQueue {
        &self.queue
    }

    /// Entries the forecast removed, with the reason.
    pub fn removed(&self) -> &[(QueuedTarget, RemovalReason)] {
        &self.removed
    }

    /// Plan observations over `[from, to)`.
    pub fn forecast(
        &mut self,
        primitives: &dyn SimulationPrimitives,
        from: f64,
        to: f64,
    ) -> Vec<ForecastEntry> {
        let step = self.config.step_secs;
        let mut t = from;
        let mut current: Option<Equatorial> = None;
        let mut plan = Vec::new();
        for _ in 0..self.config.max_steps {
            if t >= to || self.queue.is_empty() {
                break;
            }
            self.queue.filter_expired(t, &mut self.removed);
            self.queue.sort_queue(t);
            self.queue.before_change(t);
            match primitives.select_next_simulation(self, t, to, current.as_ref()) {
                SimulationStep::Selected {
                    target,
                    qid,
                    name,
                    end,
                    position,
                } => {
                    debug!(qid, target, start = t, end, "forecast observation");
                    plan.push(ForecastEntry {
                        qid,
                        target,
                        name,
                        start: t,
                        end,
                    });
                    current = position;
                    t = if end > t { end } else { t + step };
                }
                SimulationStep::Blocked { until: Some(start) } if start > t => t = start,
                SimulationStep::Blocked { .. } => t += step,
                SimulationStep::Idle => break,
            }
        }
        plan
    }
}

impl ExecutorQueue {
    /// Snapshot the live queue for forecasting.
    pub fn simulation(&self, config: SimulationConfig) -> SimulQueue {
        SimulQueue::new(self.queue().clone(), config)
    }
}

impl SimulationPrimitives for ExecutorQueue {
    fn select_next_simulation(
        &self,
        sq: &mut SimulQueue,
        from: f64,
        to: f64,
        current: Option<&Equatorial>,
    ) -> SimulationStep {
        let policy = self.policy();
        if !policy.enabled {
            return SimulationStep::Idle;
        }
        let Some(front) = sq.queue.front() else {
            return SimulationStep::Idle;
        };
        let until = front.t_start;
        let Some(duration) = sq.queue.maximal_duration(front, current) else {
            return SimulationStep::Blocked { until };
        };
        let mut jd = julian_from_unix(from);
        let selectable = sq.queue.is_above_horizon(front, &mut jd)
            && front.not_expired(from)
            && from + duration < to;
        if !selectable {
            return SimulationStep::Blocked { until };
        }

        let end = if policy.remove_after_execution {
            from + duration
        } else if let Some(end) = front.t_end {
            end
        } else {
            match sq.queue.observatory().satisfied_window(
                front.target,
                from,
                to,
                duration,
                WINDOW_STEP_SECS,
            ) {
                Ok(Window::Until(end)) => end,
                _ => to,
            }
        };
        let position = sq
            .queue
            .observatory()
            .equatorial(front.target, julian_from_unix(end))
            .ok();
        let step = SimulationStep::Selected {
            target: front.target,
            qid: front.qid,
            name: front.name.clone(),
            end,
            position,
        };

        if policy.remove_after_execution {
            sq.queue.remove_at(0, RemovalReason::Started, &mut sq.removed);
        } else if policy.mode == QueueMode::Circular {
            sq.queue.move_to_back(0);
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::station::ManualStation;
    use skyq_core::testing::ScriptedSky;
    use skyq_core::QueuePolicy;

    /// Blocks until a fixed time, then plans nothing.
    struct Closed {
        opens: f64,
    }

    impl SimulationPrimitives for Closed {
        fn select_next_simulation(
            &self,
            _sq: &mut SimulQueue,
            from: f64,
            _to: f64,
            _current: Option<&Equatorial>,
        ) -> SimulationStep {
            if from < self.opens {
                SimulationStep::Blocked { until: Some(self.opens) }
            } else {
                SimulationStep::Idle
            }
        }
    }

    const NOW: f64 = 1_700_000_000.0;

    fn executor(policy: QueuePolicy) -> (ExecutorQueue, Arc<ScriptedSky>) {
        let sky = ScriptedSky::new();
        for id in 1..=4 {
            sky.add(id, &format!("t{id}"));
        }
        let sky = Arc::new(sky);
        let q = ExecutorQueue::new("plan", sky.clone(), policy, Arc::new(ManualStation::new(NOW)));
        (q, sky)
    }

    #[test]
    fn forecast_runs_queue_in_order() {
        let (mut q, sky) = executor(QueuePolicy::default());
        sky.update(2, |t| t.duration = Some(300.0));
        for id in 1..=3 {
            q.add_target(id, None, None, None, None, false).unwrap();
        }
        let mut sim = q.simulation(SimulationConfig::default());
        let plan = sim.forecast(&q, NOW, NOW + 3600.0);
        let summary: Vec<(TargetId, f64, f64)> = plan.iter().map(|e| (e.target, e.start, e.end)).collect();
        assert_eq!(
            summary,
            vec![
                (1, NOW, NOW + 60.0),
                (2, NOW + 60.0, NOW + 360.0),
                (3, NOW + 360.0, NOW + 420.0),
            ]
        );
        assert_eq!(sim.removed().len(), 3);
    }

    #[test]
    fn forecast_leaves_live_queue_alone() {
        let (mut q, _) = executor(QueuePolicy::default());
        q.add_target(1, None, Some(NOW + 30.0), None, None, false).unwrap();
        q.add_target(2, None, None, None, None, false).unwrap();
        let mut sim = q.simulation(SimulationConfig::default());
        sim.forecast(&q, NOW + 100.0, NOW + 3600.0);
        assert_eq!(q.len(), 2);
        assert!(q.audit().is_empty());
        assert!(sim
            .removed()
            .iter()
            .any(|(job, reason)| job.target == 1 && *reason == RemovalReason::TimesExpired));
    }

    #[test]
    fn blocked_front_jumps_to_its_start() {
        let (mut q, _) = executor(QueuePolicy {
            block_until_visible: true,
            ..QueuePolicy::default()
        });
        q.add_target(1, Some(NOW + 600.0), None, None, None, false).unwrap();
        let mut sim = q.simulation(SimulationConfig::default());
        let plan = sim.forecast(&q, NOW, NOW + 3600.0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].start, NOW + 600.0);
    }

    #[test]
    fn observation_must_end_before_horizon() {
        let (mut q, sky) = executor(QueuePolicy::default());
        sky.update(1, |t| t.duration = Some(4000.0));
        q.add_target(1, None, None, None, None, false).unwrap();
        let mut sim = q.simulation(SimulationConfig {
            max_steps: 100,
            ..SimulationConfig::default()
        });
        assert!(sim.forecast(&q, NOW, NOW + 3600.0).is_empty());
    }

    #[test]
    fn repeating_queue_ends_at_window_or_horizon() {
        let (mut q, sky) = executor(QueuePolicy {
            remove_after_execution: false,
            ..QueuePolicy::default()
        });
        sky.update(1, |t| t.sets_at = Some(NOW + 1800.0));
        q.add_target(1, None, None, None, None, false).unwrap();
        let mut sim = q.simulation(SimulationConfig::default());
        let step = q.select_next_simulation(&mut sim, NOW, NOW + 3600.0, None);
        match step {
            SimulationStep::Selected { end, .. } => assert_eq!(end, NOW + 1800.0),
            other => panic!("unexpected step {other:?}"),
        }
        // the entry stays in the forecast copy
        assert_eq!(sim.queue().len(), 1);

        sky.update(1, |t| t.sets_at = None);
        match q.select_next_simulation(&mut sim, NOW, NOW + 3600.0, None) {
            SimulationStep::Selected { end, .. } => assert_eq!(end, NOW + 3600.0),
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn disabled_queue_simulates_nothing() {
        let (mut q, _) = executor(QueuePolicy {
            enabled: false,
            ..QueuePolicy::default()
        });
        q.add_target(1, None, None, None, None, false).unwrap();
        let mut sim = q.simulation(SimulationConfig::default());
        assert!(sim.forecast(&q, NOW, NOW + 3600.0).is_empty());
    }

    #[test]
    fn forecast_drives_any_primitives() {
        let (mut q, _) = executor(QueuePolicy::default());
        q.add_target(1, None, None, None, None, false).unwrap();
        let mut sim = q.simulation(SimulationConfig::default());
        let plan = sim.forecast(&Closed { opens: NOW + 600.0 }, NOW, NOW + 3600.0);
        assert!(plan.is_empty());
        assert_eq!(sim.queue().len(), 1);
    }
}
