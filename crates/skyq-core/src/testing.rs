//! Deterministic observatory for tests.
//!
//! Every answer is scripted per target and can be changed between calls,
//! which keeps queue tests independent of real sky geometry.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::sky::{Sky, SkyError, SkyResult, TargetCatalog};
use crate::types::{Equatorial, Horizontal, Target, TargetId, Window};

#[derive(Debug, Clone)]
pub struct ScriptedTarget {
    pub name: String,
    pub priority: f64,
    pub visible: bool,
    pub altitude: f64,
    pub hour_angle: f64,
    /// Absolute unix time at which the target sets; `None` never sets.
    pub sets_at: Option<f64>,
    pub duration: Option<f64>,
    pub violated: Vec<String>,
    pub started: bool,
    /// Make every geometry call fail.
    pub broken: bool,
}

impl ScriptedTarget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            priority: 0.0,
            visible: true,
            altitude: 45.0,
            hour_angle: 0.0,
            sets_at: None,
            duration: Some(60.0),
            violated: Vec::new(),
            started: false,
            broken: false,
        }
    }
}

#[derive(Default)]
pub struct ScriptedSky {
    targets: Mutex<HashMap<TargetId, ScriptedTarget>>,
}

impl ScriptedSky {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TargetId, target: ScriptedTarget) {
        self.targets.lock().unwrap().insert(id, target);
    }

    /// Add a visible target with default geometry.
    pub fn add(&self, id: TargetId, name: &str) {
        self.insert(id, ScriptedTarget::new(name));
    }

    pub fn update(&self, id: TargetId, f: impl FnOnce(&mut ScriptedTarget)) {
        if let Some(t) = self.targets.lock().unwrap().get_mut(&id) {
            f(t);
        }
    }

    fn with<T>(&self, id: TargetId, f: impl FnOnce(&ScriptedTarget) -> T) -> SkyResult<T> {
        let targets = self.targets.lock().unwrap();
        let t = targets.get(&id).ok_or(SkyError::UnknownTarget(id))?;
        if t.broken {
            return Err(SkyError::Evaluation {
                target: id,
                reason: "scripted failure".to_string(),
            });
        }
        Ok(f(t))
    }
}

impl TargetCatalog for ScriptedSky {
    fn resolve(&self, id: TargetId) -> Option<Target> {
        self.targets.lock().unwrap().get(&id).map(|t| Target {
            id,
            name: t.name.clone(),
            priority: t.priority,
        })
    }

    fn observation_started(&self, id: TargetId) -> bool {
        self.targets
            .lock()
            .unwrap()
            .get(&id)
            .is_some_and(|t| t.started)
    }
}

impl Sky for ScriptedSky {
    fn equatorial(&self, id: TargetId, _jd: f64) -> SkyResult<Equatorial> {
        self.with(id, |t| Equatorial {
            ra: -t.hour_angle,
            dec: t.altitude,
        })
    }

    fn horizontal(&self, id: TargetId, _jd: f64) -> SkyResult<Horizontal> {
        self.with(id, |t| Horizontal {
            alt: t.altitude,
            az: if t.hour_angle >= 0.0 { 270.0 } else { 90.0 },
        })
    }

    fn hour_angle(&self, id: TargetId, _jd: f64) -> SkyResult<f64> {
        self.with(id, |t| t.hour_angle)
    }

    fn above_horizon(&self, id: TargetId, _hrz: &Horizontal) -> bool {
        self.with(id, |t| t.visible).unwrap_or(false)
    }

    fn violated_constraints(&self, id: TargetId, _jd: f64) -> SkyResult<Vec<String>> {
        self.with(id, |t| t.violated.clone())
    }

    fn satisfied_window(
        &self,
        id: TargetId,
        from: f64,
        to: f64,
        length: f64,
        _step: f64,
    ) -> SkyResult<Window> {
        self.with(id, |t| {
            if !t.visible || !t.violated.is_empty() {
                return Window::Never;
            }
            match t.sets_at {
                Some(set) if set <= from || set - from < length => Window::Never,
                Some(set) if set < to => Window::Until(set),
                _ => Window::Always,
            }
        })
    }

    fn observation_length(&self, id: TargetId, _current: Option<&Equatorial>) -> SkyResult<f64> {
        self.with(id, |t| t.duration)?.ok_or(SkyError::NoScript(id))
    }
}
