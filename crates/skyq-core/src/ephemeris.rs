//! Catalog-backed observatory with low-precision positions.
//!
//! Good to about a tenth of a degree: mean sidereal time, no precession,
//! nutation or refraction. Enough to order targets and decide visibility
//! for a queue; anything precise belongs to the external geometry service.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfigError, ObserverConfig};
use crate::sky::{Sky, SkyError, SkyResult, TargetCatalog};
use crate::types::{
    julian_from_unix, normalize_signed, Equatorial, Horizontal, Target, TargetId, Window,
};

/// Telescope slew speed used for the observation length estimate, deg/s.
const SLEW_RATE: f64 = 1.5;

/// Julian date of J2000.0.
const JD_J2000: f64 = 2_451_545.0;

/// Target catalog file (`[[target]]` entries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub id: TargetId,
    pub name: String,
    /// Right ascension, degrees.
    pub ra: f64,
    /// Declination, degrees.
    pub dec: f64,
    #[serde(default)]
    pub priority: f64,
    /// Horizon limit; falls back to the observer's horizon.
    pub min_altitude: Option<f64>,
    /// Largest allowed absolute hour angle, degrees.
    pub max_hour_angle: Option<f64>,
    /// Length of the observation script, seconds.
    pub script_secs: Option<f64>,
}

pub struct Ephemeris {
    observer: ObserverConfig,
    targets: HashMap<TargetId, TargetSpec>,
}

impl Ephemeris {
    pub fn new(observer: ObserverConfig, catalog: CatalogFile) -> Self {
        let targets = catalog.targets.into_iter().map(|t| (t.id, t)).collect();
        Self {
            observer,
            targets,
        }
    }

    pub fn from_file(observer: ObserverConfig, path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog: CatalogFile = toml::from_str(&content)?;
        debug!(targets = catalog.targets.len(), path = %path.display(), "catalog loaded");
        Ok(Self::new(observer, catalog))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn spec(&self, id: TargetId) -> SkyResult<&TargetSpec> {
        self.targets.get(&id).ok_or(SkyError::UnknownTarget(id))
    }

    /// Local mean sidereal time at `jd`, degrees.
    fn local_sidereal(&self, jd: f64) -> f64 {
        let gmst = 280.460_618_37 + 360.985_647_366_29 * (jd - JD_J2000);
        (gmst + self.observer.longitude).rem_euclid(360.0)
    }

    fn satisfied_at(&self, id: TargetId, t: f64) -> SkyResult<bool> {
        let jd = julian_from_unix(t);
        let hrz = self.horizontal(id, jd)?;
        Ok(self.above_horizon(id, &hrz) && self.violated_constraints(id, jd)?.is_empty())
    }
}

impl TargetCatalog for Ephemeris {
    fn resolve(&self, id: TargetId) -> Option<Target> {
        self.targets.get(&id).map(|t| Target {
            id: t.id,
            name: t.name.clone(),
            priority: t.priority,
        })
    }
}

impl Sky for Ephemeris {
    fn equatorial(&self, id: TargetId, _jd: f64) -> SkyResult<Equatorial> {
        let t = self.spec(id)?;
        Ok(Equatorial { ra: t.ra, dec: t.dec })
    }

    fn horizontal(&self, id: TargetId, jd: f64) -> SkyResult<Horizontal> {
        let t = self.spec(id)?;
        let ha = self.hour_angle(id, jd)?.to_radians();
        let lat = self.observer.latitude.to_radians();
        let dec = t.dec.to_radians();

        let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * ha.cos();
        let alt = sin_alt.clamp(-1.0, 1.0).asin();
        let az = (-ha.sin() * dec.cos())
            .atan2(dec.sin() * lat.cos() - dec.cos() * lat.sin() * ha.cos());
        Ok(Horizontal {
            alt: alt.to_degrees(),
            az: az.to_degrees().rem_euclid(360.0),
        })
    }

    fn hour_angle(&self, id: TargetId, jd: f64) -> SkyResult<f64> {
        let t = self.spec(id)?;
        Ok(normalize_signed(self.local_sidereal(jd) - t.ra))
    }

    fn above_horizon(&self, id: TargetId, hrz: &Horizontal) -> bool {
        let limit = self
            .targets
            .get(&id)
            .and_then(|t| t.min_altitude)
            .unwrap_or(self.observer.horizon);
        hrz.alt >= limit
    }

    fn violated_constraints(&self, id: TargetId, jd: f64) -> SkyResult<Vec<String>> {
        let t = self.spec(id)?;
        let mut violated = Vec::new();
        if let Some(max_ha) = t.max_hour_angle {
            if self.hour_angle(id, jd)?.abs() > max_ha {
                violated.push("hour_angle".to_string());
            }
        }
        Ok(violated)
    }

    fn satisfied_window(
        &self,
        id: TargetId,
        from: f64,
        to: f64,
        length: f64,
        step: f64,
    ) -> SkyResult<Window> {
        if !self.satisfied_at(id, from)? {
            return Ok(Window::Never);
        }
        let step = if step > 0.0 { step } else { 60.0 };
        let mut t = from;
        while t < to {
            let next = (t + step).min(to);
            if !self.satisfied_at(id, next)? {
                if t - from < length {
                    return Ok(Window::Never);
                }
                return Ok(Window::Until(t));
            }
            t = next;
        }
        Ok(Window::Always)
    }

    fn observation_length(&self, id: TargetId, current: Option<&Equatorial>) -> SkyResult<f64> {
        let t = self.spec(id)?;
        let script = t.script_secs.ok_or(SkyError::NoScript(id))?;
        let slew = current
            .map(|from| from.separation(&Equatorial { ra: t.ra, dec: t.dec }) / SLEW_RATE)
            .unwrap_or(0.0);
        Ok(script + slew)
    }
}
