//! Shared types used across skyq crates.

use serde::{Deserialize, Serialize};

/// Catalog identifier of a target.
pub type TargetId = i32;

/// Identifier of an external condition (weather, instrument state, ...)
/// whose change can invalidate target constraints.
pub type WatchId = i32;

/// Julian date of the unix epoch.
const JD_UNIX_EPOCH: f64 = 2_440_587.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Convert unix seconds to a Julian date.
pub fn julian_from_unix(t: f64) -> f64 {
    t / SECONDS_PER_DAY + JD_UNIX_EPOCH
}

/// Convert a Julian date to unix seconds.
pub fn unix_from_julian(jd: f64) -> f64 {
    (jd - JD_UNIX_EPOCH) * SECONDS_PER_DAY
}

/// Catalog record of a schedulable target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    /// Scheduling priority, higher is more important.
    pub priority: f64,
}

/// Equatorial position, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Equatorial {
    pub ra: f64,
    pub dec: f64,
}

impl Equatorial {
    /// Angular separation to another position, in degrees.
    pub fn separation(&self, other: &Equatorial) -> f64 {
        let (ra1, dec1) = (self.ra.to_radians(), self.dec.to_radians());
        let (ra2, dec2) = (other.ra.to_radians(), other.dec.to_radians());
        // haversine, stable for small separations
        let a = ((dec2 - dec1) / 2.0).sin().powi(2)
            + dec1.cos() * dec2.cos() * ((ra2 - ra1) / 2.0).sin().powi(2);
        (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
    }
}

/// Horizontal position, degrees. Azimuth is measured from north through east.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Horizontal {
    pub alt: f64,
    pub az: f64,
}

/// How long a target keeps satisfying its observability constraints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Window {
    /// Not observable at the start of the evaluated interval.
    Never,
    /// Observable until the given unix time.
    Until(f64),
    /// Observable for the whole evaluated interval.
    Always,
}

impl Window {
    pub fn is_observable(&self) -> bool {
        !matches!(self, Window::Never)
    }

    /// Seconds from `from` until the target stops being observable.
    ///
    /// `Always` and `Never` both report infinity: neither runs out of
    /// time within the evaluated interval.
    pub fn remaining(&self, from: f64) -> f64 {
        match self {
            Window::Until(t) => (t - from).max(0.0),
            Window::Always | Window::Never => f64::INFINITY,
        }
    }

    /// Rank used by earliest-deadline ordering: finite windows first,
    /// then always-observable, then never-observable.
    pub fn class(&self) -> u8 {
        match self {
            Window::Until(_) => 0,
            Window::Always => 1,
            Window::Never => 2,
        }
    }
}

/// Normalize an angle in degrees into `(-180, 180]`.
pub fn normalize_signed(deg: f64) -> f64 {
    let d = deg.rem_euclid(360.0);
    if d > 180.0 { d - 360.0 } else { d }
}
