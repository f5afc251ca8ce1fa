//! Observatory collaborator traits.
//!
//! Geometry calls take Julian dates; window calls take unix seconds, the
//! same clock the queue uses for start/end constraints.

use thiserror::Error;

use crate::types::{Equatorial, Horizontal, Target, TargetId, Window};

/// Result type alias for observatory calls.
pub type SkyResult<T> = Result<T, SkyError>;

/// Errors reported by an observatory implementation.
///
/// The queue never treats these as fatal: a target whose geometry cannot be
/// evaluated is handled as "not observable now".
#[derive(Debug, Error)]
pub enum SkyError {
    #[error("unknown target: {0}")]
    UnknownTarget(TargetId),

    #[error("no observation script for target {0}")]
    NoScript(TargetId),

    #[error("evaluation failed for target {target}: {reason}")]
    Evaluation { target: TargetId, reason: String },
}

/// Externally owned catalog of targets.
pub trait TargetCatalog {
    /// Resolve a target id. `None` means the id is unknown.
    fn resolve(&self, id: TargetId) -> Option<Target>;

    /// Whether an observation of the target has already been started.
    fn observation_started(&self, _id: TargetId) -> bool {
        false
    }
}

/// Sky geometry for a fixed observer location.
pub trait Sky {
    /// Apparent equatorial position at `jd`.
    fn equatorial(&self, id: TargetId, jd: f64) -> SkyResult<Equatorial>;

    /// Altitude/azimuth at `jd`.
    fn horizontal(&self, id: TargetId, jd: f64) -> SkyResult<Horizontal>;

    /// Hour angle in degrees, `(-180, 180]`. Positive is west of the meridian.
    fn hour_angle(&self, id: TargetId, jd: f64) -> SkyResult<f64>;

    /// Whether `hrz` is above the target's horizon limit.
    fn above_horizon(&self, id: TargetId, hrz: &Horizontal) -> bool;

    /// Names of the constraints the target violates at `jd`.
    fn violated_constraints(&self, id: TargetId, jd: f64) -> SkyResult<Vec<String>>;

    /// Evaluate how long, within `[from, to]`, the target stays observable
    /// for at least `length` seconds, sampling every `step` seconds.
    fn satisfied_window(
        &self,
        id: TargetId,
        from: f64,
        to: f64,
        length: f64,
        step: f64,
    ) -> SkyResult<Window>;

    /// Estimated observation length in seconds, including the slew from
    /// `current` when given.
    fn observation_length(&self, id: TargetId, current: Option<&Equatorial>) -> SkyResult<f64>;
}

/// Everything the queue needs from the rest of the observatory.
pub trait Observatory: TargetCatalog + Sky + Send + Sync {}

impl<T: TargetCatalog + Sky + Send + Sync> Observatory for T {}
