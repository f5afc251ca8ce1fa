//! Queue policies: ordering mode and the toggles the filters consult.

use serde::{Deserialize, Serialize};

/// How a queue orders its pending jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueMode {
    /// Insertion order.
    #[default]
    Fifo,
    /// Insertion order, finished jobs rotate to the back.
    Circular,
    /// Highest target priority first.
    Highest,
    /// Westmost target first.
    #[serde(rename = "WESTEAST")]
    WestEast,
    /// West of meridian by setting time, then east by altitude.
    #[serde(rename = "WESTEAST_MERIDIAN")]
    WestEastMeridian,
    /// Earliest time to become unobservable first.
    OutOfLimits,
}

impl QueueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueMode::Fifo => "FIFO",
            QueueMode::Circular => "CIRCULAR",
            QueueMode::Highest => "HIGHEST",
            QueueMode::WestEast => "WESTEAST",
            QueueMode::WestEastMeridian => "WESTEAST_MERIDIAN",
            QueueMode::OutOfLimits => "OUT_OF_LIMITS",
        }
    }
}

impl std::fmt::Display for QueueMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tie-break used when inserting a job at the first feasible slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FirstOrdering {
    /// First slot where the target is observable.
    #[default]
    None,
    /// Keep ascending hour angle order.
    Ha,
    /// Keep ascending time-to-set order.
    SetFirst,
}

impl FirstOrdering {
    /// Decode the numeric code used on the command wire. Unknown codes
    /// fall back to `None`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => FirstOrdering::Ha,
            2 => FirstOrdering::SetFirst,
            _ => FirstOrdering::None,
        }
    }
}

/// Policy toggles of a single queue. Settable from config and at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuePolicy {
    pub mode: QueueMode,
    /// Move unobservable jobs behind the front instead of removing them.
    pub skip_below_horizon: bool,
    /// Check target constraints, not only the horizon.
    pub test_constraints: bool,
    /// Run every job once; remove it when its observation starts.
    pub remove_after_execution: bool,
    /// Keep the order and wait for the front job to become visible.
    pub block_until_visible: bool,
    /// Whether the queue takes part in selection at all.
    pub enabled: bool,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            mode: QueueMode::Fifo,
            skip_below_horizon: true,
            test_constraints: true,
            remove_after_execution: true,
            block_until_visible: false,
            enabled: true,
        }
    }
}

impl std::fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type {} skip below {} test constraints {} remove after execution {} block until visible {} enabled {}",
            self.mode,
            self.skip_below_horizon,
            self.test_constraints,
            self.remove_after_execution,
            self.block_until_visible,
            self.enabled,
        )
    }
}
