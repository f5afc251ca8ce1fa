//! Queue error types.

use thiserror::Error;

use skyq_core::TargetId;

use crate::job::Qid;

/// Errors returned by queue mutation commands. A failed command leaves the
/// queue untouched.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown target: {0}")]
    UnknownTarget(TargetId),

    #[error("index {index} out of range for queue of {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no queue entry with qid {0}")]
    UnknownQid(Qid),

    #[error("invalid queue parameters: {0}")]
    Parse(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
