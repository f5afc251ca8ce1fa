//! skyq-queue: the observatory target queue.
//!
//! Decides which pending observation the telescope executor runs next.
//!
//! - **`QueuedTarget`**: a target id plus its time window and flags
//! - **`TargetQueue`**: the ordered entries with expiry, visibility
//!   filtering and the sort heuristics
//! - **`ExecutorQueue`**: commands, selection, audit and publication
//! - **`SimulQueue`**: forecasts on a copy of the queue
//!
//! Geometry comes from an `Observatory` (see `skyq-core`); the clock,
//! publication sink and wakeup timers from a `Station`.

pub mod audit;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod job;
pub mod ordering;
pub mod queue;
pub mod simulation;
pub mod station;

pub use audit::{
    AuditLog, ExecutedEntry, PendingEntry, QueueSnapshot, RemovalReason, RemovalSink, RemovedEntry,
};
pub use error::{QueueError, QueueResult};
pub use executor::{ExecutorQueue, IngestReport, NextObservation, Selection};
pub use ingest::QueueRequest;
pub use job::{next_qid, Qid, QueuedTarget};
pub use queue::TargetQueue;
pub use simulation::{ForecastEntry, SimulQueue, SimulationPrimitives, SimulationStep};
pub use station::{ManualStation, Station, SystemStation, WakeEvent};
