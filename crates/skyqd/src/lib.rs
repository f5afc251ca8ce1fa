//! skyqd: the daemon around the skyq target queues.
//!
//! - **`Daemon`**: owns the configured queues, hands targets to a simulated
//!   executor and finishes them when their observation length has elapsed
//! - **`DaemonStation`**: wall clock plus a wakeup channel back into the
//!   daemon loop
//! - **`plan`**: queue files and forecasts

pub mod daemon;
pub mod plan;
pub mod station;

pub use daemon::{Daemon, Running};
pub use plan::{build_queues, forecast, load_queue_file};
pub use station::DaemonStation;
