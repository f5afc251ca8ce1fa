//! skyq-core: shared types for the skyq observatory queue.
//!
//! The queue never owns targets or does astronomy itself. It talks to the
//! rest of the observatory through the traits defined here:
//!
//! - **`TargetCatalog`**: resolves target ids into catalog records
//! - **`Sky`**: positions, hour angles, horizon and constraint checks
//! - **`Observatory`**: both of the above, shareable across the daemon
//!
//! The crate also carries the `skyq.toml` config parser, the queue policy
//! types, and `Ephemeris`, a small catalog-backed `Observatory` used by the
//! daemon when no external geometry service is wired in.

pub mod config;
pub mod ephemeris;
pub mod policy;
pub mod sky;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConfigError, ObserverConfig, QueueConfig, SimulationConfig, SkyqConfig};
pub use ephemeris::{CatalogFile, Ephemeris, TargetSpec};
pub use policy::{FirstOrdering, QueueMode, QueuePolicy};
pub use sky::{Observatory, Sky, SkyError, SkyResult, TargetCatalog};
pub use types::*;
