//! Application Services
//!
//! - `ingestion`: feed frames into the price buffer and live ticks
//! - `persistence`: hourly averages and retention cleanup
//! - `snapshot`: recent averages for newly attached subscribers

mod ingestion;
mod persistence;
mod snapshot;

pub use ingestion::{DEFAULT_INITIAL_AVERAGE_DELAY, IngestOutcome, IngestionCoordinator};
pub use persistence::{CycleReport, DEFAULT_RETENTION_DAYS, PersistenceCycle};
pub use snapshot::{DEFAULT_SNAPSHOT_HOURS, InitialSnapshotService};
