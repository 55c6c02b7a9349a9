//! Persistence layer for the merge train scheduler.
//!
//! Crash-safe event logging with replay, atomic snapshots, and the
//! [`CarStore`] that ties them to the live car table.
//!
//! # Recovery
//!
//! On startup:
//! 1. Load `snapshot.json` if present (empty table otherwise)
//! 2. Replay `events.log` from the snapshot's `log_position`
//! 3. Truncate a partial or out-of-order tail left by a crash
//!
//! # Crash Safety
//!
//! - Event log: events are written before they are applied; car lifecycle
//!   and merge events are fsynced before the commit returns
//! - Snapshots: written to a temp file, synced, renamed, directory synced

pub mod event;
pub mod fsync;
pub mod log;
pub mod snapshot;
pub mod store;

pub use event::{StateEvent, StateEventPayload};
pub use fsync::{fsync_dir, fsync_file, write_atomic};
pub use log::{EventLog, EventLogError, Replay};
pub use snapshot::{SCHEMA_VERSION, SnapshotError, TableSnapshot, load_snapshot, save_snapshot};
pub use store::{CarStore, StoreError};
