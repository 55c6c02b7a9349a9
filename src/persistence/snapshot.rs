//! Car table snapshots.
//!
//! A snapshot is the whole [`CarTable`] plus the log position it reflects.
//! Recovery loads the snapshot and replays the event log from
//! `log_position`, so the log can grow without slowing startup.

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::write_atomic;
use crate::state::CarTable;

/// Bump when the snapshot layout changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub schema_version: u32,

    pub snapshot_at: DateTime<Utc>,

    /// Byte offset in the event log up to which `table` is current.
    pub log_position: u64,

    /// Sequence number for the first event after `log_position`.
    pub next_seq: u64,

    pub table: CarTable,
}

impl TableSnapshot {
    pub fn new(table: CarTable, log_position: u64, next_seq: u64) -> Self {
        TableSnapshot {
            schema_version: SCHEMA_VERSION,
            snapshot_at: Utc::now(),
            log_position,
            next_seq,
            table,
        }
    }
}

/// Writes a snapshot atomically.
pub fn save_snapshot(path: &Path, snapshot: &TableSnapshot) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Loads a snapshot, or `None` if there is none yet.
///
/// A malformed file or a schema mismatch is an error: starting from an empty
/// table would forget every car.
pub fn load_snapshot(path: &Path) -> Result<Option<TableSnapshot>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: TableSnapshot = serde_json::from_slice(&bytes)?;
    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: snapshot.schema_version,
        });
    }
    Ok(Some(snapshot))
}
