//! The durable car store.
//!
//! `CarStore` owns the live [`CarTable`] and is its only writer. A
//! [`Change`] is appended to the event log first and applied to the table
//! second, so anything the table shows has been written.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   snapshot.json   # latest TableSnapshot
//!   events.log      # JSON Lines, replayed from the snapshot's log_position
//! ```

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::log::{EventLog, EventLogError};
use super::snapshot::{SnapshotError, TableSnapshot, load_snapshot, save_snapshot};
use crate::effects::Effect;
use crate::state::{CarTable, Change};

pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const EVENTS_FILE: &str = "events.log";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event log: {0}")]
    Log(#[from] EventLogError),

    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

struct Durable {
    dir: PathBuf,
    log: EventLog,
    snapshot_every: u64,
    since_snapshot: u64,
}

pub struct CarStore {
    table: CarTable,
    durable: Option<Durable>,
}

impl CarStore {
    /// An in-memory store. Nothing survives the process.
    pub fn ephemeral() -> Self {
        CarStore {
            table: CarTable::new(),
            durable: None,
        }
    }

    /// Opens the store in `dir`, recovering from the snapshot and log there.
    ///
    /// A snapshot is written every `snapshot_every` committed events; 0
    /// disables automatic snapshots.
    pub fn open(dir: impl AsRef<Path>, snapshot_every: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (mut table, position, snapshot_seq) = match load_snapshot(&dir.join(SNAPSHOT_FILE))? {
            Some(snapshot) => (snapshot.table, snapshot.log_position, snapshot.next_seq),
            None => (CarTable::new(), 0, 0),
        };

        let events_path = dir.join(EVENTS_FILE);
        let replay = EventLog::replay_from(&events_path, position)?;
        for event in &replay.events {
            table.apply(&event.payload);
        }
        let next_seq = snapshot_seq.max(replay.next_seq);
        let log = EventLog::open(&events_path, next_seq)?;

        info!(
            dir = %dir.display(),
            cars = table.len(),
            replayed = replay.events.len(),
            next_seq,
            "Opened car store"
        );

        Ok(CarStore {
            table,
            durable: Some(Durable {
                dir,
                log,
                snapshot_every,
                since_snapshot: replay.events.len() as u64,
            }),
        })
    }

    /// Recovers the table in `dir` without touching the directory.
    ///
    /// Unlike [`CarStore::open`], nothing is created and a bad log tail is
    /// skipped rather than truncated, so this is safe against a directory a
    /// running worker is writing to.
    pub fn load_table(dir: impl AsRef<Path>) -> Result<CarTable> {
        let dir = dir.as_ref();
        let (mut table, position) = match load_snapshot(&dir.join(SNAPSHOT_FILE))? {
            Some(snapshot) => (snapshot.table, snapshot.log_position),
            None => (CarTable::new(), 0),
        };
        let scan = EventLog::scan_from(dir.join(EVENTS_FILE), position)?;
        for event in &scan.events {
            table.apply(&event.payload);
        }
        if let Some(at) = scan.valid_until {
            debug!(dir = %dir.display(), at, "Ignoring incomplete event log tail");
        }
        Ok(table)
    }

    pub fn table(&self) -> &CarTable {
        &self.table
    }

    /// Persists and applies a change, returning its effects to run.
    pub fn commit(&mut self, change: Change) -> Result<Vec<Effect>> {
        let Change { events, effects } = change;
        if events.is_empty() {
            return Ok(effects);
        }

        if let Some(durable) = self.durable.as_mut() {
            durable.log.append_batch(events.clone())?;
            durable.since_snapshot += events.len() as u64;
        }
        for event in &events {
            self.table.apply(event);
        }
        debug!(events = events.len(), effects = effects.len(), "Committed change");

        let snapshot_due = self
            .durable
            .as_ref()
            .is_some_and(|d| d.snapshot_every > 0 && d.since_snapshot >= d.snapshot_every);
        if snapshot_due {
            self.save_snapshot()?;
        }
        Ok(effects)
    }

    /// Writes a snapshot of the current table. No-op for an ephemeral store.
    pub fn save_snapshot(&mut self) -> Result<()> {
        let Some(durable) = self.durable.as_mut() else {
            return Ok(());
        };
        durable.log.sync()?;
        let position = durable.log.position()?;
        let snapshot = TableSnapshot::new(self.table.clone(), position, durable.log.next_seq());
        save_snapshot(&durable.dir.join(SNAPSHOT_FILE), &snapshot)?;
        durable.since_snapshot = 0;
        debug!(position, cars = self.table.len(), "Saved snapshot");
        Ok(())
    }

    /// Syncs batched events to disk.
    pub fn flush(&self) -> Result<()> {
        if let Some(durable) = self.durable.as_ref() {
            durable.log.sync()?;
        }
        Ok(())
    }
}
