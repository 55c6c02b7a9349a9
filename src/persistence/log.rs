//! Append-only event log with crash-safe replay.
//!
//! JSON Lines: one [`StateEvent`] per line. A crash mid-write leaves at most
//! one partial trailing line, which replay detects and truncates, so the
//! file always holds a valid prefix of what was written.
//!
//! # fsync Strategy
//!
//! - A batch containing a critical event is synced before `append_batch`
//!   returns.
//! - Batches of bookkeeping events are left to the OS until the next
//!   critical batch or an explicit [`EventLog::sync`].

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use super::event::{StateEvent, StateEventPayload};
use super::fsync::fsync_file;

/// Errors that can occur during event log operations.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventLogError>;

/// What a replay recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    pub events: Vec<StateEvent>,

    /// One past the highest sequence number seen, or 0 if none.
    pub next_seq: u64,

    /// End of the valid prefix, if a bad tail followed it. `replay_from`
    /// cuts the file back to this offset; `scan_from` leaves it alone.
    pub valid_until: Option<u64>,
}

/// An append-only event log.
pub struct EventLog {
    file: File,
    path: PathBuf,
    next_seq: u64,
}

impl EventLog {
    /// Opens (or creates) the log for appending, continuing at `next_seq`.
    ///
    /// Call [`EventLog::replay_from`] first to learn `next_seq`.
    pub fn open(path: impl AsRef<Path>, next_seq: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(EventLog {
            file,
            path,
            next_seq,
        })
    }

    /// Appends one event, syncing if it is critical.
    pub fn append(&mut self, payload: StateEventPayload) -> Result<StateEvent> {
        let mut written = self.append_batch(vec![payload])?;
        Ok(written.remove(0))
    }

    /// Appends events in order as one write, then syncs once if any of them
    /// is critical.
    ///
    /// The events of one batch share a timestamp.
    pub fn append_batch(&mut self, payloads: Vec<StateEventPayload>) -> Result<Vec<StateEvent>> {
        let ts = Utc::now();
        let mut buf = Vec::new();
        let mut events = Vec::with_capacity(payloads.len());
        for (offset, payload) in payloads.into_iter().enumerate() {
            let event = StateEvent {
                seq: self.next_seq + offset as u64,
                ts,
                payload,
            };
            serde_json::to_writer(&mut buf, &event)?;
            buf.push(b'\n');
            events.push(event);
        }

        self.file.write_all(&buf)?;
        if events.iter().any(StateEvent::is_critical) {
            fsync_file(&self.file)?;
        }
        self.next_seq += events.len() as u64;
        Ok(events)
    }

    pub fn sync(&self) -> io::Result<()> {
        fsync_file(&self.file)
    }

    /// Current end of the log in bytes; recorded as a snapshot's `log_position`.
    pub fn position(&mut self) -> io::Result<u64> {
        self.file.seek(SeekFrom::End(0))
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays events from byte `offset`.
    ///
    /// Reading stops at the first line that is not a complete event or whose
    /// sequence number does not increase; the file is truncated there. A
    /// missing file, or an offset at or past EOF, replays nothing.
    pub fn replay_from(path: impl AsRef<Path>, offset: u64) -> Result<Replay> {
        let path = path.as_ref();
        let replay = Self::scan_from(path, offset)?;
        if let Some(valid_until) = replay.valid_until {
            warn!(
                path = %path.display(),
                at = valid_until,
                "Truncating corrupt event log tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_until)?;
            fsync_file(&file)?;
        }
        Ok(replay)
    }

    /// Reads events from byte `offset` like [`EventLog::replay_from`], but
    /// never writes. A bad tail, which may be an event another process is
    /// still writing, is skipped and reported in `valid_until`.
    pub fn scan_from(path: impl AsRef<Path>, offset: u64) -> Result<Replay> {
        let path = path.as_ref();
        let empty = Replay {
            events: Vec::new(),
            next_seq: 0,
            valid_until: None,
        };
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(empty),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        if offset >= file_len {
            return Ok(empty);
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;

        let mut events: Vec<StateEvent> = Vec::new();
        let mut good_until = offset;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            let text = line.trim();
            if text.is_empty() {
                good_until += read as u64;
                continue;
            }
            let Ok(event) = serde_json::from_str::<StateEvent>(text) else {
                break;
            };
            if events.last().is_some_and(|last| event.seq <= last.seq) {
                break;
            }
            events.push(event);
            good_until += read as u64;
        }

        let next_seq = events.last().map_or(0, |last| last.seq + 1);
        Ok(Replay {
            events,
            next_seq,
            valid_until: (good_until < file_len).then_some(good_until),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CarId, PipelineId, PipelineStatus};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn arb_payload() -> impl Strategy<Value = StateEventPayload> {
        let car = (1u64..500).prop_map(CarId);
        prop_oneof![
            car.clone()
                .prop_map(|car| StateEventPayload::PipelineOutdated { car }),
            car.clone()
                .prop_map(|car| StateEventPayload::MergeStarted { car }),
            (car.clone(), "[a-z ]{0,20}")
                .prop_map(|(car, reason)| StateEventPayload::CarDestroyed { car, reason }),
            (car, 1u64..1000).prop_map(|(car, id)| StateEventPayload::PipelineStatusChanged {
                car,
                pipeline: PipelineId(id),
                status: PipelineStatus::Running,
            }),
        ]
    }

    fn write_all(path: &Path, payloads: &[StateEventPayload]) -> u64 {
        let mut log = EventLog::open(path, 0).unwrap();
        for payload in payloads {
            log.append(payload.clone()).unwrap();
        }
        log.position().unwrap()
    }

    #[test]
    fn open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        EventLog::open(&path, 0).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn batch_assigns_consecutive_sequence_numbers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let mut log = EventLog::open(&path, 4).unwrap();

        let events = log
            .append_batch(vec![
                StateEventPayload::MergeStarted { car: CarId(1) },
                StateEventPayload::PipelineOutdated { car: CarId(2) },
            ])
            .unwrap();

        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(log.next_seq(), 6);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let replay = EventLog::replay_from(dir.path().join("nope.log"), 0).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.next_seq, 0);
    }

    #[test]
    fn replay_past_eof_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        write_all(&path, &[StateEventPayload::MergeStarted { car: CarId(1) }]);

        let replay = EventLog::replay_from(&path, 1 << 20).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.valid_until, None);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        write_all(&path, &[StateEventPayload::MergeStarted { car: CarId(1) }]);
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file).unwrap();
        }
        let mut log = EventLog::open(&path, 1).unwrap();
        log.append(StateEventPayload::PipelineOutdated { car: CarId(2) })
            .unwrap();
        drop(log);

        let replay = EventLog::replay_from(&path, 0).unwrap();
        assert_eq!(replay.events.len(), 2);
        assert_eq!(replay.next_seq, 2);
        assert_eq!(replay.valid_until, None);
    }

    #[test]
    fn repeated_sequence_number_ends_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let valid_len = write_all(
            &path,
            &[
                StateEventPayload::MergeStarted { car: CarId(1) },
                StateEventPayload::PipelineOutdated { car: CarId(2) },
            ],
        );
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(
                file,
                r#"{{"seq":1,"ts":"2024-01-01T00:00:00Z","type":"merge_started","car":3}}"#
            )
            .unwrap();
            writeln!(
                file,
                r#"{{"seq":2,"ts":"2024-01-01T00:00:01Z","type":"merge_started","car":4}}"#
            )
            .unwrap();
        }

        let replay = EventLog::replay_from(&path, 0).unwrap();
        assert_eq!(replay.events.len(), 2);
        assert_eq!(replay.next_seq, 2);
        assert_eq!(replay.valid_until, Some(valid_len));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), valid_len);
    }

    #[test]
    fn scan_leaves_partial_tail_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let valid_len = write_all(&path, &[StateEventPayload::MergeStarted { car: CarId(1) }]);
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            write!(file, r#"{{"seq":1,"ts":"2024-01-01T"#).unwrap();
        }
        let written_len = std::fs::metadata(&path).unwrap().len();

        let scan = EventLog::scan_from(&path, 0).unwrap();
        assert_eq!(scan.events.len(), 1);
        assert_eq!(scan.valid_until, Some(valid_len));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), written_len);
    }

    proptest! {
        #[test]
        fn replay_returns_what_was_written(payloads in prop::collection::vec(arb_payload(), 1..20)) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("events.log");
            write_all(&path, &payloads);

            let replay = EventLog::replay_from(&path, 0).unwrap();
            prop_assert_eq!(replay.next_seq, payloads.len() as u64);
            let replayed: Vec<_> = replay.events.into_iter().map(|e| e.payload).collect();
            prop_assert_eq!(replayed, payloads);
        }

        #[test]
        fn replay_from_recorded_position(payloads in prop::collection::vec(arb_payload(), 2..10)) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("events.log");
            let split = payloads.len() / 2;
            let mut log = EventLog::open(&path, 0).unwrap();
            let mut position = 0;
            for (i, payload) in payloads.iter().enumerate() {
                if i == split {
                    position = log.position().unwrap();
                }
                log.append(payload.clone()).unwrap();
            }
            drop(log);

            let replay = EventLog::replay_from(&path, position).unwrap();
            prop_assert_eq!(replay.events.len(), payloads.len() - split);
            prop_assert_eq!(replay.events[0].seq, split as u64);
            prop_assert_eq!(replay.next_seq, payloads.len() as u64);
        }

        #[test]
        fn torn_write_recovers_a_prefix(
            payloads in prop::collection::vec(arb_payload(), 2..10),
            keep in 0.05f64..0.99,
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("events.log");
            let len = write_all(&path, &payloads);
            {
                let file = OpenOptions::new().write(true).open(&path).unwrap();
                file.set_len((len as f64 * keep) as u64).unwrap();
            }

            let replay = EventLog::replay_from(&path, 0).unwrap();
            prop_assert!(replay.events.len() <= payloads.len());
            for (i, event) in replay.events.iter().enumerate() {
                prop_assert_eq!(event.seq, i as u64);
                prop_assert_eq!(&event.payload, &payloads[i]);
            }
            prop_assert_eq!(replay.next_seq, replay.events.len() as u64);

            // A second replay finds a clean file.
            let again = EventLog::replay_from(&path, 0).unwrap();
            prop_assert_eq!(again.valid_until, None);
            prop_assert_eq!(again.events.len(), replay.events.len());
        }
    }
}
