//! Scheduler configuration.
//!
//! Every knob has a default; `from_env` overrides them from `MERGE_TRAIN_*`
//! variables. Values that fail to parse fall back to the default.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_STATE_DIR: &str = "./merge-train-state";

/// How long to wait for a train's lock before giving up and re-enqueueing.
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5;

/// Delay before a refresh that lost the lock race is retried.
const DEFAULT_RELOCK_DELAY_MS: u64 = 1_000;

/// Failed merge attempts tolerated before the car is dropped.
const DEFAULT_MAX_MERGE_ATTEMPTS: u32 = 3;

/// Cars per train evaluated in one refresh.
const DEFAULT_MAX_CONCURRENCY: usize = 20;

/// Cars scanned by the merge-commit history lookup.
const DEFAULT_HISTORY_LIMIT: usize = 20;

const DEFAULT_CHANNEL_BUFFER: usize = 100;

/// Committed events between automatic snapshots.
const DEFAULT_SNAPSHOT_EVERY: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Directory holding `snapshot.json` and `events.log`.
    pub state_dir: PathBuf,

    /// Bound on acquiring a per-train lock. Configure via `MERGE_TRAIN_LOCK_TIMEOUT_SECS`.
    pub lock_timeout: Duration,

    /// Re-enqueue delay after a lock timeout. Configure via `MERGE_TRAIN_RELOCK_DELAY_MS`.
    pub relock_delay: Duration,

    /// Configure via `MERGE_TRAIN_MAX_MERGE_ATTEMPTS`.
    pub max_merge_attempts: u32,

    /// Configure via `MERGE_TRAIN_MAX_CONCURRENCY`.
    pub max_concurrency: usize,

    /// Configure via `MERGE_TRAIN_HISTORY_LIMIT`.
    pub history_limit: usize,

    /// Capacity of the worker's message channel.
    pub channel_buffer: usize,

    /// 0 disables automatic snapshots. Configure via `MERGE_TRAIN_SNAPSHOT_EVERY`.
    pub snapshot_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        SchedulerConfig {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            relock_delay: Duration::from_millis(DEFAULT_RELOCK_DELAY_MS),
            max_merge_attempts: DEFAULT_MAX_MERGE_ATTEMPTS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            history_limit: DEFAULT_HISTORY_LIMIT,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            lookup(name).and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::new();
        SchedulerConfig {
            state_dir: lookup("MERGE_TRAIN_STATE_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            lock_timeout: parsed(&lookup, "MERGE_TRAIN_LOCK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            relock_delay: parsed(&lookup, "MERGE_TRAIN_RELOCK_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.relock_delay),
            max_merge_attempts: parsed(&lookup, "MERGE_TRAIN_MAX_MERGE_ATTEMPTS")
                .unwrap_or(defaults.max_merge_attempts),
            max_concurrency: parsed(&lookup, "MERGE_TRAIN_MAX_CONCURRENCY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrency),
            history_limit: parsed(&lookup, "MERGE_TRAIN_HISTORY_LIMIT")
                .unwrap_or(defaults.history_limit),
            channel_buffer: defaults.channel_buffer,
            snapshot_every: parsed(&lookup, "MERGE_TRAIN_SNAPSHOT_EVERY")
                .unwrap_or(defaults.snapshot_every),
        }
    }
}
