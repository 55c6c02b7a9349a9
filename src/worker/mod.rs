//! Scheduling: per-train locks, the job queue, the refresh process and the
//! worker that drives it.
//!
//! # Architecture
//!
//! - Work for one train is serialized by a per-train lock; different trains
//!   proceed concurrently
//! - Lock acquisition is bounded; a refresh that loses the race is
//!   re-enqueued after a delay
//! - Refresh requests are deduplicated while queued
//!
//! # Module Structure
//!
//! - [`lock`]: per-train mutual exclusion
//! - [`queue`]: priority queue for background jobs
//! - [`message`]: worker message types
//! - [`refresh`]: drop reasons and the collaborator-free refresh checks
//! - [`scheduler`]: the `TrainScheduler` orchestrator
//! - [`runner`]: the async `TrainWorker` loop and its `JobQueue`

pub mod lock;
pub mod message;
pub mod queue;
pub mod refresh;
pub mod runner;
pub mod scheduler;

pub use lock::{LockError, TrainGuard, TrainLocks};
pub use message::WorkerMessage;
pub use queue::{Job, JobPriority, RefreshQueue};
pub use refresh::{DropReason, RefreshOutcome};
pub use runner::{ChannelJobQueue, TrainWorker, worker_channel};
pub use scheduler::{Collaborators, SchedulerError, TrainScheduler};
