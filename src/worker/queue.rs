//! Deduplicating priority queue for background train jobs.
//!
//! Jobs are ordered by priority (refreshes before ref cleanups), then by
//! sequence number (FIFO within the same priority). A job that is already
//! queued is not queued again, so a burst of refresh requests for one train
//! collapses into a single refresh.

use std::collections::{BinaryHeap, HashSet};

use crate::types::{CarId, MergeRequestId, TrainKey};

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Job {
    /// Re-evaluate every car of a train.
    Refresh(TrainKey),

    /// Delete the train ref of a car that left its train.
    CleanupRef {
        car: CarId,
        merge_request: MergeRequestId,
    },
}

impl Job {
    pub fn priority(&self) -> JobPriority {
        match self {
            Job::Refresh(_) => JobPriority::Refresh,
            Job::CleanupRef { .. } => JobPriority::Cleanup,
        }
    }
}

/// Orphaned refs are harmless, stalled trains are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    Cleanup,
    Refresh,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    pub priority: JobPriority,
    sequence: u64,
}

// BinaryHeap is a max-heap: higher priority first, then lower sequence first.
impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.priority.cmp(&other.priority) {
            std::cmp::Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

#[derive(Debug, Default)]
pub struct RefreshQueue {
    heap: BinaryHeap<QueuedJob>,
    next_sequence: u64,

    /// Jobs currently in the heap.
    queued: HashSet<Job>,
}

impl RefreshQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, job: &Job) -> bool {
        self.queued.contains(job)
    }

    /// Queues a job.
    ///
    /// Returns `false` if an identical job is already waiting.
    pub fn push(&mut self, job: Job) -> bool {
        if !self.queued.insert(job.clone()) {
            return false;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedJob {
            priority: job.priority(),
            job,
            sequence,
        });
        true
    }

    pub fn pop(&mut self) -> Option<Job> {
        let queued = self.heap.pop()?;
        self.queued.remove(&queued.job);
        Some(queued.job)
    }

    pub fn peek(&self) -> Option<&Job> {
        self.heap.peek().map(|queued| &queued.job)
    }

    /// Removes every job, in the order they would have been popped.
    pub fn drain(&mut self) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(self.heap.len());
        while let Some(job) = self.pop() {
            jobs.push(job);
        }
        jobs
    }
}
