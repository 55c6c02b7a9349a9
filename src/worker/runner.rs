//! The async event loop that drains train jobs.
//!
//! # Event Processing Flow
//!
//! 1. Receive a [`WorkerMessage`] (or wake for a delayed retry)
//! 2. Push it onto the [`RefreshQueue`], collapsing duplicates
//! 3. Pop jobs in priority order and hand them to the scheduler
//! 4. A refresh that times out on the train lock is retried after
//!    `relock_delay` instead of waiting
//!
//! Effects produced while processing a job come back through the
//! [`ChannelJobQueue`], so follow-up refreshes land on the same queue.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::message::WorkerMessage;
use super::queue::{Job, RefreshQueue};
use super::scheduler::TrainScheduler;
use crate::effects::{ErrorTracker, JobQueue, MergeExecutor, PipelineEngine, RefStore};
use crate::types::{CarId, MergeRequestId, TrainKey};

/// Creates the channel a worker listens on.
pub fn worker_channel(
    buffer: usize,
) -> (mpsc::Sender<WorkerMessage>, mpsc::Receiver<WorkerMessage>) {
    mpsc::channel(buffer.max(1))
}

/// A [`JobQueue`] that feeds a [`TrainWorker`]'s channel.
#[derive(Debug, Clone)]
pub struct ChannelJobQueue {
    tx: mpsc::Sender<WorkerMessage>,
}

impl ChannelJobQueue {
    pub fn new(tx: mpsc::Sender<WorkerMessage>) -> Self {
        ChannelJobQueue { tx }
    }

    fn send(&self, msg: WorkerMessage) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                // Jobs are at-least-once; wait for room off the caller's path.
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    warn!(?msg, "Worker channel full outside a runtime, dropping job");
                    return;
                };
                let tx = self.tx.clone();
                handle.spawn(async move {
                    if let Err(e) = tx.send(msg).await {
                        warn!(msg = ?e.0, "Worker channel closed, dropping job");
                    }
                });
            }
            Err(TrySendError::Closed(msg)) => {
                warn!(?msg, "Worker channel closed, dropping job");
            }
        }
    }
}

impl JobQueue for ChannelJobQueue {
    fn enqueue_refresh(&self, key: TrainKey) {
        self.send(WorkerMessage::Refresh(key));
    }

    fn enqueue_ref_cleanup(&self, car: CarId, merge_request: MergeRequestId) {
        self.send(WorkerMessage::CleanupRef { car, merge_request });
    }
}

#[derive(Debug)]
struct DelayedRefresh {
    fires_at: Instant,
    key: TrainKey,
}

pub struct TrainWorker<R, P, M, J, T> {
    scheduler: Arc<TrainScheduler<R, P, M, J, T>>,
    queue: RefreshQueue,
    delayed: Vec<DelayedRefresh>,
    relock_delay: Duration,
}

impl<R, P, M, J, T> TrainWorker<R, P, M, J, T>
where
    R: RefStore + Send + Sync,
    P: PipelineEngine + Send + Sync,
    M: MergeExecutor + Send + Sync,
    J: JobQueue + Send + Sync,
    T: ErrorTracker + Send + Sync,
{
    pub fn new(scheduler: Arc<TrainScheduler<R, P, M, J, T>>) -> Self {
        let relock_delay = scheduler.config().relock_delay;
        TrainWorker {
            scheduler,
            queue: RefreshQueue::new(),
            delayed: Vec::new(),
            relock_delay,
        }
    }

    /// Runs until shutdown is requested or every sender is dropped.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>, shutdown: CancellationToken) {
        info!("Train worker started");

        let mut stopping = false;
        loop {
            let next_wakeup = self.time_until_next_retry();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping worker");
                    break;
                }

                msg = rx.recv() => match msg {
                    Some(msg) => stopping = !self.accept(msg),
                    None => {
                        info!("Message channel closed");
                        break;
                    }
                },

                _ = async {
                    match next_wakeup {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => std::future::pending().await,
                    }
                } => {}
            }

            self.release_due_retries();
            while !stopping {
                match rx.try_recv() {
                    Ok(msg) => stopping = !self.accept(msg),
                    Err(_) => break,
                }
            }

            // Jobs accepted before a shutdown message still run.
            self.process_queue(&shutdown).await;
            if stopping {
                info!("Shutdown message received");
                break;
            }
        }

        if let Err(e) = self.scheduler.flush().await {
            error!(error = %e, "Error flushing store on shutdown");
        }
        info!("Train worker stopped");
    }

    /// Queues the job a message carries. Returns false for `Shutdown`.
    fn accept(&mut self, msg: WorkerMessage) -> bool {
        let job = match msg {
            WorkerMessage::Refresh(key) => Job::Refresh(key),
            WorkerMessage::CleanupRef { car, merge_request } => {
                Job::CleanupRef { car, merge_request }
            }
            WorkerMessage::Shutdown => return false,
        };
        if !self.queue.push(job) {
            debug!("Job already queued");
        }
        true
    }

    async fn process_queue(&mut self, shutdown: &CancellationToken) {
        while let Some(job) = self.queue.pop() {
            if shutdown.is_cancelled() {
                debug!(remaining = self.queue.len() + 1, "Shutdown requested, leaving jobs");
                return;
            }
            self.process(job).await;
        }
    }

    async fn process(&mut self, job: Job) {
        match job {
            Job::Refresh(key) => match self.scheduler.refresh_train(&key).await {
                Ok(outcomes) => debug!(train = %key, cars = outcomes.len(), "Train refreshed"),
                Err(e) if e.is_lock_timeout() => {
                    debug!(train = %key, delay = ?self.relock_delay, "Train locked, retrying later");
                    self.delayed.push(DelayedRefresh {
                        fires_at: Instant::now() + self.relock_delay,
                        key,
                    });
                }
                Err(e) => error!(train = %key, error = %e, "Train refresh failed"),
            },
            Job::CleanupRef { car, merge_request } => {
                let outcome = self.scheduler.cleanup_ref(car, merge_request).await;
                debug!(car = %car, ?outcome, "Train ref cleanup finished");
            }
        }
    }

    fn time_until_next_retry(&self) -> Option<Duration> {
        let now = Instant::now();
        self.delayed
            .iter()
            .map(|retry| retry.fires_at.saturating_duration_since(now))
            .min()
    }

    fn release_due_retries(&mut self) {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|retry| retry.fires_at <= now);
        self.delayed = waiting;
        for retry in due {
            self.queue.push(Job::Refresh(retry.key));
        }
    }
}
