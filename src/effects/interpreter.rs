//! Collaborator traits.
//!
//! The scheduler consumes the ref store, the pipeline engine and the merge
//! executor only through these narrow traits. Implementations live outside
//! this crate (tests use the in-memory mocks from `test_utils`).
//!
//! The async traits return `impl Future + Send` so the scheduler can drive
//! them from a tokio task while holding a per-train lock.

use std::future::Future;

use crate::types::{CarId, MergeRequest, MergeRequestId, Pipeline, PipelineId, Sha, TrainKey};

/// Git ref storage: create, resolve and delete refs.
pub trait RefStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns true if the ref exists.
    fn ref_exists(&self, path: &str) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Resolves a ref to the commit it points at, or `None` if absent.
    fn resolve_ref(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<Sha>, Self::Error>> + Send;

    /// Points `path` at `sha`, creating the ref if needed.
    fn create_ref(
        &self,
        path: &str,
        sha: &Sha,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Deletes a ref. Deleting a missing ref must not fail.
    fn delete_ref(&self, path: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// How the engine handled a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Jobs were stopped on the spot.
    Canceled,
    /// The engine supports cooperative cancellation; jobs were asked to stop.
    Canceling,
    /// Nothing was running.
    NothingToCancel,
}

/// The CI pipeline engine.
pub trait PipelineEngine {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a speculative pipeline for `merge_request` stacked on `previous_ref`.
    ///
    /// The engine builds the speculative commit (`previous_ref` + the merge
    /// request's changes) and returns the pipeline with the sha it will test.
    /// The scheduler then points the train ref at that sha with
    /// [`RefStore::create_ref`].
    fn create_pipeline(
        &self,
        merge_request: &MergeRequest,
        previous_ref: &str,
    ) -> impl Future<Output = Result<Pipeline, Self::Error>> + Send;

    /// Cancels in-flight jobs of a pipeline.
    fn cancel_pipeline(
        &self,
        pipeline: PipelineId,
    ) -> impl Future<Output = Result<CancelOutcome, Self::Error>> + Send;
}

/// How a car lands on its target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Merge the merge request the way the project normally does.
    Default,
    /// Fast-forward the target branch to the tested train ref commit.
    FromTrainRef,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The commit now at the tip of the target branch for this merge request.
    pub commit_sha: Sha,
}

/// Performs the actual merge into the target branch.
pub trait MergeExecutor {
    type Error: std::error::Error + Send + Sync + 'static;

    fn merge(
        &self,
        merge_request: &MergeRequest,
        strategy: MergeStrategy,
    ) -> impl Future<Output = Result<MergeOutcome, Self::Error>> + Send;
}

/// Fire-and-forget background work. At-least-once delivery is assumed.
pub trait JobQueue {
    /// Requests a re-evaluation of a train.
    fn enqueue_refresh(&self, key: TrainKey);

    /// Requests deletion of a car's train ref.
    fn enqueue_ref_cleanup(&self, car: CarId, merge_request: MergeRequestId);
}

/// Error-tracking sink for failures that must not interrupt the caller.
pub trait ErrorTracker {
    fn track(&self, error: &(dyn std::error::Error + 'static), context: &str);
}
