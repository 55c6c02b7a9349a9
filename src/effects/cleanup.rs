//! Best-effort removal of a car's speculative train ref.
//!
//! A failed cleanup leaves an orphaned ref behind. That is garbage, not a
//! hazard for queue ordering, so failures are tracked and reported through
//! `CleanupOutcome` instead of being raised.

use tracing::{debug, warn};

use super::CleanupMode;
use super::interpreter::{ErrorTracker, JobQueue, RefStore};
use crate::types::{CarId, MergeRequestId};

/// What happened to a train ref cleanup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The ref existed and was deleted.
    Deleted,
    /// There was nothing to delete.
    AlreadyAbsent,
    /// Handed to the job queue.
    Scheduled,
    /// The ref store refused; the error was tracked.
    Failed { reason: String },
}

impl CleanupOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CleanupOutcome::Failed { .. })
    }
}

/// Removes the train ref of `merge_request`, now or via the job queue.
///
/// Safe to call repeatedly: a missing ref is reported as `AlreadyAbsent`.
pub async fn try_cleanup_ref<R, J, T>(
    refs: &R,
    jobs: &J,
    errors: &T,
    car: CarId,
    merge_request: MergeRequestId,
    mode: CleanupMode,
) -> CleanupOutcome
where
    R: RefStore,
    J: JobQueue,
    T: ErrorTracker,
{
    if mode == CleanupMode::Async {
        jobs.enqueue_ref_cleanup(car, merge_request);
        debug!(car = %car, merge_request = %merge_request, "Scheduled train ref cleanup");
        return CleanupOutcome::Scheduled;
    }

    let path = merge_request.train_ref_path();
    let result = match refs.ref_exists(&path).await {
        Ok(false) => return CleanupOutcome::AlreadyAbsent,
        Ok(true) => refs.delete_ref(&path).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            debug!(car = %car, path = %path, "Deleted train ref");
            CleanupOutcome::Deleted
        }
        Err(e) => {
            warn!(car = %car, path = %path, error = %e, "Failed to delete train ref");
            errors.track(&e, "train ref cleanup");
            CleanupOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockRefStore, RecordingJobs, RecordingTracker, sha};

    const CAR: CarId = CarId(1);
    const MR: MergeRequestId = MergeRequestId(7);

    #[tokio::test]
    async fn immediate_cleanup_deletes_existing_ref() {
        let refs = MockRefStore::default();
        refs.insert(&MR.train_ref_path(), sha('a'));
        let jobs = RecordingJobs::default();
        let errors = RecordingTracker::default();

        let outcome =
            try_cleanup_ref(&refs, &jobs, &errors, CAR, MR, CleanupMode::Immediate).await;

        assert_eq!(outcome, CleanupOutcome::Deleted);
        assert!(!refs.contains(&MR.train_ref_path()));
        assert_eq!(refs.delete_calls(), 1);
        assert!(jobs.cleanups().is_empty());
    }

    #[tokio::test]
    async fn immediate_cleanup_of_missing_ref_is_idempotent() {
        let refs = MockRefStore::default();
        let jobs = RecordingJobs::default();
        let errors = RecordingTracker::default();

        let first = try_cleanup_ref(&refs, &jobs, &errors, CAR, MR, CleanupMode::Immediate).await;
        let second = try_cleanup_ref(&refs, &jobs, &errors, CAR, MR, CleanupMode::Immediate).await;

        assert_eq!(first, CleanupOutcome::AlreadyAbsent);
        assert_eq!(second, CleanupOutcome::AlreadyAbsent);
        assert!(errors.tracked().is_empty());
    }

    #[tokio::test]
    async fn async_cleanup_enqueues_job() {
        let refs = MockRefStore::default();
        refs.insert(&MR.train_ref_path(), sha('a'));
        let jobs = RecordingJobs::default();
        let errors = RecordingTracker::default();

        let outcome = try_cleanup_ref(&refs, &jobs, &errors, CAR, MR, CleanupMode::Async).await;

        assert_eq!(outcome, CleanupOutcome::Scheduled);
        assert_eq!(jobs.cleanups(), vec![(CAR, MR)]);
        // Not deleted yet: the job does that.
        assert!(refs.contains(&MR.train_ref_path()));
    }

    #[tokio::test]
    async fn delete_failure_is_tracked_not_raised() {
        let refs = MockRefStore::default();
        refs.insert(&MR.train_ref_path(), sha('a'));
        refs.fail_deletes();
        let jobs = RecordingJobs::default();
        let errors = RecordingTracker::default();

        let outcome =
            try_cleanup_ref(&refs, &jobs, &errors, CAR, MR, CleanupMode::Immediate).await;

        assert!(outcome.is_failure());
        assert_eq!(errors.tracked(), vec!["train ref cleanup".to_string()]);
    }
}
