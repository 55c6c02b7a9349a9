//! The slice of a CI pipeline the scheduler consumes: id, status, tested sha.

use serde::{Deserialize, Serialize};

use super::ids::{PipelineId, Sha};

/// Status of a pipeline as reported by the pipeline engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Created,
    Pending,
    Running,
    Success,
    Failed,
    Canceling,
    Canceled,
    Skipped,
}

impl PipelineStatus {
    /// Returns true while the pipeline may still produce a result.
    ///
    /// `Created` and `Pending` count as running: the engine has accepted the
    /// pipeline and jobs are queued.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Created | PipelineStatus::Pending | PipelineStatus::Running
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PipelineStatus::Success)
    }

    /// Returns true if the pipeline ended without succeeding.
    pub fn is_unsuccessful(&self) -> bool {
        !self.is_running() && !self.is_success()
    }
}

/// A speculative pipeline attached to a car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub status: PipelineStatus,

    /// The commit the pipeline tested (the tip of the car's train ref at creation).
    pub sha: Sha,
}

impl Pipeline {
    pub fn new(id: PipelineId, status: PipelineStatus, sha: Sha) -> Self {
        Pipeline { id, status, sha }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_like_statuses_are_unsuccessful() {
        let unsuccessful = [
            PipelineStatus::Failed,
            PipelineStatus::Canceling,
            PipelineStatus::Canceled,
            PipelineStatus::Skipped,
        ];
        let fine = [
            PipelineStatus::Created,
            PipelineStatus::Pending,
            PipelineStatus::Running,
            PipelineStatus::Success,
        ];

        for status in unsuccessful {
            assert!(status.is_unsuccessful(), "{status:?}");
        }
        for status in fine {
            assert!(!status.is_unsuccessful(), "{status:?}");
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&PipelineStatus::Canceling).unwrap();
        assert_eq!(json, "\"canceling\"");
    }
}
