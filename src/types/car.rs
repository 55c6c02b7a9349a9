//! Car records and the car status enum.
//!
//! A car is one merge request's attempt to ride a train. Its position in the
//! train is never stored: see `state::index` for how it is derived.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{CarId, MergeRequestId, ProjectId, Sha, TrainKey, UserId};
use super::pipeline::Pipeline;

/// The status of a car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    /// Queued; no pipeline evaluated yet.
    Idle,

    /// The attached pipeline was built against an outdated predecessor ref.
    Stale,

    /// The attached pipeline matches the expected predecessor ref.
    Fresh,

    /// The merge into the target branch is underway.
    Merging,

    /// Merged through the train.
    Merged,

    /// Merged outside the normal flow (administrative force-merge).
    SkipMerged,
}

impl CarStatus {
    /// Returns true while the car occupies a position in its train.
    pub fn is_active(&self) -> bool {
        !self.is_complete()
    }

    /// Returns true once the car has permanently left its train.
    pub fn is_complete(&self) -> bool {
        matches!(self, CarStatus::Merged | CarStatus::SkipMerged)
    }

    /// Returns true if the car has a merge commit (real or in progress) to report.
    pub fn has_entered_merge(&self) -> bool {
        matches!(
            self,
            CarStatus::Merging | CarStatus::Merged | CarStatus::SkipMerged
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            CarStatus::Idle => "idle",
            CarStatus::Stale => "stale",
            CarStatus::Fresh => "fresh",
            CarStatus::Merging => "merging",
            CarStatus::Merged => "merged",
            CarStatus::SkipMerged => "skip_merged",
        }
    }
}

impl fmt::Display for CarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The ref a pipeline was built on, captured when the pipeline was attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineBase {
    /// The car's `previous_ref` at attach time.
    pub ref_path: String,

    /// What `ref_path` resolved to at attach time, when the caller knew.
    pub sha: Option<Sha>,
}

/// A car on a merge train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub id: CarId,
    pub target_project_id: ProjectId,
    pub target_branch: String,
    pub merge_request_id: MergeRequestId,
    pub user_id: UserId,
    pub status: CarStatus,

    /// The speculative pipeline, owned by this car while it is active.
    pub pipeline: Option<Pipeline>,

    /// What the attached pipeline was built on. Set together with `pipeline`.
    pub pipeline_base: Option<PipelineBase>,

    pub created_at: DateTime<Utc>,

    /// Set exactly once, together with `duration_secs`, on entering a terminal status.
    pub merged_at: Option<DateTime<Utc>>,

    /// Seconds from creation to merge.
    pub duration_secs: Option<i64>,

    /// Failed merge attempts since the car entered `Merging`.
    pub merge_attempts: u32,
}

impl Car {
    /// Creates an idle car with no pipeline.
    pub fn new(
        id: CarId,
        key: TrainKey,
        merge_request_id: MergeRequestId,
        user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Car {
            id,
            target_project_id: key.project_id,
            target_branch: key.target_branch,
            merge_request_id,
            user_id,
            status: CarStatus::Idle,
            pipeline: None,
            pipeline_base: None,
            created_at,
            merged_at: None,
            duration_secs: None,
            merge_attempts: 0,
        }
    }

    pub fn train_key(&self) -> TrainKey {
        TrainKey::new(self.target_project_id, self.target_branch.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::seconds)
    }

    pub fn train_ref_path(&self) -> String {
        self.merge_request_id.train_ref_path()
    }

    /// Records the merge timestamp and duration. Callers guarantee this runs once.
    pub(crate) fn mark_merged(&mut self, status: CarStatus, at: DateTime<Utc>) {
        debug_assert!(status.is_complete());
        debug_assert!(self.merged_at.is_none(), "merged_at is set exactly once");
        self.status = status;
        self.merged_at = Some(at);
        self.duration_secs = Some((at - self.created_at).num_seconds().max(0));
    }
}
