//! Merge request and project facts cached by the scheduler.
//!
//! The scheduler does not own merge requests or projects; it keeps the few
//! fields it needs to decide whether a car may stay on its train and how the
//! car should be merged. The API layer pushes updates in.

use serde::{Deserialize, Serialize};

use super::ids::{MergeRequestId, ProjectId, Sha, TrainKey};

/// The lifecycle state of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRequestState {
    Open,

    /// Open, with a merge in progress. Still counts as open for train purposes.
    Locked,

    Merged,
    Closed,
}

impl MergeRequestState {
    pub fn is_open(&self) -> bool {
        matches!(self, MergeRequestState::Open | MergeRequestState::Locked)
    }
}

/// What the ref store recorded when the train ref was (re)built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainRefInfo {
    /// The commit the train ref pointed at for the current pipeline.
    pub commit_sha: Option<Sha>,
}

/// Cached information about a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: MergeRequestId,
    pub target_project_id: ProjectId,
    pub source_branch: String,
    pub target_branch: String,
    pub state: MergeRequestState,
    pub draft: bool,

    /// Source branch missing or diff unavailable.
    pub broken: bool,

    /// Whether auto-merge (via the train) is still requested.
    pub auto_merge_enabled: bool,

    pub train_ref: TrainRefInfo,

    /// Merge commit created by a standard merge.
    pub merge_commit_sha: Option<Sha>,

    /// Commit being merged right now.
    pub in_progress_merge_commit_sha: Option<Sha>,

    /// Commit the target branch was fast-forwarded to (ff trains).
    pub merged_commit_sha: Option<Sha>,

    /// Last merge failure message, if any.
    pub merge_error: Option<String>,
}

impl MergeRequest {
    /// Creates an open, non-draft merge request with auto-merge enabled.
    pub fn new(
        id: MergeRequestId,
        target_project_id: ProjectId,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
    ) -> Self {
        MergeRequest {
            id,
            target_project_id,
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            state: MergeRequestState::Open,
            draft: false,
            broken: false,
            auto_merge_enabled: true,
            train_ref: TrainRefInfo::default(),
            merge_commit_sha: None,
            in_progress_merge_commit_sha: None,
            merged_commit_sha: None,
            merge_error: None,
        }
    }

    /// The train this merge request would join.
    pub fn train_key(&self) -> TrainKey {
        TrainKey::new(self.target_project_id, self.target_branch.clone())
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn train_ref_path(&self) -> String {
        self.id.train_ref_path()
    }

    /// Every sha this merge request is known to have landed (or be landing) as.
    pub fn recorded_merge_shas(&self) -> impl Iterator<Item = &Sha> {
        [
            self.in_progress_merge_commit_sha.as_ref(),
            self.merge_commit_sha.as_ref(),
            self.merged_commit_sha.as_ref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// How a project lands merge requests on the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    /// Merge commit.
    Merge,
    /// Merge commit, but only if the source is rebased (ff must be possible).
    RebaseMerge,
    /// Fast-forward only.
    Ff,
}

impl MergeMethod {
    /// Returns true if the target branch may only move by fast-forward-compatible merges.
    pub fn requires_fast_forward(&self) -> bool {
        matches!(self, MergeMethod::RebaseMerge | MergeMethod::Ff)
    }
}

/// Project settings relevant to merge trains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub id: ProjectId,
    pub merge_pipelines_enabled: bool,
    pub merge_trains_enabled: bool,
    pub merge_method: MergeMethod,
}

impl ProjectSettings {
    /// Settings with merge trains enabled and the given merge method.
    pub fn with_trains(id: ProjectId, merge_method: MergeMethod) -> Self {
        ProjectSettings {
            id,
            merge_pipelines_enabled: true,
            merge_trains_enabled: true,
            merge_method,
        }
    }

    /// Merge trains need merged-results pipelines; both switches must be on.
    pub fn merge_trains_active(&self) -> bool {
        self.merge_pipelines_enabled && self.merge_trains_enabled
    }
}
