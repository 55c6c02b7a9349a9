//! Decisions of the per-car refresh process that need no collaborators.
//!
//! The scheduler copies what it needs out of the table into [`CarFacts`],
//! releases the store, and asks [`precheck`] whether the car may stay on the
//! train at all. Ref lookups, pipeline creation and the merge itself happen
//! in the scheduler afterwards.

use std::fmt;

use crate::state::CarTable;
use crate::train::project_using_ff;
use crate::types::{Car, CarId, CarStatus, MergeRequest, PipelineId, ProjectSettings, Sha};

/// Why a car was taken off its train.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    TrainsDisabled,
    Closed,
    Draft,
    Broken,
    AutoMergeDisabled,
    MergeFailed(String),
    PipelineFailed,
    MissingPreviousRef,
    PipelineCreationFailed(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::TrainsDisabled => f.write_str("project disabled merge trains"),
            DropReason::Closed => f.write_str("the merge request is closed"),
            DropReason::Draft => f.write_str("the merge request is marked as draft"),
            DropReason::Broken => f.write_str("the merge request is broken"),
            DropReason::AutoMergeDisabled => {
                f.write_str("the merge request is not set to auto-merge")
            }
            DropReason::MergeFailed(error) => write!(f, "failed to merge. {error}"),
            DropReason::PipelineFailed => f.write_str("the pipeline did not succeed"),
            DropReason::MissingPreviousRef => f.write_str("the previous ref does not exist"),
            DropReason::PipelineCreationFailed(error) => {
                write!(f, "failed to create pipeline. {error}")
            }
        }
    }
}

/// What one refresh did to one car.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The car left the train before it was reached.
    Skipped,
    Dropped(DropReason),
    PipelineCreated(PipelineId),
    Merged(Sha),
    /// The merge failed and will be retried; `attempts` failures so far.
    MergeFailed { attempts: u32 },
    /// Pipeline still running, or not first in line.
    Waiting,
}

impl RefreshOutcome {
    /// Whether the car behind this one must get a new pipeline regardless
    /// of its own state.
    pub fn requires_next_recreate(&self) -> bool {
        matches!(
            self,
            RefreshOutcome::Dropped(_) | RefreshOutcome::PipelineCreated(_)
        )
    }
}

/// A copy of everything the refresh process reads about one car.
#[derive(Debug, Clone)]
pub(crate) struct CarFacts {
    pub car: Car,
    pub merge_request: Option<MergeRequest>,
    pub project: Option<ProjectSettings>,
    pub previous_ref: String,
    pub mergeable: bool,
    pub requires_new_pipeline: bool,
    pub pipeline_not_succeeded: bool,
    pub on_ff_train: bool,
    pub using_ff: bool,
}

impl CarFacts {
    /// `None` if the car is gone or no longer active.
    pub fn gather(table: &CarTable, car: CarId) -> Option<Self> {
        let view = table.car(car)?;
        if !view.is_active() {
            return None;
        }
        let record = view.car();
        Some(CarFacts {
            car: record.clone(),
            merge_request: view.merge_request().cloned(),
            project: table.project(record.target_project_id).cloned(),
            previous_ref: view.previous_ref(),
            mergeable: view.is_mergeable(),
            requires_new_pipeline: view.requires_new_pipeline(),
            pipeline_not_succeeded: view.pipeline_not_succeeded(),
            on_ff_train: view.on_ff_train(),
            using_ff: project_using_ff(table, record.target_project_id),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Precheck {
    Drop(DropReason),
    /// A previous merge attempt failed or was interrupted; try again.
    RetryMerge,
    Proceed,
}

/// The checks that come before any ref or pipeline work.
pub(crate) fn precheck(facts: &CarFacts, max_merge_attempts: u32) -> Precheck {
    if !facts.project.as_ref().is_some_and(|p| p.merge_trains_active()) {
        return Precheck::Drop(DropReason::TrainsDisabled);
    }

    let Some(mr) = facts.merge_request.as_ref() else {
        return Precheck::Drop(DropReason::Closed);
    };
    if !mr.is_open() {
        return Precheck::Drop(DropReason::Closed);
    }
    if mr.draft {
        return Precheck::Drop(DropReason::Draft);
    }
    if mr.broken {
        return Precheck::Drop(DropReason::Broken);
    }
    if !mr.auto_merge_enabled {
        return Precheck::Drop(DropReason::AutoMergeDisabled);
    }

    if facts.car.status == CarStatus::Merging {
        if facts.car.merge_attempts < max_merge_attempts {
            return Precheck::RetryMerge;
        }
        let error = mr.merge_error.clone().unwrap_or_default();
        return Precheck::Drop(DropReason::MergeFailed(error));
    }

    if facts.pipeline_not_succeeded {
        return Precheck::Drop(DropReason::PipelineFailed);
    }
    Precheck::Proceed
}
