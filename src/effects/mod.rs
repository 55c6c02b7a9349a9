//! Effects-as-data for the side effects of car transitions.
//!
//! Transition planners never enqueue work or touch refs themselves. They
//! return `Effect` values describing what should happen next, and the
//! scheduler hands them to the collaborators defined in [`interpreter`].
//! This keeps the state machine testable without a job queue.

use serde::{Deserialize, Serialize};

pub mod cleanup;
pub mod interpreter;

pub use cleanup::{CleanupOutcome, try_cleanup_ref};
pub use interpreter::{
    CancelOutcome, ErrorTracker, JobQueue, MergeExecutor, MergeOutcome, MergeStrategy,
    PipelineEngine, RefStore,
};

use crate::types::{CarId, MergeRequestId, PipelineId, TrainKey};

/// Whether a ref cleanup runs now or through the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    Async,
    Immediate,
}

/// A side effect requested by a car transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    /// Re-evaluate a whole train.
    RefreshTrain { key: TrainKey },

    /// Delete a car's speculative train ref.
    CleanupRef {
        car: CarId,
        merge_request: MergeRequestId,
        mode: CleanupMode,
    },

    /// Cancel the in-flight jobs of a car's pipeline.
    CancelPipeline { car: CarId, pipeline: PipelineId },
}

impl Effect {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Effect::RefreshTrain { .. } => "refresh_train",
            Effect::CleanupRef { .. } => "cleanup_ref",
            Effect::CancelPipeline { .. } => "cancel_pipeline",
        }
    }
}
