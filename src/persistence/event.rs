//! Event types for the persistence event log.
//!
//! These events are appended to the event log in JSON Lines format.
//! Each event has a monotonic sequence number and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    Car, CarId, MergeRequest, Pipeline, PipelineBase, PipelineId, PipelineStatus,
    ProjectSettings, Sha,
};

/// An event in the event log.
///
/// Events are serialized as JSON Lines (one JSON object per line).
/// The payload is flattened into the event object.
///
/// Example JSON:
/// ```json
/// {"seq":1,"ts":"2024-01-15T10:00:00Z","type":"pipeline_outdated","car":12}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    /// Monotonic sequence number. Used for replay positioning and ordering.
    pub seq: u64,

    /// Timestamp when the event was written (UTC).
    pub ts: DateTime<Utc>,

    /// The event payload, flattened into the JSON object.
    #[serde(flatten)]
    pub payload: StateEventPayload,
}

impl StateEvent {
    /// Creates a new event with the given sequence number and payload.
    /// Timestamp is set to the current time.
    pub fn new(seq: u64, payload: StateEventPayload) -> Self {
        StateEvent {
            seq,
            ts: Utc::now(),
            payload,
        }
    }

    /// Returns true if this event requires immediate fsync.
    pub fn is_critical(&self) -> bool {
        self.payload.is_critical()
    }
}

/// Event payload types for the event log.
///
/// Serialized with internal tagging: `{"type": "car_created", "car": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEventPayload {
    // ─── Cache updates ───
    /// Project settings were set or changed.
    ProjectConfigured { settings: ProjectSettings },

    /// The cached copy of a merge request was replaced.
    MergeRequestUpserted { merge_request: MergeRequest },

    // ─── Car lifecycle (critical) ───
    /// A car joined its train in `idle`.
    CarCreated { car: Car },

    /// A car was written directly in `skip_merged`.
    SkipMergedCarInserted { car: Car },

    /// A car left its train without merging.
    CarDestroyed { car: CarId, reason: String },

    // ─── Pipeline tracking ───
    /// A new pipeline was attached; the car becomes `fresh`.
    PipelineRefreshed {
        car: CarId,
        pipeline: Pipeline,
        base: PipelineBase,
    },

    /// The engine reported a new status for the attached pipeline.
    PipelineStatusChanged {
        car: CarId,
        pipeline: PipelineId,
        status: PipelineStatus,
    },

    /// The car's expected predecessor ref moved; the car becomes `stale`.
    PipelineOutdated { car: CarId },

    // ─── Merge (critical) ───
    /// The car entered `merging`.
    MergeStarted { car: CarId },

    /// A merge attempt failed; the car stays in `merging`.
    MergeFailed { car: CarId, error: String },

    /// The car merged.
    MergeFinished {
        car: CarId,
        merged_at: DateTime<Utc>,
        commit_sha: Sha,
        /// True when the target branch was fast-forwarded to the train ref.
        fast_forward: bool,
    },
}

impl StateEventPayload {
    /// Returns true if this event must be durable before the caller proceeds.
    ///
    /// Cache updates, pipeline bookkeeping and outdating can all be rebuilt by
    /// the next train refresh, so they are batched.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            StateEventPayload::CarCreated { .. }
                | StateEventPayload::SkipMergedCarInserted { .. }
                | StateEventPayload::CarDestroyed { .. }
                | StateEventPayload::MergeStarted { .. }
                | StateEventPayload::MergeFailed { .. }
                | StateEventPayload::MergeFinished { .. }
        )
    }

    /// The car this event touches, if any.
    pub fn car(&self) -> Option<CarId> {
        match self {
            StateEventPayload::ProjectConfigured { .. }
            | StateEventPayload::MergeRequestUpserted { .. } => None,
            StateEventPayload::CarCreated { car }
            | StateEventPayload::SkipMergedCarInserted { car } => Some(car.id),
            StateEventPayload::CarDestroyed { car, .. }
            | StateEventPayload::PipelineRefreshed { car, .. }
            | StateEventPayload::PipelineStatusChanged { car, .. }
            | StateEventPayload::PipelineOutdated { car }
            | StateEventPayload::MergeStarted { car }
            | StateEventPayload::MergeFailed { car, .. }
            | StateEventPayload::MergeFinished { car, .. } => Some(*car),
        }
    }
}
