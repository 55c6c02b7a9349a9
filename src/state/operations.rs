//! Car operations as pure planners.
//!
//! Each planner validates against the current table and returns a
//! [`Change`]: the state events to persist plus the effects to run once
//! they are durable. Nothing is mutated here; `CarStore::commit` applies the
//! events and hands the effects back to the caller.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::table::CarTable;
use super::transitions::{CarAction, TransitionError, next_status};
use super::view::CarView;
use crate::effects::{CleanupMode, Effect};
use crate::persistence::event::StateEventPayload;
use crate::train::Train;
use crate::types::{
    Car, CarId, CarStatus, MergeRequest, MergeRequestId, Pipeline, PipelineBase, PipelineId,
    PipelineStatus, ProjectSettings, Sha, UserId,
};

/// Errors that can occur while planning a car operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("car {0} does not exist")]
    UnknownCar(CarId),

    #[error("merge request {0} is not cached")]
    UnknownMergeRequest(MergeRequestId),

    #[error("merge request {merge_request} is already on a train as {car}")]
    AlreadyOnTrain {
        merge_request: MergeRequestId,
        car: CarId,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub type Result<T> = std::result::Result<T, OperationError>;

/// State events to persist and effects to run afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Change {
    pub events: Vec<StateEventPayload>,
    pub effects: Vec<Effect>,
}

impl Change {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: StateEventPayload) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.push_effect(effect);
        self
    }

    /// Adds an effect unless an identical one is already queued.
    pub fn push_effect(&mut self, effect: Effect) {
        if !self.effects.contains(&effect) {
            self.effects.push(effect);
        }
    }

    pub fn extend(&mut self, other: Change) {
        self.events.extend(other.events);
        for effect in other.effects {
            self.push_effect(effect);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.effects.is_empty()
    }
}

fn view(table: &CarTable, id: CarId) -> Result<CarView<'_>> {
    table.car(id).ok_or(OperationError::UnknownCar(id))
}

fn check(car: &Car, action: CarAction) -> Result<CarStatus> {
    Ok(next_status(car.status, action, car.pipeline.is_some())?)
}

/// Replaces the cached project settings.
pub fn configure_project(settings: ProjectSettings) -> Change {
    Change::new().with_event(StateEventPayload::ProjectConfigured { settings })
}

/// Replaces the cached merge request.
///
/// If the merge request is on a train, that train is refreshed so closing,
/// drafting or disabling auto-merge takes effect.
pub fn upsert_merge_request(table: &CarTable, merge_request: MergeRequest) -> Change {
    let mut change = Change::new();
    if let Some(car) = table.active_car_for_merge_request(merge_request.id) {
        change.push_effect(Train::new(table, car.train_key()).refresh_async());
    }
    change.with_event(StateEventPayload::MergeRequestUpserted { merge_request })
}

/// Puts a merge request on the back of its train.
pub fn create(
    table: &CarTable,
    merge_request: &MergeRequest,
    user: UserId,
    now: DateTime<Utc>,
) -> Result<(CarId, Change)> {
    if let Some(existing) = table.active_car_for_merge_request(merge_request.id) {
        return Err(OperationError::AlreadyOnTrain {
            merge_request: merge_request.id,
            car: existing.id,
        });
    }

    let id = table.next_car_id();
    let key = merge_request.train_key();
    let car = Car::new(id, key.clone(), merge_request.id, user, now);
    let change = Change::new()
        .with_event(StateEventPayload::MergeRequestUpserted {
            merge_request: merge_request.clone(),
        })
        .with_event(StateEventPayload::CarCreated { car })
        .with_effect(Train::new(table, key).refresh_async());
    Ok((id, change))
}

/// Records a merge request that was merged outside the train.
///
/// The car is written directly in `skip_merged` with no pipeline. This is an
/// administrative escape hatch; it is never reachable through a transition.
pub fn insert_skip_merged(
    table: &CarTable,
    merge_request: &MergeRequest,
    user: UserId,
    now: DateTime<Utc>,
) -> (CarId, Change) {
    let id = table.next_car_id();
    let mut car = Car::new(id, merge_request.train_key(), merge_request.id, user, now);
    car.mark_merged(CarStatus::SkipMerged, now);

    let change = Change::new()
        .with_event(StateEventPayload::MergeRequestUpserted {
            merge_request: merge_request.clone(),
        })
        .with_event(StateEventPayload::SkipMergedCarInserted { car });
    (id, change)
}

/// Attaches a pipeline built on the car's current `previous_ref`.
///
/// `base_sha` is what that ref resolved to when the pipeline was created,
/// if the caller knows it.
pub fn refresh_pipeline(
    table: &CarTable,
    id: CarId,
    pipeline: Pipeline,
    base_sha: Option<Sha>,
) -> Result<Change> {
    let car = view(table, id)?;
    check(car.car(), CarAction::RefreshPipeline)?;

    let base = PipelineBase {
        ref_path: car.previous_ref(),
        sha: base_sha,
    };
    Ok(Change::new().with_event(StateEventPayload::PipelineRefreshed {
        car: id,
        pipeline,
        base,
    }))
}

/// Marks the attached pipeline as built on an outdated ref.
pub fn outdate_pipeline(table: &CarTable, id: CarId) -> Result<Change> {
    let car = view(table, id)?;
    check(car.car(), CarAction::OutdatePipeline)?;

    Ok(Change::new()
        .with_event(StateEventPayload::PipelineOutdated { car: id })
        .with_effect(car.train().refresh_async()))
}

/// Updates the status of the attached pipeline.
///
/// Reports for a pipeline that is no longer attached are ignored. A finished
/// pipeline triggers a train refresh.
pub fn pipeline_status_changed(
    table: &CarTable,
    id: CarId,
    pipeline: PipelineId,
    status: PipelineStatus,
) -> Result<Change> {
    let car = view(table, id)?;
    let attached = car.car().pipeline.as_ref().filter(|p| p.id == pipeline);
    if attached.is_none() || !car.is_active() {
        return Ok(Change::new());
    }

    let mut change = Change::new().with_event(StateEventPayload::PipelineStatusChanged {
        car: id,
        pipeline,
        status,
    });
    if !status.is_running() {
        change.push_effect(car.train().refresh_async());
    }
    Ok(change)
}

pub fn start_merge(table: &CarTable, id: CarId) -> Result<Change> {
    let car = view(table, id)?;
    check(car.car(), CarAction::StartMerge)?;
    Ok(Change::new().with_event(StateEventPayload::MergeStarted { car: id }))
}

/// Records a failed merge attempt. The car stays in `merging`.
pub fn record_merge_failure(
    table: &CarTable,
    id: CarId,
    error: impl Into<String>,
) -> Result<Change> {
    let car = view(table, id)?;
    check(car.car(), CarAction::RecordMergeFailure)?;
    Ok(Change::new().with_event(StateEventPayload::MergeFailed {
        car: id,
        error: error.into(),
    }))
}

/// Completes a merge: `merging → merged`, ref cleanup scheduled, successor
/// outdated if its pipeline was built on this car's train ref.
pub fn finish_merge(
    table: &CarTable,
    id: CarId,
    now: DateTime<Utc>,
    commit_sha: Sha,
    fast_forward: bool,
) -> Result<Change> {
    let car = view(table, id)?;
    check(car.car(), CarAction::FinishMerge)?;

    let mut change = Change::new()
        .with_event(StateEventPayload::MergeFinished {
            car: id,
            merged_at: now,
            commit_sha,
            fast_forward,
        })
        .with_effect(Effect::CleanupRef {
            car: id,
            merge_request: car.car().merge_request_id,
            mode: CleanupMode::Async,
        });
    change.extend(successor_after_departure(car));
    Ok(change)
}

/// Removes a car from its train without merging.
///
/// A running pipeline is cancelled and the train ref cleaned up; both are
/// effects, so nothing here can fail after validation.
pub fn destroy(
    table: &CarTable,
    id: CarId,
    reason: impl Into<String>,
    cleanup: CleanupMode,
) -> Result<Change> {
    let car = view(table, id)?;
    let record = car.car();

    let mut change = Change::new().with_event(StateEventPayload::CarDestroyed {
        car: id,
        reason: reason.into(),
    });
    if let Some(pipeline) = record.pipeline.as_ref().filter(|p| p.status.is_running()) {
        change.push_effect(Effect::CancelPipeline {
            car: id,
            pipeline: pipeline.id,
        });
    }
    change.push_effect(Effect::CleanupRef {
        car: id,
        merge_request: record.merge_request_id,
        mode: cleanup,
    });
    if car.is_active() {
        change.extend(successor_after_departure(car));
    }
    Ok(change)
}

/// Outdates the next car once `departing` leaves the active set.
///
/// The successor's expected `previous_ref` becomes whatever `departing`
/// expected. If its pipeline was built on something else and it is still
/// `idle` or `fresh`, it goes `stale`. The train is refreshed either way.
fn successor_after_departure(departing: CarView<'_>) -> Change {
    let mut change = Change::new().with_effect(departing.train().refresh_async());
    let Some(next) = departing.next() else {
        return change;
    };
    let successor = next.car();
    let Some(base) = successor.pipeline_base.as_ref() else {
        return change;
    };
    let expected = departing.previous_ref();
    if base.ref_path == expected {
        return change;
    }

    // Already-stale successors need nothing more.
    let outdatable = next_status(
        successor.status,
        CarAction::OutdatePipeline,
        successor.pipeline.is_some(),
    )
    .is_ok();
    if outdatable {
        change
            .events
            .push(StateEventPayload::PipelineOutdated { car: successor.id });
    }
    change
}
