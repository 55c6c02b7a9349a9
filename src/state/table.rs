//! The car table and its merge request and project caches.
//!
//! `CarTable` is plain data. Every mutation goes through [`CarTable::apply`]
//! with a persisted event payload, so a table rebuilt from a snapshot plus
//! the event log is identical to the live one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::view::CarView;
use crate::persistence::event::StateEventPayload;
use crate::types::{
    Car, CarId, CarStatus, MergeRequest, MergeRequestId, MergeRequestState, ProjectId,
    ProjectSettings, TrainKey,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarTable {
    /// Id handed to the next created car. Ids are never reused.
    next_car_id: u64,

    cars: BTreeMap<CarId, Car>,

    #[serde(default)]
    merge_requests: BTreeMap<MergeRequestId, MergeRequest>,

    #[serde(default)]
    projects: BTreeMap<ProjectId, ProjectSettings>,
}

impl CarTable {
    pub fn new() -> Self {
        CarTable {
            next_car_id: 1,
            ..Default::default()
        }
    }

    /// The id the next `create` will use.
    pub fn next_car_id(&self) -> CarId {
        CarId(self.next_car_id.max(1))
    }

    pub fn get(&self, id: CarId) -> Option<&Car> {
        self.cars.get(&id)
    }

    /// A read view over one car, for the derived queries.
    pub fn car(&self, id: CarId) -> Option<CarView<'_>> {
        self.cars.get(&id).map(|car| CarView::new(self, car))
    }

    /// All cars, ascending by id.
    pub fn cars(&self) -> impl Iterator<Item = &Car> {
        self.cars.values()
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    /// Every car of a train, active or not, ascending by id.
    pub fn for_train<'a>(&'a self, key: &TrainKey) -> impl Iterator<Item = &'a Car> + 'a {
        let key = key.clone();
        self.cars.values().filter(move |car| {
            car.target_project_id == key.project_id && car.target_branch == key.target_branch
        })
    }

    /// The active cars of a train, ascending by id. This is the queue.
    pub fn active_for(&self, key: &TrainKey) -> Vec<&Car> {
        self.for_train(key).filter(|car| car.is_active()).collect()
    }

    /// Distinct train keys that have at least one car.
    pub fn train_keys(&self) -> Vec<TrainKey> {
        let mut keys: Vec<TrainKey> = self.cars.values().map(Car::train_key).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn active_car_for_merge_request(&self, merge_request: MergeRequestId) -> Option<&Car> {
        self.cars
            .values()
            .find(|car| car.merge_request_id == merge_request && car.is_active())
    }

    pub fn merge_request(&self, id: MergeRequestId) -> Option<&MergeRequest> {
        self.merge_requests.get(&id)
    }

    pub fn project(&self, id: ProjectId) -> Option<&ProjectSettings> {
        self.projects.get(&id)
    }

    /// Applies a state event.
    ///
    /// Events referring to unknown cars are ignored; planners validate before
    /// emitting, so this only happens when replaying a damaged log.
    pub fn apply(&mut self, payload: &StateEventPayload) {
        match payload {
            StateEventPayload::ProjectConfigured { settings } => {
                self.projects.insert(settings.id, settings.clone());
                trace!(project = %settings.id, "Project configured");
            }

            StateEventPayload::MergeRequestUpserted { merge_request } => {
                self.merge_requests
                    .insert(merge_request.id, merge_request.clone());
                trace!(merge_request = %merge_request.id, "Merge request upserted");
            }

            StateEventPayload::CarCreated { car }
            | StateEventPayload::SkipMergedCarInserted { car } => {
                self.next_car_id = self.next_car_id.max(car.id.0 + 1);
                self.cars.insert(car.id, car.clone());
                trace!(car = %car.id, status = %car.status, "Car inserted");
            }

            StateEventPayload::CarDestroyed { car, reason } => {
                self.cars.remove(car);
                trace!(car = %car, reason = %reason, "Car destroyed");
            }

            StateEventPayload::PipelineRefreshed {
                car,
                pipeline,
                base,
            } => {
                if let Some(car) = self.cars.get_mut(car) {
                    car.status = CarStatus::Fresh;
                    car.pipeline = Some(pipeline.clone());
                    car.pipeline_base = Some(base.clone());
                }
                trace!(car = %car, pipeline = %pipeline.id, "Pipeline refreshed");
            }

            StateEventPayload::PipelineStatusChanged {
                car,
                pipeline,
                status,
            } => {
                if let Some(attached) = self
                    .cars
                    .get_mut(car)
                    .and_then(|car| car.pipeline.as_mut())
                    .filter(|attached| attached.id == *pipeline)
                {
                    attached.status = *status;
                }
                trace!(car = %car, pipeline = %pipeline, status = ?status, "Pipeline status changed");
            }

            StateEventPayload::PipelineOutdated { car } => {
                if let Some(car) = self.cars.get_mut(car) {
                    car.status = CarStatus::Stale;
                }
                trace!(car = %car, "Pipeline outdated");
            }

            StateEventPayload::MergeStarted { car } => {
                if let Some(car) = self.cars.get_mut(car) {
                    car.status = CarStatus::Merging;
                    car.merge_attempts = 0;
                    if let Some(mr) = self.merge_requests.get_mut(&car.merge_request_id) {
                        mr.state = MergeRequestState::Locked;
                        mr.merge_error = None;
                    }
                }
                trace!(car = %car, "Merge started");
            }

            StateEventPayload::MergeFailed { car, error } => {
                if let Some(car) = self.cars.get_mut(car) {
                    car.merge_attempts += 1;
                    if let Some(mr) = self.merge_requests.get_mut(&car.merge_request_id) {
                        mr.state = MergeRequestState::Open;
                        mr.merge_error = Some(error.clone());
                    }
                }
                trace!(car = %car, error = %error, "Merge failed");
            }

            StateEventPayload::MergeFinished {
                car,
                merged_at,
                commit_sha,
                fast_forward,
            } => {
                if let Some(car) = self.cars.get_mut(car) {
                    car.mark_merged(CarStatus::Merged, *merged_at);
                    if let Some(mr) = self.merge_requests.get_mut(&car.merge_request_id) {
                        mr.state = MergeRequestState::Merged;
                        mr.in_progress_merge_commit_sha = None;
                        mr.merge_error = None;
                        if *fast_forward {
                            mr.merged_commit_sha = Some(commit_sha.clone());
                        } else {
                            mr.merge_commit_sha = Some(commit_sha.clone());
                        }
                    }
                }
                trace!(car = %car, sha = %commit_sha, "Merge finished");
            }
        }
    }
}
