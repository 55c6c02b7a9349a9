//! The train scheduler: the only place where planners, the store and the
//! collaborators meet.
//!
//! # Locking
//!
//! Every operation that changes a car takes the car's train lock first and
//! the store lock second. The store lock is held only while planning and
//! committing one [`Change`]; collaborator calls happen with the train lock
//! held and the store lock released.
//!
//! # Refresh Process
//!
//! `refresh_train` walks the first `max_concurrency` active cars of a train
//! in id order. Each car is checked (project, merge request, merge retries,
//! pipeline result), its `previous_ref` resolved, its pipeline outdated or
//! recreated if needed, and finally merged if it is first with a green
//! pipeline. A car that was dropped or got a new pipeline forces the car
//! behind it to get a new pipeline too.

use std::error::Error as StdError;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use super::lock::{LockError, TrainLocks};
use super::refresh::{CarFacts, DropReason, Precheck, RefreshOutcome, precheck};
use crate::config::SchedulerConfig;
use crate::effects::{
    CleanupMode, CleanupOutcome, Effect, ErrorTracker, JobQueue, MergeExecutor, MergeStrategy,
    PipelineEngine, RefStore, try_cleanup_ref,
};
use crate::persistence::{CarStore, StateEventPayload, StoreError};
use crate::state::{CarAction, CarTable, Change, OperationError, next_status, operations};
use crate::train::Train;
use crate::types::{
    Car, CarId, MergeRequest, MergeRequestId, Pipeline, PipelineId, PipelineStatus,
    ProjectSettings, Sha, TrainKey, UserId,
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{context}: {source}")]
    Collaborator {
        context: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl SchedulerError {
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, SchedulerError::Lock(LockError::Timeout { .. }))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// The external systems the scheduler drives.
#[derive(Debug, Clone)]
pub struct Collaborators<R, P, M, J, T> {
    pub refs: R,
    pub pipelines: P,
    pub merger: M,
    pub jobs: J,
    pub errors: T,
}

pub struct TrainScheduler<R, P, M, J, T> {
    store: Mutex<CarStore>,
    locks: TrainLocks,
    refs: R,
    pipelines: P,
    merger: M,
    jobs: J,
    errors: T,
    config: SchedulerConfig,
}

impl<R, P, M, J, T> TrainScheduler<R, P, M, J, T>
where
    R: RefStore + Send + Sync,
    P: PipelineEngine + Send + Sync,
    M: MergeExecutor + Send + Sync,
    J: JobQueue + Send + Sync,
    T: ErrorTracker + Send + Sync,
{
    pub fn new(
        store: CarStore,
        collaborators: Collaborators<R, P, M, J, T>,
        config: SchedulerConfig,
    ) -> Self {
        let Collaborators {
            refs,
            pipelines,
            merger,
            jobs,
            errors,
        } = collaborators;
        TrainScheduler {
            store: Mutex::new(store),
            locks: TrainLocks::new(config.lock_timeout),
            refs,
            pipelines,
            merger,
            jobs,
            errors,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn locks(&self) -> &TrainLocks {
        &self.locks
    }

    /// Runs a read-only query against the live table.
    pub async fn read<F, O>(&self, query: F) -> O
    where
        F: FnOnce(&CarTable) -> O,
    {
        let store = self.store.lock().await;
        query(store.table())
    }

    /// Whether `sha` was merged by one of the last `history_limit` cars of
    /// the train.
    pub async fn sha_in_history(&self, key: &TrainKey, sha: &Sha) -> bool {
        let limit = self.config.history_limit;
        self.read(|table| Train::new(table, key.clone()).sha_exists_in_history(sha, limit))
            .await
    }

    /// Syncs batched events to disk.
    pub async fn flush(&self) -> Result<()> {
        self.store.lock().await.flush()?;
        Ok(())
    }

    pub async fn save_snapshot(&self) -> Result<()> {
        self.store.lock().await.save_snapshot()?;
        Ok(())
    }

    // ─── Entry points ───────────────────────────────────────────────────────

    /// Replaces a project's settings. Turning trains off refreshes every
    /// active train of the project so its cars are dropped.
    #[instrument(skip(self, settings), fields(project = %settings.id))]
    pub async fn configure_project(&self, settings: ProjectSettings) -> Result<()> {
        let project = settings.id;
        let disabled = !settings.merge_trains_active();
        self.apply(|_| Ok(operations::configure_project(settings)))
            .await?;

        if disabled {
            let keys: Vec<TrainKey> = self
                .read(|table| {
                    table
                        .train_keys()
                        .into_iter()
                        .filter(|key| key.project_id == project)
                        .filter(|key| !table.active_for(key).is_empty())
                        .collect()
                })
                .await;
            for key in keys {
                self.jobs.enqueue_refresh(key);
            }
        }
        Ok(())
    }

    #[instrument(skip(self, merge_request), fields(merge_request = %merge_request.id))]
    pub async fn upsert_merge_request(&self, merge_request: MergeRequest) -> Result<()> {
        self.apply(|table| Ok(operations::upsert_merge_request(table, merge_request)))
            .await
    }

    /// Puts a merge request on the back of its train.
    #[instrument(skip(self, merge_request), fields(merge_request = %merge_request.id))]
    pub async fn enqueue(&self, merge_request: &MergeRequest, user: UserId) -> Result<CarId> {
        let key = merge_request.train_key();
        let _guard = self.locks.acquire(&key).await?;

        let (id, effects) = {
            let mut store = self.store.lock().await;
            let (id, change) = operations::create(store.table(), merge_request, user, Utc::now())?;
            (id, store.commit(change)?)
        };
        info!(car = %id, train = %key, "Car joined train");
        self.execute_effects(effects).await;
        Ok(id)
    }

    /// Records a merge request merged outside the train's normal flow.
    #[instrument(skip(self, merge_request), fields(merge_request = %merge_request.id))]
    pub async fn insert_skip_merged_car_for(
        &self,
        merge_request: &MergeRequest,
        user: UserId,
    ) -> Result<CarId> {
        let key = merge_request.train_key();
        let _guard = self.locks.acquire(&key).await?;

        let (id, effects) = {
            let mut store = self.store.lock().await;
            let (id, change) =
                operations::insert_skip_merged(store.table(), merge_request, user, Utc::now());
            (id, store.commit(change)?)
        };
        info!(car = %id, train = %key, user = %user, "Inserted skip-merged car");
        self.execute_effects(effects).await;
        Ok(id)
    }

    #[instrument(skip(self, pipeline), fields(pipeline = %pipeline.id))]
    pub async fn refresh_pipeline(
        &self,
        car: CarId,
        pipeline: Pipeline,
        base_sha: Option<Sha>,
    ) -> Result<()> {
        let key = self.key_of(car).await?;
        let _guard = self.locks.acquire(&key).await?;
        self.apply(|table| operations::refresh_pipeline(table, car, pipeline, base_sha))
            .await
    }

    #[instrument(skip(self))]
    pub async fn outdate_pipeline(&self, car: CarId) -> Result<()> {
        let key = self.key_of(car).await?;
        let _guard = self.locks.acquire(&key).await?;
        self.apply(|table| operations::outdate_pipeline(table, car))
            .await
    }

    /// Pipeline engine callback.
    #[instrument(skip(self))]
    pub async fn pipeline_status_changed(
        &self,
        car: CarId,
        pipeline: PipelineId,
        status: PipelineStatus,
    ) -> Result<()> {
        let key = self.key_of(car).await?;
        let _guard = self.locks.acquire(&key).await?;
        self.apply(|table| operations::pipeline_status_changed(table, car, pipeline, status))
            .await
    }

    /// Removes a car from its train. Cancellation and ref cleanup failures
    /// are tracked, never returned.
    #[instrument(skip(self))]
    pub async fn destroy(&self, car: CarId, reason: &str, cleanup: CleanupMode) -> Result<()> {
        let key = self.key_of(car).await?;
        let _guard = self.locks.acquire(&key).await?;
        self.remove_car(car, reason, cleanup).await?;
        info!(car = %car, train = %key, reason, "Car removed from train");
        Ok(())
    }

    /// Deletes a car's train ref now. Used by the cleanup job.
    pub async fn cleanup_ref(&self, car: CarId, merge_request: MergeRequestId) -> CleanupOutcome {
        try_cleanup_ref(
            &self.refs,
            &self.jobs,
            &self.errors,
            car,
            merge_request,
            CleanupMode::Immediate,
        )
        .await
    }

    /// Re-evaluates the cars of a train.
    #[instrument(skip(self), fields(train = %key))]
    pub async fn refresh_train(&self, key: &TrainKey) -> Result<Vec<(CarId, RefreshOutcome)>> {
        let _guard = self.locks.acquire(key).await?;

        let limit = self.config.max_concurrency;
        let cars: Vec<CarId> = self
            .read(|table| {
                table
                    .active_for(key)
                    .into_iter()
                    .take(limit)
                    .map(|car| car.id)
                    .collect()
            })
            .await;
        debug!(cars = cars.len(), "Refreshing train");

        let mut outcomes = Vec::with_capacity(cars.len());
        let mut require_recreate = false;
        for car in cars {
            let outcome = self.refresh_car(car, require_recreate).await?;
            debug!(car = %car, ?outcome, "Refreshed car");
            require_recreate = outcome.requires_next_recreate();
            outcomes.push((car, outcome));
        }
        Ok(outcomes)
    }

    // ─── Refresh steps ──────────────────────────────────────────────────────

    async fn refresh_car(&self, car: CarId, require_recreate: bool) -> Result<RefreshOutcome> {
        let Some(mut facts) = self.facts(car).await else {
            return Ok(RefreshOutcome::Skipped);
        };

        match precheck(&facts, self.config.max_merge_attempts) {
            Precheck::Drop(reason) => return self.drop_car(car, reason).await,
            Precheck::RetryMerge => return self.merge(&facts).await,
            Precheck::Proceed => {}
        }

        let Some(base_sha) = self.resolve(&facts.previous_ref).await? else {
            return self.drop_car(car, DropReason::MissingPreviousRef).await;
        };

        let built_on_other_sha = facts
            .car
            .pipeline_base
            .as_ref()
            .and_then(|base| base.sha.as_ref())
            .is_some_and(|sha| *sha != base_sha);
        if built_on_other_sha && outdatable(&facts.car) {
            debug!(car = %car, base = %base_sha.short(), "Pipeline built on an outdated base");
            self.apply(|table| operations::outdate_pipeline(table, car))
                .await?;
            facts = match self.facts(car).await {
                Some(facts) => facts,
                None => return Ok(RefreshOutcome::Skipped),
            };
        }

        let mut created = None;
        if facts.requires_new_pipeline || require_recreate {
            match self.recreate_pipeline(&facts, base_sha).await? {
                RefreshOutcome::PipelineCreated(id) => created = Some(id),
                other => return Ok(other),
            }
            facts = match self.facts(car).await {
                Some(facts) => facts,
                None => return Ok(RefreshOutcome::Skipped),
            };
        }

        if facts.mergeable {
            self.apply(|table| operations::start_merge(table, car))
                .await?;
            let Some(facts) = self.facts(car).await else {
                return Ok(RefreshOutcome::Skipped);
            };
            return self.merge(&facts).await;
        }

        Ok(created.map_or(RefreshOutcome::Waiting, RefreshOutcome::PipelineCreated))
    }

    async fn facts(&self, car: CarId) -> Option<CarFacts> {
        self.read(|table| CarFacts::gather(table, car)).await
    }

    async fn resolve(&self, path: &str) -> Result<Option<Sha>> {
        self.refs.resolve_ref(path).await.map_err(|e| {
            warn!(path, error = %e, "Failed to resolve ref");
            self.errors.track(&e, "resolve previous ref");
            SchedulerError::Collaborator {
                context: "resolve previous ref",
                source: Box::new(e),
            }
        })
    }

    /// Cancels the old pipeline and builds a new one on `previous_ref`.
    async fn recreate_pipeline(&self, facts: &CarFacts, base_sha: Sha) -> Result<RefreshOutcome> {
        let car = facts.car.id;
        if let Some(old) = facts.car.pipeline.as_ref().filter(|p| p.status.is_running()) {
            self.cancel(car, old.id).await;
        }
        let Some(merge_request) = facts.merge_request.as_ref() else {
            return self.drop_car(car, DropReason::Closed).await;
        };

        let pipeline = match self
            .pipelines
            .create_pipeline(merge_request, &facts.previous_ref)
            .await
        {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!(car = %car, error = %e, "Failed to create train pipeline");
                self.errors.track(&e, "merge train pipeline creation");
                let reason = DropReason::PipelineCreationFailed(e.to_string());
                return self.drop_car(car, reason).await;
            }
        };

        let train_ref = merge_request.train_ref_path();
        if let Err(e) = self.refs.create_ref(&train_ref, &pipeline.sha).await {
            warn!(car = %car, path = %train_ref, error = %e, "Failed to create train ref");
            self.errors.track(&e, "train ref creation");
            self.cancel(car, pipeline.id).await;
            let reason = DropReason::PipelineCreationFailed(e.to_string());
            return self.drop_car(car, reason).await;
        }

        let id = pipeline.id;
        let tested = pipeline.sha.clone();
        let merge_request = merge_request.id;
        self.apply(|table| {
            let mut change = operations::refresh_pipeline(table, car, pipeline, Some(base_sha))?;
            if let Some(mut cached) = table.merge_request(merge_request).cloned() {
                cached.train_ref.commit_sha = Some(tested);
                change.events.push(StateEventPayload::MergeRequestUpserted {
                    merge_request: cached,
                });
            }
            Ok(change)
        })
        .await?;
        info!(car = %car, pipeline = %id, previous_ref = %facts.previous_ref, "Created train pipeline");
        Ok(RefreshOutcome::PipelineCreated(id))
    }

    /// Merges a car that is already `merging`.
    async fn merge(&self, facts: &CarFacts) -> Result<RefreshOutcome> {
        let car = facts.car.id;
        let Some(merge_request) = facts.merge_request.as_ref() else {
            return self.drop_car(car, DropReason::Closed).await;
        };
        let strategy = if facts.using_ff && facts.on_ff_train {
            MergeStrategy::FromTrainRef
        } else {
            MergeStrategy::Default
        };

        match self.merger.merge(merge_request, strategy).await {
            Ok(outcome) => {
                let commit_sha = outcome.commit_sha;
                let fast_forward = strategy == MergeStrategy::FromTrainRef;
                let recorded = commit_sha.clone();
                self.apply(|table| {
                    operations::finish_merge(table, car, Utc::now(), recorded, fast_forward)
                })
                .await?;
                info!(car = %car, commit = %commit_sha.short(), ?strategy, "Car merged");
                Ok(RefreshOutcome::Merged(commit_sha))
            }
            Err(e) => {
                let error = e.to_string();
                let attempts = facts.car.merge_attempts + 1;
                warn!(car = %car, attempts, error = %error, "Merge attempt failed");
                let recorded = error.clone();
                self.apply(|table| operations::record_merge_failure(table, car, recorded))
                    .await?;

                if attempts >= self.config.max_merge_attempts {
                    return self.drop_car(car, DropReason::MergeFailed(error)).await;
                }
                self.jobs.enqueue_refresh(facts.car.train_key());
                Ok(RefreshOutcome::MergeFailed { attempts })
            }
        }
    }

    async fn drop_car(&self, car: CarId, reason: DropReason) -> Result<RefreshOutcome> {
        info!(car = %car, reason = %reason, "Dropping car from train");
        self.remove_car(car, &reason.to_string(), CleanupMode::Async)
            .await?;
        Ok(RefreshOutcome::Dropped(reason))
    }

    /// Destroys a car. A running pipeline is cancelled before the removal is
    /// committed, so no pipeline outlives its car; a failed cancel is only
    /// tracked. Must be called with the train lock held.
    async fn remove_car(&self, car: CarId, reason: &str, cleanup: CleanupMode) -> Result<()> {
        let running = self
            .read(|table| {
                table
                    .get(car)
                    .and_then(|c| c.pipeline.as_ref())
                    .filter(|p| p.status.is_running())
                    .map(|p| p.id)
            })
            .await;
        if let Some(pipeline) = running {
            self.cancel(car, pipeline).await;
        }

        self.apply(|table| {
            let mut change = operations::destroy(table, car, reason, cleanup)?;
            change.effects.retain(|effect| {
                !matches!(effect, Effect::CancelPipeline { car: c, .. } if *c == car)
            });
            Ok(change)
        })
        .await
    }

    // ─── Commit and effects ─────────────────────────────────────────────────

    async fn key_of(&self, car: CarId) -> Result<TrainKey> {
        self.read(|table| table.get(car).map(Car::train_key))
            .await
            .ok_or(SchedulerError::Operation(OperationError::UnknownCar(car)))
    }

    /// Plans against the live table, commits, then runs the effects.
    async fn apply<F>(&self, plan: F) -> Result<()>
    where
        F: FnOnce(&CarTable) -> std::result::Result<Change, OperationError>,
    {
        let effects = {
            let mut store = self.store.lock().await;
            let change = plan(store.table())?;
            store.commit(change)?
        };
        self.execute_effects(effects).await;
        Ok(())
    }

    /// Hands effects to the collaborators. Failures are tracked, not returned.
    pub async fn execute_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            trace!(effect = effect.name(), "Executing effect");
            match effect {
                Effect::RefreshTrain { key } => self.jobs.enqueue_refresh(key),
                Effect::CleanupRef {
                    car,
                    merge_request,
                    mode,
                } => {
                    try_cleanup_ref(&self.refs, &self.jobs, &self.errors, car, merge_request, mode)
                        .await;
                }
                Effect::CancelPipeline { car, pipeline } => self.cancel(car, pipeline).await,
            }
        }
    }

    async fn cancel(&self, car: CarId, pipeline: PipelineId) {
        match self.pipelines.cancel_pipeline(pipeline).await {
            Ok(outcome) => debug!(car = %car, pipeline = %pipeline, ?outcome, "Cancelled pipeline"),
            Err(e) => {
                warn!(car = %car, pipeline = %pipeline, error = %e, "Failed to cancel pipeline");
                self.errors.track(&e, "pipeline cancellation");
            }
        }
    }
}

fn outdatable(car: &Car) -> bool {
    next_status(car.status, CarAction::OutdatePipeline, car.pipeline.is_some()).is_ok()
}
