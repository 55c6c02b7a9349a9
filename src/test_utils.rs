//! Shared test utilities: fixtures, generators and in-memory collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use thiserror::Error;

use crate::effects::{
    CancelOutcome, CleanupMode, ErrorTracker, JobQueue, MergeExecutor, MergeOutcome,
    MergeStrategy, PipelineEngine, RefStore,
};
use crate::state::{CarTable, Change, operations};
use crate::types::{
    CarId, CarStatus, MergeRequest, MergeRequestId, MergeRequestState, Pipeline, PipelineId,
    PipelineStatus, ProjectId, ProjectSettings, Sha, TrainKey, UserId,
};

pub fn arb_car_status() -> impl Strategy<Value = CarStatus> {
    prop_oneof![
        Just(CarStatus::Idle),
        Just(CarStatus::Stale),
        Just(CarStatus::Fresh),
        Just(CarStatus::Merging),
        Just(CarStatus::Merged),
        Just(CarStatus::SkipMerged),
    ]
}

/// A sha made of one repeated hex digit.
pub fn sha(c: char) -> Sha {
    Sha::parse(c.to_string().repeat(40)).unwrap()
}

fn numbered_sha(n: u64) -> Sha {
    Sha::parse(format!("{n:040x}")).unwrap()
}

/// A fixed instant plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

pub fn pipeline(id: u64, status: PipelineStatus, sha_char: char) -> Pipeline {
    Pipeline::new(PipelineId(id), status, sha(sha_char))
}

/// An open merge request in project 1 targeting `main`.
pub fn merge_request(id: u64) -> MergeRequest {
    MergeRequest::new(
        MergeRequestId(id),
        ProjectId(1),
        format!("feature-{id}"),
        "main",
    )
}

// ─── Table fixture ───

/// A car table driven through the real planners, without a store.
#[derive(Debug)]
pub struct TrainFixture {
    table: CarTable,
    next_pipeline: u64,
}

impl TrainFixture {
    pub fn new() -> Self {
        TrainFixture {
            table: CarTable::new(),
            next_pipeline: 1_000,
        }
    }

    pub fn table(&self) -> &CarTable {
        &self.table
    }

    fn apply(&mut self, change: Change) {
        for event in &change.events {
            self.table.apply(event);
        }
    }

    pub fn configure(&mut self, settings: ProjectSettings) {
        self.apply(operations::configure_project(settings));
    }

    pub fn upsert(&mut self, merge_request: MergeRequest) {
        let change = operations::upsert_merge_request(&self.table, merge_request);
        self.apply(change);
    }

    pub fn create(&mut self, mr: u64) -> CarId {
        self.create_on("main", mr)
    }

    pub fn create_on(&mut self, branch: &str, mr: u64) -> CarId {
        let mut merge_request = merge_request(mr);
        merge_request.target_branch = branch.to_string();
        let (id, change) =
            operations::create(&self.table, &merge_request, UserId(1), at(mr as i64)).unwrap();
        self.apply(change);
        id
    }

    pub fn attach(&mut self, id: CarId, pipeline: Pipeline) {
        let change = operations::refresh_pipeline(&self.table, id, pipeline, None).unwrap();
        self.apply(change);
    }

    pub fn outdate(&mut self, id: CarId) {
        let change = operations::outdate_pipeline(&self.table, id).unwrap();
        self.apply(change);
    }

    pub fn set_pipeline_status(&mut self, id: CarId, status: PipelineStatus) {
        let attached = self.table.get(id).unwrap().pipeline.as_ref().unwrap().id;
        let change =
            operations::pipeline_status_changed(&self.table, id, attached, status).unwrap();
        self.apply(change);
    }

    pub fn destroy(&mut self, id: CarId) {
        let change =
            operations::destroy(&self.table, id, "removed", CleanupMode::Async).unwrap();
        self.apply(change);
    }

    pub fn start_merge(&mut self, id: CarId) {
        let change = operations::start_merge(&self.table, id).unwrap();
        self.apply(change);
    }

    pub fn fail_merge(&mut self, id: CarId, error: &str) {
        let change = operations::record_merge_failure(&self.table, id, error).unwrap();
        self.apply(change);
    }

    /// `fresh → merging → merged`, recording `commit` as the merge commit.
    pub fn merge(&mut self, id: CarId, commit: Sha) {
        self.start_merge(id);
        let change =
            operations::finish_merge(&self.table, id, at(10_000), commit, false).unwrap();
        self.apply(change);
    }

    fn update_merge_request(&mut self, mr: u64, update: impl FnOnce(&mut MergeRequest)) {
        let mut merge_request = self
            .table
            .merge_request(MergeRequestId(mr))
            .cloned()
            .unwrap();
        update(&mut merge_request);
        self.upsert(merge_request);
    }

    pub fn set_merge_request_state(&mut self, mr: u64, state: MergeRequestState) {
        self.update_merge_request(mr, |m| m.state = state);
    }

    pub fn set_train_ref_sha(&mut self, mr: u64, sha: Sha) {
        self.update_merge_request(mr, |m| m.train_ref.commit_sha = Some(sha));
    }

    pub fn set_in_progress_sha(&mut self, mr: u64, sha: Sha) {
        self.update_merge_request(mr, |m| m.in_progress_merge_commit_sha = Some(sha));
    }

    fn next_pipeline(&mut self) -> Pipeline {
        self.next_pipeline += 1;
        let n = self.next_pipeline;
        Pipeline::new(PipelineId(n), PipelineStatus::Success, numbered_sha(n))
    }

    /// Replays generated operations. Picks that match nothing are skipped.
    pub fn from_ops(ops: &[FixtureOp]) -> Self {
        let mut fx = TrainFixture::new();
        let mut next_mr = 100;
        for op in ops {
            match op {
                FixtureOp::Create { branch } => {
                    fx.create_on(branch, next_mr);
                    next_mr += 1;
                }
                FixtureOp::Destroy { pick } => {
                    let active: Vec<CarId> = fx
                        .table
                        .cars()
                        .filter(|car| car.is_active())
                        .map(|car| car.id)
                        .collect();
                    if !active.is_empty() {
                        fx.destroy(active[pick.index(active.len())]);
                    }
                }
                FixtureOp::Merge { pick } => {
                    let fronts: Vec<CarId> = fx
                        .table
                        .train_keys()
                        .iter()
                        .filter_map(|key| fx.table.active_for(key).first().map(|car| car.id))
                        .collect();
                    if !fronts.is_empty() {
                        let id = fronts[pick.index(fronts.len())];
                        let pipeline = fx.next_pipeline();
                        fx.attach(id, pipeline);
                        fx.merge(id, numbered_sha(id.0));
                    }
                }
            }
        }
        fx
    }
}

#[derive(Debug, Clone)]
pub enum FixtureOp {
    Create { branch: String },
    Destroy { pick: prop::sample::Index },
    /// Merge the front car of one train.
    Merge { pick: prop::sample::Index },
}

pub fn arb_fixture_ops() -> impl Strategy<Value = Vec<FixtureOp>> {
    let op = prop_oneof![
        4 => prop_oneof![Just("main"), Just("stable")]
            .prop_map(|b| FixtureOp::Create { branch: b.to_string() }),
        1 => any::<prop::sample::Index>().prop_map(|pick| FixtureOp::Destroy { pick }),
        1 => any::<prop::sample::Index>().prop_map(|pick| FixtureOp::Merge { pick }),
    ];
    prop::collection::vec(op, 0..30)
}

// ─── In-memory collaborators ───

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MockError(pub String);

#[derive(Debug, Default)]
struct RefsInner {
    refs: HashMap<String, Sha>,
    delete_calls: usize,
    fail_deletes: bool,
    fail_creates: bool,
}

/// A ref store backed by a map. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockRefStore {
    inner: Arc<Mutex<RefsInner>>,
}

impl MockRefStore {
    pub fn insert(&self, path: &str, sha: Sha) {
        self.inner.lock().unwrap().refs.insert(path.to_string(), sha);
    }

    pub fn remove(&self, path: &str) {
        self.inner.lock().unwrap().refs.remove(path);
    }

    pub fn get(&self, path: &str) -> Option<Sha> {
        self.inner.lock().unwrap().refs.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().unwrap().refs.contains_key(path)
    }

    pub fn delete_calls(&self) -> usize {
        self.inner.lock().unwrap().delete_calls
    }

    pub fn fail_deletes(&self) {
        self.inner.lock().unwrap().fail_deletes = true;
    }

    pub fn fail_creates(&self) {
        self.inner.lock().unwrap().fail_creates = true;
    }
}

impl RefStore for MockRefStore {
    type Error = MockError;

    async fn ref_exists(&self, path: &str) -> Result<bool, MockError> {
        Ok(self.contains(path))
    }

    async fn resolve_ref(&self, path: &str) -> Result<Option<Sha>, MockError> {
        Ok(self.get(path))
    }

    async fn create_ref(&self, path: &str, sha: &Sha) -> Result<(), MockError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_creates {
            return Err(MockError("ref is protected".to_string()));
        }
        inner.refs.insert(path.to_string(), sha.clone());
        Ok(())
    }

    async fn delete_ref(&self, path: &str) -> Result<(), MockError> {
        let mut inner = self.inner.lock().unwrap();
        inner.delete_calls += 1;
        if inner.fail_deletes {
            return Err(MockError("ref storage unavailable".to_string()));
        }
        inner.refs.remove(path);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PipelinesInner {
    next_id: u64,
    created: Vec<(MergeRequestId, String)>,
    cancelled: Vec<PipelineId>,
    fail_creates: bool,
}

/// A pipeline engine that starts every pipeline `running` on a made-up
/// speculative commit.
#[derive(Debug, Clone)]
pub struct MockPipelines {
    inner: Arc<Mutex<PipelinesInner>>,
}

impl Default for MockPipelines {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPipelines {
    pub fn new() -> Self {
        MockPipelines {
            inner: Arc::new(Mutex::new(PipelinesInner {
                next_id: 500,
                ..PipelinesInner::default()
            })),
        }
    }

    /// `(merge request, previous ref)` per created pipeline, in order.
    pub fn created(&self) -> Vec<(MergeRequestId, String)> {
        self.inner.lock().unwrap().created.clone()
    }

    pub fn cancelled(&self) -> Vec<PipelineId> {
        self.inner.lock().unwrap().cancelled.clone()
    }

    pub fn fail_creates(&self) {
        self.inner.lock().unwrap().fail_creates = true;
    }
}

impl PipelineEngine for MockPipelines {
    type Error = MockError;

    async fn create_pipeline(
        &self,
        merge_request: &MergeRequest,
        previous_ref: &str,
    ) -> Result<Pipeline, MockError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_creates {
            return Err(MockError("pipeline quota exceeded".to_string()));
        }
        inner.next_id += 1;
        inner
            .created
            .push((merge_request.id, previous_ref.to_string()));
        let id = inner.next_id;
        let tested = numbered_sha(0xfeed_0000 + id);
        Ok(Pipeline::new(PipelineId(id), PipelineStatus::Running, tested))
    }

    async fn cancel_pipeline(&self, pipeline: PipelineId) -> Result<CancelOutcome, MockError> {
        self.inner.lock().unwrap().cancelled.push(pipeline);
        Ok(CancelOutcome::Canceled)
    }
}

#[derive(Debug, Default)]
struct MergerInner {
    merged: Vec<(MergeRequestId, MergeStrategy)>,
    failures_left: u32,
}

/// Merges succeed unless `fail_next` queued failures.
#[derive(Debug, Clone, Default)]
pub struct MockMerger {
    inner: Arc<Mutex<MergerInner>>,
}

impl MockMerger {
    pub fn merged(&self) -> Vec<(MergeRequestId, MergeStrategy)> {
        self.inner.lock().unwrap().merged.clone()
    }

    pub fn fail_next(&self, count: u32) {
        self.inner.lock().unwrap().failures_left = count;
    }
}

impl MergeExecutor for MockMerger {
    type Error = MockError;

    async fn merge(
        &self,
        merge_request: &MergeRequest,
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome, MockError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failures_left > 0 {
            inner.failures_left -= 1;
            return Err(MockError("conflict".to_string()));
        }
        inner.merged.push((merge_request.id, strategy));
        Ok(MergeOutcome {
            commit_sha: numbered_sha(0xc0de_0000 + merge_request.id.0),
        })
    }
}

#[derive(Debug, Default)]
struct JobsInner {
    refreshes: Vec<TrainKey>,
    cleanups: Vec<(CarId, MergeRequestId)>,
}

/// Records enqueued jobs without running them.
#[derive(Debug, Clone, Default)]
pub struct RecordingJobs {
    inner: Arc<Mutex<JobsInner>>,
}

impl RecordingJobs {
    pub fn refreshes(&self) -> Vec<TrainKey> {
        self.inner.lock().unwrap().refreshes.clone()
    }

    pub fn cleanups(&self) -> Vec<(CarId, MergeRequestId)> {
        self.inner.lock().unwrap().cleanups.clone()
    }
}

impl JobQueue for RecordingJobs {
    fn enqueue_refresh(&self, key: TrainKey) {
        self.inner.lock().unwrap().refreshes.push(key);
    }

    fn enqueue_ref_cleanup(&self, car: CarId, merge_request: MergeRequestId) {
        self.inner
            .lock()
            .unwrap()
            .cleanups
            .push((car, merge_request));
    }
}

/// Records the context of every tracked error.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracker {
    tracked: Arc<Mutex<Vec<String>>>,
}

impl RecordingTracker {
    pub fn tracked(&self) -> Vec<String> {
        self.tracked.lock().unwrap().clone()
    }
}

impl ErrorTracker for RecordingTracker {
    fn track(&self, _error: &(dyn std::error::Error + 'static), context: &str) {
        self.tracked.lock().unwrap().push(context.to_string());
    }
}
