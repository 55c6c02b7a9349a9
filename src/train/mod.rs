//! The train: every car sharing one `(project, target branch)` key.
//!
//! A train is never stored. `Train` is a query object over the car table,
//! built on demand and dropped before the next mutation.

mod query;

pub use query::{TrainFilter, TrainStatus, all_for, all_for_project, project_using_ff};

use crate::effects::Effect;
use crate::state::CarTable;
use crate::state::view::CarView;
use crate::types::{Car, Sha, TrainKey};

#[derive(Debug, Clone)]
pub struct Train<'a> {
    table: &'a CarTable,
    key: TrainKey,
}

impl<'a> Train<'a> {
    pub fn new(table: &'a CarTable, key: TrainKey) -> Self {
        Train { table, key }
    }

    pub fn key(&self) -> &TrainKey {
        &self.key
    }

    /// The queue: active cars in id order, skipping cars whose merge request
    /// is known to be no longer open.
    ///
    /// A car whose merge request is not cached is kept; the refresh process
    /// drops it once the merge request is seen closed.
    pub fn all_cars(&self) -> Vec<CarView<'a>> {
        self.table
            .active_for(&self.key)
            .into_iter()
            .map(|car| CarView::new(self.table, car))
            .filter(|view| view.merge_request().is_none_or(|mr| mr.is_open()))
            .collect()
    }

    pub fn first_car(&self) -> Option<CarView<'a>> {
        self.all_cars().into_iter().next()
    }

    pub fn car_count(&self) -> usize {
        self.all_cars().len()
    }

    /// True if at least one car still occupies the train.
    pub fn is_active(&self) -> bool {
        self.table.for_train(&self.key).any(Car::is_active)
    }

    /// True if the train has cars and none of them are active.
    pub fn is_completed(&self) -> bool {
        let mut cars = self.table.for_train(&self.key).peekable();
        cars.peek().is_some() && cars.all(|car| !car.is_active())
    }

    /// Whether `sha` is among the merge commits of the last `limit` cars that
    /// reached `merging` or beyond, newest first.
    pub fn sha_exists_in_history(&self, sha: &Sha, limit: usize) -> bool {
        let mut merged: Vec<&Car> = self
            .table
            .for_train(&self.key)
            .filter(|car| car.status.has_entered_merge())
            .collect();
        merged.reverse();

        merged
            .into_iter()
            .take(limit)
            .filter_map(|car| self.table.merge_request(car.merge_request_id))
            .any(|mr| mr.recorded_merge_shas().any(|recorded| recorded == sha))
    }

    /// Requests an asynchronous re-evaluation of this train.
    ///
    /// Every planner requests its refreshes through here. The returned effect
    /// does nothing until the caller commits it and hands it to
    /// `TrainScheduler::execute_effects`.
    pub fn refresh_async(&self) -> Effect {
        Effect::RefreshTrain {
            key: self.key.clone(),
        }
    }
}
