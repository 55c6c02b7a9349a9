//! Derived, read-only queries over one car.
//!
//! Nothing here is stored. Position, neighbours and the expected predecessor
//! ref are recomputed from the live table on every call, so a view must not
//! outlive the mutation that follows it.

use super::index;
use super::table::CarTable;
use crate::train::Train;
use crate::types::{Car, CarStatus, MergeRequest, TrainKey};

/// A borrowed car together with the table it lives in.
#[derive(Debug, Clone, Copy)]
pub struct CarView<'a> {
    table: &'a CarTable,
    car: &'a Car,
}

impl<'a> CarView<'a> {
    pub(crate) fn new(table: &'a CarTable, car: &'a Car) -> Self {
        CarView { table, car }
    }

    pub fn car(&self) -> &'a Car {
        self.car
    }

    pub fn key(&self) -> TrainKey {
        self.car.train_key()
    }

    pub fn is_active(&self) -> bool {
        self.car.is_active()
    }

    /// Position among the active cars of the train, or `None` once inactive.
    pub fn index(&self) -> Option<usize> {
        index::index_of(self.table, self.car)
    }

    /// The nearest active car with a smaller id.
    pub fn prev(&self) -> Option<CarView<'a>> {
        self.active_siblings()
            .filter(|other| other.id < self.car.id)
            .last()
            .map(|car| CarView::new(self.table, car))
    }

    /// The nearest active car with a larger id.
    pub fn next(&self) -> Option<CarView<'a>> {
        self.active_siblings()
            .find(|other| other.id > self.car.id)
            .map(|car| CarView::new(self.table, car))
    }

    /// Every active car ahead of this one, front of the train first.
    pub fn all_prev(&self) -> Vec<&'a Car> {
        self.active_siblings()
            .filter(|other| other.id < self.car.id)
            .collect()
    }

    /// Every active car behind this one, nearest first.
    pub fn all_next(&self) -> Vec<&'a Car> {
        self.active_siblings()
            .filter(|other| other.id > self.car.id)
            .collect()
    }

    /// The ref this car's pipeline must be built on.
    pub fn previous_ref(&self) -> String {
        match self.prev() {
            Some(prev) => prev.car.train_ref_path(),
            None => self.key().target_branch_ref(),
        }
    }

    pub fn requires_new_pipeline(&self) -> bool {
        self.car.pipeline.is_none() || self.car.status == CarStatus::Stale
    }

    /// True if a pipeline is attached and it is neither running nor green.
    pub fn pipeline_not_succeeded(&self) -> bool {
        self.car
            .pipeline
            .as_ref()
            .is_some_and(|pipeline| pipeline.status.is_unsuccessful())
    }

    /// First in the train with a green pipeline.
    pub fn is_mergeable(&self) -> bool {
        self.index() == Some(0)
            && self
                .car
                .pipeline
                .as_ref()
                .is_some_and(|pipeline| pipeline.status.is_success())
    }

    /// True if the car is still on its train and the tested commit is exactly
    /// the commit recorded for the train ref.
    pub fn on_ff_train(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(pipeline) = self.car.pipeline.as_ref() else {
            return false;
        };
        self.merge_request()
            .and_then(|mr| mr.train_ref.commit_sha.as_ref())
            .is_some_and(|sha| *sha == pipeline.sha)
    }

    pub fn merge_request(&self) -> Option<&'a MergeRequest> {
        self.table.merge_request(self.car.merge_request_id)
    }

    /// The car's train, whether or not the car is still on it.
    pub fn train(&self) -> Train<'a> {
        Train::new(self.table, self.key())
    }

    fn active_siblings(&self) -> impl Iterator<Item = &'a Car> + 'a {
        let (table, car) = (self.table, self.car);
        let project = car.target_project_id;
        let branch = car.target_branch.as_str();
        table.cars().filter(move |other| {
            other.is_active() && other.target_project_id == project && other.target_branch == branch
        })
    }
}
