//! Project-level train queries.

use crate::state::CarTable;
use crate::types::{Car, ProjectId};

/// Completion filter for [`all_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainStatus {
    Active,
    Completed,
}

/// Filters for [`all_for`]. The default matches every car of the project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainFilter {
    /// Restrict to these target branches. Empty means all branches.
    pub target_branches: Vec<String>,
    pub status: Option<TrainStatus>,
}

impl TrainFilter {
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.target_branches.push(branch.into());
        self
    }

    pub fn status(mut self, status: TrainStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, car: &Car) -> bool {
        let branch_ok = self.target_branches.is_empty()
            || self.target_branches.iter().any(|b| *b == car.target_branch);
        let status_ok = match self.status {
            None => true,
            Some(TrainStatus::Active) => car.is_active(),
            Some(TrainStatus::Completed) => car.status.is_complete(),
        };
        branch_ok && status_ok
    }
}

/// Active cars across every branch of a project, ascending by id.
pub fn all_for_project(table: &CarTable, project: ProjectId) -> Vec<&Car> {
    all_for(
        table,
        project,
        &TrainFilter::default().status(TrainStatus::Active),
    )
}

/// Cars of a project matching `filter`, ascending by id.
pub fn all_for<'a>(
    table: &'a CarTable,
    project: ProjectId,
    filter: &TrainFilter,
) -> Vec<&'a Car> {
    table
        .cars()
        .filter(|car| car.target_project_id == project && filter.matches(car))
        .collect()
}

/// True if the project runs trains and merges by fast-forward.
///
/// An unconfigured project uses neither.
pub fn project_using_ff(table: &CarTable, project: ProjectId) -> bool {
    table.project(project).is_some_and(|settings| {
        settings.merge_trains_active() && settings.merge_method.requires_fast_forward()
    })
}
