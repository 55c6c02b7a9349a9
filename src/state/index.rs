//! Car positions, derived from the live active set.
//!
//! There is no stored position column. `index_of` counts active
//! predecessors for one car; `CarIndex` assigns every position of the
//! touched trains in a single pass so callers listing many cars do not pay
//! one scan per car. The two must always agree.

use std::collections::{BTreeSet, HashMap};

use super::table::CarTable;
use crate::types::{Car, CarId, TrainKey};

/// Number of active cars in the same train with a smaller id.
///
/// Returns `None` for a car that is no longer active.
pub fn index_of(table: &CarTable, car: &Car) -> Option<usize> {
    if !car.is_active() {
        return None;
    }
    let count = table
        .cars()
        .filter(|other| {
            other.is_active()
                && other.id < car.id
                && other.target_project_id == car.target_project_id
                && other.target_branch == car.target_branch
        })
        .count();
    Some(count)
}

/// Precomputed positions for a set of cars.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarIndex {
    positions: HashMap<CarId, usize>,
}

impl CarIndex {
    /// Positions of every active car in the table.
    pub fn build(table: &CarTable) -> Self {
        Self::for_trains(table, table.train_keys())
    }

    /// Positions for the given cars.
    ///
    /// Positions are computed over each car's whole train, not just the
    /// requested subset, so a car's entry matches `index_of` even when its
    /// predecessors were not requested. Unknown and inactive ids get no entry.
    pub fn build_for(table: &CarTable, ids: &[CarId]) -> Self {
        let keys: BTreeSet<TrainKey> = ids
            .iter()
            .filter_map(|id| table.get(*id))
            .map(Car::train_key)
            .collect();
        let all = Self::for_trains(table, keys);
        let positions = ids
            .iter()
            .filter_map(|id| all.positions.get(id).map(|pos| (*id, *pos)))
            .collect();
        CarIndex { positions }
    }

    fn for_trains(table: &CarTable, keys: impl IntoIterator<Item = TrainKey>) -> Self {
        let mut positions = HashMap::new();
        for key in keys {
            // active_for is ascending by id, so enumeration order is position.
            for (position, car) in table.active_for(&key).into_iter().enumerate() {
                positions.insert(car.id, position);
            }
        }
        CarIndex { positions }
    }

    pub fn get(&self, id: CarId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
