//! The car state machine.
//!
//! Pure function from (status, action) to the next status. Anything not
//! listed in [`next_status`] is rejected; callers get the error back
//! synchronously and nothing is written.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CarStatus;

/// An edge request against the car state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarAction {
    /// Attach a new pipeline.
    RefreshPipeline,
    /// The expected predecessor ref moved under an attached pipeline.
    OutdatePipeline,
    /// Begin merging into the target branch.
    StartMerge,
    /// A merge attempt failed; stay in `merging`.
    RecordMergeFailure,
    /// The merge landed.
    FinishMerge,
}

impl CarAction {
    pub const ALL: [CarAction; 5] = [
        CarAction::RefreshPipeline,
        CarAction::OutdatePipeline,
        CarAction::StartMerge,
        CarAction::RecordMergeFailure,
        CarAction::FinishMerge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CarAction::RefreshPipeline => "refresh_pipeline",
            CarAction::OutdatePipeline => "outdate_pipeline",
            CarAction::StartMerge => "start_merge",
            CarAction::RecordMergeFailure => "record_merge_failure",
            CarAction::FinishMerge => "finish_merge",
        }
    }
}

impl fmt::Display for CarAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A disallowed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a car in status {from}")]
pub struct TransitionError {
    pub from: CarStatus,
    pub action: CarAction,
}

/// Computes the status a car moves to.
///
/// `has_pipeline` only matters for outdating an idle car: a car that never
/// had a pipeline has nothing to be stale about.
///
/// `skip_merged` is never produced here. It only exists on cars written
/// directly in that state.
pub fn next_status(
    current: CarStatus,
    action: CarAction,
    has_pipeline: bool,
) -> Result<CarStatus, TransitionError> {
    use CarAction::*;
    use CarStatus::*;

    match (current, action) {
        (Idle | Stale | Fresh, RefreshPipeline) => Ok(Fresh),
        (Fresh, OutdatePipeline) => Ok(Stale),
        (Idle, OutdatePipeline) if has_pipeline => Ok(Stale),
        (Fresh, StartMerge) => Ok(Merging),
        (Merging, RecordMergeFailure) => Ok(Merging),
        (Merging, FinishMerge) => Ok(Merged),
        (from, action) => Err(TransitionError { from, action }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::arb_car_status;
    use proptest::prelude::*;

    fn arb_action() -> impl Strategy<Value = CarAction> {
        prop::sample::select(CarAction::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn skip_merged_is_never_reached(
            from in arb_car_status(),
            action in arb_action(),
            has_pipeline in any::<bool>()
        ) {
            if let Ok(to) = next_status(from, action, has_pipeline) {
                prop_assert_ne!(to, CarStatus::SkipMerged);
            }
        }

        #[test]
        fn merged_only_from_merging(
            from in arb_car_status(),
            action in arb_action(),
            has_pipeline in any::<bool>()
        ) {
            if next_status(from, action, has_pipeline) == Ok(CarStatus::Merged) {
                prop_assert_eq!(from, CarStatus::Merging);
            }
        }

        #[test]
        fn terminal_statuses_accept_nothing(
            action in arb_action(),
            has_pipeline in any::<bool>()
        ) {
            for from in [CarStatus::Merged, CarStatus::SkipMerged] {
                prop_assert_eq!(
                    next_status(from, action, has_pipeline),
                    Err(TransitionError { from, action })
                );
            }
        }

        #[test]
        fn from_idle_only_fresh_or_stale(action in arb_action(), has_pipeline in any::<bool>()) {
            if let Ok(to) = next_status(CarStatus::Idle, action, has_pipeline) {
                prop_assert!(matches!(to, CarStatus::Fresh | CarStatus::Stale));
            }
        }
    }

    #[test]
    fn refresh_is_always_allowed_before_merging() {
        for from in [CarStatus::Idle, CarStatus::Stale, CarStatus::Fresh] {
            assert_eq!(
                next_status(from, CarAction::RefreshPipeline, false),
                Ok(CarStatus::Fresh)
            );
        }
        assert!(next_status(CarStatus::Merging, CarAction::RefreshPipeline, true).is_err());
    }

    #[test]
    fn outdating_idle_needs_a_pipeline() {
        assert!(next_status(CarStatus::Idle, CarAction::OutdatePipeline, false).is_err());
        assert_eq!(
            next_status(CarStatus::Idle, CarAction::OutdatePipeline, true),
            Ok(CarStatus::Stale)
        );
        assert!(next_status(CarStatus::Stale, CarAction::OutdatePipeline, true).is_err());
    }

    #[test]
    fn finish_merge_rejected_outside_merging() {
        for from in [CarStatus::Idle, CarStatus::Fresh, CarStatus::Stale] {
            let err = next_status(from, CarAction::FinishMerge, true).unwrap_err();
            assert_eq!(err.from, from);
        }
        assert_eq!(
            next_status(CarStatus::Merging, CarAction::FinishMerge, true),
            Ok(CarStatus::Merged)
        );
    }

    #[test]
    fn start_merge_only_from_fresh() {
        assert_eq!(
            next_status(CarStatus::Fresh, CarAction::StartMerge, true),
            Ok(CarStatus::Merging)
        );
        assert!(next_status(CarStatus::Idle, CarAction::StartMerge, true).is_err());
        assert!(next_status(CarStatus::Stale, CarAction::StartMerge, true).is_err());
    }

    #[test]
    fn error_message_names_edge() {
        let err = next_status(CarStatus::Idle, CarAction::FinishMerge, false).unwrap_err();
        assert_eq!(err.to_string(), "cannot finish_merge a car in status idle");
    }
}
