//! Pure state logic for the merge train scheduler.
//!
//! This module contains the functional core: the car table, the derived
//! per-car queries, the state machine and the operation planners. All I/O
//! and effects are handled elsewhere.

pub mod index;
pub mod operations;
pub mod table;
pub mod transitions;
pub mod view;

pub use index::{CarIndex, index_of};
pub use operations::{Change, OperationError};
pub use table::CarTable;
pub use transitions::{CarAction, TransitionError, next_status};
pub use view::CarView;
