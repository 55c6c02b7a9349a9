//! Messages accepted by a [`TrainWorker`](super::TrainWorker).

use crate::types::{CarId, MergeRequestId, TrainKey};

/// Workers receive these via `tokio::sync::mpsc` and process them serially.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Re-evaluate a train.
    Refresh(TrainKey),

    /// Delete a car's train ref now.
    CleanupRef {
        car: CarId,
        merge_request: MergeRequestId,
    },

    /// Finish the current job, flush the store and exit.
    Shutdown,
}
