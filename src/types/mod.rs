//! Core domain types for the merge train scheduler.
//!
//! This module contains the fundamental types used throughout the crate,
//! designed to encode invariants via the type system.

pub mod car;
pub mod ids;
pub mod merge_request;
pub mod pipeline;

pub use car::{Car, CarStatus, PipelineBase};
pub use ids::{CarId, InvalidSha, MergeRequestId, PipelineId, ProjectId, Sha, TrainKey, UserId};
pub use merge_request::{
    MergeMethod, MergeRequest, MergeRequestState, ProjectSettings, TrainRefInfo,
};
pub use pipeline::{Pipeline, PipelineStatus};
