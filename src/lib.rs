//! Merge train scheduler: ordered queues of merge requests, each tested on a
//! speculative pipeline that includes every merge request ahead of it.
//!
//! This library provides the car state machine, the train queries, durable
//! storage and the scheduler that drives refreshes.

pub mod config;
pub mod effects;
pub mod persistence;
pub mod state;
pub mod train;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;
