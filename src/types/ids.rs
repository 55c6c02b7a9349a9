//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! `PipelineId` where a `CarId` is expected) and make signatures self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The identity of a car. Allocated in ascending order, so id order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarId(pub u64);

impl fmt::Display for CarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "car-{}", self.0)
    }
}

impl From<u64> for CarId {
    fn from(n: u64) -> Self {
        CarId(n)
    }
}

/// A project (repository) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ProjectId {
    fn from(n: u64) -> Self {
        ProjectId(n)
    }
}

/// A merge request identifier (globally unique, not project-scoped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeRequestId(pub u64);

impl MergeRequestId {
    /// The speculative ref this merge request's train pipelines run against.
    pub fn train_ref_path(&self) -> String {
        format!("refs/merge-requests/{}/train", self.0)
    }
}

impl fmt::Display for MergeRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.0)
    }
}

impl From<u64> for MergeRequestId {
    fn from(n: u64) -> Self {
        MergeRequestId(n)
    }
}

/// The user who put a merge request on a train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(n: u64) -> Self {
        UserId(n)
    }
}

/// A CI pipeline identifier, as handed out by the pipeline engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub u64);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline-{}", self.0)
    }
}

impl From<u64> for PipelineId {
    fn from(n: u64) -> Self {
        PipelineId(n)
    }
}

/// Error returned when a string is not a valid 40-character hex SHA.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SHA {0:?}: expected 40 lowercase hex characters")]
pub struct InvalidSha(pub String);

/// A git commit SHA (40 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(String);

impl Sha {
    /// Parses a SHA, rejecting anything that is not 40 lowercase hex characters.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidSha> {
        let s = s.into();
        let valid = s.len() == 40
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid { Ok(Sha(s)) } else { Err(InvalidSha(s)) }
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a train: every car targeting the same project and branch.
///
/// Trains are never stored; the key is enough to reconstruct one on demand.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrainKey {
    pub project_id: ProjectId,
    pub target_branch: String,
}

impl TrainKey {
    pub fn new(project_id: ProjectId, target_branch: impl Into<String>) -> Self {
        TrainKey {
            project_id,
            target_branch: target_branch.into(),
        }
    }

    /// The ref of the branch every car on this train will eventually land on.
    pub fn target_branch_ref(&self) -> String {
        format!("refs/heads/{}", self.target_branch)
    }
}

/// Formats as `project_id:branch`, the form used for lock keys and log fields.
impl fmt::Display for TrainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project_id, self.target_branch)
    }
}
