//! Error types for trace ingestion and model queries.
//!
//! Structural violations and duplicates are normally recovered from during
//! the scan (the offending record is skipped and a warning is logged); the
//! variants exist so the catalog can report them to its caller, which then
//! decides whether absence or a collision is fatal.

use thiserror::Error;

use crate::model::{TeamId, ThreadId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("malformed record at byte offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: String },

    #[error("record {index} goes back in time")]
    NonMonotonicTime { index: usize },

    #[error("offset table entry {index} is out of order or out of bounds")]
    InvalidOffsetTable { index: usize },

    #[error("thread {thread} references unknown team {team}")]
    UnknownTeam { team: TeamId, thread: ThreadId },

    #[error("unknown thread {0}")]
    UnknownThread(ThreadId),

    #[error("team {0} already exists")]
    DuplicateTeam(TeamId),

    #[error("thread {0} already exists")]
    DuplicateThread(ThreadId),

    #[error("out of memory while {0}")]
    AllocationFailure(&'static str),

    #[error("loading was cancelled")]
    Cancelled,

    #[error("invalid sample window [{start}, {end}) with {sample_count} samples")]
    InvalidSampleWindow {
        start: i64,
        end: i64,
        sample_count: usize,
    },
}

impl ModelError {
    /// Returns true if the error is a structural problem the scan recovers
    /// from by skipping the offending record.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ModelError::UnknownTeam { .. }
                | ModelError::UnknownThread(_)
                | ModelError::DuplicateTeam(_)
                | ModelError::DuplicateThread(_)
        )
    }
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;

/// Reserve room for `additional` more elements or report allocation failure.
pub(crate) fn try_reserve<T>(
    vec: &mut Vec<T>,
    additional: usize,
    context: &'static str,
) -> Result<()> {
    vec.try_reserve(additional)
        .map_err(|_| ModelError::AllocationFailure(context))
}
