//! Scheduling-state reconstruction.
//!
//! # Module Organization
//!
//! - [`state`]: live per-thread state table
//! - [`transition`]: the state machine shared by every consumer
//! - [`tracker`]: drives the state table through the event stream
//! - [`snapshot`]: frozen states for seeking, and replay from them

pub mod snapshot;
pub mod state;
pub mod tracker;
pub mod transition;

pub use snapshot::{CompactSchedulingState, SnapshotIndex};
pub use state::{SchedulingState, ThreadSchedulingState, ThreadState, WaitObjectKey};
pub use tracker::SchedulingStateTracker;
pub use transition::{Attribution, Step, TimeCategory};
