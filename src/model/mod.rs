//! The immutable result of loading a trace.
//!
//! A [`Model`] is built once by the loader and then shared as an
//! `Arc<Model>`. Nothing mutates it after hand-off, so any number of
//! readers can build views and samples from it concurrently.

pub mod catalog;
pub mod io;
pub mod stats;

use crate::error::Result;
use crate::sched::snapshot::{replay, SnapshotIndex};
use crate::sched::state::SchedulingState;
use crate::trace::TraceEventLog;

use catalog::EntityCatalog;

pub type TeamId = i32;
pub type ThreadId = i32;

#[derive(Debug)]
pub struct Model {
    log: TraceEventLog,
    catalog: EntityCatalog,
    snapshots: SnapshotIndex,
    base_time: i64,
    last_event_time: i64,
}

impl Model {
    pub(crate) fn new(
        log: TraceEventLog,
        catalog: EntityCatalog,
        snapshots: SnapshotIndex,
        last_event_time: i64,
    ) -> Self {
        let base_time = log.first_time().unwrap_or(0);
        Self {
            log,
            catalog,
            snapshots,
            base_time,
            last_event_time,
        }
    }

    pub fn log(&self) -> &TraceEventLog {
        &self.log
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    pub fn snapshots(&self) -> &SnapshotIndex {
        &self.snapshots
    }

    /// Effective time of the first record.
    pub fn base_time(&self) -> i64 {
        self.base_time
    }

    /// Effective time of the last event seen during the scan.
    pub fn last_event_time(&self) -> i64 {
        self.last_event_time
    }

    /// Live scheduling state as of `time`, reconstructed from the closest
    /// preceding snapshot plus a replay of the events up to `time`.
    pub fn scheduling_state_at(&self, time: i64) -> Result<SchedulingState> {
        let (state, from) = match self.snapshots.closest_preceding(time) {
            Some(snapshot) => (snapshot.restore(), snapshot.event_offset),
            None => (SchedulingState::new(), 0),
        };
        replay(self, state, from, |_, _| Ok(()), |event_time| event_time <= time)
    }
}
