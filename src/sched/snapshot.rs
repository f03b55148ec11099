//! Frozen copies of the scheduling state for fast seeking.
//!
//! Replaying a long trace from the start to find the state at some time is
//! linear in the trace length. The loader therefore freezes the live state
//! every few thousand events; a seek restores the closest preceding
//! snapshot and only replays the events after it.

use crate::error::{try_reserve, Result};
use crate::model::{Model, ThreadId};
use crate::sched::state::{SchedulingState, ThreadSchedulingState, ThreadState, WaitObjectKey};
use crate::sched::tracker::SchedulingStateTracker;
use crate::sched::transition::Step;
use crate::trace::Event;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactThreadState {
    pub thread: ThreadId,
    pub last_time: i64,
    pub state: ThreadState,
    pub wait_object: Option<WaitObjectKey>,
    pub priority: i32,
}

/// Immutable copy of a [`SchedulingState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactSchedulingState {
    /// Index of the first event not folded into this state.
    pub event_offset: usize,
    /// Effective time of the last event folded into this state.
    pub last_event_time: i64,
    threads: Box<[CompactThreadState]>,
}

impl CompactSchedulingState {
    pub fn capture(state: &SchedulingState, event_offset: usize) -> Result<Self> {
        let mut threads = Vec::new();
        try_reserve(&mut threads, state.len(), "capturing a scheduling snapshot")?;
        threads.extend(state.iter().map(|(thread, s)| CompactThreadState {
            thread,
            last_time: s.last_time,
            state: s.state,
            wait_object: s.wait_object,
            priority: s.priority,
        }));
        Ok(Self {
            event_offset,
            last_event_time: state.last_event_time,
            threads: threads.into_boxed_slice(),
        })
    }

    /// Thread states sorted by thread ID.
    pub fn threads(&self) -> &[CompactThreadState] {
        &self.threads
    }

    pub fn thread(&self, thread: ThreadId) -> Option<&CompactThreadState> {
        self.threads
            .binary_search_by_key(&thread, |t| t.thread)
            .ok()
            .map(|index| &self.threads[index])
    }

    /// A live state equal to the one this snapshot was captured from.
    pub fn restore(&self) -> SchedulingState {
        let mut state = SchedulingState::new();
        state.last_event_time = self.last_event_time;
        for t in self.threads.iter() {
            state.insert(
                t.thread,
                ThreadSchedulingState {
                    last_time: t.last_time,
                    state: t.state,
                    wait_object: t.wait_object,
                    priority: t.priority,
                },
            );
        }
        state
    }
}

/// Snapshots in capture order, which is both event order and time order.
#[derive(Debug, Default)]
pub struct SnapshotIndex {
    snapshots: Vec<CompactSchedulingState>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot.
    ///
    /// # Panics
    ///
    /// Panics if `snapshot` does not come strictly after the last one in
    /// both event offset and time.
    pub fn push(&mut self, snapshot: CompactSchedulingState) -> Result<()> {
        if let Some(last) = self.snapshots.last() {
            assert!(
                snapshot.event_offset > last.event_offset
                    && snapshot.last_event_time > last.last_event_time,
                "snapshot at offset {} (time {}) does not follow offset {} (time {})",
                snapshot.event_offset,
                snapshot.last_event_time,
                last.event_offset,
                last.last_event_time
            );
        }
        try_reserve(&mut self.snapshots, 1, "indexing a scheduling snapshot")?;
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// The latest snapshot with `last_event_time <= time`.
    pub fn closest_preceding(&self, time: i64) -> Option<&CompactSchedulingState> {
        let index = self
            .snapshots
            .partition_point(|snapshot| snapshot.last_event_time <= time);
        index.checked_sub(1).map(|index| &self.snapshots[index])
    }

    pub fn last(&self) -> Option<&CompactSchedulingState> {
        self.snapshots.last()
    }

    pub fn as_slice(&self) -> &[CompactSchedulingState] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Replay the model's events from index `from` on top of `state`, for as
/// long as `keep_going` accepts the events' effective time.
///
/// No statistics are accumulated; `on_step` sees every state change.
pub fn replay<F, P>(
    model: &Model,
    state: SchedulingState,
    from: usize,
    mut on_step: F,
    mut keep_going: P,
) -> Result<SchedulingState>
where
    F: FnMut(ThreadId, &Step) -> Result<()>,
    P: FnMut(i64) -> bool,
{
    let log = model.log();
    let catalog = model.catalog();
    let mut tracker = SchedulingStateTracker::from_state(state);

    for (index, event) in log.iter_from(from) {
        let Some(time) = log.time_at(index) else {
            break;
        };
        if !keep_going(time) {
            break;
        }
        tracker.advance_to(time);
        match &event {
            Event::ThreadAdded { thread, .. } => {
                if catalog.thread_by_id(*thread).is_some() {
                    tracker.add_thread(*thread, time);
                }
            }
            Event::ThreadRemoved { thread, .. } => {
                tracker.remove_thread(*thread, time, &mut on_step)?
            }
            _ => tracker.process(&event, &mut on_step)?,
        }
    }
    Ok(tracker.into_state())
}
