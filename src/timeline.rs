//! Per-thread state change timelines for a time range.
//!
//! The timeline seeks with the snapshot index: it restores the closest
//! snapshot before the range and replays from there, so its cost depends
//! on the snapshot interval and the range length, not on where in the
//! trace the range lies.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::model::catalog::Thread;
use crate::model::{Model, ThreadId};
use crate::sched::snapshot::replay;
use crate::sched::state::{SchedulingState, ThreadState, WaitObjectKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub time: i64,
    pub state: ThreadState,
    pub wait_object: Option<WaitObjectKey>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IoState {
    PendingRequest,
    PendingOperation,
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct IoStateChange {
    pub time: i64,
    pub state: IoState,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ThreadTimeline {
    /// The first entry is the state the thread was in at the range start,
    /// stamped with the time it entered that state.
    pub changes: Vec<StateChange>,
    pub io: Vec<IoStateChange>,
}

impl ThreadTimeline {
    fn record(&mut self, change: StateChange, recording: bool) {
        if !recording {
            self.changes.clear();
            self.changes.push(change);
            return;
        }
        let same = self
            .changes
            .last()
            .is_some_and(|last| last.state == change.state && last.wait_object == change.wait_object);
        if !same {
            self.changes.push(change);
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SchedulingTimeline {
    pub start: i64,
    pub end: i64,
    threads: BTreeMap<ThreadId, ThreadTimeline>,
}

impl SchedulingTimeline {
    /// Build the timelines of every thread active in `[start, end)`.
    pub fn build(model: &Model, start: i64, end: i64) -> Result<Self> {
        let mut threads: BTreeMap<ThreadId, ThreadTimeline> = BTreeMap::new();

        let (state, from) = match model.snapshots().closest_preceding(start) {
            Some(snapshot) => (snapshot.restore(), snapshot.event_offset),
            None => (SchedulingState::new(), 0),
        };
        for (thread, s) in state.iter() {
            if s.state != ThreadState::Unknown {
                threads.entry(thread).or_default().changes.push(StateChange {
                    time: s.last_time,
                    state: s.state,
                    wait_object: s.wait_object,
                });
            }
        }

        replay(
            model,
            state,
            from,
            |thread, step| {
                let change = StateChange {
                    time: step.time,
                    state: step.to,
                    wait_object: step.wait_object,
                };
                threads
                    .entry(thread)
                    .or_default()
                    .record(change, step.time >= start);
                Ok(())
            },
            |time| time < end,
        )?;

        for thread in model.catalog().threads() {
            let io = io_changes(thread, start, end, model.last_event_time());
            if !io.is_empty() {
                threads.entry(thread.id).or_default().io = io;
            }
        }

        Ok(Self {
            start,
            end,
            threads,
        })
    }

    pub fn thread(&self, thread: ThreadId) -> Option<&ThreadTimeline> {
        self.threads.get(&thread)
    }

    /// Timelines in thread ID order.
    pub fn threads(&self) -> impl Iterator<Item = (ThreadId, &ThreadTimeline)> + '_ {
        self.threads.iter().map(|(&id, timeline)| (id, timeline))
    }
}

/// Merge overlapping `[start, end)` intervals, which must be sorted by start.
fn clusters(intervals: impl IntoIterator<Item = (i64, i64)>) -> Vec<(i64, i64)> {
    let mut merged: Vec<(i64, i64)> = Vec::new();
    for (start, end) in intervals {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// The thread's I/O activity in `[start, end)`: pending while any request is
/// outstanding, and doing I/O while any operation of one is.
fn io_changes(thread: &Thread, start: i64, end: i64, last_event_time: i64) -> Vec<IoStateChange> {
    let requests = &thread.io_requests()[..thread.closest_request_start_index(end)];
    let request_clusters = clusters(
        requests
            .iter()
            .map(|r| (r.scheduled_time, r.end_time(last_event_time))),
    );

    let mut changes = Vec::new();
    for (cluster_start, cluster_end) in request_clusters {
        if cluster_end <= start {
            continue;
        }
        changes.push(IoStateChange {
            time: cluster_start,
            state: IoState::PendingRequest,
        });

        let mut operations: Vec<(i64, i64)> = requests
            .iter()
            .filter(|r| r.scheduled_time >= cluster_start && r.scheduled_time < cluster_end)
            .flat_map(|r| r.operations.iter())
            .map(|op| (op.started_time, op.end_time(last_event_time)))
            .collect();
        operations.sort_unstable();
        for (op_start, op_end) in clusters(operations) {
            changes.push(IoStateChange {
                time: op_start,
                state: IoState::PendingOperation,
            });
            if op_end < cluster_end {
                changes.push(IoStateChange {
                    time: op_end,
                    state: IoState::PendingRequest,
                });
            }
        }

        changes.push(IoStateChange {
            time: cluster_end,
            state: IoState::Idle,
        });
    }
    changes
}
