//! Live per-thread scheduling state.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::model::ThreadId;
use crate::trace::WaitObjectType;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    #[default]
    Unknown,
    Running,
    /// Running, but requeued by the scheduler; the next unschedule is a
    /// preemption rather than a block.
    StillRunning,
    Preempted,
    Ready,
    Waiting,
}

impl ThreadState {
    pub fn name(self) -> &'static str {
        match self {
            ThreadState::Unknown => "unknown",
            ThreadState::Running => "running",
            ThreadState::StillRunning => "still running",
            ThreadState::Preempted => "preempted",
            ThreadState::Ready => "ready",
            ThreadState::Waiting => "waiting",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `(type, address)` of a wait object, with the address already
/// normalized for object-less wait types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WaitObjectKey {
    pub kind: WaitObjectType,
    pub object: u64,
}

impl WaitObjectKey {
    pub fn new(kind: WaitObjectType, object: u64) -> Self {
        Self {
            kind,
            object: kind.normalize_object(object),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadSchedulingState {
    pub last_time: i64,
    pub state: ThreadState,
    /// What the thread is blocked on while `Waiting`, if known.
    pub wait_object: Option<WaitObjectKey>,
    pub priority: i32,
}

impl ThreadSchedulingState {
    pub fn new(time: i64) -> Self {
        Self {
            last_time: time,
            ..Default::default()
        }
    }
}

/// The table of live thread states plus the time of the last scheduling
/// event folded into it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulingState {
    threads: BTreeMap<ThreadId, ThreadSchedulingState>,
    pub last_event_time: i64,
}

impl SchedulingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, thread: ThreadId) -> Option<&ThreadSchedulingState> {
        self.threads.get(&thread)
    }

    pub fn lookup_mut(&mut self, thread: ThreadId) -> Option<&mut ThreadSchedulingState> {
        self.threads.get_mut(&thread)
    }

    /// Start tracking `thread`. An already tracked thread keeps its state.
    pub fn insert(&mut self, thread: ThreadId, state: ThreadSchedulingState) -> bool {
        match self.threads.entry(thread) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(state);
                true
            }
        }
    }

    pub fn remove(&mut self, thread: ThreadId) -> Option<ThreadSchedulingState> {
        self.threads.remove(&thread)
    }

    /// Tracked threads in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, &ThreadSchedulingState)> + '_ {
        self.threads.iter().map(|(&id, state)| (id, state))
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_existing_state() {
        let mut state = SchedulingState::new();
        assert!(state.insert(3, ThreadSchedulingState::new(10)));
        state.lookup_mut(3).unwrap().state = ThreadState::Running;
        assert!(!state.insert(3, ThreadSchedulingState::new(20)));
        assert_eq!(state.lookup(3).unwrap().state, ThreadState::Running);
        assert_eq!(state.lookup(3).unwrap().last_time, 10);
    }

    #[test]
    fn test_wait_object_key_normalizes() {
        let key = WaitObjectKey::new(WaitObjectType::SIGNAL, 0xffff);
        assert_eq!(key.object, 0);
        let key = WaitObjectKey::new(WaitObjectType::SEMAPHORE, 0xffff);
        assert_eq!(key.object, 0xffff);
    }
}
