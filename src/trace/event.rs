//! Decoded trace events.
//!
//! Records are decoded once into the [`Event`] tagged union; consumers match
//! on it instead of reinterpreting payload bytes.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use crate::model::{TeamId, ThreadId};
use crate::trace::record::{self, kind, read_payload, RecordHeader, IO_FLAG_WRITE};

/// Kind of kernel object a thread blocked on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct WaitObjectType(pub u32);

impl WaitObjectType {
    pub const SEMAPHORE: Self = Self(0);
    pub const CONDITION_VARIABLE: Self = Self(1);
    pub const SNOOZE: Self = Self(2);
    pub const SIGNAL: Self = Self(3);
    pub const MUTEX: Self = Self(4);
    pub const RW_LOCK: Self = Self(5);

    pub fn name(self) -> &'static str {
        match self {
            Self::SEMAPHORE => "semaphore",
            Self::CONDITION_VARIABLE => "condition",
            Self::SNOOZE => "snooze",
            Self::SIGNAL => "signal",
            Self::MUTEX => "mutex",
            Self::RW_LOCK => "rwlock",
            _ => "other",
        }
    }

    /// Snooze and signal waits are not tied to an object; their address is
    /// normalized to 0 so all such waits share one group.
    pub fn normalize_object(self, object: u64) -> u64 {
        match self {
            Self::SNOOZE | Self::SIGNAL => 0,
            _ => object,
        }
    }
}

impl fmt::Display for WaitObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kernel thread state reported for the thread leaving the CPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelThreadState(pub u16);

impl KernelThreadState {
    pub const RUNNING: Self = Self(1);
    pub const READY: Self = Self(2);
    pub const RECEIVING: Self = Self(3);
    pub const ASLEEP: Self = Self(4);
    pub const SUSPENDED: Self = Self(5);
    pub const WAITING: Self = Self(6);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadScheduled {
    pub time: i64,
    pub thread: ThreadId,
    pub previous_thread: ThreadId,
    pub previous_thread_state: KernelThreadState,
    pub previous_thread_wait_object_type: WaitObjectType,
    pub previous_thread_wait_object: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoRequestScheduled {
    pub time: i64,
    pub team: TeamId,
    pub thread: ThreadId,
    pub scheduler: i32,
    pub request: u64,
    pub offset: i64,
    pub length: u64,
    pub write: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoRequestFinished {
    pub time: i64,
    pub scheduler: i32,
    pub request: u64,
    pub status: i32,
    pub transferred: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoOperationStarted {
    pub time: i64,
    pub scheduler: i32,
    pub request: u64,
    pub operation: u64,
    pub offset: i64,
    pub length: u64,
    pub write: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoOperationFinished {
    pub time: i64,
    pub scheduler: i32,
    pub request: u64,
    pub operation: u64,
    pub status: i32,
    pub transferred: u64,
}

/// A decoded trace record. Names borrow from the trace buffer when they are
/// valid UTF-8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event<'a> {
    TeamAdded {
        team: TeamId,
        name: Cow<'a, str>,
    },
    TeamRemoved {
        team: TeamId,
    },
    ThreadAdded {
        team: TeamId,
        thread: ThreadId,
        name: Cow<'a, str>,
    },
    ThreadRemoved {
        team: TeamId,
        thread: ThreadId,
    },
    ThreadScheduled(ThreadScheduled),
    ThreadEnqueuedInRunQueue {
        time: i64,
        thread: ThreadId,
        priority: i32,
    },
    ThreadRemovedFromRunQueue {
        time: i64,
        thread: ThreadId,
    },
    WaitObjectInfo {
        kind: WaitObjectType,
        object: u64,
        referenced_object: u64,
        name: Cow<'a, str>,
    },
    IoSchedulerAdded {
        scheduler: i32,
        name: Cow<'a, str>,
    },
    IoRequestScheduled(IoRequestScheduled),
    IoRequestFinished(IoRequestFinished),
    IoOperationStarted(IoOperationStarted),
    IoOperationFinished(IoOperationFinished),
    /// A record kind this crate does not interpret.
    Unknown {
        kind: u8,
    },
}

impl Event<'_> {
    /// The timestamp carried by the record, if its kind has one.
    pub fn time(&self) -> Option<i64> {
        match self {
            Event::ThreadScheduled(event) => Some(event.time),
            Event::ThreadEnqueuedInRunQueue { time, .. }
            | Event::ThreadRemovedFromRunQueue { time, .. } => Some(*time),
            Event::IoRequestScheduled(event) => Some(event.time),
            Event::IoRequestFinished(event) => Some(event.time),
            Event::IoOperationStarted(event) => Some(event.time),
            Event::IoOperationFinished(event) => Some(event.time),
            _ => None,
        }
    }

    /// Returns true if the event changes the scheduling state of `thread`.
    pub fn involves_thread(&self, thread: ThreadId) -> bool {
        match self {
            Event::ThreadScheduled(event) => {
                event.thread == thread || event.previous_thread == thread
            }
            Event::ThreadEnqueuedInRunQueue { thread: t, .. }
            | Event::ThreadRemovedFromRunQueue { thread: t, .. } => *t == thread,
            _ => false,
        }
    }
}

fn trailing_name(bytes: &[u8]) -> Cow<'_, str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
}

fn short(kind: u8) -> String {
    format!("payload too short for record kind {kind}")
}

/// Decode one record payload. `header` must describe `payload`.
pub fn decode<'a>(header: RecordHeader, payload: &'a [u8]) -> Result<Event<'a>, String> {
    let kind = header.kind();
    let event = match kind {
        kind::TEAM_ADDED => {
            let (rec, rest) =
                read_payload::<record::TeamAddedRecord>(payload).ok_or_else(|| short(kind))?;
            Event::TeamAdded {
                team: rec.team,
                name: trailing_name(rest),
            }
        }
        kind::TEAM_REMOVED => {
            let (rec, _) =
                read_payload::<record::TeamRemovedRecord>(payload).ok_or_else(|| short(kind))?;
            Event::TeamRemoved { team: rec.team }
        }
        kind::THREAD_ADDED => {
            let (rec, rest) =
                read_payload::<record::ThreadAddedRecord>(payload).ok_or_else(|| short(kind))?;
            Event::ThreadAdded {
                team: rec.team,
                thread: rec.thread,
                name: trailing_name(rest),
            }
        }
        kind::THREAD_REMOVED => {
            let (rec, _) =
                read_payload::<record::ThreadRemovedRecord>(payload).ok_or_else(|| short(kind))?;
            Event::ThreadRemoved {
                team: rec.team,
                thread: rec.thread,
            }
        }
        kind::THREAD_SCHEDULED => {
            let (rec, _) = read_payload::<record::ThreadScheduledRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::ThreadScheduled(ThreadScheduled {
                time: rec.time,
                thread: rec.thread,
                previous_thread: rec.previous_thread,
                previous_thread_state: KernelThreadState(rec.previous_thread_state),
                previous_thread_wait_object_type: WaitObjectType(u32::from(
                    rec.previous_thread_wait_object_type,
                )),
                previous_thread_wait_object: rec.previous_thread_wait_object,
            })
        }
        kind::THREAD_ENQUEUED_IN_RUN_QUEUE => {
            let (rec, _) = read_payload::<record::ThreadEnqueuedRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::ThreadEnqueuedInRunQueue {
                time: rec.time,
                thread: rec.thread,
                priority: rec.priority,
            }
        }
        kind::THREAD_REMOVED_FROM_RUN_QUEUE => {
            let (rec, _) = read_payload::<record::ThreadDequeuedRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::ThreadRemovedFromRunQueue {
                time: rec.time,
                thread: rec.thread,
            }
        }
        kind::WAIT_OBJECT_INFO => {
            let (rec, rest) = read_payload::<record::WaitObjectInfoRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::WaitObjectInfo {
                kind: WaitObjectType(rec.kind),
                object: rec.object,
                referenced_object: rec.referenced_object,
                name: trailing_name(rest),
            }
        }
        kind::IO_SCHEDULER_ADDED => {
            let (rec, rest) = read_payload::<record::IoSchedulerAddedRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::IoSchedulerAdded {
                scheduler: rec.scheduler,
                name: trailing_name(rest),
            }
        }
        kind::IO_REQUEST_SCHEDULED => {
            let (rec, _) = read_payload::<record::IoRequestScheduledRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::IoRequestScheduled(IoRequestScheduled {
                time: rec.time,
                team: rec.team,
                thread: rec.thread,
                scheduler: rec.scheduler,
                request: rec.request,
                offset: rec.offset,
                length: rec.length,
                write: rec.flags & IO_FLAG_WRITE != 0,
            })
        }
        kind::IO_REQUEST_FINISHED => {
            let (rec, _) = read_payload::<record::IoRequestFinishedRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::IoRequestFinished(IoRequestFinished {
                time: rec.time,
                scheduler: rec.scheduler,
                request: rec.request,
                status: rec.status,
                transferred: rec.transferred,
            })
        }
        kind::IO_OPERATION_STARTED => {
            let (rec, _) = read_payload::<record::IoOperationStartedRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::IoOperationStarted(IoOperationStarted {
                time: rec.time,
                scheduler: rec.scheduler,
                request: rec.request,
                operation: rec.operation,
                offset: rec.offset,
                length: rec.length,
                write: rec.flags & IO_FLAG_WRITE != 0,
            })
        }
        kind::IO_OPERATION_FINISHED => {
            let (rec, _) = read_payload::<record::IoOperationFinishedRecord>(payload)
                .ok_or_else(|| short(kind))?;
            Event::IoOperationFinished(IoOperationFinished {
                time: rec.time,
                scheduler: rec.scheduler,
                request: rec.request,
                operation: rec.operation,
                status: rec.status,
                transferred: rec.transferred,
            })
        }
        other => Event::Unknown { kind: other },
    };
    Ok(event)
}
