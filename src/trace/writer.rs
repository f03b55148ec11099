//! Encoder for trace buffers.
//!
//! Produces the same record layout [`TraceEventLog`] reads. Used to build
//! fixtures and to re-emit filtered traces.

use std::borrow::Cow;

use plain::Plain;

use crate::error::Result;
use crate::model::{TeamId, ThreadId};
use crate::trace::event::{
    Event, IoOperationFinished, IoOperationStarted, IoRequestFinished, IoRequestScheduled,
    KernelThreadState, ThreadScheduled, WaitObjectType,
};
use crate::trace::log::TraceEventLog;
use crate::trace::record::{self, kind, payload_bytes, RecordHeader, IO_FLAG_WRITE};

#[derive(Debug, Default)]
pub struct TraceWriter {
    data: Vec<u8>,
    cpu: u8,
}

impl TraceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// CPU recorded in subsequent record headers.
    pub fn set_cpu(&mut self, cpu: u8) {
        self.cpu = cpu;
    }

    /// Append a record with an arbitrary kind and payload.
    pub fn raw_record(&mut self, kind: u8, payload: &[u8]) {
        let size = u16::try_from(payload.len()).unwrap_or(u16::MAX);
        let header = RecordHeader::new(kind, self.cpu, size);
        self.data.extend_from_slice(&header.to_bytes());
        self.data.extend_from_slice(&payload[..usize::from(size)]);
    }

    fn fixed<T: Plain>(&mut self, kind: u8, record: &T) {
        self.raw_record(kind, payload_bytes(record));
    }

    fn named<T: Plain>(&mut self, kind: u8, record: &T, name: &str) {
        let mut payload = payload_bytes(record).to_vec();
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        self.raw_record(kind, &payload);
    }

    /// Encode a decoded event. Unknown events are written with an empty
    /// payload.
    pub fn push(&mut self, event: &Event<'_>) {
        match event {
            Event::TeamAdded { team, name } => self.named(
                kind::TEAM_ADDED,
                &record::TeamAddedRecord {
                    team: *team,
                    _pad: 0,
                },
                name,
            ),
            Event::TeamRemoved { team } => {
                self.fixed(kind::TEAM_REMOVED, &record::TeamRemovedRecord { team: *team })
            }
            Event::ThreadAdded { team, thread, name } => self.named(
                kind::THREAD_ADDED,
                &record::ThreadAddedRecord {
                    team: *team,
                    thread: *thread,
                },
                name,
            ),
            Event::ThreadRemoved { team, thread } => self.fixed(
                kind::THREAD_REMOVED,
                &record::ThreadRemovedRecord {
                    team: *team,
                    thread: *thread,
                },
            ),
            Event::ThreadScheduled(e) => self.fixed(
                kind::THREAD_SCHEDULED,
                &record::ThreadScheduledRecord {
                    time: e.time,
                    thread: e.thread,
                    previous_thread: e.previous_thread,
                    previous_thread_state: e.previous_thread_state.0,
                    previous_thread_wait_object_type: e.previous_thread_wait_object_type.0
                        as u16,
                    _pad: 0,
                    previous_thread_wait_object: e.previous_thread_wait_object,
                },
            ),
            Event::ThreadEnqueuedInRunQueue {
                time,
                thread,
                priority,
            } => self.fixed(
                kind::THREAD_ENQUEUED_IN_RUN_QUEUE,
                &record::ThreadEnqueuedRecord {
                    time: *time,
                    thread: *thread,
                    priority: *priority,
                },
            ),
            Event::ThreadRemovedFromRunQueue { time, thread } => self.fixed(
                kind::THREAD_REMOVED_FROM_RUN_QUEUE,
                &record::ThreadDequeuedRecord {
                    time: *time,
                    thread: *thread,
                    _pad: 0,
                },
            ),
            Event::WaitObjectInfo {
                kind: object_kind,
                object,
                referenced_object,
                name,
            } => self.named(
                kind::WAIT_OBJECT_INFO,
                &record::WaitObjectInfoRecord {
                    kind: object_kind.0,
                    _pad: 0,
                    object: *object,
                    referenced_object: *referenced_object,
                },
                name,
            ),
            Event::IoSchedulerAdded { scheduler, name } => self.named(
                kind::IO_SCHEDULER_ADDED,
                &record::IoSchedulerAddedRecord {
                    scheduler: *scheduler,
                    _pad: 0,
                },
                name,
            ),
            Event::IoRequestScheduled(e) => self.fixed(
                kind::IO_REQUEST_SCHEDULED,
                &record::IoRequestScheduledRecord {
                    time: e.time,
                    team: e.team,
                    thread: e.thread,
                    scheduler: e.scheduler,
                    flags: if e.write { IO_FLAG_WRITE } else { 0 },
                    request: e.request,
                    offset: e.offset,
                    length: e.length,
                },
            ),
            Event::IoRequestFinished(e) => self.fixed(
                kind::IO_REQUEST_FINISHED,
                &record::IoRequestFinishedRecord {
                    time: e.time,
                    scheduler: e.scheduler,
                    status: e.status,
                    request: e.request,
                    transferred: e.transferred,
                },
            ),
            Event::IoOperationStarted(e) => self.fixed(
                kind::IO_OPERATION_STARTED,
                &record::IoOperationStartedRecord {
                    time: e.time,
                    scheduler: e.scheduler,
                    flags: if e.write { IO_FLAG_WRITE } else { 0 },
                    request: e.request,
                    operation: e.operation,
                    offset: e.offset,
                    length: e.length,
                },
            ),
            Event::IoOperationFinished(e) => self.fixed(
                kind::IO_OPERATION_FINISHED,
                &record::IoOperationFinishedRecord {
                    time: e.time,
                    scheduler: e.scheduler,
                    status: e.status,
                    request: e.request,
                    operation: e.operation,
                    transferred: e.transferred,
                },
            ),
            Event::Unknown { kind } => self.raw_record(*kind, &[]),
        }
    }

    pub fn team_added(&mut self, team: TeamId, name: &str) {
        self.push(&Event::TeamAdded {
            team,
            name: Cow::Borrowed(name),
        });
    }

    pub fn team_removed(&mut self, team: TeamId) {
        self.push(&Event::TeamRemoved { team });
    }

    pub fn thread_added(&mut self, team: TeamId, thread: ThreadId, name: &str) {
        self.push(&Event::ThreadAdded {
            team,
            thread,
            name: Cow::Borrowed(name),
        });
    }

    pub fn thread_removed(&mut self, team: TeamId, thread: ThreadId) {
        self.push(&Event::ThreadRemoved { team, thread });
    }

    /// `thread` starts running, displacing `previous` which stays runnable.
    pub fn thread_scheduled(&mut self, time: i64, thread: ThreadId, previous: ThreadId) {
        self.push(&Event::ThreadScheduled(ThreadScheduled {
            time,
            thread,
            previous_thread: previous,
            previous_thread_state: KernelThreadState::READY,
            previous_thread_wait_object_type: WaitObjectType::default(),
            previous_thread_wait_object: 0,
        }));
    }

    /// `thread` starts running because `previous` blocked on a wait object.
    pub fn thread_blocked(
        &mut self,
        time: i64,
        thread: ThreadId,
        previous: ThreadId,
        object_kind: WaitObjectType,
        object: u64,
    ) {
        self.push(&Event::ThreadScheduled(ThreadScheduled {
            time,
            thread,
            previous_thread: previous,
            previous_thread_state: KernelThreadState::WAITING,
            previous_thread_wait_object_type: object_kind,
            previous_thread_wait_object: object,
        }));
    }

    pub fn thread_enqueued(&mut self, time: i64, thread: ThreadId, priority: i32) {
        self.push(&Event::ThreadEnqueuedInRunQueue {
            time,
            thread,
            priority,
        });
    }

    pub fn thread_dequeued(&mut self, time: i64, thread: ThreadId) {
        self.push(&Event::ThreadRemovedFromRunQueue { time, thread });
    }

    pub fn wait_object_info(
        &mut self,
        object_kind: WaitObjectType,
        object: u64,
        referenced_object: u64,
        name: &str,
    ) {
        self.push(&Event::WaitObjectInfo {
            kind: object_kind,
            object,
            referenced_object,
            name: Cow::Borrowed(name),
        });
    }

    pub fn io_scheduler_added(&mut self, scheduler: i32, name: &str) {
        self.push(&Event::IoSchedulerAdded {
            scheduler,
            name: Cow::Borrowed(name),
        });
    }

    pub fn io_request_scheduled(&mut self, event: IoRequestScheduled) {
        self.push(&Event::IoRequestScheduled(event));
    }

    pub fn io_request_finished(&mut self, event: IoRequestFinished) {
        self.push(&Event::IoRequestFinished(event));
    }

    pub fn io_operation_started(&mut self, event: IoOperationStarted) {
        self.push(&Event::IoOperationStarted(event));
    }

    pub fn io_operation_finished(&mut self, event: IoOperationFinished) {
        self.push(&Event::IoOperationFinished(event));
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn into_log(self) -> Result<TraceEventLog> {
        TraceEventLog::from_buffer(self.data)
    }
}
