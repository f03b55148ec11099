//! I/O request tracking.
//!
//! Requests are matched by `(scheduler, request)` while pending. Once the
//! scan is over every request is attached to its thread, sorted by
//! scheduling time, and the thread's I/O count and time are filled in.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{try_reserve, Result};
use crate::model::catalog::EntityCatalog;
use crate::model::ThreadId;
use crate::trace::event::{
    IoOperationFinished, IoOperationStarted, IoRequestFinished, IoRequestScheduled,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IoOperation {
    pub operation: u64,
    pub started_time: i64,
    pub finished_time: Option<i64>,
    pub offset: i64,
    pub length: u64,
    pub write: bool,
    pub status: i32,
    pub transferred: u64,
}

impl IoOperation {
    pub fn end_time(&self, last_event_time: i64) -> i64 {
        self.finished_time.unwrap_or(last_event_time)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IoRequest {
    pub scheduler: i32,
    pub request: u64,
    pub thread: ThreadId,
    pub scheduled_time: i64,
    pub finished_time: Option<i64>,
    pub offset: i64,
    pub length: u64,
    pub write: bool,
    pub status: i32,
    pub transferred: u64,
    pub operations: Vec<IoOperation>,
}

impl IoRequest {
    /// Completion time, or `last_event_time` for requests still pending
    /// when the trace ended.
    pub fn end_time(&self, last_event_time: i64) -> i64 {
        self.finished_time.unwrap_or(last_event_time)
    }

    pub fn duration(&self, last_event_time: i64) -> i64 {
        self.end_time(last_event_time) - self.scheduled_time
    }
}

/// Pending-request bookkeeping used during the forward scan.
#[derive(Debug, Default)]
pub struct IoTracker {
    pending: HashMap<(i32, u64), IoRequest>,
    completed: Vec<IoRequest>,
}

impl IoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_scheduled(&mut self, catalog: &EntityCatalog, event: &IoRequestScheduled) {
        if catalog.thread_by_id(event.thread).is_none() {
            debug!(
                "I/O request {:#x} scheduled by unknown thread {}",
                event.request, event.thread
            );
            return;
        }
        let request = IoRequest {
            scheduler: event.scheduler,
            request: event.request,
            thread: event.thread,
            scheduled_time: event.time,
            finished_time: None,
            offset: event.offset,
            length: event.length,
            write: event.write,
            status: 0,
            transferred: 0,
            operations: Vec::new(),
        };
        if let Some(stale) = self
            .pending
            .insert((event.scheduler, event.request), request)
        {
            // The address was reused without a completion record.
            warn!(
                "I/O request {:#x} on scheduler {} rescheduled before finishing",
                stale.request, stale.scheduler
            );
            self.completed.push(stale);
        }
    }

    pub fn request_finished(&mut self, event: &IoRequestFinished) {
        let Some(mut request) = self.pending.remove(&(event.scheduler, event.request)) else {
            debug!("Finish for unknown I/O request {:#x}", event.request);
            return;
        };
        request.finished_time = Some(event.time);
        request.status = event.status;
        request.transferred = event.transferred;
        self.completed.push(request);
    }

    pub fn operation_started(&mut self, event: &IoOperationStarted) {
        let Some(request) = self.pending.get_mut(&(event.scheduler, event.request)) else {
            debug!("I/O operation for unknown request {:#x}", event.request);
            return;
        };
        request.operations.push(IoOperation {
            operation: event.operation,
            started_time: event.time,
            finished_time: None,
            offset: event.offset,
            length: event.length,
            write: event.write,
            status: 0,
            transferred: 0,
        });
    }

    pub fn operation_finished(&mut self, event: &IoOperationFinished) {
        let operation = self
            .pending
            .get_mut(&(event.scheduler, event.request))
            .and_then(|request| {
                request
                    .operations
                    .iter_mut()
                    .rev()
                    .find(|op| op.operation == event.operation && op.finished_time.is_none())
            });
        match operation {
            Some(operation) => {
                operation.finished_time = Some(event.time);
                operation.status = event.status;
                operation.transferred = event.transferred;
            }
            None => debug!("Finish for unknown I/O operation {:#x}", event.operation),
        }
    }

    /// Hand every request to its thread and fill in the I/O statistics.
    pub fn finish(self, catalog: &mut EntityCatalog, last_event_time: i64) -> Result<()> {
        let mut requests = self.completed;
        try_reserve(&mut requests, self.pending.len(), "collecting I/O requests")?;
        requests.extend(self.pending.into_values());

        for request in requests {
            let Some(thread) = catalog.thread_by_id_mut(request.thread) else {
                continue;
            };
            try_reserve(&mut thread.io_requests, 1, "attaching I/O requests")?;
            thread.io_requests.push(request);
        }

        for thread in catalog.threads_mut() {
            thread
                .io_requests
                .sort_by_key(|request| (request.scheduled_time, request.scheduler, request.request));
            for request in &thread.io_requests {
                thread.stats.add_io(request.duration(last_event_time));
            }
        }
        Ok(())
    }
}
