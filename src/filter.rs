//! Per-thread views of the event log.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::{try_reserve, ModelError, Result};
use crate::model::catalog::{EntityCatalog, Thread};
use crate::model::{Model, ThreadId};
use crate::trace::{Event, WaitObjectType};

/// The events that change one thread's scheduling state, in log order.
///
/// Holds event indices only; events are decoded from the model's log on
/// access.
#[derive(Debug)]
pub struct ThreadView<'a> {
    model: &'a Model,
    thread: &'a Thread,
    indices: Vec<usize>,
}

impl<'a> ThreadView<'a> {
    /// Select every event in which `thread_id` is scheduled in, switched
    /// out, enqueued or dequeued. Selection stops at the thread's removal.
    pub fn build(model: &'a Model, thread_id: ThreadId) -> Result<Self> {
        let thread = model
            .catalog()
            .thread_by_id(thread_id)
            .ok_or(ModelError::UnknownThread(thread_id))?;
        let log = model.log();

        let mut indices = Vec::new();
        let first = log.closest_index_at_or_after(thread.creation_time);
        for (index, event) in log.iter_from(first) {
            match event {
                Event::ThreadRemoved { thread: t, .. } if t == thread_id => break,
                event if event.involves_thread(thread_id) => {
                    try_reserve(&mut indices, 1, "building a thread view")?;
                    indices.push(index);
                }
                _ => {}
            }
        }

        Ok(Self {
            model,
            thread,
            indices,
        })
    }

    pub fn model(&self) -> &'a Model {
        self.model
    }

    pub fn thread(&self) -> &'a Thread {
        self.thread
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Log indices of the selected events.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Effective time of the view's `position`th event.
    pub fn time_at(&self, position: usize) -> Option<i64> {
        self.model.log().time_at(*self.indices.get(position)?)
    }

    pub fn event_at(&self, position: usize) -> Option<Event<'a>> {
        self.model.log().event_at(*self.indices.get(position)?)
    }

    /// Position of the last event at or before `time`.
    pub fn position_at_or_before(&self, time: i64) -> Option<usize> {
        let log = self.model.log();
        self.indices
            .partition_point(|&index| log.time_at(index).is_some_and(|t| t <= time))
            .checked_sub(1)
    }

    /// `(time, event)` pairs from `position` on.
    pub fn iter_from(&self, position: usize) -> impl Iterator<Item = (i64, Event<'a>)> + '_ {
        let log = self.model.log();
        self.indices
            .get(position..)
            .unwrap_or_default()
            .iter()
            .filter_map(move |&index| Some((log.time_at(index)?, log.event_at(index)?)))
    }
}

/// A thread's waits on every incarnation of one named object type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WaitObjectUsage {
    #[serde(rename = "type")]
    pub kind: WaitObjectType,
    pub type_name: &'static str,
    pub name: String,
    pub wait_count: u64,
    pub total_wait_time: i64,
}

/// The thread's wait object statistics keyed by `(type, name)`.
///
/// Objects destroyed and recreated under the same name, at the same or a
/// different address, end up in one entry.
pub fn group_wait_objects(catalog: &EntityCatalog, thread: &Thread) -> Result<Vec<WaitObjectUsage>> {
    let mut usages = Vec::new();
    for group in thread.wait_object_groups() {
        try_reserve(&mut usages, group.members().len(), "grouping wait objects")?;
        for member in group.members() {
            let wait_object = catalog.wait_object(member.wait_object);
            usages.push(WaitObjectUsage {
                kind: wait_object.kind,
                type_name: wait_object.kind.name(),
                name: wait_object.name.clone(),
                wait_count: member.wait_count,
                total_wait_time: member.total_wait_time,
            });
        }
    }

    usages.sort_by(compare_keys);
    usages.dedup_by(|next, merged| {
        if compare_keys(merged, next) != Ordering::Equal {
            return false;
        }
        merged.wait_count += next.wait_count;
        merged.total_wait_time += next.total_wait_time;
        true
    });
    Ok(usages)
}

fn compare_keys(a: &WaitObjectUsage, b: &WaitObjectUsage) -> Ordering {
    (a.kind, &a.name).cmp(&(b.kind, &b.name))
}
