//! Drives the live [`SchedulingState`] through the global event stream.

use tracing::debug;

use crate::error::Result;
use crate::model::ThreadId;
use crate::sched::state::{SchedulingState, ThreadSchedulingState};
use crate::sched::transition::{self, Step};
use crate::trace::Event;

/// Folds scheduling events into a [`SchedulingState`], reporting every
/// per-thread [`Step`] to the caller.
///
/// The tracker only knows about threads it was told about with
/// [`SchedulingStateTracker::add_thread`]; events for any other thread are
/// ignored. Statistics are the caller's business: the loader accumulates
/// them, replays for seeking just watch the state changes.
#[derive(Debug, Default)]
pub struct SchedulingStateTracker {
    state: SchedulingState,
}

impl SchedulingStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue tracking from a previously captured state.
    pub fn from_state(state: SchedulingState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SchedulingState {
        &self.state
    }

    pub fn into_state(self) -> SchedulingState {
        self.state
    }

    /// Record that every event up to `time` has been folded in.
    pub fn advance_to(&mut self, time: i64) {
        self.state.last_event_time = self.state.last_event_time.max(time);
    }

    /// Start tracking a thread created at `time`, in the `Unknown` state.
    pub fn add_thread(&mut self, thread: ThreadId, time: i64) {
        if !self.state.insert(thread, ThreadSchedulingState::new(time)) {
            debug!("Thread {thread} is already tracked");
        }
    }

    /// Stop tracking a thread that exited at `time`, attributing its
    /// remaining time first.
    pub fn remove_thread<F>(&mut self, thread: ThreadId, time: i64, mut on_step: F) -> Result<()>
    where
        F: FnMut(ThreadId, &Step) -> Result<()>,
    {
        match self.state.remove(thread) {
            Some(state) => finish_thread(thread, &state, time, &mut on_step),
            None => {
                debug!("Removal of untracked thread {thread}");
                Ok(())
            }
        }
    }

    /// Apply one event. Events that carry no scheduling information are
    /// ignored.
    pub fn process<F>(&mut self, event: &Event<'_>, mut on_step: F) -> Result<()>
    where
        F: FnMut(ThreadId, &Step) -> Result<()>,
    {
        let time = match event {
            Event::ThreadScheduled(_)
            | Event::ThreadEnqueuedInRunQueue { .. }
            | Event::ThreadRemovedFromRunQueue { .. } => event.time(),
            _ => None,
        };
        let Some(time) = time else {
            return Ok(());
        };
        self.advance_to(time);

        match event {
            Event::ThreadScheduled(e) => {
                self.step_thread(e.thread, event, &mut on_step)?;
                if e.previous_thread != e.thread {
                    self.step_thread(e.previous_thread, event, &mut on_step)?;
                }
                Ok(())
            }
            Event::ThreadEnqueuedInRunQueue { thread, .. }
            | Event::ThreadRemovedFromRunQueue { thread, .. } => {
                self.step_thread(*thread, event, &mut on_step)
            }
            _ => Ok(()),
        }
    }

    /// Attribute every tracked thread's time up to `end`.
    pub fn finish<F>(&self, end: i64, mut on_step: F) -> Result<()>
    where
        F: FnMut(ThreadId, &Step) -> Result<()>,
    {
        for (thread, state) in self.state.iter() {
            finish_thread(thread, state, end, &mut on_step)?;
        }
        Ok(())
    }

    fn step_thread<F>(&mut self, thread: ThreadId, event: &Event<'_>, on_step: &mut F) -> Result<()>
    where
        F: FnMut(ThreadId, &Step) -> Result<()>,
    {
        let Some(state) = self.state.lookup_mut(thread) else {
            debug!("Scheduling event for unknown thread {thread}");
            return Ok(());
        };
        match transition::step(state, thread, event) {
            Some(step) => on_step(thread, &step),
            None => Ok(()),
        }
    }
}

fn finish_thread<F>(thread: ThreadId, state: &ThreadSchedulingState, end: i64, on_step: &mut F) -> Result<()>
where
    F: FnMut(ThreadId, &Step) -> Result<()>,
{
    match transition::finish(state, end) {
        Some(attribution) => on_step(
            thread,
            &Step {
                time: attribution.end,
                from: state.state,
                to: state.state,
                attribution,
                wait_object: state.wait_object,
                preempted: false,
            },
        ),
        None => Ok(()),
    }
}
