//! The thread scheduling state machine.
//!
//! [`step`] is the single place that decides how a scheduling event moves
//! one thread from one state to the next and what the elapsed time since
//! its previous event counts as. The load-time tracker, snapshot replay and
//! the activity sampler all drive threads through it.
//!
//! Elapsed time is always attributed by the state the thread was in while
//! the time passed:
//!
//! | state | category |
//! |---|---|
//! | Running, StillRunning | [`TimeCategory::Run`] |
//! | Preempted | [`TimeCategory::Rerun`] |
//! | Ready | [`TimeCategory::Latency`] |
//! | Waiting | [`TimeCategory::Wait`] |
//! | Unknown | [`TimeCategory::Unspecified`] |

use serde::Serialize;

use crate::model::ThreadId;
use crate::sched::state::{ThreadSchedulingState, ThreadState, WaitObjectKey};
use crate::trace::{Event, KernelThreadState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeCategory {
    Run,
    /// Preempted and waiting to run again.
    Rerun,
    Latency,
    Wait,
    Unspecified,
}

impl TimeCategory {
    pub fn of(state: ThreadState) -> Self {
        match state {
            ThreadState::Running | ThreadState::StillRunning => TimeCategory::Run,
            ThreadState::Preempted => TimeCategory::Rerun,
            ThreadState::Ready => TimeCategory::Latency,
            ThreadState::Waiting => TimeCategory::Wait,
            ThreadState::Unknown => TimeCategory::Unspecified,
        }
    }
}

/// A closed interval of thread time and what it counts as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attribution {
    pub category: TimeCategory,
    pub start: i64,
    pub end: i64,
    /// The object waited on, for `Wait` time whose cause is known.
    pub wait_object: Option<WaitObjectKey>,
}

impl Attribution {
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// The outcome of applying one event to one thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    pub time: i64,
    pub from: ThreadState,
    pub to: ThreadState,
    pub attribution: Attribution,
    /// What the thread waits on in its new state.
    pub wait_object: Option<WaitObjectKey>,
    /// The thread was switched out while still runnable.
    pub preempted: bool,
}

/// Close the interval since the thread's last event and advance it to
/// `time`. Events older than `last_time` produce an empty interval.
fn close(state: &mut ThreadSchedulingState, time: i64) -> Attribution {
    let category = TimeCategory::of(state.state);
    let end = time.max(state.last_time);
    let attribution = Attribution {
        category,
        start: state.last_time,
        end,
        wait_object: if category == TimeCategory::Wait {
            state.wait_object
        } else {
            None
        },
    };
    state.last_time = end;
    attribution
}

fn is_blocked(kernel_state: KernelThreadState) -> bool {
    matches!(
        kernel_state,
        KernelThreadState::WAITING
            | KernelThreadState::SUSPENDED
            | KernelThreadState::ASLEEP
            | KernelThreadState::RECEIVING
    )
}

/// Apply `event` to `thread`, whose live state is `state`.
///
/// Returns `None` if the event does not change the scheduling state of
/// `thread`.
pub fn step(state: &mut ThreadSchedulingState, thread: ThreadId, event: &Event<'_>) -> Option<Step> {
    let from = state.state;
    let (time, to, preempted) = match event {
        Event::ThreadScheduled(e) if e.thread == thread => (e.time, ThreadState::Running, false),
        Event::ThreadScheduled(e) if e.previous_thread == thread => {
            let to = match from {
                ThreadState::StillRunning => ThreadState::Preempted,
                ThreadState::Running => ThreadState::Waiting,
                _ if is_blocked(e.previous_thread_state) => ThreadState::Waiting,
                _ => ThreadState::Preempted,
            };
            let attribution = close(state, e.time);
            state.state = to;
            state.wait_object = (to == ThreadState::Waiting
                && e.previous_thread_state == KernelThreadState::WAITING)
                .then(|| {
                    WaitObjectKey::new(
                        e.previous_thread_wait_object_type,
                        e.previous_thread_wait_object,
                    )
                });
            return Some(Step {
                time: e.time,
                from,
                to,
                attribution,
                wait_object: state.wait_object,
                preempted: to == ThreadState::Preempted,
            });
        }
        Event::ThreadEnqueuedInRunQueue {
            time,
            thread: t,
            priority,
        } if *t == thread => {
            state.priority = *priority;
            let to = match from {
                ThreadState::Running | ThreadState::StillRunning => ThreadState::StillRunning,
                ThreadState::Preempted => ThreadState::Preempted,
                ThreadState::Ready | ThreadState::Waiting | ThreadState::Unknown => {
                    ThreadState::Ready
                }
            };
            (*time, to, false)
        }
        Event::ThreadRemovedFromRunQueue { time, thread: t } if *t == thread => {
            let to = match from {
                ThreadState::Preempted => ThreadState::Preempted,
                _ => ThreadState::Ready,
            };
            (*time, to, false)
        }
        _ => return None,
    };

    let attribution = close(state, time);
    state.state = to;
    state.wait_object = None;
    Some(Step {
        time,
        from,
        to,
        attribution,
        wait_object: None,
        preempted,
    })
}

/// Attribute the time from the thread's last event up to `end`, if any.
pub fn finish(state: &ThreadSchedulingState, end: i64) -> Option<Attribution> {
    (end > state.last_time).then(|| {
        let mut state = *state;
        close(&mut state, end)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{ThreadScheduled, WaitObjectType};

    fn scheduled(time: i64, thread: ThreadId, previous: ThreadId) -> Event<'static> {
        Event::ThreadScheduled(ThreadScheduled {
            time,
            thread,
            previous_thread: previous,
            previous_thread_state: KernelThreadState::READY,
            previous_thread_wait_object_type: WaitObjectType::default(),
            previous_thread_wait_object: 0,
        })
    }

    fn blocked(time: i64, thread: ThreadId, previous: ThreadId, object: u64) -> Event<'static> {
        Event::ThreadScheduled(ThreadScheduled {
            time,
            thread,
            previous_thread: previous,
            previous_thread_state: KernelThreadState::WAITING,
            previous_thread_wait_object_type: WaitObjectType::MUTEX,
            previous_thread_wait_object: object,
        })
    }

    fn enqueued(time: i64, thread: ThreadId) -> Event<'static> {
        Event::ThreadEnqueuedInRunQueue {
            time,
            thread,
            priority: 10,
        }
    }

    fn with_state(state: ThreadState, last_time: i64) -> ThreadSchedulingState {
        ThreadSchedulingState {
            last_time,
            state,
            ..Default::default()
        }
    }

    #[test]
    fn test_scheduled_in_attributes_prior_state() {
        for (from, category) in [
            (ThreadState::Ready, TimeCategory::Latency),
            (ThreadState::Preempted, TimeCategory::Rerun),
            (ThreadState::StillRunning, TimeCategory::Run),
            (ThreadState::Unknown, TimeCategory::Unspecified),
        ] {
            let mut state = with_state(from, 10);
            let step = step(&mut state, 1, &scheduled(25, 1, 2)).unwrap();
            assert_eq!(step.to, ThreadState::Running);
            assert_eq!(step.attribution.category, category);
            assert_eq!(step.attribution.duration(), 15);
            assert_eq!(state.last_time, 25);
        }
    }

    #[test]
    fn test_requeued_thread_is_preempted() {
        let mut state = with_state(ThreadState::Running, 0);
        let s = step(&mut state, 1, &enqueued(100, 1)).unwrap();
        assert_eq!(s.to, ThreadState::StillRunning);
        assert_eq!(s.attribution.category, TimeCategory::Run);

        let s = step(&mut state, 1, &scheduled(150, 2, 1)).unwrap();
        assert_eq!(s.to, ThreadState::Preempted);
        assert!(s.preempted);
        assert_eq!(s.attribution.duration(), 50);
    }

    #[test]
    fn test_block_then_wake_carries_wait_object() {
        let mut state = with_state(ThreadState::Running, 0);
        let s = step(&mut state, 1, &blocked(10, 2, 1, 0xbeef)).unwrap();
        assert_eq!(s.to, ThreadState::Waiting);
        assert!(!s.preempted);
        let key = WaitObjectKey::new(WaitObjectType::MUTEX, 0xbeef);
        assert_eq!(state.wait_object, Some(key));
        assert_eq!(s.wait_object, Some(key));

        let s = step(&mut state, 1, &enqueued(40, 1)).unwrap();
        assert_eq!(s.to, ThreadState::Ready);
        assert_eq!(s.attribution.category, TimeCategory::Wait);
        assert_eq!(s.attribution.wait_object, Some(key));
        assert_eq!(s.attribution.duration(), 30);
        assert_eq!(state.wait_object, None);
    }

    #[test]
    fn test_unknown_thread_switched_out_uses_kernel_state() {
        let mut state = with_state(ThreadState::Unknown, 0);
        let s = step(&mut state, 1, &scheduled(10, 2, 1)).unwrap();
        assert_eq!(s.to, ThreadState::Preempted);
        assert!(s.preempted);

        let mut state = with_state(ThreadState::Unknown, 0);
        let s = step(&mut state, 1, &blocked(10, 2, 1, 1)).unwrap();
        assert_eq!(s.to, ThreadState::Waiting);
        assert_eq!(s.attribution.category, TimeCategory::Unspecified);
    }

    #[test]
    fn test_dequeue_keeps_preempted() {
        let dequeued = Event::ThreadRemovedFromRunQueue { time: 5, thread: 1 };
        let mut state = with_state(ThreadState::Preempted, 0);
        assert_eq!(step(&mut state, 1, &dequeued).unwrap().to, ThreadState::Preempted);

        let mut state = with_state(ThreadState::Running, 0);
        let s = step(&mut state, 1, &dequeued).unwrap();
        assert_eq!(s.to, ThreadState::Ready);
        assert_eq!(s.attribution.category, TimeCategory::Run);
    }

    #[test]
    fn test_self_switch_only_schedules() {
        let mut state = with_state(ThreadState::Running, 0);
        let s = step(&mut state, 1, &scheduled(10, 1, 1)).unwrap();
        assert_eq!(s.to, ThreadState::Running);
        assert!(!s.preempted);
    }

    #[test]
    fn test_unrelated_event_is_ignored() {
        let mut state = with_state(ThreadState::Running, 0);
        assert!(step(&mut state, 1, &scheduled(10, 2, 3)).is_none());
        assert!(step(&mut state, 1, &Event::TeamRemoved { team: 1 }).is_none());
        assert_eq!(state.last_time, 0);
    }

    #[test]
    fn test_stale_event_produces_empty_interval() {
        let mut state = with_state(ThreadState::Ready, 100);
        let s = step(&mut state, 1, &scheduled(50, 1, 2)).unwrap();
        assert_eq!(s.attribution.duration(), 0);
        assert_eq!(state.last_time, 100);
    }

    #[test]
    fn test_finish() {
        let state = with_state(ThreadState::Preempted, 150);
        let attribution = finish(&state, 500).unwrap();
        assert_eq!(attribution.category, TimeCategory::Rerun);
        assert_eq!(attribution.duration(), 350);
        assert!(finish(&state, 150).is_none());
    }
}
