//! Trace ingestion.
//!
//! A single forward pass over the [`TraceEventLog`] fills the
//! [`EntityCatalog`], drives the [`SchedulingStateTracker`] while
//! accumulating per-thread statistics, and freezes a snapshot every
//! `snapshot_interval` events. The pass can be cancelled from another
//! thread; the flag is polled every `cancel_check_interval` events and a
//! cancelled or failed load never hands out a partially built model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::AnalyzerConfig;
use crate::error::{ModelError, Result};
use crate::model::catalog::EntityCatalog;
use crate::model::io::IoTracker;
use crate::model::{Model, ThreadId};
use crate::sched::snapshot::{CompactSchedulingState, SnapshotIndex};
use crate::sched::tracker::SchedulingStateTracker;
use crate::sched::transition::{Step, TimeCategory};
use crate::trace::{Event, TraceEventLog};

/// How a load ended.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Arc<Model>),
    /// Cancelled through the loader's cancel token.
    Aborted,
    Failed(ModelError),
}

impl LoadOutcome {
    fn from_result(result: Result<Model>) -> Self {
        match result {
            Ok(model) => LoadOutcome::Loaded(Arc::new(model)),
            Err(ModelError::Cancelled) => LoadOutcome::Aborted,
            Err(err) => LoadOutcome::Failed(err),
        }
    }
}

#[derive(Debug, Default)]
pub struct ModelLoader {
    config: AnalyzerConfig,
    cancel: Arc<AtomicBool>,
}

impl ModelLoader {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that aborts the load when set.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Index `data` and build a model from it on the calling thread.
    pub fn load(&self, data: Vec<u8>) -> LoadOutcome {
        LoadOutcome::from_result(TraceEventLog::from_buffer(data).and_then(|log| self.scan(log)))
    }

    /// Build a model from an already indexed log on the calling thread.
    pub fn load_log(&self, log: TraceEventLog) -> LoadOutcome {
        LoadOutcome::from_result(self.scan(log))
    }

    /// Load on a background thread.
    pub fn spawn(self, data: Vec<u8>) -> LoadHandle {
        let (tx, rx) = channel();
        let cancel = self.cancel_token();
        let thread = thread::spawn(move || {
            // The receiver may already be gone if the caller lost interest.
            let _ = tx.send(self.load(data));
        });
        LoadHandle {
            receiver: rx,
            thread: Some(thread),
            cancel,
        }
    }

    fn scan(&self, log: TraceEventLog) -> Result<Model> {
        let cancel_check_interval = self.config.cancel_check_interval.max(1);
        let snapshot_interval = self.config.snapshot_interval;

        let mut scan = Scan::default();
        for (index, event) in log.iter_from(0) {
            if index % cancel_check_interval == 0 && self.cancel.load(Ordering::Relaxed) {
                info!("Load cancelled after {index} events");
                return Err(ModelError::Cancelled);
            }
            let time = log.time_at(index).unwrap_or_default();
            scan.fold(&event, time)?;

            let folded = index + 1;
            if snapshot_interval > 0 && folded % snapshot_interval == 0 {
                scan.capture_snapshot(folded)?;
            }
        }
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ModelError::Cancelled);
        }

        let Scan {
            mut catalog,
            tracker,
            snapshots,
            io,
        } = scan;
        let last_event_time = tracker.state().last_event_time;
        tracker.finish(last_event_time, |thread, step| {
            account(&mut catalog, thread, step)
        })?;
        io.finish(&mut catalog, last_event_time)?;

        info!(
            "Loaded {} events: {} teams, {} threads, {} wait objects, {} snapshots",
            log.count(),
            catalog.teams().len(),
            catalog.threads().len(),
            catalog.wait_object_count(),
            snapshots.len()
        );
        Ok(Model::new(log, catalog, snapshots, last_event_time))
    }
}

/// A load running on a background thread.
#[derive(Debug)]
pub struct LoadHandle {
    receiver: Receiver<LoadOutcome>,
    thread: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl LoadHandle {
    /// Ask the loader to stop. It reports [`LoadOutcome::Aborted`] within
    /// one cancellation check interval.
    pub fn abort(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// The outcome, if the load has finished.
    pub fn try_outcome(&mut self) -> Option<LoadOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => {
                self.join();
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.join();
                Some(LoadOutcome::Aborted)
            }
        }
    }

    /// Block until the load has finished.
    pub fn wait(mut self) -> LoadOutcome {
        let outcome = self.receiver.recv().unwrap_or(LoadOutcome::Aborted);
        self.join();
        outcome
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if let Err(panic) = thread.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

/// Everything the forward scan owns while it runs.
#[derive(Default)]
struct Scan {
    catalog: EntityCatalog,
    tracker: SchedulingStateTracker,
    snapshots: SnapshotIndex,
    io: IoTracker,
}

impl Scan {
    fn fold(&mut self, event: &Event<'_>, time: i64) -> Result<()> {
        let catalog = &mut self.catalog;
        self.tracker.advance_to(time);

        match event {
            Event::TeamAdded { team, name } => {
                catalog.add_team(*team, name, time)?;
            }
            Event::TeamRemoved { team } => {
                if let Err(err) = catalog.remove_team(*team, time) {
                    warn!("Ignoring team removal: {err}");
                }
            }
            Event::ThreadAdded { team, thread, name } => {
                match catalog.add_thread(*thread, *team, name, time) {
                    Ok(_) => self.tracker.add_thread(*thread, time),
                    Err(err) if err.is_recoverable() => warn!("Skipping thread: {err}"),
                    Err(err) => return Err(err),
                }
            }
            Event::ThreadRemoved { thread, .. } => {
                if let Err(err) = catalog.remove_thread(*thread, time) {
                    warn!("Ignoring thread removal: {err}");
                }
                self.tracker
                    .remove_thread(*thread, time, |thread, step| account(catalog, thread, step))?;
            }
            Event::WaitObjectInfo {
                kind,
                object,
                referenced_object,
                name,
            } => {
                catalog.add_wait_object(*kind, *object, *referenced_object, name)?;
            }
            Event::IoSchedulerAdded { scheduler, name } => {
                catalog.add_io_scheduler(*scheduler, name)?;
            }
            Event::IoRequestScheduled(e) => self.io.request_scheduled(catalog, e),
            Event::IoRequestFinished(e) => self.io.request_finished(e),
            Event::IoOperationStarted(e) => self.io.operation_started(e),
            Event::IoOperationFinished(e) => self.io.operation_finished(e),
            Event::ThreadScheduled(_)
            | Event::ThreadEnqueuedInRunQueue { .. }
            | Event::ThreadRemovedFromRunQueue { .. } => {
                self.tracker
                    .process(event, |thread, step| account(catalog, thread, step))?;
            }
            Event::Unknown { .. } => {}
        }
        Ok(())
    }

    fn capture_snapshot(&mut self, event_offset: usize) -> Result<()> {
        let state = self.tracker.state();
        if self
            .snapshots
            .last()
            .is_some_and(|last| last.last_event_time >= state.last_event_time)
        {
            debug!("Skipping snapshot at event {event_offset}: time has not advanced");
            return Ok(());
        }
        self.snapshots
            .push(CompactSchedulingState::capture(state, event_offset)?)
    }
}

/// Fold one step's time into the thread's statistics and, for waits on a
/// known object, into the wait object statistics.
fn account(catalog: &mut EntityCatalog, thread: ThreadId, step: &Step) -> Result<()> {
    let attribution = &step.attribution;
    let duration = attribution.duration();

    let wait_object = match (attribution.category, attribution.wait_object) {
        (TimeCategory::Wait, Some(key)) => Some(catalog.current_wait_object(key.kind, key.object)?),
        _ => None,
    };

    let Some(t) = catalog.thread_by_id_mut(thread) else {
        return Ok(());
    };
    match attribution.category {
        TimeCategory::Run => t.stats.add_run(duration),
        TimeCategory::Rerun => t.stats.add_rerun(duration),
        TimeCategory::Latency => t.stats.add_latency(duration),
        TimeCategory::Wait => t.stats.add_wait(duration),
        TimeCategory::Unspecified => t.stats.add_unspecified_wait(duration),
    }
    if step.preempted {
        t.stats.add_preemption();
    }

    if let Some(wait_object) = wait_object {
        catalog.add_thread_wait(thread, wait_object, duration)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{TraceWriter, WaitObjectType};

    fn loaded(outcome: LoadOutcome) -> Arc<Model> {
        match outcome {
            LoadOutcome::Loaded(model) => model,
            other => panic!("load did not succeed: {other:?}"),
        }
    }

    fn two_threads() -> TraceWriter {
        let mut writer = TraceWriter::new();
        writer.team_added(1, "app");
        writer.thread_added(1, 10, "main");
        writer.thread_added(1, 11, "worker");
        writer
    }

    #[test]
    fn test_orphan_and_duplicate_threads_are_skipped() {
        let mut writer = two_threads();
        writer.thread_added(7, 12, "orphan");
        writer.thread_added(1, 10, "main again");
        writer.thread_scheduled(10, 12, 10);

        let model = loaded(ModelLoader::default().load(writer.into_bytes()));
        let catalog = model.catalog();
        assert_eq!(catalog.threads().len(), 2);
        assert!(catalog.thread_by_id(12).is_none());
        assert_eq!(catalog.team_by_id(1).unwrap().thread_count(), 2);
    }

    #[test]
    fn test_block_and_wake_accounts_wait_object() {
        let mut writer = two_threads();
        writer.wait_object_info(WaitObjectType::SEMAPHORE, 0x40, 0, "port");
        writer.thread_scheduled(0, 10, -1);
        writer.thread_blocked(100, 11, 10, WaitObjectType::SEMAPHORE, 0x40);
        writer.thread_enqueued(250, 10, 10);
        writer.thread_scheduled(300, 10, 11);

        let model = loaded(ModelLoader::default().load(writer.into_bytes()));
        let catalog = model.catalog();
        let main = catalog.thread_by_id(10).unwrap();
        assert_eq!(main.stats.runs.total, 100);
        assert_eq!(main.stats.wait_count, 1);
        assert_eq!(main.stats.total_wait_time, 150);
        assert_eq!(main.stats.latencies.total, 50);

        let group = main
            .wait_object_group_for(WaitObjectType::SEMAPHORE, 0x40)
            .unwrap();
        let usage = group.most_recent().unwrap();
        assert_eq!(usage.wait_count, 1);
        assert_eq!(usage.total_wait_time, 150);
        assert_eq!(catalog.wait_object(usage.wait_object).name, "port");
    }

    #[test]
    fn test_snapshots_follow_cadence() {
        let mut writer = two_threads();
        for i in 0..40 {
            writer.thread_scheduled(i * 10, 10 + (i as i32 % 2), 10 + ((i as i32 + 1) % 2));
        }
        let loader = ModelLoader::new(AnalyzerConfig {
            snapshot_interval: 8,
            ..Default::default()
        });
        let model = loaded(loader.load(writer.into_bytes()));

        let snapshots = model.snapshots().as_slice();
        assert_eq!(snapshots.len(), 5);
        assert!(snapshots.iter().all(|s| s.event_offset % 8 == 0));
        assert!(snapshots
            .windows(2)
            .all(|w| w[0].last_event_time < w[1].last_event_time));
    }

    #[test]
    fn test_snapshot_skipped_when_time_stalls() {
        let mut writer = two_threads();
        writer.thread_scheduled(5, 10, -1);
        for _ in 0..4 {
            writer.thread_enqueued(5, 11, 0);
        }
        let loader = ModelLoader::new(AnalyzerConfig {
            snapshot_interval: 2,
            ..Default::default()
        });
        let model = loaded(loader.load(writer.into_bytes()));
        assert_eq!(model.snapshots().len(), 1);
    }

    #[test]
    fn test_cancelled_load_is_aborted() {
        let mut writer = two_threads();
        writer.thread_scheduled(5, 10, -1);
        let loader = ModelLoader::default();
        loader.cancel_token().store(true, Ordering::Relaxed);
        assert!(matches!(loader.load(writer.into_bytes()), LoadOutcome::Aborted));
    }

    #[test]
    fn test_malformed_buffer_fails() {
        let outcome = ModelLoader::default().load(vec![0xff; 3]);
        assert!(matches!(
            outcome,
            LoadOutcome::Failed(ModelError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_background_load() {
        let mut writer = two_threads();
        writer.thread_scheduled(5, 10, -1);
        let handle = ModelLoader::default().spawn(writer.into_bytes());
        let model = loaded(handle.wait());
        assert_eq!(model.last_event_time(), 5);
    }
}
