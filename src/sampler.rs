//! Thread activity resampling for charts.
//!
//! The sampler walks a [`ThreadView`] with the same state machine the
//! loader uses, clipped to a time window, and spreads the time of one
//! category over a fixed number of equal buckets. Each output value is the
//! fraction of its bucket the thread spent in that category.
//!
//! The walk starts from the thread's live state at the window start, as
//! reconstructed by [`Model::scheduling_state_at`]. A thread not yet
//! tracked at that point starts `Unknown` at its creation time. Time after
//! the last event is attributed to the final state, up to the thread's
//! removal or the window end. Over the thread's lifetime the samples
//! therefore add up to the statistics the loader accumulated.

use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use clap::ValueEnum;
use serde::Serialize;
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

use crate::error::{ModelError, Result};
use crate::filter::ThreadView;
use crate::model::{Model, ThreadId};
use crate::sched::state::ThreadSchedulingState;
use crate::sched::transition::{self, Attribution, TimeCategory};

/// The state category a sample measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Run,
    /// Blocked time, including time in an undetermined state.
    Wait,
    Latency,
    Preemption,
}

impl Metric {
    pub fn includes(self, category: TimeCategory) -> bool {
        match self {
            Metric::Run => category == TimeCategory::Run,
            Metric::Wait => matches!(category, TimeCategory::Wait | TimeCategory::Unspecified),
            Metric::Latency => category == TimeCategory::Latency,
            Metric::Preemption => category == TimeCategory::Rerun,
        }
    }
}

/// `[start, end)` split into `sample_count` equal buckets.
///
/// Only [`SampleWindow::new`] builds one, so every window has at least one
/// bucket of positive length:
///
/// ```compile_fail
/// let window = schedrecon::SampleWindow { start: 0, end: 10, sample_count: 0 };
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleWindow {
    start: i64,
    end: i64,
    sample_count: usize,
}

impl SampleWindow {
    pub fn new(start: i64, end: i64, sample_count: usize) -> Result<Self> {
        if sample_count == 0 || end <= start {
            return Err(ModelError::InvalidSampleWindow {
                start,
                end,
                sample_count,
            });
        }
        Ok(Self {
            start,
            end,
            sample_count,
        })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn bucket_length(&self) -> f64 {
        (self.end - self.start) as f64 / self.sample_count as f64
    }

    /// Offset of the `i`th bucket boundary from `start`; boundary 0 is the
    /// window start and boundary `sample_count` its end.
    fn boundary(&self, i: usize) -> f64 {
        (self.end - self.start) as f64 * i as f64 / self.sample_count as f64
    }
}

/// Time attributed to each category within a window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WindowTotals {
    pub run: i64,
    pub wait: i64,
    pub latency: i64,
    pub preemption: i64,
    pub unspecified: i64,
}

impl WindowTotals {
    fn add(&mut self, category: TimeCategory, duration: i64) {
        match category {
            TimeCategory::Run => self.run += duration,
            TimeCategory::Rerun => self.preemption += duration,
            TimeCategory::Latency => self.latency += duration,
            TimeCategory::Wait => self.wait += duration,
            TimeCategory::Unspecified => self.unspecified += duration,
        }
    }

    /// Total time counted by `metric`.
    pub fn metric(&self, metric: Metric) -> i64 {
        match metric {
            Metric::Run => self.run,
            Metric::Wait => self.wait + self.unspecified,
            Metric::Latency => self.latency,
            Metric::Preemption => self.preemption,
        }
    }

    pub fn total(&self) -> i64 {
        self.run + self.wait + self.latency + self.preemption + self.unspecified
    }
}

pub struct ActivitySampler<'v, 'a> {
    view: &'v ThreadView<'a>,
}

impl<'v, 'a> ActivitySampler<'v, 'a> {
    pub fn new(view: &'v ThreadView<'a>) -> Self {
        Self { view }
    }

    /// Walk the view over `[start, end)`, calling `f` with every non-empty
    /// attributed interval, clipped to the window.
    fn walk(&self, start: i64, end: i64, mut f: impl FnMut(Attribution)) -> Result<()> {
        let view = self.view;
        if end <= start {
            return Ok(());
        }
        let thread = view.thread();
        let id = thread.id;
        let stop = thread.deletion_time.map_or(end, |deleted| deleted.min(end));

        let live = view.model().scheduling_state_at(start)?;
        let mut state = live
            .lookup(id)
            .copied()
            .unwrap_or_else(|| ThreadSchedulingState::new(thread.creation_time));
        let position = view
            .position_at_or_before(start)
            .map_or(0, |position| position + 1);

        let mut emit = |attribution: Attribution| {
            let clipped = Attribution {
                start: attribution.start.max(start),
                end: attribution.end.min(end),
                ..attribution
            };
            if clipped.end > clipped.start {
                f(clipped);
            }
        };

        for (time, event) in view.iter_from(position) {
            if time >= stop {
                break;
            }
            if let Some(step) = transition::step(&mut state, id, &event) {
                emit(step.attribution);
            }
        }
        if let Some(attribution) = transition::finish(&state, stop) {
            emit(attribution);
        }
        Ok(())
    }

    /// Every attributed interval within `[start, end)`, in time order.
    pub fn spans(&self, start: i64, end: i64) -> Result<Vec<Attribution>> {
        let mut spans = Vec::new();
        self.walk(start, end, |attribution| spans.push(attribution))?;
        Ok(spans)
    }

    /// Time per category within `[start, end)`.
    pub fn totals(&self, start: i64, end: i64) -> Result<WindowTotals> {
        let mut totals = WindowTotals::default();
        self.walk(start, end, |attribution| {
            totals.add(attribution.category, attribution.duration())
        })?;
        Ok(totals)
    }

    /// Fraction of each bucket of `window` spent in `metric`.
    pub fn sample(&self, window: SampleWindow, metric: Metric) -> Result<Vec<f64>> {
        let count = window.sample_count;
        let mut accumulated = vec![0.0; count];

        self.walk(window.start, window.end, |attribution| {
            if !metric.includes(attribution.category) {
                return;
            }
            let mut from = (attribution.start - window.start) as f64;
            let to = (attribution.end - window.start) as f64;
            let mut bucket = ((from / window.bucket_length()) as usize).min(count - 1);
            while from < to && bucket < count {
                let boundary = window.boundary(bucket + 1);
                if boundary > from {
                    let piece_end = to.min(boundary);
                    accumulated[bucket] += piece_end - from;
                    from = piece_end;
                }
                bucket += 1;
            }
        })?;

        let bucket_length = window.bucket_length();
        Ok(accumulated
            .into_iter()
            .map(|time| (time / bucket_length).min(1.0))
            .collect())
    }
}

/// Sample several threads of one model concurrently on `workers` threads.
/// Results are in the order of `threads`.
pub fn sample_threads(
    model: &Arc<Model>,
    threads: &[ThreadId],
    window: SampleWindow,
    metric: Metric,
    workers: usize,
) -> Result<Vec<Vec<f64>>> {
    let results = Arc::new(Mutex::new(Vec::with_capacity(threads.len())));
    let pool = Pool::<ThunkWorker<()>>::new(workers.max(1));

    for (slot, &thread) in threads.iter().enumerate() {
        let model = Arc::clone(model);
        let results = Arc::clone(&results);
        pool.execute(Thunk::of(move || {
            let samples = ThreadView::build(&model, thread)
                .and_then(|view| ActivitySampler::new(&view).sample(window, metric));
            results
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((slot, samples));
        }));
    }
    pool.join();

    let mut results = mem::take(&mut *results.lock().unwrap_or_else(PoisonError::into_inner));
    results.sort_by_key(|(slot, _)| *slot);
    results.into_iter().map(|(_, samples)| samples).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{LoadOutcome, ModelLoader};
    use crate::trace::TraceWriter;

    fn load(writer: TraceWriter) -> Arc<Model> {
        match ModelLoader::default().load(writer.into_bytes()) {
            LoadOutcome::Loaded(model) => model,
            other => panic!("load failed: {other:?}"),
        }
    }

    /// Thread 10 runs `[0, 400)`, is preempted until 600, runs until 700
    /// and then blocks.
    fn preempted_thread() -> Arc<Model> {
        let mut writer = TraceWriter::new();
        writer.team_added(1, "app");
        writer.thread_added(1, 10, "a");
        writer.thread_added(1, 11, "b");
        writer.thread_scheduled(0, 10, 11);
        writer.thread_enqueued(300, 10, 0);
        writer.thread_scheduled(400, 11, 10);
        writer.thread_scheduled(600, 10, 11);
        writer.thread_blocked(700, 11, 10, crate::trace::WaitObjectType::SNOOZE, 0);
        writer.thread_enqueued(1000, 11, 0);
        load(writer)
    }

    #[test]
    fn test_window_validation() {
        assert!(SampleWindow::new(0, 10, 0).is_err());
        assert_eq!(
            SampleWindow::new(10, 10, 4).unwrap_err(),
            ModelError::InvalidSampleWindow {
                start: 10,
                end: 10,
                sample_count: 4
            }
        );
        assert_eq!(SampleWindow::new(0, 10, 4).unwrap().bucket_length(), 2.5);
    }

    #[test]
    fn test_sample_run_and_preemption() {
        let model = preempted_thread();
        let view = ThreadView::build(&model, 10).unwrap();
        let sampler = ActivitySampler::new(&view);
        let window = SampleWindow::new(0, 1000, 5).unwrap();

        let run = sampler.sample(window, Metric::Run).unwrap();
        assert_eq!(run, vec![1.0, 1.0, 0.0, 0.5, 0.0]);
        let preemption = sampler.sample(window, Metric::Preemption).unwrap();
        assert_eq!(preemption, vec![0.0, 0.0, 1.0, 0.0, 0.0]);
        let wait = sampler.sample(window, Metric::Wait).unwrap();
        assert_eq!(wait, vec![0.0, 0.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_window_starting_mid_trace() {
        let model = preempted_thread();
        let view = ThreadView::build(&model, 10).unwrap();
        let sampler = ActivitySampler::new(&view);

        let totals = sampler.totals(450, 650).unwrap();
        assert_eq!(totals.preemption, 150);
        assert_eq!(totals.run, 50);
        assert_eq!(totals.total(), 200);

        let spans = sampler.spans(450, 650).unwrap();
        assert_eq!(spans.first().map(|s| s.start), Some(450));
        assert_eq!(spans.last().map(|s| s.end), Some(650));
    }

    #[test]
    fn test_samples_add_up_to_totals() {
        let model = preempted_thread();
        let view = ThreadView::build(&model, 10).unwrap();
        let sampler = ActivitySampler::new(&view);
        let window = SampleWindow::new(50, 950, 7).unwrap();
        let totals = sampler.totals(50, 950).unwrap();

        for metric in [Metric::Run, Metric::Wait, Metric::Latency, Metric::Preemption] {
            let sum: f64 = sampler
                .sample(window, metric)
                .unwrap()
                .iter()
                .map(|value| value * window.bucket_length())
                .sum();
            assert!(
                (sum - totals.metric(metric) as f64).abs() < 1e-6,
                "{metric:?}: {sum} != {}",
                totals.metric(metric)
            );
        }
    }

    #[test]
    fn test_time_before_first_event_is_unspecified() {
        let mut writer = TraceWriter::new();
        writer.team_added(1, "app");
        writer.thread_added(1, 10, "a");
        writer.thread_added(1, 11, "b");
        writer.thread_scheduled(0, 10, -1);
        writer.thread_enqueued(100, 10, 0);
        writer.thread_scheduled(150, 11, 10);
        writer.thread_enqueued(500, 11, 0);
        let model = load(writer);

        let view = ThreadView::build(&model, 11).unwrap();
        let sampler = ActivitySampler::new(&view);
        let window = SampleWindow::new(0, 500, 5).unwrap();
        assert_eq!(sampler.sample(window, Metric::Latency).unwrap(), vec![0.0; 5]);
        assert_eq!(
            sampler.sample(window, Metric::Wait).unwrap(),
            vec![1.0, 0.5, 0.0, 0.0, 0.0]
        );

        let totals = sampler.totals(0, 500).unwrap();
        let stats = &model.catalog().thread_by_id(11).unwrap().stats;
        assert_eq!(totals.unspecified, stats.unspecified_wait_time);
        assert_eq!(totals.run, stats.runs.total);
        assert_eq!(totals.latency, 0);
    }

    #[test]
    fn test_window_after_switch_out_uses_tracked_state() {
        let mut writer = TraceWriter::new();
        writer.team_added(1, "app");
        writer.thread_added(1, 10, "a");
        writer.thread_added(1, 11, "b");
        writer.thread_scheduled(0, 10, -1);
        // Switched out while runnable, but never requeued: it waits.
        writer.thread_scheduled(100, 11, 10);
        writer.thread_enqueued(300, 10, 0);
        writer.thread_scheduled(400, 10, 11);
        let model = load(writer);

        let view = ThreadView::build(&model, 10).unwrap();
        let totals = ActivitySampler::new(&view).totals(150, 350).unwrap();
        assert_eq!(totals.wait, 150);
        assert_eq!(totals.preemption, 0);
        assert_eq!(totals.latency, 50);
        assert_eq!(model.catalog().thread_by_id(10).unwrap().stats.total_wait_time, 200);
    }

    #[test]
    fn test_window_accessors() {
        let window = SampleWindow::new(-5, 15, 4).unwrap();
        assert_eq!(window.start(), -5);
        assert_eq!(window.end(), 15);
        assert_eq!(window.sample_count(), 4);
        assert_eq!(window.bucket_length(), 5.0);
    }

    #[test]
    fn test_sample_threads_keeps_request_order() {
        let model = preempted_thread();
        let window = SampleWindow::new(0, 1000, 5).unwrap();
        let results = sample_threads(&model, &[11, 10], window, Metric::Run, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], vec![1.0, 1.0, 0.0, 0.5, 0.0]);
        assert_eq!(results[0], vec![0.0, 0.0, 1.0, 0.5, 1.0]);

        assert!(sample_threads(&model, &[99], window, Metric::Run, 2).is_err());
    }
}
