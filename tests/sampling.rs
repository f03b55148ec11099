//! Activity sampling over whole traces.

mod common;

use common::{load, random_trace, team_with_threads};
use schedrecon::sampler::sample_threads;
use schedrecon::{ActivitySampler, Metric, SampleWindow, ThreadView};

const METRICS: [Metric; 4] = [Metric::Run, Metric::Wait, Metric::Latency, Metric::Preemption];

#[test]
fn test_thread_running_throughout_samples_full() {
    let (mut writer, _) = team_with_threads(2);
    writer.thread_scheduled(0, 10, -1);
    writer.thread_enqueued(1000, 11, 0);
    let model = load(writer);

    let view = ThreadView::build(&model, 10).unwrap();
    let sampler = ActivitySampler::new(&view);
    let window = SampleWindow::new(100, 900, 8).unwrap();
    assert_eq!(sampler.sample(window, Metric::Run).unwrap(), vec![1.0; 8]);
    assert_eq!(sampler.sample(window, Metric::Wait).unwrap(), vec![0.0; 8]);
    assert_eq!(sampler.totals(100, 900).unwrap().run, 800);
}

#[test]
fn test_sampling_loses_no_time() {
    let model = load(random_trace(11, 5, 800));
    let end = model.last_event_time();

    for sample_count in [1, 7, 64, 333] {
        let window = SampleWindow::new(end / 5, end, sample_count).unwrap();
        for thread in model.catalog().threads() {
            let view = ThreadView::build(&model, thread.id).unwrap();
            let sampler = ActivitySampler::new(&view);
            let totals = sampler.totals(window.start(), window.end()).unwrap();
            assert!(totals.total() <= window.end() - window.start());

            for metric in METRICS {
                let samples = sampler.sample(window, metric).unwrap();
                assert_eq!(samples.len(), sample_count);
                assert!(samples.iter().all(|&s| (0.0..=1.0).contains(&s)));

                let sampled: f64 = samples.iter().sum::<f64>() * window.bucket_length();
                let expected = totals.metric(metric) as f64;
                assert!(
                    (sampled - expected).abs() < 1e-6 * (expected + 1.0),
                    "thread {} {metric:?} with {sample_count} samples: {sampled} != {expected}",
                    thread.id
                );
            }
        }
    }
}

#[test]
fn test_sampled_lifetime_matches_thread_statistics() {
    for seed in 0..4 {
        let model = load(random_trace(seed, 5, 600));
        let end = model.last_event_time();

        for thread in model.catalog().threads() {
            let stop = thread.deletion_time.unwrap_or(end);
            if stop <= thread.creation_time {
                continue;
            }
            let stats = &thread.stats;
            let view = ThreadView::build(&model, thread.id).unwrap();
            let sampler = ActivitySampler::new(&view);

            for sample_count in [1, 9, 100] {
                let window = SampleWindow::new(thread.creation_time, stop, sample_count).unwrap();
                for (metric, expected) in [
                    (Metric::Run, stats.runs.total),
                    (Metric::Latency, stats.latencies.total),
                    (Metric::Preemption, stats.reruns.total),
                    (
                        Metric::Wait,
                        stats.total_wait_time + stats.unspecified_wait_time,
                    ),
                ] {
                    let sampled: f64 = sampler.sample(window, metric).unwrap().iter().sum::<f64>()
                        * window.bucket_length();
                    assert!(
                        (sampled - expected as f64).abs() < 1e-6 * (expected as f64 + 1.0),
                        "seed {seed} thread {} {metric:?} with {sample_count} samples: \
                         {sampled} != {expected}",
                        thread.id
                    );
                }
            }
        }
    }
}

#[test]
fn test_parallel_sampling_matches_sequential() {
    let model = load(random_trace(23, 6, 500));
    let window = SampleWindow::new(0, model.last_event_time(), 50).unwrap();
    let ids: Vec<_> = model.catalog().threads().iter().map(|t| t.id).rev().collect();

    let parallel = sample_threads(&model, &ids, window, Metric::Latency, 4).unwrap();
    assert_eq!(parallel.len(), ids.len());
    for (id, samples) in ids.iter().zip(&parallel) {
        let view = ThreadView::build(&model, *id).unwrap();
        let sequential = ActivitySampler::new(&view)
            .sample(window, Metric::Latency)
            .unwrap();
        assert_eq!(samples, &sequential, "thread {id}");
    }
}
