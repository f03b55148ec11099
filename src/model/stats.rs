//! Per-thread timing accumulators.

use serde::Serialize;

/// Count, total, minimum and maximum of a series of durations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub total: i64,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl DurationStats {
    pub fn add(&mut self, duration: i64) {
        self.count += 1;
        self.total += duration;
        self.min = Some(self.min.map_or(duration, |min| min.min(duration)));
        self.max = Some(self.max.map_or(duration, |max| max.max(duration)));
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total as f64 / self.count as f64)
    }
}

/// Everything the tracker accumulates for one thread.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ThreadStats {
    pub runs: DurationStats,
    /// Time spent preempted before running again.
    pub reruns: DurationStats,
    pub latencies: DurationStats,
    pub wait_count: u64,
    pub total_wait_time: i64,
    /// Time in which the thread's state could not be determined.
    pub unspecified_wait_time: i64,
    pub preemptions: u64,
    pub io_count: u64,
    pub io_time: i64,
}

impl ThreadStats {
    pub fn add_run(&mut self, duration: i64) {
        self.runs.add(duration);
    }

    pub fn add_rerun(&mut self, duration: i64) {
        self.reruns.add(duration);
    }

    pub fn add_latency(&mut self, duration: i64) {
        self.latencies.add(duration);
    }

    pub fn add_wait(&mut self, duration: i64) {
        self.wait_count += 1;
        self.total_wait_time += duration;
    }

    pub fn add_unspecified_wait(&mut self, duration: i64) {
        self.unspecified_wait_time += duration;
    }

    pub fn add_preemption(&mut self) {
        self.preemptions += 1;
    }

    pub fn add_io(&mut self, duration: i64) {
        self.io_count += 1;
        self.io_time += duration;
    }

    /// Sum of all scheduling-state time attributed to the thread.
    pub fn accounted_time(&self) -> i64 {
        self.runs.total
            + self.reruns.total
            + self.latencies.total
            + self.total_wait_time
            + self.unspecified_wait_time
    }
}
