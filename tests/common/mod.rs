//! Common test utilities for schedrecon integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use schedrecon::trace::WaitObjectType;
use schedrecon::{AnalyzerConfig, LoadOutcome, Model, ModelLoader, ThreadId, TraceWriter};

pub const TEAM: i32 = 1;

/// Load `writer`'s records with the default configuration.
pub fn load(writer: TraceWriter) -> Arc<Model> {
    load_with(writer, AnalyzerConfig::default())
}

pub fn load_with(writer: TraceWriter, config: AnalyzerConfig) -> Arc<Model> {
    match ModelLoader::new(config).load(writer.into_bytes()) {
        LoadOutcome::Loaded(model) => model,
        other => panic!("load failed: {other:?}"),
    }
}

pub fn with_snapshot_interval(snapshot_interval: usize) -> AnalyzerConfig {
    AnalyzerConfig {
        snapshot_interval,
        ..AnalyzerConfig::default()
    }
}

/// A trace with one team and `threads` threads numbered from 10.
pub fn team_with_threads(threads: usize) -> (TraceWriter, Vec<ThreadId>) {
    let mut writer = TraceWriter::new();
    writer.team_added(TEAM, "app");
    let ids: Vec<ThreadId> = (0..threads).map(|i| 10 + i as ThreadId).collect();
    for &id in &ids {
        writer.thread_added(TEAM, id, &format!("thread-{id}"));
    }
    (writer, ids)
}

/// A random but well-formed trace: threads are switched in and out, block
/// on a few wait objects, get enqueued and dequeued. A thread is added
/// halfway through and one is removed near the end.
pub fn random_trace(seed: u64, threads: usize, events: usize) -> TraceWriter {
    let mut rng = StdRng::seed_from_u64(seed);
    let (mut writer, mut ids) = team_with_threads(threads);
    for object in 1..=3u64 {
        writer.wait_object_info(
            WaitObjectType::SEMAPHORE,
            object * 0x100,
            0,
            &format!("sem-{object}"),
        );
    }

    let late_thread = 10 + threads as ThreadId;
    let mut time = 0i64;
    for i in 0..events {
        time += rng.random_range(0..50);

        if i == events / 2 {
            writer.thread_added(TEAM, late_thread, "late");
            ids.push(late_thread);
        }
        if i == events * 9 / 10 && ids.len() > 1 {
            let removed = ids.remove(0);
            writer.thread_removed(TEAM, removed);
        }

        let thread = ids[rng.random_range(0..ids.len())];
        let other = ids[rng.random_range(0..ids.len())];
        match rng.random_range(0..4) {
            0 => writer.thread_scheduled(time, thread, other),
            1 => writer.thread_blocked(
                time,
                thread,
                other,
                WaitObjectType::SEMAPHORE,
                rng.random_range(1..=3u64) * 0x100,
            ),
            2 => writer.thread_enqueued(time, thread, rng.random_range(0..20)),
            _ => writer.thread_dequeued(time, thread),
        }
    }
    writer
}
