//! Serializable summaries of a loaded model.
//!
//! These are the shapes the command line prints, as tables or as JSON.

use regex::Regex;
use serde::Serialize;

use crate::error::{try_reserve, ModelError, Result};
use crate::filter::{group_wait_objects, WaitObjectUsage};
use crate::model::catalog::Thread;
use crate::model::stats::ThreadStats;
use crate::model::{Model, TeamId, ThreadId};

/// Parameters for [`thread_stats`].
pub struct StatsParams {
    /// Only threads whose name matches are reported.
    pub thread_filter: Option<Regex>,
    /// Maximum number of threads, ordered by run time.
    pub top_n: usize,
}

impl Default for StatsParams {
    fn default() -> Self {
        Self {
            thread_filter: None,
            top_n: 20,
        }
    }
}

/// Trace-wide counts.
#[derive(Debug, Serialize)]
pub struct TraceSummary {
    pub base_time: i64,
    pub last_event_time: i64,
    pub event_count: usize,
    pub team_count: usize,
    pub thread_count: usize,
    pub wait_object_count: usize,
    pub snapshot_count: usize,
}

impl TraceSummary {
    pub fn new(model: &Model) -> Self {
        let catalog = model.catalog();
        Self {
            base_time: model.base_time(),
            last_event_time: model.last_event_time(),
            event_count: model.log().count(),
            team_count: catalog.teams().len(),
            thread_count: catalog.threads().len(),
            wait_object_count: catalog.wait_object_count(),
            snapshot_count: model.snapshots().len(),
        }
    }
}

/// One thread's identity and accumulated statistics.
#[derive(Debug, Serialize)]
pub struct ThreadReport {
    pub id: ThreadId,
    pub name: String,
    pub team: TeamId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    pub creation_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_time: Option<i64>,
    #[serde(flatten)]
    pub stats: ThreadStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_run: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_latency: Option<f64>,
}

impl ThreadReport {
    pub fn new(model: &Model, thread: &Thread) -> Self {
        Self {
            id: thread.id,
            name: thread.name.clone(),
            team: thread.team,
            team_name: model
                .catalog()
                .team_by_id(thread.team)
                .map(|team| team.name.clone()),
            creation_time: thread.creation_time,
            deletion_time: thread.deletion_time,
            stats: thread.stats.clone(),
            average_run: thread.stats.runs.average(),
            average_latency: thread.stats.latencies.average(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub summary: TraceSummary,
    pub threads: Vec<ThreadReport>,
}

/// Per-thread statistics, busiest threads first.
pub fn thread_stats(model: &Model, params: &StatsParams) -> Result<StatsReport> {
    let mut threads = Vec::new();
    for thread in model.catalog().threads() {
        if let Some(filter) = &params.thread_filter {
            if !filter.is_match(&thread.name) {
                continue;
            }
        }
        try_reserve(&mut threads, 1, "building the thread report")?;
        threads.push(ThreadReport::new(model, thread));
    }

    threads.sort_by(|a, b| {
        b.stats
            .runs
            .total
            .cmp(&a.stats.runs.total)
            .then(a.id.cmp(&b.id))
    });
    threads.truncate(params.top_n);

    Ok(StatsReport {
        summary: TraceSummary::new(model),
        threads,
    })
}

#[derive(Debug, Serialize)]
pub struct WaitObjectsReport {
    pub thread: ThreadId,
    pub name: String,
    pub total_wait_time: i64,
    pub wait_objects: Vec<WaitObjectUsage>,
}

/// What `thread` waited on, grouped by object type and name.
pub fn wait_objects(model: &Model, thread: ThreadId) -> Result<WaitObjectsReport> {
    let catalog = model.catalog();
    let thread = catalog
        .thread_by_id(thread)
        .ok_or(ModelError::UnknownThread(thread))?;
    Ok(WaitObjectsReport {
        thread: thread.id,
        name: thread.name.clone(),
        total_wait_time: thread.stats.total_wait_time,
        wait_objects: group_wait_objects(catalog, thread)?,
    })
}
