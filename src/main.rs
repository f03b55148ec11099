//! schedrecon: inspect the scheduling history in a kernel scheduling trace.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use regex::Regex;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::filter::EnvFilter;

use schedrecon::report::{self, StatsParams};
use schedrecon::sampler::WindowTotals;
use schedrecon::{
    ActivitySampler, AnalyzerConfig, LoadOutcome, Metric, Model, ModelLoader, SampleWindow,
    SchedulingTimeline, ThreadId, ThreadView,
};

#[derive(Parser)]
#[command(name = "schedrecon")]
#[command(about = "Reconstruct per-thread scheduling history from a scheduling trace")]
#[command(version)]
struct Cli {
    /// Logging filter, in tracing-subscriber EnvFilter syntax. RUST_LOG
    /// takes precedence when set. Examples: "info", "warn,schedrecon=debug"
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// JSON file with loader settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-thread scheduling statistics
    Stats {
        /// Path to the trace file
        trace: PathBuf,

        /// Only report threads whose name matches this regex
        #[arg(long)]
        thread_filter: Option<String>,

        /// Number of threads to report, busiest first
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
    /// Fraction of each time bucket a thread spent in one state category
    Sample {
        /// Path to the trace file
        trace: PathBuf,

        #[arg(long)]
        thread: ThreadId,

        #[arg(long)]
        start: i64,

        #[arg(long)]
        end: i64,

        /// Number of buckets
        #[arg(long, default_value_t = 100)]
        samples: usize,

        #[arg(long, value_enum, default_value_t = Metric::Run)]
        metric: Metric,
    },
    /// What a thread waited on, grouped by object type and name
    WaitObjects {
        /// Path to the trace file
        trace: PathBuf,

        #[arg(long)]
        thread: ThreadId,
    },
    /// State changes of every thread within a time range
    Timeline {
        /// Path to the trace file
        trace: PathBuf,

        #[arg(long)]
        start: i64,

        #[arg(long)]
        end: i64,

        /// Only show this thread
        #[arg(long)]
        thread: Option<ThreadId>,
    },
}

impl Commands {
    fn trace(&self) -> &Path {
        match self {
            Commands::Stats { trace, .. }
            | Commands::Sample { trace, .. }
            | Commands::WaitObjects { trace, .. }
            | Commands::Timeline { trace, .. } => trace,
        }
    }
}

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| match EnvFilter::try_new(log_level) {
            Ok(filter) => Ok(filter),
            Err(e) => {
                eprintln!("invalid log level: {log_level}, using warn, err is: {e}");
                EnvFilter::try_new("warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to init logger: {e}");
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalyzerConfig> {
    let Some(path) = path else {
        return Ok(AnalyzerConfig::default());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    AnalyzerConfig::from_json(&json)
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Load the trace in the background, aborting on Ctrl-C.
fn load_model(trace: &Path, config: AnalyzerConfig) -> Result<Arc<Model>> {
    let data =
        fs::read(trace).with_context(|| format!("Failed to read trace {}", trace.display()))?;

    let (tx, rx) = channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(());
    }) {
        warn!("Error setting Ctrl-C handler: {e}");
    }

    let mut handle = ModelLoader::new(config).spawn(data);
    let outcome = loop {
        if let Some(outcome) = handle.try_outcome() {
            break outcome;
        }
        if rx.recv_timeout(Duration::from_millis(50)).is_ok() {
            handle.abort();
        }
    };

    match outcome {
        LoadOutcome::Loaded(model) => Ok(model),
        LoadOutcome::Aborted => bail!("aborted"),
        LoadOutcome::Failed(e) => {
            Err(e).with_context(|| format!("Failed to load trace {}", trace.display()))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

const MAX_COLUMN_WIDTH: usize = 40;

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        println!("(no results)");
        return;
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.chars().count());
        }
    }
    for width in &mut widths {
        *width = (*width).min(MAX_COLUMN_WIDTH);
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, width)| format!("{h:width$}"))
        .collect();
    println!("{}", header_line.join(" | "));

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", sep.join("-+-"));

    for row in rows {
        let row_line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(value, &width)| {
                let truncated = if value.chars().count() > width && width > 3 {
                    let kept: String = value.chars().take(width - 3).collect();
                    format!("{kept}...")
                } else {
                    value.clone()
                };
                format!("{truncated:width$}")
            })
            .collect();
        println!("{}", row_line.join(" | "));
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn run_stats(
    model: &Model,
    thread_filter: Option<String>,
    top: usize,
    format: OutputFormat,
) -> Result<()> {
    let thread_filter = thread_filter
        .map(|pattern| Regex::new(&pattern))
        .transpose()
        .context("Invalid --thread-filter")?;
    let params = StatsParams {
        thread_filter,
        top_n: top,
    };
    let stats = report::thread_stats(model, &params)?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    let summary = &stats.summary;
    println!(
        "{} events, {} teams, {} threads, {} wait objects, trace ends at {}",
        summary.event_count,
        summary.team_count,
        summary.thread_count,
        summary.wait_object_count,
        summary.last_event_time
    );
    println!();

    let rows: Vec<Vec<String>> = stats
        .threads
        .iter()
        .map(|t| {
            vec![
                t.id.to_string(),
                t.name.clone(),
                optional(t.team_name.as_deref()),
                t.stats.runs.total.to_string(),
                t.stats.runs.count.to_string(),
                t.stats.latencies.total.to_string(),
                t.stats.reruns.total.to_string(),
                t.stats.preemptions.to_string(),
                t.stats.total_wait_time.to_string(),
                t.stats.wait_count.to_string(),
                t.stats.unspecified_wait_time.to_string(),
                t.stats.io_count.to_string(),
                t.stats.io_time.to_string(),
            ]
        })
        .collect();
    print_table(
        &[
            "tid",
            "name",
            "team",
            "run",
            "runs",
            "latency",
            "rerun",
            "preempts",
            "wait",
            "waits",
            "unspecified",
            "io",
            "io time",
        ],
        &rows,
    );
    Ok(())
}

#[derive(Serialize)]
struct SampleOutput {
    thread: ThreadId,
    start: i64,
    end: i64,
    metric: Metric,
    bucket_length: f64,
    totals: WindowTotals,
    samples: Vec<f64>,
}

fn run_sample(
    model: &Model,
    thread: ThreadId,
    window: SampleWindow,
    metric: Metric,
    format: OutputFormat,
) -> Result<()> {
    let view = ThreadView::build(model, thread)?;
    let sampler = ActivitySampler::new(&view);
    let output = SampleOutput {
        thread,
        start: window.start(),
        end: window.end(),
        metric,
        bucket_length: window.bucket_length(),
        totals: sampler.totals(window.start(), window.end())?,
        samples: sampler.sample(window, metric)?,
    };

    if format == OutputFormat::Json {
        return print_json(&output);
    }

    let rows: Vec<Vec<String>> = output
        .samples
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let bucket_start = window.start() as f64 + output.bucket_length * i as f64;
            vec![
                i.to_string(),
                format!("{bucket_start:.0}"),
                format!("{value:.3}"),
            ]
        })
        .collect();
    print_table(&["bucket", "start", "fraction"], &rows);
    Ok(())
}

fn run_wait_objects(model: &Model, thread: ThreadId, format: OutputFormat) -> Result<()> {
    let usage = report::wait_objects(model, thread)?;

    if format == OutputFormat::Json {
        return print_json(&usage);
    }

    let rows: Vec<Vec<String>> = usage
        .wait_objects
        .iter()
        .map(|w| {
            vec![
                w.type_name.to_string(),
                w.name.clone(),
                w.wait_count.to_string(),
                w.total_wait_time.to_string(),
            ]
        })
        .collect();
    print_table(&["type", "name", "waits", "wait time"], &rows);
    Ok(())
}

fn run_timeline(
    model: &Model,
    start: i64,
    end: i64,
    thread: Option<ThreadId>,
    format: OutputFormat,
) -> Result<()> {
    let timeline = SchedulingTimeline::build(model, start, end)?;

    if format == OutputFormat::Json {
        return match thread {
            Some(id) => print_json(&timeline.thread(id)),
            None => print_json(&timeline),
        };
    }

    let mut rows = Vec::new();
    for (id, lane) in timeline.threads() {
        if thread.is_some_and(|wanted| wanted != id) {
            continue;
        }
        for change in &lane.changes {
            let wait_object = change
                .wait_object
                .map(|key| format!("{} {:#x}", key.kind.name(), key.object));
            rows.push(vec![
                id.to_string(),
                change.time.to_string(),
                change.state.to_string(),
                optional(wait_object),
            ]);
        }
    }
    print_table(&["tid", "time", "state", "wait object"], &rows);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(cli.config.as_deref())?;
    let model = load_model(cli.command.trace(), config)?;
    let format = cli.format;

    match cli.command {
        Commands::Stats {
            thread_filter, top, ..
        } => run_stats(&model, thread_filter, top, format),
        Commands::Sample {
            thread,
            start,
            end,
            samples,
            metric,
            ..
        } => {
            let window = SampleWindow::new(start, end, samples)?;
            run_sample(&model, thread, window, metric, format)
        }
        Commands::WaitObjects { thread, .. } => run_wait_objects(&model, thread, format),
        Commands::Timeline {
            start, end, thread, ..
        } => run_timeline(&model, start, end, thread, format),
    }
}
