//! schedrecon - reconstructs per-thread scheduling history from kernel
//! scheduling traces.
//!
//! A trace is a buffer of packed scheduling, lifecycle, wait object and
//! I/O records. Loading it runs one forward scan that builds the entity
//! catalog, accumulates per-thread statistics and captures periodic
//! snapshots of every thread's scheduling state. The resulting [`Model`] is
//! immutable and can be shared between threads for the queries built on
//! top of it.
//!
//! # Modules
//!
//! - [`trace`] - record format, event decoding and the indexed event log
//! - [`model`] - entity catalog, per-thread statistics and I/O requests
//! - [`sched`] - the thread scheduling state machine and its snapshots
//! - [`loader`] - the forward scan, on the calling thread or in the background
//! - [`filter`] - per-thread event views and wait object grouping
//! - [`sampler`] - bucketed activity charts for one thread or many
//! - [`timeline`] - state changes of every thread over a time range
//! - [`report`] - serializable summaries
//!
//! # Example
//!
//! ```no_run
//! use schedrecon::{LoadOutcome, ModelLoader};
//!
//! let data = std::fs::read("boot.trace").unwrap();
//! if let LoadOutcome::Loaded(model) = ModelLoader::default().load(data) {
//!     for thread in model.catalog().threads() {
//!         println!("{} ran for {}", thread.name, thread.stats.runs.total);
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod loader;
pub mod model;
pub mod report;
pub mod sampler;
pub mod sched;
pub mod timeline;
pub mod trace;

pub use config::AnalyzerConfig;
pub use error::{ModelError, Result};
pub use filter::ThreadView;
pub use loader::{LoadHandle, LoadOutcome, ModelLoader};
pub use model::{Model, TeamId, ThreadId};
pub use sampler::{ActivitySampler, Metric, SampleWindow};
pub use timeline::SchedulingTimeline;
pub use trace::{TraceEventLog, TraceWriter};
