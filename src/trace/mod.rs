//! Trace buffer format, decoding and random access.
//!
//! # Module Organization
//!
//! - [`record`]: header word and fixed payload structs
//! - [`event`]: the decoded [`Event`] union
//! - [`log`]: [`TraceEventLog`], indexed access to a whole buffer
//! - [`writer`]: [`TraceWriter`], the matching encoder

pub mod event;
pub mod log;
pub mod record;
pub mod writer;

pub use event::{Event, KernelThreadState, ThreadScheduled, WaitObjectType};
pub use log::TraceEventLog;
pub use writer::TraceWriter;
