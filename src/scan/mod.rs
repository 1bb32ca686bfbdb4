//! Scan orchestration
//!
//! Window resolution, the event loop, flashback spooling and output sinks.

pub mod processor;
pub mod reverse;
pub mod scratch;
pub mod sink;
pub mod window;

pub use processor::{Binlog2Sql, ScanSummary, FLASHBACK_BATCH};
pub use reverse::ReverseLines;
pub use scratch::ScratchFile;
pub use sink::{StatementSink, WriterSink};
pub use window::{binlog_index, files_in_range, ScanWindow, StopReason};
