//! binlog2sql - MySQL Binary Log to SQL
//!
//! Reads a range of a MySQL server's binary log over the replication
//! protocol and rebuilds executable SQL from its row events: either the
//! statements that were applied, or the flashback statements that undo them
//! in reverse order.
//!
//! # Architecture
//!
//! A scan resolves a [`scan::ScanWindow`] against the live server, streams
//! events through the [`scan::Binlog2Sql`] processor and hands every row
//! change to the [`sql::Synthesizer`]. Flashback output is spooled to a
//! scratch file and read back from its end, so rollback sets of any size run
//! in bounded memory.
//!
//! # Features
//!
//! - Position, file and time windows over the binary log
//! - Schema and table allow-lists, DML-only mode, per-verb filtering
//! - Primary-key-aware INSERT rendering (`no_pk`)
//! - Flashback with paced output
//! - Text or JSON line output with binlog provenance

pub mod binlog;
pub mod config;
pub mod error;
pub mod scan;
pub mod source;
pub mod sql;

pub use config::Binlog2SqlConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::binlog::{BinlogEvent, EventBody, RowImage, SqlVerb, Value};
    pub use crate::config::{Binlog2SqlConfig, OutputFormat, ScanOptions};
    pub use crate::error::{Error, Result};
    pub use crate::scan::{Binlog2Sql, ScanSummary, ScanWindow, StatementSink, StopReason, WriterSink};
    pub use crate::source::{BinlogPosition, MySqlSource, ReplicationStream, SourceConnection};
    pub use crate::sql::{Statement, Synthesizer};
}
