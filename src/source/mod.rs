//! Source Server Seams
//!
//! The scan talks to the source through two traits: [`SourceConnection`] for
//! the read-only metadata queries and literal escaping, and
//! [`ReplicationStream`] for the decoded event sequence. The MySQL
//! implementation lives in [`mysql`].

pub mod mysql;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::binlog::BinlogEvent;
use crate::error::Result;
use crate::sql::Escape;

pub use mysql::MySqlSource;

/// A (file, offset) coordinate in the binary log
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinlogPosition {
    pub file: String,
    pub pos: u64,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, pos: u64) -> Self {
        Self {
            file: file.into(),
            pos,
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.pos)
    }
}

/// Parameters for opening a replication stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Server id of the source, reused for the dump request
    pub server_id: u32,
    /// Where to start reading
    pub start: BinlogPosition,
    /// Only deliver row events of these schemas (empty = all)
    pub only_schemas: Vec<String>,
    /// Only deliver row events of these tables (empty = all)
    pub only_tables: Vec<String>,
    /// Wait for new events at the end of the log instead of ending the stream
    pub blocking: bool,
}

impl StreamRequest {
    /// Whether row events of `schema`.`table` pass the allow-lists
    pub fn wants_table(&self, schema: &str, table: &str) -> bool {
        (self.only_schemas.is_empty() || self.only_schemas.iter().any(|s| s == schema))
            && (self.only_tables.is_empty() || self.only_tables.iter().any(|t| t == table))
    }
}

/// Read-only connection to the source server
#[async_trait::async_trait]
pub trait SourceConnection: Escape + Send + Sync {
    /// Current write position (`SHOW MASTER STATUS`)
    async fn master_status(&self) -> Result<BinlogPosition>;

    /// Retained binlog file names (`SHOW MASTER LOGS`)
    async fn master_logs(&self) -> Result<Vec<String>>;

    /// `@@server_id`, `None` when the server reports none
    async fn server_id(&self) -> Result<Option<u32>>;

    /// `host.port`, used to name scratch files
    fn endpoint(&self) -> String;

    /// Open a replication stream
    async fn open_stream(&self, request: StreamRequest) -> Result<Box<dyn ReplicationStream>>;
}

/// Decoded binlog events, in log order
#[async_trait::async_trait]
pub trait ReplicationStream: Send {
    /// Next event, `None` once the stream ends
    async fn next_event(&mut self) -> Result<Option<BinlogEvent>>;

    /// File of the last event and the offset just past it
    fn position(&self) -> &BinlogPosition;

    /// Release the stream; further reads return `None`
    async fn close(&mut self) -> Result<()>;
}
