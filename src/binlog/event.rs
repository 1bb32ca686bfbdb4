//! Binlog Event Types
//!
//! Decoded replication events as handed over by a [`ReplicationStream`],
//! plus the classification of row-mutation events.
//!
//! [`ReplicationStream`]: crate::source::ReplicationStream

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use super::value::RowImage;
use crate::config::far_past;
use crate::error::{Error, Result};

/// Common header of every event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Unix timestamp the event was written at
    pub timestamp: u32,
    /// Offset just past this event in its binlog file
    pub log_pos: u64,
}

/// A decoded binlog event
#[derive(Debug, Clone)]
pub struct BinlogEvent {
    pub header: EventHeader,
    pub body: EventBody,
}

/// Binlog event types we care about
#[derive(Debug, Clone)]
pub enum EventBody {
    /// Query event - transaction markers and DDL
    Query(QueryEvent),
    /// Table map event - announces the table of the next rows event
    TableMap { schema: String, table: String },
    /// Write rows (INSERT)
    WriteRows(RowsEvent<RowImage>),
    /// Update rows (UPDATE)
    UpdateRows(RowsEvent<UpdateRow>),
    /// Delete rows (DELETE)
    DeleteRows(RowsEvent<RowImage>),
    /// Rotate event - binlog file changed
    Rotate { next_file: String, position: u64 },
    /// Format description event - first event of every file
    FormatDescription,
    /// XID event - transaction commit
    Xid,
    /// Unknown/unhandled event
    Other { type_code: u8 },
}

/// Statement-based event: transaction markers and schema changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    /// Default schema the statement ran in (may be empty)
    pub schema: String,
    /// Raw statement text
    pub query: String,
}

impl QueryEvent {
    pub fn new(schema: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            query: query.into(),
        }
    }

    pub fn is_begin(&self) -> bool {
        self.query.trim() == "BEGIN"
    }

    pub fn is_commit(&self) -> bool {
        self.query.trim() == "COMMIT"
    }

    /// `BEGIN`/`COMMIT` markers carry no SQL worth reproducing
    pub fn is_bookkeeping(&self) -> bool {
        self.is_begin() || self.is_commit()
    }
}

/// Rows of one table changed by a single row event
#[derive(Debug, Clone, PartialEq)]
pub struct RowsEvent<R> {
    pub schema: String,
    pub table: String,
    /// Primary key columns of the table, if known
    pub primary_key: Vec<String>,
    pub rows: Vec<R>,
}

impl<R> RowsEvent<R> {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, rows: Vec<R>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            primary_key: Vec::new(),
            rows,
        }
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Before and after image of one updated row
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRow {
    pub before: RowImage,
    pub after: RowImage,
}

/// SQL verb of a row-mutation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlVerb {
    #[serde(rename = "INSERT", alias = "insert")]
    Insert,
    #[serde(rename = "UPDATE", alias = "update")]
    Update,
    #[serde(rename = "DELETE", alias = "delete")]
    Delete,
}

impl SqlVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlVerb::Insert => "INSERT",
            SqlVerb::Update => "UPDATE",
            SqlVerb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SqlVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SqlVerb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(SqlVerb::Insert),
            "UPDATE" => Ok(SqlVerb::Update),
            "DELETE" => Ok(SqlVerb::Delete),
            other => Err(Error::config(format!("unknown sql type: {}", other))),
        }
    }
}

/// One unit of work for the statement synthesizer
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    InsertRow {
        event: &'a RowsEvent<RowImage>,
        row: &'a RowImage,
    },
    UpdateRow {
        event: &'a RowsEvent<UpdateRow>,
        row: &'a UpdateRow,
    },
    DeleteRow {
        event: &'a RowsEvent<RowImage>,
        row: &'a RowImage,
    },
    SchemaChange(&'a QueryEvent),
}

impl EventBody {
    /// True exactly for the three row-mutation events
    pub fn is_dml(&self) -> bool {
        self.sql_verb().is_some()
    }

    /// SQL verb of a row-mutation event
    pub fn sql_verb(&self) -> Option<SqlVerb> {
        match self {
            EventBody::WriteRows(_) => Some(SqlVerb::Insert),
            EventBody::UpdateRows(_) => Some(SqlVerb::Update),
            EventBody::DeleteRows(_) => Some(SqlVerb::Delete),
            _ => None,
        }
    }

    /// Whether this event's position counts as "last seen" bookkeeping.
    ///
    /// Rotate and format description events describe the file, not a
    /// transaction, so a following `BEGIN` must not start at them.
    pub fn advances_position(&self) -> bool {
        !matches!(
            self,
            EventBody::Rotate { .. } | EventBody::FormatDescription
        )
    }

    /// Split the event into synthesizer inputs, one per row
    pub fn changes(&self) -> Result<Vec<Change<'_>>> {
        match self {
            EventBody::WriteRows(event) => Ok(event
                .rows
                .iter()
                .map(|row| Change::InsertRow { event, row })
                .collect()),
            EventBody::UpdateRows(event) => Ok(event
                .rows
                .iter()
                .map(|row| Change::UpdateRow { event, row })
                .collect()),
            EventBody::DeleteRows(event) => Ok(event
                .rows
                .iter()
                .map(|row| Change::DeleteRow { event, row })
                .collect()),
            EventBody::Query(query) => Ok(vec![Change::SchemaChange(query)]),
            other => Err(Error::UnsupportedEvent(other.name().to_string())),
        }
    }

    /// Event type name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            EventBody::Query(_) => "QueryEvent",
            EventBody::TableMap { .. } => "TableMapEvent",
            EventBody::WriteRows(_) => "WriteRowsEvent",
            EventBody::UpdateRows(_) => "UpdateRowsEvent",
            EventBody::DeleteRows(_) => "DeleteRowsEvent",
            EventBody::Rotate { .. } => "RotateEvent",
            EventBody::FormatDescription => "FormatDescriptionEvent",
            EventBody::Xid => "XidEvent",
            EventBody::Other { .. } => "UnknownEvent",
        }
    }
}

impl BinlogEvent {
    pub fn new(timestamp: u32, log_pos: u64, body: EventBody) -> Self {
        Self {
            header: EventHeader { timestamp, log_pos },
            body,
        }
    }

    /// Event time in the local time zone
    pub fn local_time(&self) -> NaiveDateTime {
        local_time(self.header.timestamp)
    }
}

/// Check if an event is a row mutation
pub fn is_dml(event: &BinlogEvent) -> bool {
    event.body.is_dml()
}

/// SQL verb of a row-mutation event, `None` for anything else
pub fn event_type(event: &BinlogEvent) -> Option<SqlVerb> {
    event.body.sql_verb()
}

/// Convert a binlog timestamp to local wall-clock time
pub fn local_time(timestamp: u32) -> NaiveDateTime {
    Local
        .timestamp_opt(i64::from(timestamp), 0)
        .single()
        .map(|t| t.naive_local())
        .unwrap_or_else(far_past)
}
