//! Binlog Module
//!
//! Decoded replication events, typed row values, and the MySQL replication
//! client that produces them.

pub mod client;
pub mod columns;
pub mod event;
pub mod value;

pub use client::BinlogClient;
pub use columns::{ColumnCache, ColumnMeta, TableColumns};
pub use event::{
    event_type, is_dml, BinlogEvent, Change, EventBody, EventHeader, QueryEvent, RowsEvent,
    SqlVerb, UpdateRow,
};
pub use value::{RowImage, Value};
