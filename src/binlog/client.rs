//! Binlog Client
//!
//! Connects to MySQL as a replica and streams decoded binlog events.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use mysql_async::binlog::EventFlags;
use mysql_async::{BinlogStream, Conn, Opts};
use mysql_common::binlog::consts::EventType;
use mysql_common::binlog::events::{Event, EventData, RowsEventData};
use mysql_common::binlog::value::BinlogValue;
use sqlx::MySqlPool;

use super::columns::{ColumnCache, TableColumns};
use super::event::{BinlogEvent, EventBody, QueryEvent, RowsEvent, UpdateRow};
use super::value::RowImage;
use crate::error::{Error, Result};
use crate::source::{BinlogPosition, ReplicationStream, StreamRequest};

macro_rules! rows_event_apply {
    ($data:expr, event.$($op:tt)*) => {{
        match $data {
            RowsEventData::WriteRowsEvent(event) => Some(event.$($op)*),
            RowsEventData::UpdateRowsEvent(event) => Some(event.$($op)*),
            RowsEventData::DeleteRowsEvent(event) => Some(event.$($op)*),
            RowsEventData::WriteRowsEventV1(event) => Some(event.$($op)*),
            RowsEventData::UpdateRowsEventV1(event) => Some(event.$($op)*),
            RowsEventData::DeleteRowsEventV1(event) => Some(event.$($op)*),
            _ => None,
        }
    }};
}

/// Row events decoded into full before/after images
const ROWS_EVENTS: [EventType; 6] = [
    EventType::WRITE_ROWS_EVENT,
    EventType::UPDATE_ROWS_EVENT,
    EventType::DELETE_ROWS_EVENT,
    EventType::WRITE_ROWS_EVENT_V1,
    EventType::UPDATE_ROWS_EVENT_V1,
    EventType::DELETE_ROWS_EVENT_V1,
];

/// Whether `event_type` carries row images.
///
/// Partial JSON updates only carry a diff of the changed document, from
/// which neither the forward nor the undo statement can be rebuilt.
fn is_rows_event(event_type: EventType) -> Result<bool> {
    if event_type == EventType::PARTIAL_UPDATE_ROWS_EVENT {
        return Err(Error::UnsupportedEvent(
            "PartialUpdateRowsEvent (set binlog_row_value_options='' on the source)".into(),
        ));
    }
    Ok(ROWS_EVENTS.contains(&event_type))
}

/// Binlog replication client
pub struct BinlogClient {
    stream: Option<BinlogStream>,
    request: StreamRequest,
    columns: ColumnCache,
    /// Metadata of mapped tables that pass the allow-lists, by table id
    tables: HashMap<u64, Arc<TableColumns>>,
    position: BinlogPosition,
}

impl BinlogClient {
    /// Register as a replica and request a binlog dump
    pub async fn connect(opts: Opts, pool: MySqlPool, request: StreamRequest) -> Result<Self> {
        tracing::info!(
            "Starting binlog dump from {} as server_id {} ({})",
            request.start,
            request.server_id,
            if request.blocking { "blocking" } else { "non-blocking" }
        );

        let mut dump = mysql_async::BinlogStreamRequest::new(request.server_id)
            .with_filename(request.start.file.as_bytes())
            .with_pos(request.start.pos);
        if !request.blocking {
            dump = dump.with_non_blocking();
        }

        let stream = Conn::new(opts).await?.get_binlog_stream(dump).await?;

        Ok(Self {
            stream: Some(stream),
            position: request.start.clone(),
            request,
            columns: ColumnCache::new(pool),
            tables: HashMap::new(),
        })
    }

    async fn map_table(&mut self, event: &Event) -> Result<EventBody> {
        let (table_id, schema, table) = match event.read_data()? {
            Some(EventData::TableMapEvent(tme)) => (
                tme.table_id(),
                String::from_utf8_lossy(tme.database_name_raw()).into_owned(),
                String::from_utf8_lossy(tme.table_name_raw()).into_owned(),
            ),
            _ => return Err(Error::BinlogDecode("malformed table map event".into())),
        };

        if self.request.wants_table(&schema, &table) {
            let columns = self.columns.get(&schema, &table).await?;
            self.tables.insert(table_id, columns);
        } else {
            self.tables.remove(&table_id);
        }

        Ok(EventBody::TableMap { schema, table })
    }

    /// Decode a rows event; `None` when its table is filtered out
    fn decode_rows(&self, event: &Event) -> Result<Option<EventBody>> {
        let data = match event.read_data()? {
            Some(EventData::RowsEvent(data)) => data,
            _ => return Err(Error::BinlogDecode("malformed rows event".into())),
        };

        let table_id = rows_event_apply!(&data, event.table_id())
            .ok_or_else(|| Error::UnsupportedEvent("partial update rows event".into()))?;
        let Some(columns) = self.tables.get(&table_id).cloned() else {
            tracing::trace!("Skipping rows event for filtered table id {}", table_id);
            return Ok(None);
        };
        let tme = self
            .stream
            .as_ref()
            .and_then(|stream| stream.get_tme(table_id))
            .ok_or_else(|| {
                Error::BinlogDecode(format!("missing table map event for table id {}", table_id))
            })?;
        let schema = String::from_utf8_lossy(tme.database_name_raw()).into_owned();
        let table = String::from_utf8_lossy(tme.table_name_raw()).into_owned();

        let before_columns: Vec<usize> = match &data {
            RowsEventData::UpdateRowsEvent(e) => e.columns_before_image().iter_ones().collect(),
            RowsEventData::DeleteRowsEvent(e) => e.columns_before_image().iter_ones().collect(),
            RowsEventData::UpdateRowsEventV1(e) => e.columns_before_image().iter_ones().collect(),
            RowsEventData::DeleteRowsEventV1(e) => e.columns_before_image().iter_ones().collect(),
            _ => Vec::new(),
        };
        let after_columns: Vec<usize> = match &data {
            RowsEventData::UpdateRowsEvent(e) => e.columns_after_image().iter_ones().collect(),
            RowsEventData::WriteRowsEvent(e) => e.columns_after_image().iter_ones().collect(),
            RowsEventData::UpdateRowsEventV1(e) => e.columns_after_image().iter_ones().collect(),
            RowsEventData::WriteRowsEventV1(e) => e.columns_after_image().iter_ones().collect(),
            _ => Vec::new(),
        };

        let rows = rows_event_apply!(&data, event.rows(tme))
            .ok_or_else(|| Error::UnsupportedEvent("partial update rows event".into()))?;

        let mut images: Vec<(Option<RowImage>, Option<RowImage>)> = Vec::new();
        for row in rows {
            let (before, after) = row?;
            let before = before
                .map(|mut row| {
                    columns.row_image(&before_columns, |i| row.take(i).map(BinlogValue::into_owned))
                })
                .transpose()?;
            let after = after
                .map(|mut row| {
                    columns.row_image(&after_columns, |i| row.take(i).map(BinlogValue::into_owned))
                })
                .transpose()?;
            images.push((before, after));
        }

        let primary_key = columns.primary_key.clone();
        let body = match &data {
            RowsEventData::WriteRowsEvent(_) | RowsEventData::WriteRowsEventV1(_) => {
                let rows = images.into_iter().filter_map(|(_, after)| after).collect();
                EventBody::WriteRows(RowsEvent {
                    schema,
                    table,
                    primary_key,
                    rows,
                })
            }
            RowsEventData::DeleteRowsEvent(_) | RowsEventData::DeleteRowsEventV1(_) => {
                let rows = images.into_iter().filter_map(|(before, _)| before).collect();
                EventBody::DeleteRows(RowsEvent {
                    schema,
                    table,
                    primary_key,
                    rows,
                })
            }
            _ => {
                let rows = images
                    .into_iter()
                    .filter_map(|(before, after)| Some(UpdateRow { before: before?, after: after? }))
                    .collect();
                EventBody::UpdateRows(RowsEvent {
                    schema,
                    table,
                    primary_key,
                    rows,
                })
            }
        };

        Ok(Some(body))
    }
}

#[async_trait::async_trait]
impl ReplicationStream for BinlogClient {
    async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            let event = match stream.next().await {
                Some(event) => event?,
                None => return Ok(None),
            };

            let header = event.header();
            let timestamp = header.timestamp();
            let log_pos = u64::from(header.log_pos());
            let artificial = header.flags().contains(EventFlags::LOG_EVENT_ARTIFICIAL_F);
            let event_type = match header.event_type() {
                Ok(event_type) => event_type,
                Err(unknown) => {
                    tracing::trace!("Unknown binlog event type {}", unknown.0);
                    if log_pos > 0 {
                        self.position.pos = log_pos;
                    }
                    return Ok(Some(BinlogEvent::new(
                        timestamp,
                        log_pos,
                        EventBody::Other { type_code: unknown.0 },
                    )));
                }
            };

            if event_type == EventType::HEARTBEAT_EVENT
                || (artificial && event_type != EventType::ROTATE_EVENT)
            {
                continue;
            }
            if log_pos > 0 {
                self.position.pos = log_pos;
            }

            let body = match event_type {
                EventType::ROTATE_EVENT => {
                    let (next_file, position) = match event.read_data()? {
                        Some(EventData::RotateEvent(rotate)) => (
                            String::from_utf8_lossy(rotate.name_raw()).into_owned(),
                            rotate.position(),
                        ),
                        _ => return Err(Error::BinlogDecode("malformed rotate event".into())),
                    };
                    tracing::debug!("Rotated to {}:{}", next_file, position);
                    self.position = BinlogPosition::new(next_file.clone(), position);
                    self.tables.clear();
                    EventBody::Rotate {
                        next_file,
                        position,
                    }
                }
                EventType::FORMAT_DESCRIPTION_EVENT => EventBody::FormatDescription,
                EventType::XID_EVENT => EventBody::Xid,
                EventType::QUERY_EVENT => {
                    let query = match event.read_data()? {
                        Some(EventData::QueryEvent(query)) => QueryEvent::new(
                            String::from_utf8_lossy(query.schema_raw()),
                            String::from_utf8_lossy(query.query_raw()),
                        ),
                        _ => return Err(Error::BinlogDecode("malformed query event".into())),
                    };
                    if !query.is_bookkeeping() {
                        self.columns.invalidate();
                    }
                    EventBody::Query(query)
                }
                EventType::TABLE_MAP_EVENT => self.map_table(&event).await?,
                rows if is_rows_event(rows)? => match self.decode_rows(&event)? {
                    Some(body) => body,
                    None => continue,
                },
                other => EventBody::Other {
                    type_code: other as u8,
                },
            };

            return Ok(Some(BinlogEvent::new(timestamp, log_pos, body)));
        }
    }

    fn position(&self) -> &BinlogPosition {
        &self.position
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            tracing::debug!("Closing binlog stream at {}", self.position);
            stream.close().await?;
        }
        Ok(())
    }
}
