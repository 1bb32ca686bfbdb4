//! Column Metadata
//!
//! Row events only carry column indexes and wire types. Names, primary keys,
//! signedness and ENUM/SET members come from `information_schema` and are
//! cached per table until the next schema change.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, NaiveDate, TimeZone};
use mysql_common::binlog::jsonb;
use mysql_common::binlog::value::BinlogValue;
use mysql_common::Value as WireValue;
use sqlx::{MySqlPool, Row};

use super::value::{RowImage, Value};
use crate::error::{Error, Result};

const COLUMNS_QUERY: &str = "SELECT CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR), \
     CAST(COLUMN_TYPE AS CHAR), CAST(COLUMN_KEY AS CHAR) \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

/// One column of a source table
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    /// `DATA_TYPE`, lowercased (`int`, `varchar`, `enum`, ...)
    pub data_type: String,
    /// Full `COLUMN_TYPE` (`int(10) unsigned`, `enum('a','b')`, ...)
    pub column_type: String,
    pub primary: bool,
}

/// Columns of one table in ordinal order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableColumns {
    pub columns: Vec<ColumnMeta>,
    pub primary_key: Vec<String>,
}

impl ColumnMeta {
    pub fn new(name: &str, data_type: &str, column_type: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_ascii_lowercase(),
            column_type: column_type.to_string(),
            primary: key.eq_ignore_ascii_case("PRI"),
        }
    }

    pub fn is_unsigned(&self) -> bool {
        self.column_type.to_ascii_lowercase().contains("unsigned")
    }

    fn is_text(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext"
        )
    }

    /// Members of an ENUM or SET column type, in declaration order
    pub fn members(&self) -> Vec<String> {
        parse_members(&self.column_type)
    }

    /// Convert one decoded wire value into a row value for this column
    pub fn decode(&self, value: BinlogValue<'_>) -> Result<Value> {
        match value {
            BinlogValue::Value(v) => Ok(self.decode_wire(v)),
            BinlogValue::Jsonb(v) => Ok(Value::Json(json_value(v)?)),
            BinlogValue::JsonDiff(_) => Err(Error::BinlogDecode(format!(
                "partial JSON update of column {} (set binlog_row_value_options='')",
                self.name
            ))),
        }
    }

    fn decode_wire(&self, value: WireValue) -> Value {
        match (self.data_type.as_str(), value) {
            (_, WireValue::NULL) => Value::Null,
            ("enum", WireValue::Int(i)) => self.enum_member(i as u64),
            ("enum", WireValue::UInt(u)) => self.enum_member(u),
            ("set", WireValue::Int(i)) => self.set_members(i as u64),
            ("set", WireValue::UInt(u)) => self.set_members(u),
            ("timestamp", WireValue::Bytes(b)) => unix_time(&String::from_utf8_lossy(&b)),
            ("timestamp", WireValue::Int(i)) => unix_time(&i.to_string()),
            ("decimal", WireValue::Bytes(b)) => {
                Value::Decimal(String::from_utf8_lossy(&b).into_owned())
            }
            ("bit", WireValue::Bytes(b)) => {
                Value::UInt(b.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
            }
            (_, WireValue::Int(i)) if self.is_unsigned() && i < 0 => {
                Value::UInt(unsigned_width(&self.data_type, i))
            }
            (_, WireValue::Bytes(b)) if self.is_text() || self.data_type == "enum" => {
                match String::from_utf8(b) {
                    Ok(s) => Value::String(s),
                    Err(e) => Value::Bytes(e.into_bytes()),
                }
            }
            ("date", WireValue::Date(y, m, d, ..)) => date(y, m, d, 0, 0, 0, 0, true),
            (_, WireValue::Date(y, m, d, h, mi, s, us)) => date(y, m, d, h, mi, s, us, false),
            (_, other) => wire_value(other),
        }
    }

    fn enum_member(&self, index: u64) -> Value {
        // index 0 is the empty string MySQL stores for invalid values
        let member = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.members().get(i).cloned());
        Value::String(member.unwrap_or_default())
    }

    fn set_members(&self, mask: u64) -> Value {
        let members = self
            .members()
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i < 64 && mask & (1 << i) != 0)
            .map(|(_, member)| member)
            .collect();
        Value::Set(members)
    }
}

impl TableColumns {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        let primary_key = columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| c.name.clone())
            .collect();
        Self {
            columns,
            primary_key,
        }
    }

    /// Build a row image from the values present in one row.
    ///
    /// `present` lists the table column index of every value, in row order.
    /// Columns missing from the metadata are named `@<ordinal>`.
    pub fn row_image<'v, F>(&self, present: &[usize], mut take: F) -> Result<RowImage>
    where
        F: FnMut(usize) -> Option<BinlogValue<'v>>,
    {
        let mut image = RowImage::new();
        for (i, &index) in present.iter().enumerate() {
            let value = take(i);
            let (name, value) = match self.columns.get(index) {
                Some(column) => (
                    column.name.clone(),
                    value.map(|v| column.decode(v)).transpose()?,
                ),
                None => (
                    format!("@{}", index + 1),
                    value.map(untyped).transpose()?,
                ),
            };
            image.insert(name, value.unwrap_or(Value::Null));
        }
        Ok(image)
    }
}

/// Per-table metadata cache backed by `information_schema`
pub struct ColumnCache {
    pool: MySqlPool,
    tables: HashMap<(String, String), Arc<TableColumns>>,
}

impl ColumnCache {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            tables: HashMap::new(),
        }
    }

    /// Columns of `schema`.`table`, loading them on first use
    pub async fn get(&mut self, schema: &str, table: &str) -> Result<Arc<TableColumns>> {
        let key = (schema.to_string(), table.to_string());
        if let Some(columns) = self.tables.get(&key) {
            return Ok(columns.clone());
        }

        let rows = sqlx::query(COLUMNS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let columns: Vec<ColumnMeta> = rows
            .iter()
            .filter_map(|row| {
                Some(ColumnMeta::new(
                    &row.try_get::<String, _>(0).ok()?,
                    &row.try_get::<String, _>(1).ok()?,
                    &row.try_get::<String, _>(2).ok()?,
                    &row.try_get::<String, _>(3).ok().unwrap_or_default(),
                ))
            })
            .collect();

        if columns.is_empty() {
            tracing::warn!("No column metadata for {}.{}, using ordinals", schema, table);
        } else {
            tracing::debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        }

        let columns = Arc::new(TableColumns::new(columns));
        self.tables.insert(key, columns.clone());
        Ok(columns)
    }

    /// Forget everything; called after any schema change
    pub fn invalidate(&mut self) {
        self.tables.clear();
    }
}

/// Split `enum('a','b''c')` / `set(...)` into its members
fn parse_members(column_type: &str) -> Vec<String> {
    let Some(open) = column_type.find('(') else {
        return Vec::new();
    };
    let body = column_type[open + 1..].trim_end().trim_end_matches(')');

    let mut members = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut member = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    member.push('\'');
                }
                '\'' => break,
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        member.push(escaped);
                    }
                }
                c => member.push(c),
            }
        }
        members.push(member);
    }
    members
}

/// Undo sign extension of an unsigned integer column
fn unsigned_width(data_type: &str, value: i64) -> u64 {
    match data_type {
        "tinyint" => u64::from(value as u8),
        "smallint" => u64::from(value as u16),
        "mediumint" => (value as u64) & 0x00ff_ffff,
        "int" | "integer" => u64::from(value as u32),
        _ => value as u64,
    }
}

#[allow(clippy::too_many_arguments)]
fn date(y: u16, m: u8, d: u8, h: u8, mi: u8, s: u8, us: u32, date_only: bool) -> Value {
    let date = NaiveDate::from_ymd_opt(i32::from(y), u32::from(m), u32::from(d));
    match date {
        Some(date) if date_only => Value::Date(date),
        Some(date) => date
            .and_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        // zero dates are legal in MySQL but not in chrono
        None if date_only => Value::String(format!("{:04}-{:02}-{:02}", y, m, d)),
        None => Value::String(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            y, m, d, h, mi, s
        )),
    }
}

/// `seconds[.fraction]` since the epoch, in local time
fn unix_time(text: &str) -> Value {
    let (secs, frac) = text.split_once('.').unwrap_or((text, ""));
    let Ok(secs) = secs.trim().parse::<i64>() else {
        return Value::String(text.to_string());
    };
    let micros = format!("{:0<6}", frac.trim())
        .get(..6)
        .and_then(|f| f.parse::<u32>().ok())
        .unwrap_or(0);
    Local
        .timestamp_opt(secs, micros * 1000)
        .single()
        .map(|t| Value::DateTime(t.naive_local()))
        .unwrap_or_else(|| Value::String(text.to_string()))
}

fn wire_value(value: WireValue) -> Value {
    match value {
        WireValue::NULL => Value::Null,
        WireValue::Int(i) => Value::Int(i),
        WireValue::UInt(u) => Value::UInt(u),
        WireValue::Float(f) => Value::Float(f64::from(f)),
        WireValue::Double(d) => Value::Float(d),
        WireValue::Bytes(b) => Value::Bytes(b),
        WireValue::Date(y, m, d, h, mi, s, us) => date(y, m, d, h, mi, s, us, false),
        WireValue::Time(negative, days, hours, minutes, seconds, micros) => Value::Time {
            negative,
            hours: days * 24 + u32::from(hours),
            minutes,
            seconds,
            micros,
        },
    }
}

fn untyped(value: BinlogValue<'_>) -> Result<Value> {
    match value {
        BinlogValue::Value(v) => Ok(wire_value(v)),
        BinlogValue::Jsonb(v) => Ok(Value::Json(json_value(v)?)),
        BinlogValue::JsonDiff(_) => Err(Error::BinlogDecode(
            "partial JSON update of unknown column".to_string(),
        )),
    }
}

macro_rules! json_array {
    ($array:expr) => {{
        let mut values = Vec::new();
        for item in $array.iter() {
            values.push(json_value(item?)?);
        }
        serde_json::Value::Array(values)
    }};
}

macro_rules! json_object {
    ($object:expr) => {{
        let mut map = serde_json::Map::new();
        for entry in $object.iter() {
            let (key, value) = entry?;
            map.insert(key.value().into_owned(), json_value(value)?);
        }
        serde_json::Value::Object(map)
    }};
}

fn json_value(value: jsonb::Value<'_>) -> Result<serde_json::Value> {
    use jsonb::Value::*;
    let json = match value {
        Null => serde_json::Value::Null,
        Bool(v) => v.into(),
        I16(v) => v.into(),
        U16(v) => v.into(),
        I32(v) => v.into(),
        U32(v) => v.into(),
        I64(v) => v.into(),
        U64(v) => v.into(),
        F64(v) => v.into(),
        String(v) => v.str().into_owned().into(),
        SmallArray(v) => json_array!(v),
        LargeArray(v) => json_array!(v),
        SmallObject(v) => json_object!(v),
        LargeObject(v) => json_object!(v),
        Opaque(v) => v.data().into_owned().into(),
    };
    Ok(json)
}
