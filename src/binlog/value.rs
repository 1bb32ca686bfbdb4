//! Row Values
//!
//! Typed column values carried by row events, and the ordered column map
//! that holds one row image.

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Column value decoded from a row event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    /// DECIMAL / NUMERIC, kept as its exact text
    Decimal(String),
    String(String),
    /// Binary payload (BLOB, BINARY, undecodable text)
    Bytes(Vec<u8>),
    /// Members of a SET column
    Set(Vec<String>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// TIME, which may be negative and exceed 24 hours
    Time {
        negative: bool,
        hours: u32,
        minutes: u8,
        seconds: u8,
        micros: u32,
    },
    Json(serde_json::Value),
}

impl Value {
    /// Check if value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Fold values SQL text cannot carry as-is into text.
    ///
    /// SET members are comma-joined and byte strings are decoded lossily.
    pub fn normalized(&self) -> Cow<'_, Value> {
        match self {
            Value::Set(members) => Cow::Owned(Value::String(members.join(","))),
            Value::Bytes(bytes) => {
                Cow::Owned(Value::String(String::from_utf8_lossy(bytes).into_owned()))
            }
            other => Cow::Borrowed(other),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One row image: column name to value, in table column order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowImage {
    columns: Vec<(String, Value)>,
}

impl RowImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing an existing value in place
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Builder form of [`RowImage::insert`]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Remove a column, returning its value
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.columns.iter().position(|(name, _)| name == column)?;
        Some(self.columns.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RowImage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RowImage::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_keeps_column_order() {
        let row = RowImage::new()
            .with("zeta", 1)
            .with("alpha", "a")
            .with("mid", None::<i64>);

        let names: Vec<&str> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert!(row.get("mid").unwrap().is_null());
    }

    #[test]
    fn test_row_insert_replaces_in_place() {
        let mut row = RowImage::new().with("id", 1).with("name", "a");
        row.insert("id", 2);
        assert_eq!(row.len(), 2);
        assert_eq!(row.iter().next(), Some(("id", &Value::Int(2))));

        assert_eq!(row.remove("id"), Some(Value::Int(2)));
        assert_eq!(row.remove("id"), None);
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_normalized_values() {
        let set = Value::Set(vec!["read".into(), "write".into()]);
        assert_eq!(*set.normalized(), Value::String("read,write".into()));

        let bytes = Value::Bytes(vec![b'o', b'k', 0xff]);
        assert_eq!(*bytes.normalized(), Value::String("ok\u{fffd}".into()));

        let int = Value::Int(7);
        assert!(matches!(int.normalized(), Cow::Borrowed(_)));
    }
}
