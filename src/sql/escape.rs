//! Literal Escaping
//!
//! Every row value reaches SQL text through an [`Escape`] implementation;
//! nothing formats raw values into a statement directly.

use chrono::Timelike;
use mysql_common::value::Value as WireValue;

use crate::binlog::Value;

/// Renders values as SQL literals safe to embed in a statement
pub trait Escape: Send + Sync {
    /// Quote/escape one value, returning the literal text
    fn escape(&self, value: &Value) -> String;
}

/// MySQL literal rules, as applied by the server's text protocol clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySqlEscape {
    /// Server runs with `NO_BACKSLASH_ESCAPES` in its sql_mode
    pub no_backslash_escapes: bool,
}

impl MySqlEscape {
    pub fn new(no_backslash_escapes: bool) -> Self {
        Self { no_backslash_escapes }
    }

    /// Detect the quoting mode from an `@@sql_mode` value
    pub fn from_sql_mode(sql_mode: &str) -> Self {
        let no_backslash_escapes = sql_mode
            .split(',')
            .any(|mode| mode.trim().eq_ignore_ascii_case("NO_BACKSLASH_ESCAPES"));
        Self::new(no_backslash_escapes)
    }

    /// Quoted string literal, escaped the way the protocol library does
    fn quote(&self, s: &str) -> String {
        WireValue::Bytes(s.as_bytes().to_vec()).as_sql(self.no_backslash_escapes)
    }
}

impl Escape for MySqlEscape {
    fn escape(&self, value: &Value) -> String {
        match &*value.normalized() {
            Value::Null => "NULL".to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::Float(f) => float_literal(*f),
            Value::Decimal(d) => d.clone(),
            Value::String(s) => self.quote(s),
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => {
                if dt.nanosecond() == 0 {
                    format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S"))
                } else {
                    format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.6f"))
                }
            }
            Value::Time {
                negative,
                hours,
                minutes,
                seconds,
                micros,
            } => {
                let sign = if *negative { "-" } else { "" };
                if *micros == 0 {
                    format!("'{}{:02}:{:02}:{:02}'", sign, hours, minutes, seconds)
                } else {
                    format!(
                        "'{}{:02}:{:02}:{:02}.{:06}'",
                        sign, hours, minutes, seconds, micros
                    )
                }
            }
            Value::Json(j) => self.quote(&j.to_string()),
            // normalized() folds these into strings
            Value::Bytes(b) => self.quote(&String::from_utf8_lossy(b)),
            Value::Set(members) => self.quote(&members.join(",")),
        }
    }
}

/// Quote an identifier with backticks
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Float literal that MySQL reads back as a DOUBLE
fn float_literal(f: f64) -> String {
    if !f.is_finite() {
        return "NULL".to_string();
    }
    let s = format!("{:?}", f);
    if s.contains('e') {
        s
    } else {
        format!("{}e0", s)
    }
}
