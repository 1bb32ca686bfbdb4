//! Rebuilt SQL statements and their binlog provenance.

use std::fmt;

use chrono::NaiveDateTime;

use crate::config::{parse_datetime, DATETIME_FORMAT};

const PROVENANCE_MARKER: &str = " #start ";

/// Where in the binlog a forward statement came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    /// Position of the enclosing transaction's `BEGIN`
    pub start_pos: u64,
    /// Position just past the row event
    pub end_pos: u64,
    /// Local time of the row event
    pub time: NaiveDateTime,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start {} end {} time {}",
            self.start_pos,
            self.end_pos,
            self.time.format(DATETIME_FORMAT)
        )
    }
}

impl Provenance {
    fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("start ")?;
        let (start_pos, rest) = rest.split_once(" end ")?;
        let (end_pos, time) = rest.split_once(" time ")?;
        Some(Self {
            start_pos: start_pos.trim().parse().ok()?,
            end_pos: end_pos.trim().parse().ok()?,
            time: parse_datetime(time).ok()?,
        })
    }
}

/// One rebuilt SQL statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Executable SQL text
    pub sql: String,
    /// Binlog origin; forward row statements only
    pub provenance: Option<Provenance>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            provenance: None,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Pacing statement interleaved into flashback output
    pub fn sleep(seconds: f64) -> Self {
        Self::new(format!("SELECT SLEEP({});", seconds))
    }

    /// Provenance rendered the way it appears in the trailing comment
    pub fn binlog_info(&self) -> Option<String> {
        self.provenance.map(|p| p.to_string())
    }

    /// Split a rendered line back into SQL and provenance.
    ///
    /// Lines without a well-formed trailing comment are taken as plain SQL.
    pub fn parse_line(line: &str) -> Self {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if let Some(idx) = line.rfind(PROVENANCE_MARKER) {
            if let Some(provenance) = Provenance::parse(&line[idx + 2..]) {
                return Self {
                    sql: line[..idx].to_string(),
                    provenance: Some(provenance),
                };
            }
        }
        Self::new(line)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provenance {
            Some(p) => write!(f, "{} #{}", self.sql, p),
            None => f.write_str(&self.sql),
        }
    }
}
