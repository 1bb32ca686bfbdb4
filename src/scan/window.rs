//! Binlog Window Tracker
//!
//! Resolves a scan request against the live server: which files to read,
//! where the log currently ends, and when to stop.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::ScanOptions;
use crate::error::{Error, Result};
use crate::source::{BinlogPosition, SourceConnection};

/// Why a scan stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reached `end_file`/`end_pos`
    EndPosition,
    /// Reached the end of the log as it was when the scan started
    EndOfLog,
    /// An event at or after `stop_time`
    StopTime,
    /// The stream moved past the requested files
    OutsideWindow,
    /// The stream ended by itself
    StreamExhausted,
    /// `max_statements` reached
    Limit,
    /// Shutdown requested by the caller
    Interrupted,
}

/// Validated range of the binary log to scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanWindow {
    pub start: BinlogPosition,
    pub end_file: String,
    pub end_pos: Option<u64>,
    pub start_time: NaiveDateTime,
    pub stop_time: NaiveDateTime,
    /// Server write position captured when the window was resolved
    pub eof: BinlogPosition,
    /// Files to scan, ascending by numeric suffix
    pub files: Vec<String>,
    pub server_id: u32,
}

impl ScanWindow {
    /// Probe the server and materialize the window for `options`
    pub async fn resolve<S>(source: &S, options: &ScanOptions) -> Result<Self>
    where
        S: SourceConnection + ?Sized,
    {
        let start_file = match options.start_file.as_deref() {
            Some(file) if !file.is_empty() => file,
            _ => return Err(Error::config("start_file is required")),
        };
        let end_file = options.end_file().unwrap_or(start_file);

        let eof = source.master_status().await?;
        let logs = source.master_logs().await?;
        if !logs.iter().any(|log| log == start_file) {
            return Err(Error::config(format!(
                "start_file {} is not among the server's binlog files ({})",
                start_file,
                describe_logs(&logs)
            )));
        }
        let files = files_in_range(&logs, start_file, end_file)?;

        let server_id = source
            .server_id()
            .await?
            .ok_or_else(|| Error::config("missing server_id on the source server"))?;

        let window = Self {
            start: BinlogPosition::new(start_file, options.start_pos()),
            end_file: end_file.to_string(),
            end_pos: options.end_pos,
            start_time: options.start_time()?,
            stop_time: options.stop_time()?,
            eof,
            files,
            server_id,
        };

        tracing::info!(
            "Scan window {} .. {}:{} over {} file(s), log ends at {}",
            window.start,
            window.end_file,
            window
                .end_pos
                .map(|p| p.to_string())
                .unwrap_or_else(|| "end".to_string()),
            window.files.len(),
            window.eof
        );

        Ok(window)
    }

    pub fn contains_file(&self, file: &str) -> bool {
        self.files.iter().any(|f| f == file)
    }

    /// The event at `position` is the last one to process
    pub fn last_event(&self, position: &BinlogPosition, stop_never: bool) -> Option<StopReason> {
        if self.end_pos == Some(position.pos) && position.file == self.end_file {
            Some(StopReason::EndPosition)
        } else if !stop_never && *position == self.eof {
            Some(StopReason::EndOfLog)
        } else {
            None
        }
    }

    /// The event at `position` and `time` lies past the window
    pub fn past_end(
        &self,
        position: &BinlogPosition,
        time: NaiveDateTime,
        stop_never: bool,
    ) -> Option<StopReason> {
        if !stop_never && !self.contains_file(&position.file) {
            Some(StopReason::OutsideWindow)
        } else if self.end_pos.is_some_and(|end| position.file == self.end_file && position.pos > end) {
            Some(StopReason::EndPosition)
        } else if !stop_never && position.file == self.eof.file && position.pos > self.eof.pos {
            Some(StopReason::EndOfLog)
        } else if time >= self.stop_time {
            Some(StopReason::StopTime)
        } else {
            None
        }
    }
}

/// Numeric suffix of a binlog file name (`mysql-bin.000042` -> 42)
pub fn binlog_index(name: &str) -> Result<u64> {
    name.rsplit_once('.')
        .and_then(|(_, suffix)| suffix.parse().ok())
        .ok_or_else(|| Error::config(format!("malformed binlog file name: {}", name)))
}

/// Retained files whose suffix lies in `[start, end]`, ascending
pub fn files_in_range(logs: &[String], start: &str, end: &str) -> Result<Vec<String>> {
    let first = binlog_index(start)?;
    let last = binlog_index(end)?;
    if last < first {
        return Err(Error::config(format!(
            "end_file {} is before start_file {}",
            end, start
        )));
    }

    let mut files = Vec::new();
    for log in logs {
        // foreign names in the index are not part of any window
        let Ok(index) = binlog_index(log) else {
            continue;
        };
        if (first..=last).contains(&index) {
            files.push((index, log.clone()));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, name)| name).collect())
}

fn describe_logs(logs: &[String]) -> String {
    match (logs.first(), logs.last()) {
        (Some(first), Some(last)) if first != last => format!("{} .. {}", first, last),
        (Some(only), _) => only.clone(),
        _ => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{far_future, far_past, parse_datetime};

    fn logs(prefix: &str, range: std::ops::RangeInclusive<u32>) -> Vec<String> {
        range.map(|i| format!("{}.{:06}", prefix, i)).collect()
    }

    fn window() -> ScanWindow {
        ScanWindow {
            start: BinlogPosition::new("binlog.000010", 4),
            end_file: "binlog.000011".to_string(),
            end_pos: Some(500),
            start_time: far_past(),
            stop_time: parse_datetime("2024-06-01 00:00:00").unwrap(),
            eof: BinlogPosition::new("binlog.000012", 900),
            files: logs("binlog", 10..=11),
            server_id: 1,
        }
    }

    #[test]
    fn test_binlog_index() {
        assert_eq!(binlog_index("mysql-bin.000042").unwrap(), 42);
        assert_eq!(binlog_index("host.with.dots-bin.000007").unwrap(), 7);
        assert!(binlog_index("mysql-bin").unwrap_err().is_config());
        assert!(binlog_index("mysql-bin.log").unwrap_err().is_config());
    }

    #[test]
    fn test_files_in_range_is_numeric_and_inclusive() {
        let mut retained = logs("binlog", 8..=20);
        retained.reverse();
        retained.push("binlog.index".to_string());

        let files = files_in_range(&retained, "binlog.000010", "binlog.000012").unwrap();
        assert_eq!(files, logs("binlog", 10..=12));

        let single = files_in_range(&retained, "binlog.000015", "binlog.000015").unwrap();
        assert_eq!(single, vec!["binlog.000015"]);

        // suffix width changes must not affect ordering
        let mixed = vec!["b.999".to_string(), "b.1000".to_string(), "b.1001".to_string()];
        assert_eq!(files_in_range(&mixed, "b.999", "b.1000").unwrap(), vec!["b.999", "b.1000"]);
    }

    #[test]
    fn test_end_before_start_rejected() {
        let retained = logs("binlog", 1..=3);
        let err = files_in_range(&retained, "binlog.000003", "binlog.000001").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_last_event() {
        let w = window();
        assert_eq!(
            w.last_event(&BinlogPosition::new("binlog.000011", 500), false),
            Some(StopReason::EndPosition)
        );
        assert_eq!(w.last_event(&BinlogPosition::new("binlog.000010", 500), false), None);
        assert_eq!(
            w.last_event(&BinlogPosition::new("binlog.000012", 900), false),
            Some(StopReason::EndOfLog)
        );
        assert_eq!(w.last_event(&BinlogPosition::new("binlog.000012", 900), true), None);
    }

    #[test]
    fn test_past_end() {
        let w = window();
        let early = parse_datetime("2024-01-01 00:00:00").unwrap();

        assert_eq!(w.past_end(&BinlogPosition::new("binlog.000010", 9999), early, false), None);
        assert_eq!(
            w.past_end(&BinlogPosition::new("binlog.000011", 501), early, false),
            Some(StopReason::EndPosition)
        );
        assert_eq!(
            w.past_end(&BinlogPosition::new("binlog.000013", 4), early, false),
            Some(StopReason::OutsideWindow)
        );
        assert_eq!(w.past_end(&BinlogPosition::new("binlog.000013", 4), early, true), None);
        assert_eq!(
            w.past_end(&BinlogPosition::new("binlog.000010", 4), far_future(), true),
            Some(StopReason::StopTime)
        );
    }
}
