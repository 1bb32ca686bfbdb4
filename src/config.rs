//! binlog2sql Configuration
//!
//! This module provides the configuration structures for a scan: where the
//! source server lives, which part of its binary log to read, and how the
//! rebuilt SQL is rendered.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::binlog::SqlVerb;
use crate::error::{Error, Result};

/// Format accepted for `start_time` / `stop_time`
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// First valid event offset in every binlog file
pub const BINLOG_FIRST_POSITION: u64 = 4;

/// Main binlog2sql configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binlog2SqlConfig {
    /// Source database connection
    pub database: DatabaseConfig,

    /// Binlog window and rendering options
    #[serde(default)]
    pub scan: ScanOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// MySQL host
    pub host: String,

    /// MySQL port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Replication user (needs REPLICATION SLAVE, REPLICATION CLIENT and SELECT)
    pub user: String,

    /// Password
    #[serde(default)]
    pub password: String,

    /// Connection pool size for metadata queries
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Which part of the binlog to read and how to turn it into SQL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// First binlog file to read (required)
    #[serde(default)]
    pub start_file: Option<String>,

    /// Offset in `start_file` to start from
    #[serde(default)]
    pub start_pos: Option<u64>,

    /// Last binlog file to read (defaults to `start_file`)
    #[serde(default)]
    pub end_file: Option<String>,

    /// Offset in `end_file` to stop at (defaults to the end of the log)
    #[serde(default)]
    pub end_pos: Option<u64>,

    /// Ignore events before this local time
    #[serde(default)]
    pub start_time: Option<String>,

    /// Stop at the first event at or after this local time
    #[serde(default)]
    pub stop_time: Option<String>,

    /// Only read row events from these schemas
    #[serde(default)]
    pub only_schemas: Vec<String>,

    /// Only read row events from these tables
    #[serde(default)]
    pub only_tables: Vec<String>,

    /// Skip schema-change statements
    #[serde(default)]
    pub only_dml: bool,

    /// Row mutations to rebuild
    #[serde(default = "default_sql_types")]
    pub sql_types: Vec<SqlVerb>,

    /// Drop primary key columns from rebuilt INSERTs
    #[serde(default)]
    pub no_pk: bool,

    /// Emit undo statements in reverse order
    #[serde(default)]
    pub flashback: bool,

    /// Keep tailing the log past its current end
    #[serde(default)]
    pub stop_never: bool,

    /// Seconds to sleep between flashback batches (0 disables pacing)
    #[serde(default = "default_back_interval")]
    pub back_interval: f64,

    /// Stop after emitting this many statements
    #[serde(default)]
    pub max_statements: Option<usize>,

    /// Directory for the flashback scratch file
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// How statements are rendered
    #[serde(default)]
    pub format: OutputFormat,

    /// Write to this file instead of stdout
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Statement rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One SQL statement per line, provenance as a trailing comment
    #[default]
    Text,
    /// One JSON object per line with `sql` and `binlog_info`
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "sql" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(Error::config(format!("unknown output format: {}", other))),
        }
    }
}

// Default value functions
fn default_db_port() -> u16 {
    3306
}

fn default_pool_size() -> u32 {
    2
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_sql_types() -> Vec<SqlVerb> {
    vec![SqlVerb::Insert, SqlVerb::Update, SqlVerb::Delete]
}

fn default_back_interval() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            start_file: None,
            start_pos: None,
            end_file: None,
            end_pos: None,
            start_time: None,
            stop_time: None,
            only_schemas: Vec::new(),
            only_tables: Vec::new(),
            only_dml: false,
            sql_types: default_sql_types(),
            no_pk: false,
            flashback: false,
            stop_never: false,
            back_interval: default_back_interval(),
            max_statements: None,
            scratch_dir: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_db_port(),
            user: String::new(),
            password: String::new(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for Binlog2SqlConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scan: ScanOptions::default(),
            logging: LoggingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DatabaseConfig {
    /// Get database connection URL
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}",
            self.user, self.password, self.host, self.port
        )
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `host.port`, used to name per-source scratch files
    pub fn endpoint(&self) -> String {
        format!("{}.{}", self.host, self.port)
    }
}

impl ScanOptions {
    /// Validate the option combination before anything touches the server
    pub fn validate(&self) -> Result<()> {
        match self.start_file.as_deref() {
            None | Some("") => return Err(Error::config("start_file is required")),
            Some(_) => {}
        }

        if self.flashback && self.stop_never {
            return Err(Error::config("only one of flashback or stop_never can be set"));
        }

        if self.flashback && self.no_pk {
            return Err(Error::config("only one of flashback or no_pk can be set"));
        }

        if !self.back_interval.is_finite() || self.back_interval < 0.0 {
            return Err(Error::config(format!(
                "back_interval must be a non-negative number of seconds, got {}",
                self.back_interval
            )));
        }

        self.start_time()?;
        self.stop_time()?;

        Ok(())
    }

    /// Start offset, defaulting to the first event of the file
    pub fn start_pos(&self) -> u64 {
        self.start_pos.unwrap_or(BINLOG_FIRST_POSITION)
    }

    /// Last file of the window, defaulting to the start file
    pub fn end_file(&self) -> Option<&str> {
        self.end_file
            .as_deref()
            .filter(|f| !f.is_empty())
            .or(self.start_file.as_deref())
    }

    /// Parsed start time, far past when unset
    pub fn start_time(&self) -> Result<NaiveDateTime> {
        match self.start_time.as_deref() {
            Some(s) if !s.is_empty() => parse_datetime(s),
            _ => Ok(far_past()),
        }
    }

    /// Parsed stop time, far future when unset
    pub fn stop_time(&self) -> Result<NaiveDateTime> {
        match self.stop_time.as_deref() {
            Some(s) if !s.is_empty() => parse_datetime(s),
            _ => Ok(far_future()),
        }
    }

    /// Whether row events with this verb are rebuilt
    pub fn wants(&self, verb: SqlVerb) -> bool {
        self.sql_types.contains(&verb)
    }
}

impl Binlog2SqlConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Binlog2SqlConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.host.is_empty() {
            return Err(Error::config("database.host cannot be empty"));
        }

        if self.database.user.is_empty() {
            return Err(Error::config("database.user cannot be empty"));
        }

        self.scan.validate()
    }

    /// Sample configuration written by `binlog2sql init`
    pub fn sample() -> String {
        r#"# binlog2sql configuration

[database]
host = "127.0.0.1"
port = 3306
user = "binlog2sql"
password = ""

[scan]
start_file = "mysql-bin.000001"
start_pos = 4
# end_file = "mysql-bin.000002"
# end_pos = 1024
# start_time = "2024-01-01 00:00:00"
# stop_time = "2024-01-02 00:00:00"
only_schemas = []
only_tables = []
only_dml = false
sql_types = ["INSERT", "UPDATE", "DELETE"]
no_pk = false
flashback = false
stop_never = false
back_interval = 1.0

[logging]
level = "info"
format = "pretty"

[output]
format = "text"
"#
        .to_string()
    }
}

/// Parse a `%Y-%m-%d %H:%M:%S` local timestamp
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT)
        .map_err(|e| Error::config(format!("incorrect datetime '{}': {}", s, e)))
}

/// Lower bound used when no start time is given
pub fn far_past() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Upper bound used when no stop time is given
pub fn far_future() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2999, 12, 31)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MAX)
}
