//! binlog2sql - MySQL Binary Log to SQL
//!
//! Rebuilds the SQL applied in a range of a MySQL binary log, or the
//! flashback SQL that undoes it.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use binlog2sql::binlog::SqlVerb;
use binlog2sql::config::{Binlog2SqlConfig, OutputFormat};
use binlog2sql::error::Result;
use binlog2sql::scan::{Binlog2Sql, ScanSummary, WriterSink};
use binlog2sql::source::MySqlSource;

/// Default configuration file, used when present
const DEFAULT_CONFIG: &str = "binlog2sql.toml";

/// Environment variable consulted for the password
const PASSWORD_ENV: &str = "BINLOG2SQL_PASSWORD";

/// binlog2sql - rebuild SQL from MySQL binary logs
#[derive(Parser)]
#[command(name = "binlog2sql")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a binlog range and print the rebuilt SQL
    Scan(ScanArgs),

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

/// Scan flags; each one overrides the configuration file
#[derive(Args)]
struct ScanArgs {
    /// MySQL host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// MySQL port
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// MySQL user
    #[arg(short, long)]
    user: Option<String>,

    /// MySQL password (or set BINLOG2SQL_PASSWORD)
    #[arg(short, long)]
    password: Option<String>,

    /// First binlog file to read
    #[arg(long)]
    start_file: Option<String>,

    /// Start offset in the start file
    #[arg(long)]
    start_pos: Option<u64>,

    /// Last binlog file to read
    #[arg(long, alias = "stop-file")]
    end_file: Option<String>,

    /// Stop offset in the end file
    #[arg(long, alias = "stop-pos")]
    end_pos: Option<u64>,

    /// Skip events before this time (%Y-%m-%d %H:%M:%S)
    #[arg(long)]
    start_datetime: Option<String>,

    /// Stop at events at or after this time (%Y-%m-%d %H:%M:%S)
    #[arg(long)]
    stop_datetime: Option<String>,

    /// Keep following the log past its current end
    #[arg(long)]
    stop_never: bool,

    /// Only these schemas
    #[arg(short = 'd', long, num_args = 1..)]
    databases: Vec<String>,

    /// Only these tables
    #[arg(short = 't', long, num_args = 1..)]
    tables: Vec<String>,

    /// Skip schema changes
    #[arg(long)]
    only_dml: bool,

    /// Row mutations to rebuild (INSERT, UPDATE, DELETE)
    #[arg(long, num_args = 1..)]
    sql_type: Vec<SqlVerb>,

    /// Leave primary key columns out of INSERT statements
    #[arg(short = 'K', long = "no-primary-key")]
    no_pk: bool,

    /// Print flashback SQL, newest change first
    #[arg(short = 'B', long)]
    flashback: bool,

    /// Seconds to sleep every 1000 flashback statements (0 disables)
    #[arg(long)]
    back_interval: Option<f64>,

    /// Stop after this many statements
    #[arg(long)]
    limit: Option<usize>,

    /// Output format (text, json)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for the flashback scratch file
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

impl ScanArgs {
    /// Apply command-line overrides on top of the file configuration
    fn apply(self, config: &mut Binlog2SqlConfig) {
        let db = &mut config.database;
        if let Some(host) = self.host {
            db.host = host;
        }
        if let Some(port) = self.port {
            db.port = port;
        }
        if let Some(user) = self.user {
            db.user = user;
        }
        if let Some(password) = self.password.or_else(|| std::env::var(PASSWORD_ENV).ok()) {
            db.password = password;
        }

        let scan = &mut config.scan;
        if self.start_file.is_some() {
            scan.start_file = self.start_file;
        }
        if self.start_pos.is_some() {
            scan.start_pos = self.start_pos;
        }
        if self.end_file.is_some() {
            scan.end_file = self.end_file;
        }
        if self.end_pos.is_some() {
            scan.end_pos = self.end_pos;
        }
        if self.start_datetime.is_some() {
            scan.start_time = self.start_datetime;
        }
        if self.stop_datetime.is_some() {
            scan.stop_time = self.stop_datetime;
        }
        if !self.databases.is_empty() {
            scan.only_schemas = self.databases;
        }
        if !self.tables.is_empty() {
            scan.only_tables = self.tables;
        }
        if !self.sql_type.is_empty() {
            scan.sql_types = self.sql_type;
        }
        if let Some(interval) = self.back_interval {
            scan.back_interval = interval;
        }
        if self.limit.is_some() {
            scan.max_statements = self.limit;
        }
        if self.scratch_dir.is_some() {
            scan.scratch_dir = self.scratch_dir;
        }
        scan.stop_never |= self.stop_never;
        scan.only_dml |= self.only_dml;
        scan.no_pk |= self.no_pk;
        scan.flashback |= self.flashback;

        if let Some(format) = self.format {
            config.output.format = format;
        }
        if self.output.is_some() {
            config.output.path = self.output;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            args.apply(&mut config);
            init_logging(
                cli.log_level.as_deref().unwrap_or(&config.logging.level),
                &config.logging.format,
            );
            run_scan(config).await
        }
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_init(output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_validate(cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)))
        }
    }
}

/// Initialize logging on stderr; stdout carries the SQL
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

/// Load the given file, or the default one when it exists
fn load_config(path: Option<&Path>) -> Result<Binlog2SqlConfig> {
    match path {
        Some(path) => Binlog2SqlConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Binlog2SqlConfig::from_file(Path::new(DEFAULT_CONFIG))
        }
        None => Ok(Binlog2SqlConfig::default()),
    }
}

/// Run one scan and write its statements
async fn run_scan(config: Binlog2SqlConfig) -> Result<()> {
    config.validate()?;

    let source = MySqlSource::connect(&config.database).await?;
    let result = scan_into_output(source, &config).await;

    if let Err(e) = &result {
        tracing::error!("Scan failed: {}", e);
    }
    result.map(|_| ())
}

async fn scan_into_output(source: MySqlSource, config: &Binlog2SqlConfig) -> Result<ScanSummary> {
    let engine = Binlog2Sql::new(source, config.scan.clone()).await?;

    let writer: Box<dyn Write> = match &config.output.path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut sink = WriterSink::new(writer, config.output.format);

    let summary = if config.scan.stop_never {
        engine
            .run_until(&mut sink, async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received shutdown signal");
                }
            })
            .await
    } else {
        engine.run(&mut sink).await
    };

    engine.source().close().await;
    summary
}

/// Write a sample configuration file
fn run_init(output: PathBuf) -> Result<()> {
    if output.exists() {
        eprintln!("✗ {} already exists", output.display());
        return Err(io::Error::new(io::ErrorKind::AlreadyExists, output.display().to_string()).into());
    }

    std::fs::write(&output, Binlog2SqlConfig::sample())?;
    println!("✓ Configuration written to {}", output.display());
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = match Binlog2SqlConfig::from_file(&config_path).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            return Err(e);
        }
    };

    let scan = &config.scan;
    println!("✓ Configuration is valid");
    println!("  Source:      {}@{}:{}", config.database.user, config.database.host, config.database.port);
    println!(
        "  Start:       {}:{}",
        scan.start_file.as_deref().unwrap_or_default(),
        scan.start_pos()
    );
    println!(
        "  End:         {}:{}",
        scan.end_file().unwrap_or_default(),
        scan.end_pos.map(|p| p.to_string()).unwrap_or_else(|| "end of log".to_string())
    );
    println!("  Time:        {} .. {}", scan.start_time()?, scan.stop_time()?);
    println!(
        "  SQL types:   {}",
        scan.sql_types.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!("  Flashback:   {}", scan.flashback);
    println!("  Stop never:  {}", scan.stop_never);
    println!("  Output:      {:?}", config.output.format);
    Ok(())
}
