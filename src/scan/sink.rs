//! Statement sinks: where a scan delivers its output.

use std::io::Write;

use serde::Serialize;

use crate::config::OutputFormat;
use crate::error::Result;
use crate::sql::Statement;

/// Receives statements in final output order
pub trait StatementSink {
    fn emit(&mut self, statement: Statement) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl StatementSink for Vec<Statement> {
    fn emit(&mut self, statement: Statement) -> Result<()> {
        self.push(statement);
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    sql: &'a str,
    binlog_info: Option<String>,
}

/// Writes one statement per line, as SQL text or JSON
pub struct WriterSink<W: Write> {
    writer: W,
    format: OutputFormat,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> StatementSink for WriterSink<W> {
    fn emit(&mut self, statement: Statement) -> Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.writer, "{}", statement)?,
            OutputFormat::Json => {
                let line = JsonLine {
                    sql: &statement.sql,
                    binlog_info: statement.binlog_info(),
                };
                serde_json::to_writer(&mut self.writer, &line)?;
                self.writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
