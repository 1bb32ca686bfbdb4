//! Statement Synthesizer
//!
//! Turns one row change (or one schema change) into one SQL statement, either
//! replaying what happened or undoing it. Every value goes through the
//! connection's [`Escape`] implementation.

use super::escape::{quote_ident, Escape};
use super::statement::{Provenance, Statement};
use crate::binlog::{BinlogEvent, Change, QueryEvent, RowImage, RowsEvent, UpdateRow, Value};
use crate::error::{Error, Result};

/// Builds forward or flashback statements for one scan
pub struct Synthesizer<'e, E: Escape + ?Sized> {
    escape: &'e E,
    flashback: bool,
    no_pk: bool,
}

impl<'e, E: Escape + ?Sized> Synthesizer<'e, E> {
    /// Create a synthesizer; flashback and no_pk cannot be combined
    pub fn new(escape: &'e E, flashback: bool, no_pk: bool) -> Result<Self> {
        if flashback && no_pk {
            return Err(Error::config("only one of flashback or no_pk can be set"));
        }
        Ok(Self {
            escape,
            flashback,
            no_pk,
        })
    }

    pub fn is_flashback(&self) -> bool {
        self.flashback
    }

    /// Synthesize one change.
    ///
    /// Returns `None` for `BEGIN`/`COMMIT` markers and for schema changes in
    /// flashback mode. `provenance` is attached to forward row statements only.
    pub fn synthesize(
        &self,
        change: Change<'_>,
        provenance: Option<Provenance>,
    ) -> Result<Option<Statement>> {
        let sql = match change {
            Change::SchemaChange(query) => return Ok(self.schema_change(query)),
            Change::InsertRow { event, row } if self.flashback => self.delete(event, row),
            Change::InsertRow { event, row } => self.insert(event, row),
            Change::DeleteRow { event, row } if self.flashback => self.insert(event, row),
            Change::DeleteRow { event, row } => self.delete(event, row),
            Change::UpdateRow { event, row } => self.update(event, row),
        };

        let statement = Statement::new(sql);
        Ok(Some(match provenance {
            Some(p) if !self.flashback => statement.with_provenance(p),
            _ => statement,
        }))
    }

    /// Synthesize every row of an event, in row order
    pub fn synthesize_event(
        &self,
        event: &BinlogEvent,
        provenance: Option<Provenance>,
    ) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        for change in event.body.changes()? {
            if let Some(statement) = self.synthesize(change, provenance)? {
                statements.push(statement);
            }
        }
        Ok(statements)
    }

    fn schema_change(&self, query: &QueryEvent) -> Option<Statement> {
        if self.flashback || query.is_bookkeeping() {
            return None;
        }

        let body = query.query.trim().trim_end_matches(';').trim_end();
        let sql = if query.schema.is_empty() {
            format!("{};", body)
        } else {
            format!("USE {};\n{};", quote_ident(&query.schema), body)
        };
        Some(Statement::new(sql))
    }

    fn insert<R>(&self, event: &RowsEvent<R>, row: &RowImage) -> String {
        let skip_pk = self.no_pk && !self.flashback;
        let (columns, values): (Vec<String>, Vec<String>) = row
            .iter()
            .filter(|(name, _)| !(skip_pk && event.primary_key.iter().any(|pk| pk == name)))
            .map(|(name, value)| (quote_ident(name), self.escape.escape(value)))
            .unzip();

        format!(
            "INSERT INTO {}({}) VALUES ({});",
            table_name(event),
            columns.join(","),
            values.join(",")
        )
    }

    fn delete<R>(&self, event: &RowsEvent<R>, row: &RowImage) -> String {
        format!(
            "DELETE FROM {} WHERE {} LIMIT 1;",
            table_name(event),
            self.predicates(row)
        )
    }

    fn update(&self, event: &RowsEvent<UpdateRow>, row: &UpdateRow) -> String {
        let (target, key) = if self.flashback {
            (&row.before, &row.after)
        } else {
            (&row.after, &row.before)
        };

        format!(
            "UPDATE {} SET {} WHERE {} LIMIT 1;",
            table_name(event),
            self.assignments(target, key),
            self.predicates(key)
        )
    }

    /// `SET` list: columns whose value differs from `current`, or every
    /// column when the update changed nothing
    fn assignments(&self, target: &RowImage, current: &RowImage) -> String {
        let changed: Vec<(&str, &Value)> = target
            .iter()
            .filter(|(name, value)| current.get(name) != Some(*value))
            .collect();
        let columns = if changed.is_empty() {
            target.iter().collect()
        } else {
            changed
        };

        columns
            .into_iter()
            .map(|(name, value)| format!("{}={}", quote_ident(name), self.escape.escape(value)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Equality predicates over a whole row image; NULL compares with `IS NULL`
    fn predicates(&self, row: &RowImage) -> String {
        row.iter()
            .map(|(name, value)| {
                if value.is_null() {
                    format!("{} IS NULL", quote_ident(name))
                } else {
                    format!("{}={}", quote_ident(name), self.escape.escape(value))
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn table_name<R>(event: &RowsEvent<R>) -> String {
    format!("{}.{}", quote_ident(&event.schema), quote_ident(&event.table))
}
