//! Stream Processor
//!
//! Drives one scan: reads the replication stream across the resolved
//! [`ScanWindow`], filters events, hands row changes to the
//! [`Synthesizer`] and delivers the result to a [`StatementSink`].
//!
//! Forward statements go straight to the sink. Flashback statements are
//! spooled to a [`ScratchFile`] and replayed last-first once reading stops.

use std::future::Future;
use std::path::PathBuf;

use serde::Serialize;

use super::reverse::ReverseLines;
use super::scratch::{decode_line, ScratchFile};
use super::sink::StatementSink;
use super::window::{ScanWindow, StopReason};
use crate::binlog::EventBody;
use crate::config::ScanOptions;
use crate::error::Result;
use crate::source::{ReplicationStream, SourceConnection, StreamRequest};
use crate::sql::{Provenance, Statement, Synthesizer};

/// Flashback statements between two pacing sleeps
pub const FLASHBACK_BATCH: usize = 1000;

/// Outcome of a completed scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Events read from the stream, including skipped ones
    pub events: u64,
    /// Rebuilt statements delivered to the sink, pacing excluded
    pub statements: usize,
    pub stop: StopReason,
}

/// Binlog to SQL engine bound to one source and one window
pub struct Binlog2Sql<S: SourceConnection> {
    source: S,
    options: ScanOptions,
    window: ScanWindow,
}

impl<S: SourceConnection> Binlog2Sql<S> {
    /// Validate `options` and resolve the window against the live server.
    ///
    /// Every configuration error surfaces here, before a stream is opened.
    pub async fn new(source: S, options: ScanOptions) -> Result<Self> {
        options.validate()?;
        let window = ScanWindow::resolve(&source, &options).await?;
        Ok(Self {
            source,
            options,
            window,
        })
    }

    pub fn window(&self) -> &ScanWindow {
        &self.window
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Run the scan to completion
    pub async fn run<K>(&self, sink: &mut K) -> Result<ScanSummary>
    where
        K: StatementSink + ?Sized,
    {
        self.run_until(sink, std::future::pending()).await
    }

    /// Run all statements into memory
    pub async fn collect(&self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        self.run(&mut statements).await?;
        Ok(statements)
    }

    /// Run the scan until it completes or `shutdown` resolves.
    ///
    /// The stream is closed and the scratch file removed on every path.
    pub async fn run_until<K, F>(&self, sink: &mut K, shutdown: F) -> Result<ScanSummary>
    where
        K: StatementSink + ?Sized,
        F: Future<Output = ()>,
    {
        let synth = Synthesizer::new(&self.source, self.options.flashback, self.options.no_pk)?;

        let mut scratch = if synth.is_flashback() {
            Some(ScratchFile::create(&self.scratch_dir(), &self.source.endpoint())?)
        } else {
            None
        };

        tracing::info!(
            "Starting {} scan from {}",
            if synth.is_flashback() { "flashback" } else { "forward" },
            self.window.start
        );

        let mut stream = self.source.open_stream(self.stream_request()).await?;
        let result = self
            .read_events(stream.as_mut(), &synth, sink, scratch.as_mut(), shutdown)
            .await;
        let closed = stream.close().await;

        let mut summary = result?;
        closed?;

        if let Some(scratch) = scratch.as_mut() {
            let (emitted, truncated) = self.emit_reverse(scratch, sink)?;
            summary.statements = emitted;
            if truncated {
                summary.stop = StopReason::Limit;
            }
        }
        sink.flush()?;

        tracing::info!(
            "Scan finished: {} events, {} statements, stopped by {:?}",
            summary.events,
            summary.statements,
            summary.stop
        );

        Ok(summary)
    }

    fn scratch_dir(&self) -> PathBuf {
        self.options
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            server_id: self.window.server_id,
            start: self.window.start.clone(),
            only_schemas: self.options.only_schemas.clone(),
            only_tables: self.options.only_tables.clone(),
            blocking: self.options.stop_never,
        }
    }

    async fn read_events<K, F>(
        &self,
        stream: &mut dyn ReplicationStream,
        synth: &Synthesizer<'_, S>,
        sink: &mut K,
        mut scratch: Option<&mut ScratchFile>,
        shutdown: F,
    ) -> Result<ScanSummary>
    where
        K: StatementSink + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let stop_never = self.options.stop_never;
        let mut summary = ScanSummary {
            events: 0,
            statements: 0,
            stop: StopReason::StreamExhausted,
        };
        let mut last_pos = self.window.start.pos;
        let mut e_start_pos = last_pos;

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scan interrupted after {} events", summary.events);
                    summary.stop = StopReason::Interrupted;
                    break;
                }
                event = stream.next_event() => event?,
            };
            let Some(event) = event else {
                break;
            };
            summary.events += 1;

            let position = stream.position().clone();
            let time = event.local_time();

            let last = self.window.last_event(&position, stop_never);
            if last.is_none() {
                if time < self.window.start_time {
                    if event.body.advances_position() {
                        last_pos = event.header.log_pos;
                    }
                    continue;
                }
                if let Some(reason) = self.window.past_end(&position, time, stop_never) {
                    tracing::debug!("Stopping at {} ({:?})", position, reason);
                    summary.stop = reason;
                    break;
                }
            }

            tracing::trace!("{} at {}", event.body.name(), position);

            let statements = match &event.body {
                EventBody::Query(query) if query.is_begin() => {
                    e_start_pos = last_pos;
                    Vec::new()
                }
                EventBody::Query(_) if !self.options.only_dml => synth.synthesize_event(&event, None)?,
                body if body.sql_verb().is_some_and(|verb| self.options.wants(verb)) => {
                    let provenance = Provenance {
                        start_pos: e_start_pos,
                        end_pos: event.header.log_pos,
                        time,
                    };
                    synth.synthesize_event(&event, Some(provenance))?
                }
                _ => Vec::new(),
            };

            if self.deliver(statements, sink, scratch.as_deref_mut(), &mut summary)? {
                summary.stop = StopReason::Limit;
                break;
            }

            if event.body.advances_position() {
                last_pos = event.header.log_pos;
            }
            if let Some(reason) = last {
                summary.stop = reason;
                break;
            }
        }

        Ok(summary)
    }

    /// Forward statements go to the sink, flashback ones to scratch.
    /// Returns true once the forward limit is reached.
    fn deliver<K>(
        &self,
        statements: Vec<Statement>,
        sink: &mut K,
        mut scratch: Option<&mut ScratchFile>,
        summary: &mut ScanSummary,
    ) -> Result<bool>
    where
        K: StatementSink + ?Sized,
    {
        for statement in statements {
            match scratch.as_deref_mut() {
                Some(scratch) => scratch.append(&statement.sql)?,
                None => {
                    if self.limit_reached(summary.statements) {
                        return Ok(true);
                    }
                    sink.emit(statement)?;
                    summary.statements += 1;
                    if self.limit_reached(summary.statements) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn limit_reached(&self, emitted: usize) -> bool {
        self.options.max_statements.is_some_and(|max| emitted >= max)
    }

    /// Replay the scratch file last-first, pacing every batch.
    /// Returns the number of statements emitted and whether the limit cut it short.
    fn emit_reverse<K>(&self, scratch: &mut ScratchFile, sink: &mut K) -> Result<(usize, bool)>
    where
        K: StatementSink + ?Sized,
    {
        let path = scratch.finish()?.to_path_buf();
        tracing::debug!(
            "Replaying {} flashback statements from {}",
            scratch.len(),
            path.display()
        );

        let back_interval = self.options.back_interval;
        let mut emitted = 0;
        for line in ReverseLines::open(&path)? {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            if self.limit_reached(emitted) {
                return Ok((emitted, true));
            }

            sink.emit(Statement::new(decode_line(&line)))?;
            emitted += 1;
            if self.limit_reached(emitted) {
                return Ok((emitted, true));
            }
            if emitted % FLASHBACK_BATCH == 0 && back_interval > 0.0 {
                sink.emit(Statement::sleep(back_interval))?;
            }
        }

        Ok((emitted, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::binlog::{BinlogEvent, QueryEvent, RowImage, RowsEvent, UpdateRow, Value};
    use crate::config::DATETIME_FORMAT;
    use crate::error::Error;
    use crate::source::BinlogPosition;
    use crate::sql::{Escape, MySqlEscape};

    const FILE: &str = "binlog.000001";
    const TS: u32 = 1_700_000_000;

    type Script = Vec<(u64, BinlogEvent)>;

    struct FakeSource {
        eof: BinlogPosition,
        logs: Vec<String>,
        server_id: Option<u32>,
        script: Mutex<Option<Script>>,
        fail_at_end: bool,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl FakeSource {
        fn new(script: Script) -> Self {
            let eof = script.last().map(|(pos, _)| *pos).unwrap_or(4);
            Self {
                eof: BinlogPosition::new(FILE, eof),
                logs: vec![FILE.to_string(), "binlog.000002".to_string()],
                server_id: Some(1),
                script: Mutex::new(Some(script)),
                fail_at_end: false,
                opened: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Escape for FakeSource {
        fn escape(&self, value: &Value) -> String {
            MySqlEscape::default().escape(value)
        }
    }

    #[async_trait]
    impl SourceConnection for FakeSource {
        async fn master_status(&self) -> Result<BinlogPosition> {
            Ok(self.eof.clone())
        }

        async fn master_logs(&self) -> Result<Vec<String>> {
            Ok(self.logs.clone())
        }

        async fn server_id(&self) -> Result<Option<u32>> {
            Ok(self.server_id)
        }

        fn endpoint(&self) -> String {
            "127.0.0.1.3306".to_string()
        }

        async fn open_stream(&self, request: StreamRequest) -> Result<Box<dyn ReplicationStream>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(FakeStream {
                events: script.into(),
                position: request.start,
                blocking: request.blocking,
                fail_at_end: self.fail_at_end,
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    struct FakeStream {
        events: VecDeque<(u64, BinlogEvent)>,
        position: BinlogPosition,
        blocking: bool,
        fail_at_end: bool,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ReplicationStream for FakeStream {
        async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
            match self.events.pop_front() {
                Some((pos, event)) => {
                    match &event.body {
                        EventBody::Rotate {
                            next_file,
                            position,
                        } => self.position = BinlogPosition::new(next_file.clone(), *position),
                        _ => self.position.pos = pos,
                    }
                    Ok(Some(event))
                }
                None if self.fail_at_end => Err(Error::BinlogDecode("truncated event".into())),
                None if self.blocking => std::future::pending().await,
                None => Ok(None),
            }
        }

        fn position(&self) -> &BinlogPosition {
            &self.position
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn options(dir: &tempfile::TempDir) -> ScanOptions {
        ScanOptions {
            start_file: Some(FILE.to_string()),
            start_pos: Some(219),
            scratch_dir: Some(dir.path().to_path_buf()),
            ..ScanOptions::default()
        }
    }

    fn at(pos: u64, timestamp: u32, body: EventBody) -> (u64, BinlogEvent) {
        (pos, BinlogEvent::new(timestamp, pos, body))
    }

    fn begin(pos: u64) -> (u64, BinlogEvent) {
        at(pos, TS, EventBody::Query(QueryEvent::new("testdb", "BEGIN")))
    }

    fn table_map(pos: u64) -> (u64, BinlogEvent) {
        at(
            pos,
            TS,
            EventBody::TableMap {
                schema: "testdb".into(),
                table: "t".into(),
            },
        )
    }

    fn row(id: i64, name: &str) -> RowImage {
        RowImage::new().with("id", id).with("name", name)
    }

    fn insert(pos: u64, timestamp: u32, rows: Vec<RowImage>) -> (u64, BinlogEvent) {
        let event = RowsEvent::new("testdb", "t", rows).with_primary_key(&["id"]);
        at(pos, timestamp, EventBody::WriteRows(event))
    }

    fn commit(pos: u64) -> (u64, BinlogEvent) {
        at(pos, TS, EventBody::Xid)
    }

    fn insert_transaction() -> Script {
        vec![
            begin(300),
            table_map(360),
            insert(420, TS, vec![row(1, "a")]),
            commit(451),
        ]
    }

    fn dir_is_empty(dir: &tempfile::TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_forward_insert() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Binlog2Sql::new(FakeSource::new(insert_transaction()), options(&dir))
            .await
            .unwrap();

        let mut out = Vec::new();
        let summary = engine.run(&mut out).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sql, "INSERT INTO `testdb`.`t`(`id`,`name`) VALUES (1,'a');");
        let provenance = out[0].provenance.unwrap();
        assert_eq!(provenance.start_pos, 219);
        assert_eq!(provenance.end_pos, 420);
        assert_eq!(provenance.time, BinlogEvent::new(TS, 0, EventBody::Xid).local_time());

        assert_eq!(summary.events, 4);
        assert_eq!(summary.statements, 1);
        assert_eq!(summary.stop, StopReason::EndOfLog);
        assert!(engine.source().closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_flashback_insert() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.flashback = true;
        let engine = Binlog2Sql::new(FakeSource::new(insert_transaction()), opts)
            .await
            .unwrap();

        let out = engine.collect().await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sql, "DELETE FROM `testdb`.`t` WHERE `id`=1 AND `name`='a' LIMIT 1;");
        assert_eq!(out[0].provenance, None);
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_update_both_directions() {
        let update = || {
            let change = UpdateRow {
                before: row(5, "old"),
                after: row(5, "new"),
            };
            let event = RowsEvent::new("testdb", "t", vec![change]).with_primary_key(&["id"]);
            vec![begin(300), table_map(360), at(440, TS, EventBody::UpdateRows(event)), commit(471)]
        };

        let dir = tempfile::tempdir().unwrap();
        let forward = Binlog2Sql::new(FakeSource::new(update()), options(&dir))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(
            forward[0].sql,
            "UPDATE `testdb`.`t` SET `name`='new' WHERE `id`=5 AND `name`='old' LIMIT 1;"
        );

        let mut opts = options(&dir);
        opts.flashback = true;
        let backward = Binlog2Sql::new(FakeSource::new(update()), opts)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(
            backward[0].sql,
            "UPDATE `testdb`.`t` SET `name`='old' WHERE `id`=5 AND `name`='new' LIMIT 1;"
        );
    }

    #[tokio::test]
    async fn test_flashback_reverses_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.flashback = true;
        let script = vec![
            begin(300),
            insert(400, TS, vec![row(1, "a"), row(2, "b")]),
            insert(500, TS + 1, vec![row(3, "c")]),
            commit(531),
        ];

        let out = Binlog2Sql::new(FakeSource::new(script), opts)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        let ids: Vec<&str> = out
            .iter()
            .map(|s| &s.sql["DELETE FROM `testdb`.`t` WHERE `id`=".len()..][..1])
            .collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_flashback_pacing() {
        let rows: Vec<RowImage> = (0..2500).map(|i| row(i, "x")).collect();
        let script = vec![begin(300), insert(90_000, TS, rows), commit(90_031)];

        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.flashback = true;
        opts.back_interval = 0.5;
        let engine = Binlog2Sql::new(FakeSource::new(script.clone()), opts).await.unwrap();

        let mut out = Vec::new();
        let summary = engine.run(&mut out).await.unwrap();
        assert_eq!(summary.statements, 2500);
        assert_eq!(out.len(), 2502);
        assert_eq!(out[1000].sql, "SELECT SLEEP(0.5);");
        assert_eq!(out[2001].sql, "SELECT SLEEP(0.5);");
        assert!(out[0].sql.contains("`id`=2499 "));
        assert!(out[2501].sql.contains("`id`=0 "));

        let mut opts = options(&dir);
        opts.flashback = true;
        opts.back_interval = 0.0;
        let out = Binlog2Sql::new(FakeSource::new(script), opts)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(out.len(), 2500);
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_scratch_removed_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.flashback = true;
        let mut source = FakeSource::new(vec![begin(300), insert(420, TS, vec![row(1, "a")])]);
        source.eof = BinlogPosition::new(FILE, 10_000);
        source.fail_at_end = true;

        let engine = Binlog2Sql::new(source, opts).await.unwrap();
        let err = engine.collect().await.unwrap_err();

        assert!(matches!(err, Error::BinlogDecode(_)));
        assert!(engine.source().closed.load(Ordering::SeqCst));
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_flashback_with_no_pk_fails_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.flashback = true;
        opts.no_pk = true;
        let source = FakeSource::new(insert_transaction());
        let opened = Arc::clone(&source.opened);

        let err = Binlog2Sql::new(source, opts).await.err().unwrap();
        assert!(err.is_config());
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_start_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.start_file = Some("binlog.000005".into());
        let mut source = FakeSource::new(insert_transaction());
        source.logs = (10..=20).map(|i| format!("binlog.{:06}", i)).collect();
        let opened = Arc::clone(&source.opened);

        let err = Binlog2Sql::new(source, opts).await.err().unwrap();
        assert!(err.is_config());
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    fn rotate(pos: u64, next_file: &str) -> (u64, BinlogEvent) {
        at(
            pos,
            TS,
            EventBody::Rotate {
                next_file: next_file.to_string(),
                position: 4,
            },
        )
    }

    #[tokio::test]
    async fn test_scan_across_rotation_stops_outside_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.end_file = Some("binlog.000002".into());

        let script = vec![
            begin(300),
            insert(400, TS, vec![row(1, "a")]),
            commit(431),
            rotate(478, "binlog.000002"),
            at(124, TS, EventBody::FormatDescription),
            begin(300),
            insert(400, TS, vec![row(2, "b")]),
            commit(431),
            rotate(478, "binlog.000003"),
            at(124, TS, EventBody::FormatDescription),
            begin(300),
            insert(400, TS, vec![row(3, "c")]),
            commit(431),
        ];
        let mut source = FakeSource::new(script);
        source.logs = (1..=3).map(|i| format!("binlog.{:06}", i)).collect();
        source.eof = BinlogPosition::new("binlog.000003", 431);

        let engine = Binlog2Sql::new(source, opts).await.unwrap();
        assert_eq!(engine.window().files, vec!["binlog.000001", "binlog.000002"]);

        let mut out = Vec::new();
        let summary = engine.run(&mut out).await.unwrap();

        let sql: Vec<&str> = out.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "INSERT INTO `testdb`.`t`(`id`,`name`) VALUES (1,'a');",
                "INSERT INTO `testdb`.`t`(`id`,`name`) VALUES (2,'b');",
            ]
        );
        assert_eq!(summary.stop, StopReason::OutsideWindow);
        assert!(engine.source().closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_zero_limit_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.max_statements = Some(0);
        let engine = Binlog2Sql::new(FakeSource::new(insert_transaction()), opts)
            .await
            .unwrap();
        let mut out = Vec::new();
        let summary = engine.run(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(summary.stop, StopReason::Limit);

        let mut opts = options(&dir);
        opts.max_statements = Some(0);
        opts.flashback = true;
        let engine = Binlog2Sql::new(FakeSource::new(insert_transaction()), opts)
            .await
            .unwrap();
        let mut out = Vec::new();
        let summary = engine.run(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(summary.statements, 0);
        assert_eq!(summary.stop, StopReason::Limit);
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_missing_server_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new(insert_transaction());
        source.server_id = None;

        let err = Binlog2Sql::new(source, options(&dir)).await.err().unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_stops_at_end_pos() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.end_pos = Some(420);
        let mut script = insert_transaction();
        script.push(begin(520));
        script.push(insert(600, TS, vec![row(2, "b")]));
        let source = FakeSource::new(script);

        let engine = Binlog2Sql::new(source, opts).await.unwrap();
        let mut out = Vec::new();
        let summary = engine.run(&mut out).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(summary.stop, StopReason::EndPosition);
        assert_eq!(summary.events, 3);
    }

    #[tokio::test]
    async fn test_skips_events_before_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        let start = BinlogEvent::new(TS + 100, 0, EventBody::Xid).local_time();
        opts.start_time = Some(start.format(DATETIME_FORMAT).to_string());

        let script = vec![
            begin(300),
            insert(400, TS, vec![row(1, "early")]),
            commit(431),
            at(500, TS + 200, EventBody::Query(QueryEvent::new("testdb", "BEGIN"))),
            insert(600, TS + 200, vec![row(2, "late")]),
            at(631, TS + 200, EventBody::Xid),
        ];

        let out = Binlog2Sql::new(FakeSource::new(script), opts)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert!(out[0].sql.contains("'late'"));
        // the transaction starts where the skipped COMMIT ended
        assert_eq!(out[0].provenance.unwrap().start_pos, 431);
    }

    #[tokio::test]
    async fn test_stop_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        let stop = BinlogEvent::new(TS + 100, 0, EventBody::Xid).local_time();
        opts.stop_time = Some(stop.format(DATETIME_FORMAT).to_string());

        let script = vec![
            begin(300),
            insert(400, TS, vec![row(1, "a")]),
            insert(500, TS + 100, vec![row(2, "b")]),
            commit(531),
        ];

        let engine = Binlog2Sql::new(FakeSource::new(script), opts).await.unwrap();
        let mut out = Vec::new();
        let summary = engine.run(&mut out).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(summary.stop, StopReason::StopTime);
    }

    #[tokio::test]
    async fn test_schema_changes() {
        let script = vec![
            at(300, TS, EventBody::Query(QueryEvent::new("testdb", "ALTER TABLE t ADD COLUMN c INT"))),
            begin(380),
            insert(440, TS, vec![row(1, "a")]),
            commit(471),
        ];

        let dir = tempfile::tempdir().unwrap();
        let out = Binlog2Sql::new(FakeSource::new(script.clone()), options(&dir))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sql, "USE `testdb`;\nALTER TABLE t ADD COLUMN c INT;");
        assert_eq!(out[0].provenance, None);

        let mut opts = options(&dir);
        opts.only_dml = true;
        let out = Binlog2Sql::new(FakeSource::new(script), opts)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].sql.starts_with("INSERT"));
    }

    #[tokio::test]
    async fn test_sql_type_filter_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![
            begin(300),
            insert(400, TS, vec![row(1, "a"), row(2, "b"), row(3, "c")]),
            at(
                500,
                TS,
                EventBody::DeleteRows(RowsEvent::new("testdb", "t", vec![row(9, "z")])),
            ),
            commit(531),
        ];

        let mut opts = options(&dir);
        opts.sql_types = vec![crate::binlog::SqlVerb::Delete];
        let out = Binlog2Sql::new(FakeSource::new(script.clone()), opts)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].sql.starts_with("DELETE"));

        let mut opts = options(&dir);
        opts.max_statements = Some(2);
        let engine = Binlog2Sql::new(FakeSource::new(script), opts).await.unwrap();
        let mut out = Vec::new();
        let summary = engine.run(&mut out).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(summary.stop, StopReason::Limit);
        assert!(engine.source().closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_never_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.stop_never = true;

        let engine = Binlog2Sql::new(FakeSource::new(insert_transaction()), opts)
            .await
            .unwrap();
        let mut out = Vec::new();
        let summary = engine
            .run_until(&mut out, tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(summary.stop, StopReason::Interrupted);
        assert!(engine.source().closed.load(Ordering::SeqCst));
    }
}
