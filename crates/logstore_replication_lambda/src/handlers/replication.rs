use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::adapters::log_store::{LogStoreConnector, SourceLogStore, TargetLogStore};
use crate::runtime::contract::{
    invocation_fingerprint, parse_parameter, BatchGetLogRequest, PutLogsRequest,
    ReplicationEvent, TargetDescriptor, TransferResult,
};
use crate::runtime::error::ReplicationError;
use crate::runtime::retry::{run_with_retry, RetryOutcome, RetryPolicy};
use crate::runtime::settings::ReplicationSettings;

const BATCH_GET_LOG: &str = "BatchGetLog";
const PUT_LOGS: &str = "PutLogs";

/// A validated invocation, ready to run. Building one performs no I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationPlan {
    pub event: ReplicationEvent,
    pub target: TargetDescriptor,
    pub policy: RetryPolicy,
    pub page_size_hint: u32,
    pub fingerprint: String,
}

pub fn prepare_replication(
    event: ReplicationEvent,
    settings: &ReplicationSettings,
) -> Result<ReplicationPlan, ReplicationError> {
    let parameter = parse_parameter(&event.parameter)?;
    let policy = settings.retry.with_overrides(&parameter.retry)?;
    let fingerprint = invocation_fingerprint(&event.source, &parameter.target);

    Ok(ReplicationPlan {
        event,
        target: parameter.target,
        policy,
        page_size_hint: settings.page_size_hint,
        fingerprint,
    })
}

pub fn handle_replication_event(
    event: ReplicationEvent,
    settings: &ReplicationSettings,
    connector: &dyn LogStoreConnector,
) -> Result<TransferResult, ReplicationError> {
    let plan = prepare_replication(event, settings)?;
    run_replication(&plan, connector)
}

pub fn run_replication(
    plan: &ReplicationPlan,
    connector: &dyn LogStoreConnector,
) -> Result<TransferResult, ReplicationError> {
    let source = &plan.event.source;
    let span = tracing::info_span!(
        "replication",
        project_name = %source.project_name,
        job_name = %plan.event.job_name,
        task_id = %plan.event.task_id,
        shard_id = source.shard_id,
    );
    let _entered = span.enter();

    let started_at = Instant::now();
    tracing::info!(
        logstore_name = %source.logstore_name,
        begin_cursor = %source.begin_cursor,
        end_cursor = %source.end_cursor,
        cursor_time = cursor_time_rfc3339(plan.event.cursor_time).as_deref(),
        target_project_name = %plan.target.project_name,
        target_logstore_name = %plan.target.logstore_name,
        fingerprint = %plan.fingerprint,
        "replication_started"
    );

    let source_client =
        connector
            .connect_source(&source.endpoint)
            .map_err(|error| ReplicationError::Connect {
                endpoint: source.endpoint.clone(),
                source: error,
            })?;
    let target_client =
        connector
            .connect_target(&plan.target.endpoint)
            .map_err(|error| ReplicationError::Connect {
                endpoint: plan.target.endpoint.clone(),
                source: error,
            })?;

    match replicate_shard(plan, &*source_client, &*target_client) {
        Ok(result) => {
            tracing::info!(
                ingest_bytes = result.ingest_bytes,
                ingest_lines = result.ingest_lines,
                ship_bytes = result.ship_bytes,
                ship_lines = result.ship_lines,
                complete = result.is_complete(),
                duration_ms = started_at.elapsed().as_millis() as u64,
                fingerprint = %plan.fingerprint,
                "replication_completed"
            );
            Ok(result)
        }
        Err(error) => {
            let partial = error.partial_result().copied().unwrap_or_default();
            tracing::error!(
                error = %error,
                ingest_bytes = partial.ingest_bytes,
                ingest_lines = partial.ingest_lines,
                ship_bytes = partial.ship_bytes,
                ship_lines = partial.ship_lines,
                duration_ms = started_at.elapsed().as_millis() as u64,
                fingerprint = %plan.fingerprint,
                "replication_failed"
            );
            Err(error)
        }
    }
}

/// Copies every log group between the begin and end cursor of one shard.
///
/// Pages are read and drained strictly one after another. The cursor only
/// ever moves to the `next_cursor` the source returned, and a page that does
/// not move it ends the run with [`ReplicationError::CursorStalled`] once its
/// records are shipped. Records already shipped stay shipped when a later
/// call fails.
pub fn replicate_shard<S, T>(
    plan: &ReplicationPlan,
    source: &S,
    target: &T,
) -> Result<TransferResult, ReplicationError>
where
    S: SourceLogStore + ?Sized,
    T: TargetLogStore + ?Sized,
{
    let descriptor = &plan.event.source;
    let end_cursor = &descriptor.end_cursor;
    let mut cursor = descriptor.begin_cursor.clone();
    let mut result = TransferResult::default();

    while cursor != *end_cursor {
        let page_span = tracing::info_span!("page", cursor = %cursor);
        let _entered = page_span.enter();

        let request = BatchGetLogRequest {
            project: &descriptor.project_name,
            logstore: &descriptor.logstore_name,
            shard_id: descriptor.shard_id,
            count: plan.page_size_hint,
            cursor: &cursor,
            end_cursor,
        };
        let mut read_attempts = 0;
        let page = match run_with_retry(&plan.policy, BATCH_GET_LOG, |attempt| {
            read_attempts = attempt;
            source.batch_get_log(&request)
        }) {
            Ok(RetryOutcome::Completed(page)) => page,
            Ok(RetryOutcome::Ignored(_)) => {
                // No next cursor is known, so nothing past this point can be read.
                tracing::error!(
                    end_cursor = %end_cursor,
                    "replication_truncated"
                );
                break;
            }
            Err(error) => {
                return Err(ReplicationError::ReadFailed {
                    source: error,
                    partial: result,
                })
            }
        };

        tracing::info!(
            retry_time = read_attempts,
            next_cursor = %page.next_cursor,
            log_group_count = page.records.len(),
            raw_size = page.raw_size,
            "{BATCH_GET_LOG} success"
        );

        for record in &page.records {
            result.record_ingested(record);
            let request = PutLogsRequest::for_record(&plan.target, record);
            let mut write_attempts = 0;
            match run_with_retry(&plan.policy, PUT_LOGS, |attempt| {
                write_attempts = attempt;
                target.put_logs(&request)
            }) {
                Ok(RetryOutcome::Completed(())) => {
                    result.record_shipped(record);
                    tracing::info!(
                        retry_time = write_attempts,
                        log_count = record.log_count,
                        "{PUT_LOGS} success"
                    );
                }
                Ok(RetryOutcome::Ignored(_)) => {}
                Err(error) => {
                    return Err(ReplicationError::WriteFailed {
                        source: error,
                        partial: result,
                    })
                }
            }
        }

        // Re-reading from the same cursor would ship the same groups again.
        if page.next_cursor == cursor {
            return Err(ReplicationError::CursorStalled {
                cursor: cursor.to_string(),
                end_cursor: end_cursor.to_string(),
                partial: result,
            });
        }
        cursor = page.next_cursor;
    }

    Ok(result)
}

fn cursor_time_rfc3339(cursor_time: Option<i64>) -> Option<String> {
    cursor_time
        .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
        .map(|time| time.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::logging::json_layer;
    use crate::runtime::contract::{BatchPage, Cursor, LogGroupRecord};
    use crate::runtime::error::StoreError;

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<BatchPage, StoreError>>>,
        cursors: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<BatchPage, StoreError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                cursors: Mutex::new(Vec::new()),
            }
        }

        fn cursors(&self) -> Vec<String> {
            self.cursors.lock().expect("poisoned mutex").clone()
        }
    }

    impl SourceLogStore for ScriptedSource {
        fn batch_get_log(&self, request: &BatchGetLogRequest<'_>) -> Result<BatchPage, StoreError> {
            self.cursors
                .lock()
                .expect("poisoned mutex")
                .push(request.cursor.to_string());
            self.responses
                .lock()
                .expect("poisoned mutex")
                .pop_front()
                .unwrap_or_else(|| Err(StoreError::new("Unscripted", "no response left", "")))
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Written {
        topic: String,
        source: String,
        log_count: u64,
        payload: Vec<u8>,
    }

    struct RecordingTarget {
        writes: Mutex<Vec<Written>>,
        attempts: Mutex<Vec<Vec<u8>>>,
        failures: Mutex<HashMap<Vec<u8>, u32>>,
    }

    impl RecordingTarget {
        fn new() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                attempts: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
            }
        }

        fn failing(self, payload: &[u8], times: u32) -> Self {
            self.failures
                .lock()
                .expect("poisoned mutex")
                .insert(payload.to_vec(), times);
            self
        }

        fn writes(&self) -> Vec<Written> {
            self.writes.lock().expect("poisoned mutex").clone()
        }

        fn attempts_for(&self, payload: &[u8]) -> usize {
            self.attempts
                .lock()
                .expect("poisoned mutex")
                .iter()
                .filter(|attempt| attempt.as_slice() == payload)
                .count()
        }
    }

    impl TargetLogStore for RecordingTarget {
        fn put_logs(&self, request: &PutLogsRequest<'_>) -> Result<(), StoreError> {
            self.attempts
                .lock()
                .expect("poisoned mutex")
                .push(request.payload.to_vec());

            let mut failures = self.failures.lock().expect("poisoned mutex");
            if let Some(remaining) = failures.get_mut(request.payload) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::new(
                        "WriteQuotaExceed",
                        "shard write quota exceed",
                        "req-put",
                    ));
                }
            }

            self.writes.lock().expect("poisoned mutex").push(Written {
                topic: request.topic.to_string(),
                source: request.source.to_string(),
                log_count: request.log_count,
                payload: request.payload.to_vec(),
            });
            Ok(())
        }
    }

    struct FakeConnector {
        source: ScriptedSource,
        target: RecordingTarget,
        connects: Mutex<Vec<String>>,
    }

    impl FakeConnector {
        fn new(source: ScriptedSource, target: RecordingTarget) -> Self {
            Self {
                source,
                target,
                connects: Mutex::new(Vec::new()),
            }
        }

        fn connects(&self) -> Vec<String> {
            self.connects.lock().expect("poisoned mutex").clone()
        }
    }

    impl LogStoreConnector for FakeConnector {
        fn connect_source(
            &self,
            endpoint: &str,
        ) -> Result<Box<dyn SourceLogStore + '_>, StoreError> {
            self.connects
                .lock()
                .expect("poisoned mutex")
                .push(endpoint.to_string());
            Ok(Box::new(&self.source))
        }

        fn connect_target(
            &self,
            endpoint: &str,
        ) -> Result<Box<dyn TargetLogStore + '_>, StoreError> {
            self.connects
                .lock()
                .expect("poisoned mutex")
                .push(endpoint.to_string());
            Ok(Box::new(&self.target))
        }
    }

    fn record(topic: Option<&str>, log_count: u64, size: usize, fill: u8) -> LogGroupRecord {
        LogGroupRecord {
            topic: topic.map(str::to_string),
            source: Some("10.0.0.1".to_string()),
            log_count,
            payload: vec![fill; size],
        }
    }

    fn page(records: Vec<LogGroupRecord>, next_cursor: &str) -> Result<BatchPage, StoreError> {
        let raw_size = records.iter().map(LogGroupRecord::byte_len).sum();
        Ok(BatchPage {
            records,
            raw_size,
            next_cursor: Cursor::new(next_cursor),
        })
    }

    fn read_error() -> StoreError {
        StoreError::new("ReadQuotaExceed", "shard read quota exceed", "req-get")
    }

    fn event(begin: &str, end: &str, parameter: serde_json::Value) -> ReplicationEvent {
        ReplicationEvent::from_value(json!({
            "source": {
                "endpoint": "https://source.log.example.com",
                "projectName": "etl-source",
                "logstoreName": "access-log",
                "shardId": 0,
                "beginCursor": begin,
                "endCursor": end
            },
            "parameter": parameter,
            "jobName": "replicate-access-log",
            "taskId": "task-1"
        }))
        .expect("event should decode")
    }

    fn target_parameter() -> serde_json::Value {
        json!({
            "target": {
                "endpoint": "https://target.log.example.com",
                "projectName": "etl-target",
                "logstoreName": "access-log-copy"
            }
        })
    }

    fn settings(max_retry_times: u32, ignore_fail: bool) -> ReplicationSettings {
        ReplicationSettings {
            retry: RetryPolicy {
                max_retry_times,
                retry_sleep: Duration::ZERO,
                ignore_fail,
            },
            page_size_hint: 3,
        }
    }

    fn plan(begin: &str, end: &str, max_retry_times: u32, ignore_fail: bool) -> ReplicationPlan {
        prepare_replication(
            event(begin, end, target_parameter()),
            &settings(max_retry_times, ignore_fail),
        )
        .expect("plan should build")
    }

    #[test]
    fn equal_cursors_read_nothing() {
        let source = ScriptedSource::new(Vec::new());
        let target = RecordingTarget::new();

        let result = replicate_shard(&plan("c5", "c5", 10, false), &source, &target)
            .expect("empty interval should succeed");

        assert_eq!(result, TransferResult::default());
        assert!(source.cursors().is_empty());
        assert!(target.writes().is_empty());
    }

    #[test]
    fn two_page_transfer_ships_everything() {
        let source = ScriptedSource::new(vec![
            page(vec![record(Some("nginx"), 5, 100, 1)], "c1"),
            page(vec![record(Some("nginx"), 3, 60, 2)], "c2"),
        ]);
        let target = RecordingTarget::new();

        let result = replicate_shard(&plan("c0", "c2", 10, false), &source, &target)
            .expect("transfer should succeed");

        assert_eq!(
            result,
            TransferResult {
                ingest_bytes: 160,
                ingest_lines: 8,
                ship_bytes: 160,
                ship_lines: 8,
            }
        );
        assert_eq!(source.cursors(), vec!["c0", "c1"]);
        assert_eq!(target.writes().len(), 2);
    }

    #[test]
    fn multi_record_page_counts_every_entry() {
        let source = ScriptedSource::new(vec![page(
            vec![
                record(Some("a"), 2, 10, 1),
                record(Some("b"), 4, 20, 2),
                record(Some("c"), 6, 30, 3),
            ],
            "end",
        )]);
        let target = RecordingTarget::new();

        let result = replicate_shard(&plan("start", "end", 10, false), &source, &target)
            .expect("transfer should succeed");

        assert_eq!(result.ingest_lines, 12);
        assert_eq!(result.ship_lines, 12);
        assert_eq!(result.ship_bytes, result.ingest_bytes);
        assert_eq!(
            target
                .writes()
                .iter()
                .map(|written| written.topic.as_str())
                .collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn absent_tags_are_written_as_empty_strings() {
        let mut untagged = record(None, 1, 8, 9);
        untagged.source = None;
        let source = ScriptedSource::new(vec![page(vec![untagged], "c1")]);
        let target = RecordingTarget::new();

        replicate_shard(&plan("c0", "c1", 10, false), &source, &target)
            .expect("transfer should succeed");

        let writes = target.writes();
        assert_eq!(writes[0].topic, "");
        assert_eq!(writes[0].source, "");
    }

    #[test]
    fn transient_write_failures_are_retried() {
        let source = ScriptedSource::new(vec![page(vec![record(Some("t"), 2, 4, 7)], "c1")]);
        let target = RecordingTarget::new().failing(&[7; 4], 2);

        let result = replicate_shard(&plan("c0", "c1", 10, false), &source, &target)
            .expect("transfer should recover");

        assert_eq!(target.attempts_for(&[7; 4]), 3);
        assert!(result.is_complete());
    }

    #[test]
    fn exhausted_write_is_fatal_and_keeps_earlier_records() {
        let source = ScriptedSource::new(vec![page(
            vec![record(Some("t"), 1, 4, 1), record(Some("t"), 2, 6, 2)],
            "c1",
        )]);
        let target = RecordingTarget::new().failing(&[2; 6], u32::MAX);

        let error = replicate_shard(&plan("c0", "c1", 4, false), &source, &target)
            .expect_err("exhausted write should be fatal");

        assert_eq!(target.attempts_for(&[1; 4]), 1);
        assert_eq!(target.attempts_for(&[2; 6]), 4);
        match error {
            ReplicationError::WriteFailed { source, partial } => {
                assert_eq!(source.attempts, 4);
                assert_eq!(source.last_error.request_id, "req-put");
                assert_eq!(
                    partial,
                    TransferResult {
                        ingest_bytes: 10,
                        ingest_lines: 3,
                        ship_bytes: 4,
                        ship_lines: 1,
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ignored_write_failure_drops_record_and_continues() {
        let source = ScriptedSource::new(vec![
            page(
                vec![record(Some("t"), 1, 4, 1), record(Some("t"), 2, 6, 2)],
                "c1",
            ),
            page(vec![record(Some("t"), 3, 8, 3)], "c2"),
        ]);
        let target = RecordingTarget::new().failing(&[2; 6], u32::MAX);

        let result = replicate_shard(&plan("c0", "c2", 3, true), &source, &target)
            .expect("ignored failure should not be fatal");

        assert_eq!(target.attempts_for(&[2; 6]), 3);
        assert_eq!(
            result,
            TransferResult {
                ingest_bytes: 18,
                ingest_lines: 6,
                ship_bytes: 12,
                ship_lines: 4,
            }
        );
        assert!(result.ship_lines <= result.ingest_lines);
    }

    #[test]
    fn exhausted_read_is_fatal_after_max_attempts() {
        let source = ScriptedSource::new((0..10).map(|_| Err(read_error())).collect());
        let target = RecordingTarget::new();

        let error = replicate_shard(&plan("c0", "c1", 10, false), &source, &target)
            .expect_err("exhausted read should be fatal");

        assert_eq!(source.cursors().len(), 10);
        let message = error.to_string();
        assert!(message.contains("BatchGetLog fail, retry_time: 10"));
        assert!(message.contains("error_code: ReadQuotaExceed"));
        assert!(message.contains("request_id: req-get"));
    }

    #[test]
    fn ignored_read_failure_ends_replication_with_partial_counters() {
        let mut responses = vec![page(vec![record(Some("t"), 5, 100, 1)], "c1")];
        responses.extend((0..3).map(|_| Err(read_error())));
        let source = ScriptedSource::new(responses);
        let target = RecordingTarget::new();

        let result = replicate_shard(&plan("c0", "c9", 3, true), &source, &target)
            .expect("ignored read failure should not be fatal");

        assert_eq!(source.cursors(), vec!["c0", "c1", "c1", "c1"]);
        assert_eq!(result.ship_lines, 5);
        assert_eq!(result.ingest_lines, 5);
    }

    #[test]
    fn read_recovers_from_transient_failures() {
        let source = ScriptedSource::new(vec![
            Err(read_error()),
            Err(read_error()),
            page(vec![record(Some("t"), 1, 4, 1)], "c1"),
        ]);
        let target = RecordingTarget::new();

        let result = replicate_shard(&plan("c0", "c1", 10, false), &source, &target)
            .expect("read should recover");

        assert_eq!(source.cursors(), vec!["c0", "c0", "c0"]);
        assert_eq!(result.ship_lines, 1);
    }

    #[test]
    fn stalled_cursor_is_reported_instead_of_looping() {
        let source = ScriptedSource::new(vec![page(Vec::new(), "c0")]);
        let target = RecordingTarget::new();

        let error = replicate_shard(&plan("c0", "c1", 10, false), &source, &target)
            .expect_err("stalled cursor should fail");

        assert!(matches!(error, ReplicationError::CursorStalled { .. }));
        assert_eq!(source.cursors().len(), 1);
    }

    #[test]
    fn page_that_does_not_advance_is_shipped_once_then_reported() {
        let source = ScriptedSource::new(vec![
            page(vec![record(Some("t"), 2, 4, 1)], "c0"),
            page(vec![record(Some("t"), 2, 4, 1)], "c0"),
        ]);
        let target = RecordingTarget::new();

        let error = replicate_shard(&plan("c0", "c1", 10, false), &source, &target)
            .expect_err("non-advancing cursor should fail");

        assert_eq!(source.cursors(), vec!["c0"]);
        assert_eq!(target.writes().len(), 1);
        match error {
            ReplicationError::CursorStalled {
                cursor, partial, ..
            } => {
                assert_eq!(cursor, "c0");
                assert_eq!(partial.ship_lines, 2);
                assert_eq!(partial.ingest_lines, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("poisoned mutex").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().expect("poisoned mutex").clone();
            String::from_utf8(bytes)
                .expect("logs should be utf-8")
                .lines()
                .map(|line| serde_json::from_str(line).expect("log line should be JSON"))
                .collect()
        }

        fn find(&self, message: &str) -> serde_json::Value {
            self.lines()
                .into_iter()
                .find(|line| line["fields"]["message"] == message)
                .unwrap_or_else(|| panic!("no '{message}' log line"))
        }
    }

    #[test]
    fn attempt_logs_carry_invocation_context() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::registry().with(json_layer(move || writer.clone()));
        let connector = FakeConnector::new(
            ScriptedSource::new(vec![
                Err(read_error()),
                page(vec![record(Some("t"), 1, 4, 7)], "c1"),
            ]),
            RecordingTarget::new().failing(&[7; 4], 1),
        );

        tracing::subscriber::with_default(subscriber, || {
            handle_replication_event(
                event("c0", "c1", target_parameter()),
                &settings(10, false),
                &connector,
            )
            .expect("replication should recover")
        });

        let read_warning = logs.find("BatchGetLog fail");
        assert_eq!(read_warning["level"], "WARN");
        assert_eq!(read_warning["fields"]["retry_time"], 1);
        assert_eq!(read_warning["fields"]["error_code"], "ReadQuotaExceed");
        assert_eq!(read_warning["fields"]["request_id"], "req-get");
        assert_eq!(read_warning["span"]["cursor"], "c0");
        let invocation = &read_warning["spans"][0];
        assert_eq!(invocation["name"], "replication");
        assert_eq!(invocation["project_name"], "etl-source");
        assert_eq!(invocation["job_name"], "replicate-access-log");
        assert_eq!(invocation["task_id"], "task-1");

        let write_warning = logs.find("PutLogs fail");
        assert_eq!(write_warning["fields"]["error_code"], "WriteQuotaExceed");
        assert_eq!(write_warning["spans"][0]["job_name"], "replicate-access-log");

        assert_eq!(logs.find("BatchGetLog success")["fields"]["retry_time"], 2);
        assert_eq!(logs.find("PutLogs success")["fields"]["retry_time"], 2);
    }

    #[test]
    fn configuration_error_surfaces_before_any_connection() {
        let connector = FakeConnector::new(ScriptedSource::new(Vec::new()), RecordingTarget::new());
        let bad_event = event("c0", "c1", json!({"target": {"endpoint": "https://t"}}));

        let error = handle_replication_event(bad_event, &settings(10, false), &connector)
            .expect_err("missing target fields should fail");

        assert!(matches!(error, ReplicationError::Configuration(_)));
        assert!(connector.connects().is_empty());
        assert!(connector.source.cursors().is_empty());
    }

    #[test]
    fn parameter_retry_overrides_apply_to_the_drive_loop() {
        let connector = FakeConnector::new(
            ScriptedSource::new((0..10).map(|_| Err(read_error())).collect()),
            RecordingTarget::new(),
        );
        let mut parameter = target_parameter();
        parameter["retry"] = json!({"maxRetryTimes": 2, "retrySleepMillis": 0});

        let error = handle_replication_event(
            event("c0", "c1", parameter),
            &settings(10, false),
            &connector,
        )
        .expect_err("read should exhaust");

        assert!(matches!(error, ReplicationError::ReadFailed { .. }));
        assert_eq!(connector.source.cursors().len(), 2);
    }

    #[test]
    fn connects_source_then_target_endpoints() {
        let connector = FakeConnector::new(
            ScriptedSource::new(vec![page(vec![record(Some("t"), 1, 4, 1)], "c1")]),
            RecordingTarget::new(),
        );

        let result = handle_replication_event(
            event("c0", "c1", target_parameter()),
            &settings(10, false),
            &connector,
        )
        .expect("replication should succeed");

        assert_eq!(
            connector.connects(),
            vec![
                "https://source.log.example.com",
                "https://target.log.example.com"
            ]
        );
        assert_eq!(result.ship_bytes, 4);
    }

    #[test]
    fn cursor_time_is_rendered_as_rfc3339() {
        assert_eq!(
            cursor_time_rfc3339(Some(0)).as_deref(),
            Some("1970-01-01T00:00:00+00:00")
        );
        assert_eq!(cursor_time_rfc3339(None), None);
    }
}
