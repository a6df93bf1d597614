use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, error, info, trace, warn};

use super::error::{ConnectionError, HandlerError, PipelineError, PublishError};
use super::logging::{Level, LogRecord};
use super::test_support::CapturedLogs;

#[test]
fn test_every_log_line_has_the_fixed_fields() {
    let (logs, _guard) = CapturedLogs::install("ingestor");

    debug!("debug line");
    info!(attempt = 3, host = "rabbitmq", "info line");
    warn!(error = %"boom", "warning line");
    error!("error line");

    let records = logs.records();
    assert_eq!(records.len(), 4);
    for record in &records {
        for key in ["timestamp", "level", "service_name", "message"] {
            assert!(record.get(key).is_some(), "missing {key} in {record}");
        }
        assert_eq!(record["service_name"], "ingestor");
        let level = record["level"].as_str().unwrap();
        assert!(["DEBUG", "INFO", "WARNING", "ERROR"].contains(&level));
    }

    assert_eq!(records[1]["message"], "info line");
    assert_eq!(records[1]["attempt"], 3);
    assert_eq!(records[1]["host"], "rabbitmq");
    assert_eq!(records[2]["level"], "WARNING");
    assert_eq!(records[2]["error"], "boom");
}

#[test]
fn test_each_event_is_exactly_one_line() {
    let (logs, _guard) = CapturedLogs::install("processor");

    info!(payload = "line one\nline two", "multi\nline message");

    let raw = logs.raw();
    assert_eq!(raw.lines().count(), 1);
    assert!(raw.ends_with('\n'));
    let record: Value = serde_json::from_str(raw.trim_end()).unwrap();
    assert_eq!(record["message"], "multi\nline message");
}

#[test]
fn test_trace_events_are_reported_as_debug() {
    let (logs, _guard) = CapturedLogs::install("processor");

    trace!("very chatty");

    // The capture subscriber filters at DEBUG, so TRACE never reaches it.
    assert!(logs.records().is_empty());
    assert_eq!(Level::from(&tracing::Level::TRACE), Level::Debug);
}

#[test]
fn test_timestamp_is_utc_iso8601() {
    let (logs, _guard) = CapturedLogs::install("ingestor");

    info!("tick");

    let record = &logs.records()[0];
    let timestamp = record["timestamp"].as_str().unwrap();
    assert!(timestamp.ends_with('Z'));
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
}

#[test]
fn test_context_keys_do_not_clobber_fixed_fields() {
    let record = LogRecord::new(Level::Info, "ingestor", "hello")
        .with_context("level", "shadow")
        .with_context("queue", "game_events");

    let parsed: Value = serde_json::from_str(&record.to_json_line()).unwrap();
    assert_eq!(parsed["level"], "INFO");
    assert_eq!(parsed["context_level"], "shadow");
    assert_eq!(parsed["queue"], "game_events");
}

#[test]
fn test_log_record_serializes_nested_context() {
    let record = LogRecord::new(Level::Error, "processor", "failed")
        .with_context("details", json!({"game_id": "test_001", "tries": 2}));

    let parsed: Value = serde_json::from_str(&record.to_json_line()).unwrap();
    assert_eq!(parsed["details"]["game_id"], "test_001");
    assert_eq!(parsed["level"], "ERROR");
}

#[test]
fn test_level_parse_accepts_aliases() {
    assert_eq!(Level::parse("info"), Some(Level::Info));
    assert_eq!(Level::parse("WARN"), Some(Level::Warning));
    assert_eq!(Level::parse(" warning "), Some(Level::Warning));
    assert_eq!(Level::parse("trace"), Some(Level::Debug));
    assert_eq!(Level::parse("Error"), Some(Level::Error));
    assert_eq!(Level::parse("verbose"), None);
}

#[test]
fn test_connection_level_classification() {
    let dropped = PipelineError::from(ConnectionError::Closed("channel closed".into()));
    assert!(dropped.is_connection_level());

    let transport = PipelineError::from(PublishError::Transport(ConnectionError::Transport(
        "broken pipe".into(),
    )));
    assert!(transport.is_connection_level());

    let rejected = PipelineError::from(PublishError::Rejected {
        message_id: "m-1".into(),
    });
    assert!(!rejected.is_connection_level());

    let handler = PipelineError::from(HandlerError::Failed("nope".into()));
    assert!(!handler.is_connection_level());

    let gave_up = PipelineError::from(ConnectionError::GaveUp {
        attempts: 7,
        elapsed: Duration::from_secs(120),
    });
    assert!(!gave_up.is_connection_level());
}

#[test]
fn test_decode_failures_are_permanent() {
    let decode = serde_json::from_slice::<Value>(b"{not json").unwrap_err();
    assert!(HandlerError::from(decode).is_permanent());
    assert!(!HandlerError::Failed("busy".into()).is_permanent());
}
