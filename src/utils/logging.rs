//! Structured JSON logging.
//!
//! Every `tracing` event is rendered as one newline-delimited JSON object on
//! standard output:
//!
//! ```text
//! {"timestamp":"2024-09-01T12:00:00.000000Z","level":"INFO","service_name":"ingestor","message":"...","attempt":1}
//! ```
//!
//! The four fixed keys are always present. Any other event fields are
//! flattened next to them. Levels are reported as `DEBUG`, `INFO`, `WARNING`
//! or `ERROR`; `TRACE` events fold into `DEBUG`.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

const RESERVED_KEYS: [&str; 4] = ["timestamp", "level", "service_name", "message"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }

    /// Parses a `LOG_LEVEL` value. Case-insensitive; `WARN` and `TRACE` are
    /// accepted as aliases.
    pub fn parse(value: &str) -> Option<Level> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TRACE" | "DEBUG" => Some(Level::Debug),
            "INFO" => Some(Level::Info),
            "WARN" | "WARNING" => Some(Level::Warning),
            "ERROR" => Some(Level::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::INFO => Level::Info,
            _ => Level::Debug,
        }
    }
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => LevelFilter::DEBUG,
            Level::Info => LevelFilter::INFO,
            Level::Warning => LevelFilter::WARN,
            Level::Error => LevelFilter::ERROR,
        }
    }
}

/// A single log line. Built once per event and never mutated after it is
/// rendered.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: Level,
    pub service_name: String,
    pub message: String,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl LogRecord {
    pub fn new(level: Level, service_name: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            level,
            service_name: service_name.to_string(),
            message: message.into(),
            context: Map::new(),
        }
    }

    /// Adds a context key. Keys that collide with the fixed fields are
    /// prefixed with `context_`.
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert_context(key, value.into());
        self
    }

    fn insert_context(&mut self, key: &str, value: Value) {
        if RESERVED_KEYS.contains(&key) {
            self.context.insert(format!("context_{key}"), value);
        } else {
            self.context.insert(key.to_string(), value);
        }
    }

    /// Renders the record as one JSON line without the trailing newline.
    /// Falls back to a minimal line if serialization fails.
    pub fn to_json_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => line,
            Err(_) => self.fallback_line(),
        }
    }

    fn fallback_line(&self) -> String {
        format!(
            "{{\"timestamp\":{},\"level\":\"{}\",\"service_name\":{},\"message\":{}}}",
            Value::from(self.timestamp.as_str()),
            self.level,
            Value::from(self.service_name.as_str()),
            Value::from(self.message.as_str()),
        )
    }
}

struct RecordVisitor<'a> {
    record: &'a mut LogRecord,
}

impl RecordVisitor<'_> {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.record.message = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
        } else {
            self.record.insert_context(field.name(), value);
        }
    }
}

impl Visit for RecordVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::from(format!("{value:?}")));
    }
}

/// `tracing-subscriber` event formatter producing [`LogRecord`] lines.
#[derive(Debug, Clone)]
pub struct JsonLineFormat {
    service_name: String,
}

impl JsonLineFormat {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    pub fn record_for(&self, event: &Event<'_>) -> LogRecord {
        let mut record = LogRecord::new(
            Level::from(event.metadata().level()),
            &self.service_name,
            String::new(),
        );
        event.record(&mut RecordVisitor {
            record: &mut record,
        });
        record
    }
}

impl<S, N> FormatEvent<S, N> for JsonLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        writeln!(writer, "{}", self.record_for(event).to_json_line())
    }
}

/// Builds a subscriber that writes JSON lines for `service_name` to `writer`.
pub fn subscriber<W>(service_name: &str, level: Level, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(level))
        .event_format(JsonLineFormat::new(service_name))
        .with_writer(writer)
        .finish()
}

/// Installs the global JSON subscriber writing to stdout.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(service_name: &str, level: Level) {
    let _ = tracing::subscriber::set_global_default(subscriber(
        service_name,
        level,
        std::io::stdout,
    ));
}
