use std::io;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::subscriber::DefaultGuard;

use super::logging::{self, Level};

/// In-memory log sink shared between the subscriber and the test.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Installs a thread-local JSON subscriber at DEBUG and returns the sink
    /// together with the guard keeping it active.
    pub fn install(service_name: &str) -> (Self, DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let guard = tracing::subscriber::set_default(logging::subscriber(
            service_name,
            Level::Debug,
            move || writer.clone(),
        ));
        (logs, guard)
    }

    pub fn raw(&self) -> String {
        String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
    }

    pub fn records(&self) -> Vec<Value> {
        self.raw()
            .lines()
            .map(|line| serde_json::from_str(line).expect("log line is valid JSON"))
            .collect()
    }

    pub fn with_message(&self, needle: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|r| r["message"].as_str().is_some_and(|m| m.contains(needle)))
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
