use std::time::Duration;

use serde::Deserialize;

use crate::broker::BrokerEndpoint;
use crate::connection::RetryPolicy;
use crate::utils::error::ConfigurationError;
use crate::utils::logging::Level;

/// Top-level configuration for both services.
///
/// Every section maps onto an environment variable prefix, so
/// `RABBITMQ_HOST` lands in `rabbitmq.host` and `INGESTOR_INTERVAL` in
/// `ingestor.interval`.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub rabbitmq: RabbitmqSettings,
    pub ingestor: IngestorSettings,
    pub processor: ProcessorSettings,
    pub retry: RetrySettings,
    pub log: LogSettings,
}

/// Broker endpoint and channel options.
#[derive(Debug, Deserialize, Clone)]
pub struct RabbitmqSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub vhost: String,
    pub queue: String,
    /// Heartbeat interval negotiated with the broker, in seconds.
    pub heartbeat: u16,
    /// Per-attempt connect timeout in seconds. `0` disables it.
    pub timeout: u64,
    /// Wait for publisher confirms instead of fire-and-forget.
    pub confirm: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestorSettings {
    /// Seconds between two published events.
    pub interval: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorSettings {
    pub prefetch: u16,
    /// Handler attempts per message before it is dropped.
    pub attempts: u32,
}

/// Reconnect backoff, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub base: u64,
    pub cap: u64,
    /// Total time allowed for one reconnect sequence. Unset retries forever.
    pub deadline: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration as read from files and the environment.
///
/// Every value is optional; missing ones are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub rabbitmq: Option<PartialRabbitmqSettings>,
    pub ingestor: Option<PartialIngestorSettings>,
    pub processor: Option<PartialProcessorSettings>,
    pub retry: Option<PartialRetrySettings>,
    pub log: Option<PartialLogSettings>,
}

/// Partial broker connection settings.
///
/// Read from `RABBITMQ_*` variables; every field falls back to the default endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct PartialRabbitmqSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub vhost: Option<String>,
    pub queue: Option<String>,
    pub heartbeat: Option<u16>,
    pub timeout: Option<u64>,
    pub confirm: Option<bool>,
}

/// Partial ingestor settings.
///
/// Used when only some of the publishing loop options are set externally.
#[derive(Debug, Deserialize, Default)]
pub struct PartialIngestorSettings {
    pub interval: Option<u64>,
}

/// Partial processor settings.
///
/// Used for consumer options loaded from `PROCESSOR_*` variables.
#[derive(Debug, Deserialize, Default)]
pub struct PartialProcessorSettings {
    pub prefetch: Option<u16>,
    pub attempts: Option<u32>,
}

/// Partial reconnect backoff settings.
///
/// A missing `deadline` keeps the default of retrying forever.
#[derive(Debug, Deserialize, Default)]
pub struct PartialRetrySettings {
    pub base: Option<u64>,
    pub cap: Option<u64>,
    pub deadline: Option<u64>,
}

/// Partial logging settings.
///
/// The level is validated after merging, not while deserializing.
#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rabbitmq: RabbitmqSettings {
                host: "localhost".to_string(),
                port: 5672,
                user: "guest".to_string(),
                pass: "guest".to_string(),
                vhost: "/".to_string(),
                queue: "game_events".to_string(),
                heartbeat: 600,
                timeout: 30,
                confirm: false,
            },
            ingestor: IngestorSettings { interval: 10 },
            processor: ProcessorSettings {
                prefetch: 1,
                attempts: 3,
            },
            retry: RetrySettings {
                base: 1,
                cap: 60,
                deadline: None,
            },
            log: LogSettings {
                level: "INFO".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every missing value of `partial` from the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let rabbitmq = partial.rabbitmq.unwrap_or_default();
        let ingestor = partial.ingestor.unwrap_or_default();
        let processor = partial.processor.unwrap_or_default();
        let retry = partial.retry.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Settings {
            rabbitmq: RabbitmqSettings {
                host: rabbitmq.host.unwrap_or(default.rabbitmq.host),
                port: rabbitmq.port.unwrap_or(default.rabbitmq.port),
                user: rabbitmq.user.unwrap_or(default.rabbitmq.user),
                pass: rabbitmq.pass.unwrap_or(default.rabbitmq.pass),
                vhost: rabbitmq.vhost.unwrap_or(default.rabbitmq.vhost),
                queue: rabbitmq.queue.unwrap_or(default.rabbitmq.queue),
                heartbeat: rabbitmq.heartbeat.unwrap_or(default.rabbitmq.heartbeat),
                timeout: rabbitmq.timeout.unwrap_or(default.rabbitmq.timeout),
                confirm: rabbitmq.confirm.unwrap_or(default.rabbitmq.confirm),
            },
            ingestor: IngestorSettings {
                interval: ingestor.interval.unwrap_or(default.ingestor.interval),
            },
            processor: ProcessorSettings {
                prefetch: processor.prefetch.unwrap_or(default.processor.prefetch),
                attempts: processor.attempts.unwrap_or(default.processor.attempts),
            },
            retry: RetrySettings {
                base: retry.base.unwrap_or(default.retry.base),
                cap: retry.cap.unwrap_or(default.retry.cap),
                deadline: retry.deadline.or(default.retry.deadline),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }

    /// Rejects values the services cannot run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigurationError> {
            Err(ConfigurationError::Invalid {
                field,
                reason: reason.to_string(),
            })
        }

        if self.rabbitmq.host.trim().is_empty() {
            return invalid("rabbitmq.host", "must not be empty");
        }
        if self.rabbitmq.port == 0 {
            return invalid("rabbitmq.port", "must be between 1 and 65535");
        }
        if self.rabbitmq.queue.trim().is_empty() {
            return invalid("rabbitmq.queue", "must not be empty");
        }
        if self.ingestor.interval == 0 {
            return invalid("ingestor.interval", "must be at least 1 second");
        }
        if self.processor.prefetch == 0 {
            return invalid("processor.prefetch", "must be at least 1");
        }
        if self.processor.attempts == 0 {
            return invalid("processor.attempts", "must be at least 1");
        }
        if self.retry.base == 0 {
            return invalid("retry.base", "must be at least 1 second");
        }
        if self.retry.cap < self.retry.base {
            return invalid("retry.cap", "must not be smaller than retry.base");
        }
        if Level::parse(&self.log.level).is_none() {
            return invalid("log.level", "expected one of DEBUG, INFO, WARNING, ERROR");
        }
        Ok(())
    }

    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint {
            host: self.rabbitmq.host.clone(),
            port: self.rabbitmq.port,
            username: self.rabbitmq.user.clone(),
            password: self.rabbitmq.pass.clone(),
            vhost: self.rabbitmq.vhost.clone(),
            queue: self.rabbitmq.queue.clone(),
            heartbeat: self.rabbitmq.heartbeat,
            publisher_confirms: self.rabbitmq.confirm,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry.base),
            Duration::from_secs(self.retry.cap),
        )
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.rabbitmq.timeout > 0).then(|| Duration::from_secs(self.rabbitmq.timeout))
    }

    pub fn retry_deadline(&self) -> Option<Duration> {
        self.retry.deadline.map(Duration::from_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.ingestor.interval)
    }

    /// The configured log level, or INFO if it does not parse. `validate`
    /// rejects unparseable levels before this is reached at startup.
    pub fn log_level(&self) -> Level {
        Level::parse(&self.log.level).unwrap_or(Level::Info)
    }
}
