//! Pipeline configuration from environment variables

use super::backoff::BackoffSettings;
use super::engine::EngineSettings;
use super::ingestion::IngestionSettings;
use super::scheduler::DEFAULT_BACKLOG_LIMIT;
use crate::transport::StartPosition;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the analytics runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to the SQLite topic log (transport endpoint)
    pub log_path: String,

    pub input_topic: String,
    pub output_topic: String,
    pub consumer_group: String,

    /// Where a group without a committed position starts reading
    pub start_from: StartPosition,

    pub window_size_secs: u64,

    /// Seal-check tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Max records taken from the log per poll
    pub poll_batch: usize,

    /// Wait between polls once the log is drained
    pub poll_idle_ms: u64,

    /// Capacity of the bounded publish queue (results)
    pub result_buffer: usize,

    /// Max results held back while the publish queue is full
    pub result_backlog_limit: usize,

    /// Emit zero-valued results for windows without events
    pub emit_empty_windows: bool,

    pub publish_max_retries: u32,
    pub publish_backoff_ms: u64,
    pub publish_backoff_max_ms: u64,

    /// Log every published result line
    pub echo_results: bool,

    /// Time allowed for draining results on graceful shutdown
    pub shutdown_grace_secs: u64,
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ANALYTICS_LOG_PATH` (default: data/event-log.db)
    /// - `ANALYTICS_INPUT_TOPIC` (default: appointment-events)
    /// - `ANALYTICS_OUTPUT_TOPIC` (default: analytics-results)
    /// - `ANALYTICS_CONSUMER_GROUP` (default: appointment-analytics-group)
    /// - `ANALYTICS_START_FROM` (default: latest)
    /// - `ANALYTICS_WINDOW_SECS` (default: 60)
    /// - `ANALYTICS_TICK_INTERVAL_MS` (default: 200)
    /// - `ANALYTICS_POLL_BATCH` (default: 500)
    /// - `ANALYTICS_POLL_IDLE_MS` (default: 100)
    /// - `ANALYTICS_RESULT_BUFFER` (default: 64)
    /// - `ANALYTICS_RESULT_BACKLOG_LIMIT` (default: 1024)
    /// - `ANALYTICS_EMIT_EMPTY_WINDOWS` (default: false)
    /// - `ANALYTICS_PUBLISH_MAX_RETRIES` (default: 5)
    /// - `ANALYTICS_PUBLISH_BACKOFF_MS` (default: 200)
    /// - `ANALYTICS_PUBLISH_BACKOFF_MAX_MS` (default: 10000)
    /// - `ANALYTICS_ECHO_RESULTS` (default: true)
    /// - `ANALYTICS_SHUTDOWN_GRACE_SECS` (default: 5)
    ///
    /// Unparseable numbers fall back to their default; values that parse but
    /// make no sense (zero sizes, unknown start position) are rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let start_from = env::var("ANALYTICS_START_FROM")
            .unwrap_or_else(|_| "latest".to_string())
            .parse::<StartPosition>()
            .map_err(|e| ConfigError::InvalidValue(format!("ANALYTICS_START_FROM: {}", e)))?;

        let config = Self {
            log_path: env::var("ANALYTICS_LOG_PATH")
                .unwrap_or_else(|_| "data/event-log.db".to_string()),

            input_topic: env::var("ANALYTICS_INPUT_TOPIC")
                .unwrap_or_else(|_| "appointment-events".to_string()),

            output_topic: env::var("ANALYTICS_OUTPUT_TOPIC")
                .unwrap_or_else(|_| "analytics-results".to_string()),

            consumer_group: env::var("ANALYTICS_CONSUMER_GROUP")
                .unwrap_or_else(|_| "appointment-analytics-group".to_string()),

            start_from,
            window_size_secs: var_or("ANALYTICS_WINDOW_SECS", 60),
            tick_interval_ms: var_or("ANALYTICS_TICK_INTERVAL_MS", 200),
            poll_batch: var_or("ANALYTICS_POLL_BATCH", 500),
            poll_idle_ms: var_or("ANALYTICS_POLL_IDLE_MS", 100),
            result_buffer: var_or("ANALYTICS_RESULT_BUFFER", 64),
            result_backlog_limit: var_or("ANALYTICS_RESULT_BACKLOG_LIMIT", DEFAULT_BACKLOG_LIMIT),
            emit_empty_windows: var_or("ANALYTICS_EMIT_EMPTY_WINDOWS", false),
            publish_max_retries: var_or("ANALYTICS_PUBLISH_MAX_RETRIES", 5),
            publish_backoff_ms: var_or("ANALYTICS_PUBLISH_BACKOFF_MS", 200),
            publish_backoff_max_ms: var_or("ANALYTICS_PUBLISH_BACKOFF_MAX_MS", 10_000),
            echo_results: var_or("ANALYTICS_ECHO_RESULTS", true),
            shutdown_grace_secs: var_or("ANALYTICS_SHUTDOWN_GRACE_SECS", 5),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window_size_ms()?;

        let positive = [
            ("ANALYTICS_WINDOW_SECS", self.window_size_secs),
            ("ANALYTICS_TICK_INTERVAL_MS", self.tick_interval_ms),
            ("ANALYTICS_POLL_BATCH", self.poll_batch as u64),
            ("ANALYTICS_RESULT_BUFFER", self.result_buffer as u64),
            ("ANALYTICS_RESULT_BACKLOG_LIMIT", self.result_backlog_limit as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be greater than 0", name)));
            }
        }

        if self.input_topic == self.output_topic {
            return Err(ConfigError::InvalidValue(
                "input and output topics must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Window size in milliseconds; must be positive and fit an `i64`
    pub fn window_size_ms(&self) -> Result<i64, ConfigError> {
        self.window_size_secs
            .checked_mul(1_000)
            .and_then(|ms| i64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "ANALYTICS_WINDOW_SECS out of range: {}",
                    self.window_size_secs
                ))
            })
    }

    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        Ok(EngineSettings {
            window_size_ms: self.window_size_ms()?,
            emit_empty_windows: self.emit_empty_windows,
        })
    }

    pub fn publish_backoff(&self) -> BackoffSettings {
        BackoffSettings {
            initial_delay_ms: self.publish_backoff_ms,
            max_delay_ms: self.publish_backoff_max_ms.max(self.publish_backoff_ms),
            max_retries: self.publish_max_retries,
        }
    }

    pub fn ingestion_settings(&self) -> IngestionSettings {
        IngestionSettings {
            tick_interval_ms: self.tick_interval_ms,
            poll_batch: self.poll_batch,
            poll_idle_ms: self.poll_idle_ms,
            poll_backoff: self.publish_backoff(),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment is process-global; serialize tests that touch it
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 6] = [
        "ANALYTICS_LOG_PATH",
        "ANALYTICS_START_FROM",
        "ANALYTICS_WINDOW_SECS",
        "ANALYTICS_TICK_INTERVAL_MS",
        "ANALYTICS_EMIT_EMPTY_WINDOWS",
        "ANALYTICS_OUTPUT_TOPIC",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        // Test: Default configuration when no env vars set
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let config = PipelineConfig::from_env().unwrap();

        assert_eq!(config.log_path, "data/event-log.db");
        assert_eq!(config.input_topic, "appointment-events");
        assert_eq!(config.output_topic, "analytics-results");
        assert_eq!(config.start_from, StartPosition::Latest);
        assert_eq!(config.window_size_secs, 60);
        assert_eq!(config.tick_interval_ms, 200);
        assert!(!config.emit_empty_windows);
        assert!(config.echo_results);
        assert_eq!(config.engine_settings().unwrap().window_size_ms, 60_000);
        assert_eq!(config.publish_backoff().max_retries, 5);
        assert_eq!(config.result_backlog_limit, 1_024);
    }

    #[test]
    fn test_custom_config() {
        // Test: Custom configuration from env vars
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("ANALYTICS_LOG_PATH", "/tmp/test-log.db");
        env::set_var("ANALYTICS_START_FROM", "earliest");
        env::set_var("ANALYTICS_WINDOW_SECS", "10");
        env::set_var("ANALYTICS_EMIT_EMPTY_WINDOWS", "true");
        env::set_var("ANALYTICS_TICK_INTERVAL_MS", "not-a-number");

        let config = PipelineConfig::from_env().unwrap();

        assert_eq!(config.log_path, "/tmp/test-log.db");
        assert_eq!(config.start_from, StartPosition::Earliest);
        assert_eq!(config.engine_settings().unwrap().window_size_ms, 10_000);
        assert!(config.engine_settings().unwrap().emit_empty_windows);
        assert_eq!(config.tick_interval_ms, 200);

        clear_env();
    }

    #[test]
    fn test_invalid_values_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        env::set_var("ANALYTICS_WINDOW_SECS", "0");
        assert!(PipelineConfig::from_env().is_err());
        clear_env();

        env::set_var("ANALYTICS_START_FROM", "yesterday");
        assert!(PipelineConfig::from_env().is_err());
        clear_env();

        env::set_var("ANALYTICS_OUTPUT_TOPIC", "appointment-events");
        assert!(PipelineConfig::from_env().is_err());
        clear_env();

        // Seconds that would wrap to a negative millisecond size
        env::set_var("ANALYTICS_WINDOW_SECS", "9223372036854776");
        assert!(PipelineConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_window_size_overflow_is_an_error() {
        // Test: Sizes that overflow the millisecond conversion never reach the engine
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let mut config = PipelineConfig::from_env().unwrap();

        config.window_size_secs = 18_446_744_073_709_552;
        assert!(config.validate().is_err());
        assert!(config.engine_settings().is_err());

        config.window_size_secs = 9_223_372_036_854_776;
        assert!(config.engine_settings().is_err());

        config.window_size_secs = 9_223_372_036_854_775;
        assert_eq!(config.engine_settings().unwrap().window_size_ms, 9_223_372_036_854_775_000);
    }
}
