//! Application configuration loaded from a YAML file plus environment overrides.
//!
//! The file path comes from `CONFIG_PATH` (default: `config/config.yaml`).
//! After parsing, these environment variables are applied:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `KAFKA_BROKER`: comma-separated brokers, used when the file lists none
//! - `KAFKA_TOPIC`: topic, used when the file leaves it empty
//! - `PORT`: overrides `app.port`
//!
//! `RUST_LOG`, when set, takes precedence over `app.log_level`.

use std::time::Duration;

use domain::{StoreErrorClassifier, StoreRetrier};
use ingest::KafkaSourceConfig;
use retry::{Backoff, RetryPolicy};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Configuration loading failures. All of them abort start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            shutdown_timeout_secs: 10,
            request_timeout_secs: 5,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

/// Retry policy shared by the consumer and the read path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Zero retries until cancelled.
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_ms: u64,
    /// Linear increment per attempt.
    pub step_ms: u64,
    /// Exponential growth factor.
    pub factor: f64,
    /// Delay cap; zero leaves the schedule uncapped.
    pub max_ms: u64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Linear,
            base_ms: 1_000,
            step_ms: 1_000,
            factor: 2.0,
            max_ms: 10_000,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { cache_size: 1_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            topic: String::new(),
            group_id: "orders-service".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub retry: RetryConfig,
    pub service: ServiceConfig,
    pub kafka: KafkaConfig,
    /// Only ever read from `DATABASE_URL`.
    #[serde(skip)]
    pub database_url: String,
}

impl Config {
    /// Loads the file named by `CONFIG_PATH`, applies environment overrides
    /// and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config =
            Self::from_yaml(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if self.kafka.brokers.is_empty()
            && let Some(brokers) = lookup("KAFKA_BROKER")
        {
            self.kafka.brokers = brokers
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(String::from)
                .collect();
        }
        if self.kafka.topic.is_empty()
            && let Some(topic) = lookup("KAFKA_TOPIC")
        {
            self.kafka.topic = topic;
        }
        if let Some(port) = lookup("PORT") {
            self.app.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT {port:?} is not a port number")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Invalid("DATABASE_URL is not set".to_string()));
        }
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Invalid("no kafka brokers configured".to_string()));
        }
        if self.kafka.topic.is_empty() {
            return Err(ConfigError::Invalid("kafka topic is empty".to_string()));
        }
        if !self.retry.jitter.is_finite() {
            return Err(ConfigError::Invalid("retry.jitter must be finite".to_string()));
        }
        if !self.retry.factor.is_finite() || self.retry.factor < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.factor must be a finite number of at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.app.host, self.app.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.app.shutdown_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.app.request_timeout_secs)
    }

    pub fn backoff(&self) -> Backoff {
        let retry = &self.retry;
        let base = Duration::from_millis(retry.base_ms);
        let max = if retry.max_ms == 0 {
            Duration::MAX
        } else {
            Duration::from_millis(retry.max_ms)
        };
        let backoff = match retry.backoff {
            BackoffKind::Fixed => Backoff::fixed(base),
            BackoffKind::Linear => {
                Backoff::linear(base, Duration::from_millis(retry.step_ms), max)
            }
            BackoffKind::Exponential => Backoff::exponential(base, retry.factor, max),
        };
        backoff.with_jitter(retry.jitter)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: self.backoff(),
        }
    }

    /// Builds a retrier that stops on terminal store errors.
    pub fn retrier(&self) -> StoreRetrier {
        StoreRetrier::from_policy(self.retry_policy(), StoreErrorClassifier)
    }

    pub fn kafka_source(&self) -> KafkaSourceConfig {
        KafkaSourceConfig {
            brokers: self.kafka.brokers.clone(),
            topic: self.kafka.topic.clone(),
            group_id: self.kafka.group_id.clone(),
        }
    }
}
