//! Application configuration loaded from environment variables.

use std::time::Duration;

use outbox::DispatcherConfig;

/// Server and dispatcher configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `ORDERS_PORT` — orders service port (default: `3000`)
/// - `PAYMENTS_PORT` — payments service port (default: `3001`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `OUTBOX_POLL_MS` — dispatcher poll interval (default: `1000`)
/// - `OUTBOX_BATCH_SIZE` — envelopes per dispatcher scan (default: `100`)
/// - `PUBLISH_TIMEOUT_MS` — per-publish timeout (default: `5000`)
/// - `CLAIM_LEASE_SECS` — outbox claim lease (default: `30`)
/// - `OUTBOX_RETENTION_HOURS` — delivered-envelope retention; unset keeps
///   them forever
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub orders_port: u16,
    pub payments_port: u16,
    pub log_level: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub publish_timeout: Duration,
    pub claim_lease: Duration,
    pub retention: Option<Duration>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            orders_port: env_parse("ORDERS_PORT").unwrap_or(3000),
            payments_port: env_parse("PAYMENTS_PORT").unwrap_or(3001),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            poll_interval: Duration::from_millis(env_parse("OUTBOX_POLL_MS").unwrap_or(1000)),
            batch_size: env_parse("OUTBOX_BATCH_SIZE").unwrap_or(100),
            publish_timeout: Duration::from_millis(env_parse("PUBLISH_TIMEOUT_MS").unwrap_or(5000)),
            claim_lease: Duration::from_secs(env_parse("CLAIM_LEASE_SECS").unwrap_or(30)),
            retention: env_parse::<u64>("OUTBOX_RETENTION_HOURS")
                .map(|h| Duration::from_secs(h * 3600)),
        }
    }

    /// Returns the orders service `"host:port"` bind address.
    pub fn orders_addr(&self) -> String {
        format!("{}:{}", self.host, self.orders_port)
    }

    /// Returns the payments service `"host:port"` bind address.
    pub fn payments_addr(&self) -> String {
        format!("{}:{}", self.host, self.payments_port)
    }

    /// Builds the dispatcher knobs for one topic from the shared settings.
    pub fn dispatcher_config(&self, topic: &str) -> DispatcherConfig {
        DispatcherConfig {
            topic: topic.to_string(),
            poll_interval: self.poll_interval,
            batch_size: self.batch_size,
            publish_timeout: self.publish_timeout,
            claim_lease: self.claim_lease,
            retention: self.retention,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            orders_port: 3000,
            payments_port: 3001,
            log_level: "info".to_string(),
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
            publish_timeout: Duration::from_millis(5000),
            claim_lease: Duration::from_secs(30),
            retention: None,
        }
    }
}
