//! # Configuration Management
//!
//! Centralized configuration for the transport core.
//!
//! This module provides structured configuration for the listener layer,
//! the scheduler, and outbound webhook delivery.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! ## Security Considerations
//! - The maximum frame size is validated against the fixed message buffer
//!   capacity so a config file cannot re-enable oversized frames
//! - Backoff and tick floors keep failing listeners and near-zero delays
//!   from busy-looping

use crate::error::{Result, TransportError};
use crate::message::codec::{INITIAL_BUFFER_POSITION, NETWORKMESSAGE_MAXSIZE};
use crate::scheduler::SCHEDULER_MINTICKS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Fixed backoff between listener re-open attempts after a failure.
pub const BIND_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Grace period between a stop request and the hard stop.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CoreConfig {
    /// Listener configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Webhook delivery configuration
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl CoreConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TransportError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| TransportError::Config(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("REALM_TRANSPORT_BIND_ADDRESS") {
            config.listener.bind_address = addr;
        }

        if let Ok(only) = std::env::var("REALM_TRANSPORT_BIND_ONLY_CONFIGURED") {
            if let Ok(val) = only.parse::<bool>() {
                config.listener.bind_only_configured_address = val;
            }
        }

        if let Ok(retry) = std::env::var("REALM_TRANSPORT_BIND_RETRY_MS") {
            if let Ok(val) = retry.parse::<u64>() {
                config.listener.bind_retry_interval = Duration::from_millis(val);
            }
        }

        if let Ok(tick) = std::env::var("REALM_TRANSPORT_MIN_TICK_MS") {
            if let Ok(val) = tick.parse::<u64>() {
                config.scheduler.min_tick = Duration::from_millis(val);
            }
        }

        if let Ok(url) = std::env::var("REALM_TRANSPORT_WEBHOOK_URL") {
            config.webhook.url = url;
        }

        config
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.listener.validate());
        errors.extend(self.scheduler.validate());
        errors.extend(self.webhook.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener-layer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address to bind: IPv4 literal, IPv6 literal, or a resolvable name
    pub bind_address: String,

    /// Bind exactly the resolved address instead of the wildcard of its
    /// address family
    pub bind_only_configured_address: bool,

    /// Backoff between re-open attempts after a listener failure
    #[serde(with = "duration_serde")]
    pub bind_retry_interval: Duration,

    /// Largest accepted frame body in bytes
    pub max_frame_size: usize,

    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            bind_only_configured_address: false,
            bind_retry_interval: BIND_RETRY_INTERVAL,
            max_frame_size: NETWORKMESSAGE_MAXSIZE - INITIAL_BUFFER_POSITION,
            nodelay: true,
        }
    }
}

impl ListenerConfig {
    /// Validate listener configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("bind address cannot be empty".to_string());
        } else if self.bind_address.contains(char::is_whitespace) {
            errors.push(format!(
                "invalid bind address: '{}' (must be an IP literal or hostname)",
                self.bind_address
            ));
        }

        if self.bind_retry_interval.as_secs() < 1 {
            errors.push("bind retry interval too short (minimum: 1s)".to_string());
        } else if self.bind_retry_interval.as_secs() > 300 {
            errors.push("bind retry interval too long (maximum: 300s)".to_string());
        }

        if self.max_frame_size == 0 {
            errors.push("max frame size cannot be 0".to_string());
        } else if self.max_frame_size > NETWORKMESSAGE_MAXSIZE - INITIAL_BUFFER_POSITION {
            errors.push(format!(
                "max frame size {} exceeds the message buffer capacity {}",
                self.max_frame_size,
                NETWORKMESSAGE_MAXSIZE - INITIAL_BUFFER_POSITION
            ));
        }

        errors
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Floor applied to every scheduled delay
    #[serde(with = "duration_serde")]
    pub min_tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_tick: SCHEDULER_MINTICKS,
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.min_tick.as_millis() < 1 {
            errors.push("scheduler min tick too short (minimum: 1ms)".to_string());
        } else if self.min_tick.as_secs() > 1 {
            errors.push("scheduler min tick too long (maximum: 1s)".to_string());
        }

        errors
    }
}

/// Webhook delivery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    /// Default delivery URL; empty disables delivery
    pub url: String,

    /// Interval between queue drain passes
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Whether embed payloads carry a footer line
    pub send_footer: bool,

    /// Server name shown in the footer
    pub server_name: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            interval: Duration::from_secs(1),
            send_footer: true,
            server_name: String::from("Realm Server"),
        }
    }
}

impl WebhookConfig {
    /// Validate webhook configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.url.is_empty()
            && !(self.url.starts_with("http://") || self.url.starts_with("https://"))
        {
            errors.push(format!("webhook url must be http(s): '{}'", self.url));
        }

        if self.interval.as_millis() < 100 {
            errors.push("webhook interval too short (minimum: 100ms)".to_string());
        }

        if self.server_name.len() > 64 {
            errors.push(format!(
                "webhook server name too long: {} characters (maximum: 64)",
                self.server_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
