// MIT License - Copyright (c) 2026 Peter Wright
// Bridge configuration

use std::time::Duration;

use crate::constants::{DEFAULT_HOST, DEFAULT_NAME, DEFAULT_PORT};

/// Configuration for one iPano Plus bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Display name, used in logs and MQTT topics
    pub name: String,
    /// Panel IP address or hostname
    pub host: String,
    /// Panel TCP port (default: 3124)
    pub port: u16,
    /// Connection attempts made by `start()`
    pub connect_attempts: u32,
    /// Connection attempts made after each disconnect
    pub reconnect_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further failure
    pub backoff_base: Duration,
    /// Upper bound on a single TCP connect
    pub connect_timeout: Duration,
    /// Pause between a disconnect and the first reconnection attempt
    pub reconnect_cooldown: Duration,
    /// Socket read timeout; expiry only re-checks the connection state
    pub read_timeout: Duration,
    /// How often the heartbeat loop wakes up
    pub heartbeat_interval: Duration,
    /// Silence after which a heartbeat is sent
    pub heartbeat_threshold: Duration,
    /// Delay between connecting and sending the initial state queries
    pub initial_query_delay: Duration,
    /// Delay between the relay and backlight queries
    pub query_spacing: Duration,
    /// Delay between the per-button sends of `set_all_backlights`
    pub backlight_spacing: Duration,
    /// Broadcast buffer size for event watchers
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_attempts: 5,
            reconnect_attempts: 3,
            backoff_base: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            reconnect_cooldown: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_threshold: Duration::from_secs(15),
            initial_query_delay: Duration::from_secs(1),
            query_spacing: Duration::from_millis(200),
            backlight_spacing: Duration::from_millis(50),
            event_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// `host:port` for logging and connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Wait after the `failures`-th consecutive failed attempt:
/// `base * 2^(failures - 1)`.
pub fn backoff_delay(base: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent)
}

/// Builder for BridgeConfig.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.config.connect_attempts = attempts;
        self
    }

    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect_attempts = attempts;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.config.backoff_base = base;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.reconnect_cooldown = cooldown;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_threshold(mut self, threshold: Duration) -> Self {
        self.config.heartbeat_threshold = threshold;
        self
    }

    pub fn initial_query_delay(mut self, delay: Duration) -> Self {
        self.config.initial_query_delay = delay;
        self
    }

    pub fn query_spacing(mut self, spacing: Duration) -> Self {
        self.config.query_spacing = spacing;
        self
    }

    pub fn backlight_spacing(mut self, spacing: Duration) -> Self {
        self.config.backlight_spacing = spacing;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
