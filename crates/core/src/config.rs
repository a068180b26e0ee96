//! Configuration types for the coordination core

use serde::{Deserialize, Serialize};

/// Main configuration for client-side coordination
///
/// Shared by the connection orchestrator, the signaling channel and the
/// presence broadcaster. The server binary carries its own argument set and
/// only borrows the `presence_capacity` default from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// Handshake attempt timeout in seconds (default: 30)
    pub handshake_timeout_secs: u64,

    /// Buffered capacity of the local presence bus (default: 16)
    pub presence_capacity: usize,

    /// Retry/backoff policy configuration
    pub backoff: BackoffConfig,
}

/// Backoff policy configuration
///
/// Governs the delay between repeated connection attempts after failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay computation strategy (default: exponential)
    pub strategy: BackoffStrategy,

    /// Initial interval in milliseconds (default: 2000)
    pub initial_ms: u64,

    /// Maximum interval in milliseconds (default: 30000)
    pub max_ms: u64,

    /// Growth multiplier for the exponential strategy (default: 2.0)
    pub multiplier: f64,

    /// Jitter fraction: each interval gains a uniform random amount in
    /// `[0, base * jitter_factor)` (default: 0.25)
    pub jitter_factor: f64,

    /// Floor for the initial interval under adaptive resets (default: 1000)
    pub adaptive_floor_ms: u64,

    /// Ceiling for the initial interval under adaptive resets (default: 5000)
    pub adaptive_ceil_ms: u64,
}

/// Backoff delay computation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Interval doubles (times `multiplier`) after every attempt
    Exponential,
    /// Interval grows by one second per attempt in the current streak
    Linear,
    /// Interval follows the Fibonacci sequence in seconds
    Fibonacci,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            handshake_timeout_secs: 30,
            presence_capacity: 16,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial_ms: 2000,
            max_ms: 30000,
            multiplier: 2.0,
            jitter_factor: 0.25,
            adaptive_floor_ms: 1000,
            adaptive_ceil_ms: 5000,
        }
    }
}

impl CoordinatorConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `handshake_timeout_secs` is zero
    /// - the backoff section fails its own validation
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.handshake_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "handshake_timeout_secs must be non-zero".to_string(),
            ));
        }

        if self.presence_capacity == 0 {
            return Err(Error::InvalidConfig(
                "presence_capacity must be non-zero".to_string(),
            ));
        }

        self.backoff.validate()
    }

    /// Create a configuration preset optimized for fast reconnection
    ///
    /// Best for same-network deployments where the admin endpoint comes and
    /// goes frequently and clients should chase it aggressively.
    ///
    /// # Example
    ///
    /// ```
    /// use peerlink_core::config::CoordinatorConfig;
    ///
    /// let config = CoordinatorConfig::fast_reconnect_preset("ws://localhost:8080");
    /// assert_eq!(config.backoff.initial_ms, 500);
    /// assert_eq!(config.handshake_timeout_secs, 15);
    /// ```
    pub fn fast_reconnect_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            handshake_timeout_secs: 15,
            presence_capacity: 16,
            backoff: BackoffConfig {
                strategy: BackoffStrategy::Exponential,
                initial_ms: 500,
                max_ms: 10000,
                multiplier: 1.5,
                jitter_factor: 0.25,
                adaptive_floor_ms: 250,
                adaptive_ceil_ms: 2000,
            },
        }
    }

    /// Create a configuration preset for flaky networks
    ///
    /// Linear growth spreads retries out without the long tail of the
    /// exponential strategy, and the larger jitter de-synchronizes fleets of
    /// clients reconnecting after the same outage.
    ///
    /// # Example
    ///
    /// ```
    /// use peerlink_core::config::{BackoffStrategy, CoordinatorConfig};
    ///
    /// let config = CoordinatorConfig::flaky_network_preset("ws://localhost:8080");
    /// assert_eq!(config.backoff.strategy, BackoffStrategy::Linear);
    /// ```
    pub fn flaky_network_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            handshake_timeout_secs: 45,
            presence_capacity: 16,
            backoff: BackoffConfig {
                strategy: BackoffStrategy::Linear,
                initial_ms: 2000,
                max_ms: 60000,
                multiplier: 2.0,
                jitter_factor: 0.5,
                adaptive_floor_ms: 1000,
                adaptive_ceil_ms: 5000,
            },
        }
    }

    /// Set the backoff strategy
    ///
    /// Useful for chaining with preset methods.
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff.strategy = strategy;
        self
    }

    /// Set the handshake timeout
    ///
    /// Useful for chaining with preset methods.
    pub fn with_handshake_timeout_secs(mut self, secs: u64) -> Self {
        self.handshake_timeout_secs = secs;
        self
    }
}

impl BackoffConfig {
    /// Validate backoff parameters
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.initial_ms == 0 {
            return Err(Error::InvalidConfig(
                "backoff initial_ms must be non-zero".to_string(),
            ));
        }

        if self.max_ms < self.initial_ms {
            return Err(Error::InvalidConfig(format!(
                "backoff max_ms ({}) must be >= initial_ms ({})",
                self.max_ms, self.initial_ms
            )));
        }

        if self.multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }

        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(Error::InvalidConfig(format!(
                "backoff jitter_factor must be in [0.0, 1.0), got {}",
                self.jitter_factor
            )));
        }

        if self.adaptive_ceil_ms < self.adaptive_floor_ms {
            return Err(Error::InvalidConfig(format!(
                "backoff adaptive_ceil_ms ({}) must be >= adaptive_floor_ms ({})",
                self.adaptive_ceil_ms, self.adaptive_floor_ms
            )));
        }

        Ok(())
    }
}
