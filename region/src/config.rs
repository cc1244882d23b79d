//! Region transport configuration.
//!
//! Every field has a default, so an empty TOML file (or none at all) yields a
//! working setup. Durations are given in milliseconds.
//!
//! ```toml
//! bind = "0.0.0.0:9000"
//! max_retries = 5
//! idle_timeout_ms = 60000
//!
//! [throttle]
//! overflow = "queue"
//! texture = { rate = 40000.0, burst = 40000.0 }
//! ```

use crate::throttle::ThrottleCategory;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// What to do with a packet that does not fit its throttle bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Hold it (up to a bounded depth) until the bucket refills.
    Queue,
    /// Reject it straight away.
    Drop,
}

/// Token-bucket parameters for one category, in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CategoryRate {
    pub rate: f64,
    pub burst: f64,
}

impl CategoryRate {
    pub const fn new(rate: f64, burst: f64) -> Self {
        Self { rate, burst }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub resend: CategoryRate,
    pub land: CategoryRate,
    pub wind: CategoryRate,
    pub cloud: CategoryRate,
    pub task: CategoryRate,
    pub texture: CategoryRate,
    pub asset: CategoryRate,
    /// Lower clamp for client-requested rates, bytes per second.
    pub min_rate: f64,
    /// Upper clamp for client-requested rates, bytes per second.
    pub max_rate: f64,
    pub overflow: OverflowPolicy,
    pub max_queued_per_category: usize,
    pub tick_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // Typical viewer defaults, converted from bits to bytes.
        Self {
            resend: CategoryRate::new(12_500.0, 12_500.0),
            land: CategoryRate::new(12_500.0, 12_500.0),
            wind: CategoryRate::new(2_500.0, 2_500.0),
            cloud: CategoryRate::new(2_500.0, 2_500.0),
            task: CategoryRate::new(38_750.0, 38_750.0),
            texture: CategoryRate::new(38_750.0, 38_750.0),
            asset: CategoryRate::new(17_500.0, 17_500.0),
            min_rate: 1_250.0,
            max_rate: 187_500.0,
            overflow: OverflowPolicy::Queue,
            max_queued_per_category: 256,
            tick_ms: 100,
        }
    }
}

impl ThrottleConfig {
    /// Rate for a throttled category. `Unknown` has none.
    pub fn rate_for(&self, category: ThrottleCategory) -> Option<CategoryRate> {
        let rate = match category {
            ThrottleCategory::Resend => self.resend,
            ThrottleCategory::Land => self.land,
            ThrottleCategory::Wind => self.wind,
            ThrottleCategory::Cloud => self.cloud,
            ThrottleCategory::Task => self.task,
            ThrottleCategory::Texture => self.texture,
            ThrottleCategory::Asset => self.asset,
            ThrottleCategory::Unknown => return None,
        };
        Some(rate)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub bind: SocketAddr,
    /// Resends of one reliable packet before it is given up on.
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    /// Ceiling for the exponential resend backoff.
    pub max_retry_interval_ms: u64,
    pub idle_timeout_ms: u64,
    pub idle_check_interval_ms: u64,
    /// Period of the ack flush and retransmit sweep.
    pub ack_interval_ms: u64,
    pub dedup_window: usize,
    pub max_appended_acks: usize,
    /// Unacked reliable packets a circuit may hold before it is dropped.
    pub max_pending_reliable: usize,
    /// 0 dispatches inline on the receive task.
    pub worker_count: usize,
    pub worker_queue_depth: usize,
    pub event_capacity: usize,
    pub throttle: ThrottleConfig,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9000)),
            max_retries: 5,
            retry_interval_ms: protocol::RESEND_TIMEOUT_MS,
            max_retry_interval_ms: 30_000,
            idle_timeout_ms: 60_000,
            idle_check_interval_ms: 1_000,
            ack_interval_ms: 500,
            dedup_window: protocol::window::DEFAULT_WINDOW,
            max_appended_acks: protocol::MAX_APPENDED_ACKS,
            max_pending_reliable: 1024,
            worker_count: 4,
            worker_queue_depth: 1024,
            event_capacity: 256,
            throttle: ThrottleConfig::default(),
        }
    }
}

impl RegionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: RegionConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &'static str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason })
        };

        if self.retry_interval_ms == 0 {
            return invalid("retry_interval_ms", "must be positive");
        }
        if self.max_retry_interval_ms < self.retry_interval_ms {
            return invalid("max_retry_interval_ms", "must be at least retry_interval_ms");
        }
        if self.idle_timeout_ms == 0 {
            return invalid("idle_timeout_ms", "must be positive");
        }
        if self.ack_interval_ms == 0 || self.idle_check_interval_ms == 0 || self.throttle.tick_ms == 0 {
            return invalid("intervals", "timer periods must be positive");
        }
        if self.max_appended_acks > u8::MAX as usize {
            return invalid("max_appended_acks", "must fit in one byte");
        }
        if self.max_pending_reliable == 0 {
            return invalid("max_pending_reliable", "must be positive");
        }
        if self.worker_count > 0 && self.worker_queue_depth == 0 {
            return invalid("worker_queue_depth", "must be positive when workers are enabled");
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity", "must be positive");
        }

        let t = &self.throttle;
        if t.min_rate <= 0.0 || t.max_rate < t.min_rate {
            return invalid("throttle.min_rate", "need 0 < min_rate <= max_rate");
        }
        for category in ThrottleCategory::THROTTLED {
            if let Some(rate) = t.rate_for(category) {
                if rate.rate <= 0.0 || rate.burst <= 0.0 {
                    return invalid("throttle", "rates and bursts must be positive");
                }
            }
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }

    pub fn ack_interval(&self) -> Duration {
        Duration::from_millis(self.ack_interval_ms)
    }
}
