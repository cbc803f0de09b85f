//! Engine configuration.
//!
//! Defaults reproduce the reference behavior (50 retained snapshots, an
//! unbounded ingress buffer, one worker per channel, three immediate phone
//! attempts). Values can be overridden in code, deserialized with serde, or
//! read from `NOTIFYHUB_*` environment variables.

use serde::{Deserialize, Serialize};

use notifyhub_core::Channel;
use notifyhub_events::DEFAULT_HISTORY_CAPACITY;

use crate::retry::RetryPolicy;

pub const ENV_HISTORY_CAPACITY: &str = "NOTIFYHUB_HISTORY_CAPACITY";
pub const ENV_WORKERS_PER_CHANNEL: &str = "NOTIFYHUB_WORKERS_PER_CHANNEL";
pub const ENV_INGEST_CAPACITY: &str = "NOTIFYHUB_INGEST_CAPACITY";
pub const ENV_PHONE_MAX_ATTEMPTS: &str = "NOTIFYHUB_PHONE_MAX_ATTEMPTS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What ingress does when its buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Unbounded buffer; publish never drops.
    #[default]
    Buffer,
    /// Bounded buffer; events arriving while it is full are logged and dropped.
    DropNewest { capacity: usize },
}

/// Retry policy per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelRetryConfig {
    pub chat: RetryPolicy,
    pub email: RetryPolicy,
    pub phone: RetryPolicy,
}

impl Default for ChannelRetryConfig {
    fn default() -> Self {
        Self {
            chat: RetryPolicy::no_retry(),
            email: RetryPolicy::no_retry(),
            phone: RetryPolicy::immediate(3),
        }
    }
}

impl ChannelRetryConfig {
    pub fn for_channel(&self, channel: Channel) -> &RetryPolicy {
        match channel {
            Channel::Chat => &self.chat,
            Channel::Email => &self.email,
            Channel::Phone => &self.phone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Snapshots retained for replay to new history subscribers.
    pub history_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Worker threads per channel pipeline.
    pub workers_per_channel: usize,
    pub retry: ChannelRetryConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            overflow: OverflowPolicy::Buffer,
            workers_per_channel: 1,
            retry: ChannelRetryConfig::default(),
        }
    }
}

impl NotificationConfig {
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_workers_per_channel(mut self, workers: usize) -> Self {
        self.workers_per_channel = workers;
        self
    }

    pub fn with_retry(mut self, channel: Channel, policy: RetryPolicy) -> Self {
        match channel {
            Channel::Chat => self.retry.chat = policy,
            Channel::Email => self.retry.email = policy,
            Channel::Phone => self.retry.phone = policy,
        }
        self
    }

    /// Defaults overridden by `NOTIFYHUB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(capacity) = parse_var(&lookup, ENV_HISTORY_CAPACITY)? {
            config.history_capacity = capacity;
        }
        if let Some(workers) = parse_var(&lookup, ENV_WORKERS_PER_CHANNEL)? {
            config.workers_per_channel = workers;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_INGEST_CAPACITY)? {
            config.overflow = OverflowPolicy::DropNewest { capacity };
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, ENV_PHONE_MAX_ATTEMPTS)? {
            config.retry.phone = config.retry.phone.with_max_attempts(attempts);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be at least 1".into()));
        }
        if self.workers_per_channel == 0 {
            return Err(ConfigError::Invalid("workers_per_channel must be at least 1".into()));
        }
        if let OverflowPolicy::DropNewest { capacity: 0 } = self.overflow {
            return Err(ConfigError::Invalid("ingest buffer capacity must be at least 1".into()));
        }
        for channel in Channel::ALL {
            if self.retry.for_channel(channel).max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{channel} retry policy must allow at least one attempt"
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}
