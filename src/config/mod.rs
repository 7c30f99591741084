//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on missing or malformed values. The
//! cache address is held as a `SecretString` since it may embed credentials.

use crate::engine::QueueConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub cache_address: SecretString,
    pub queue_identifier: String,
    pub poll_delay: Duration,
    pub cache_timeout: Duration,
    pub max_slot_attempts: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cache_address: SecretString::from(required_var("CACHE_ADDRESS")?),
            queue_identifier: required_var("QUEUE_IDENTIFIER")?,
            poll_delay: Duration::from_millis(parsed_var("QUEUE_POLL_DELAY_MS", 1000)?),
            cache_timeout: Duration::from_millis(parsed_var("CACHE_TIMEOUT_MS", 5000)?),
            max_slot_attempts: parsed_var("QUEUE_MAX_SLOT_ATTEMPTS", 3)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Store over the configured cache, bounded by `cache_timeout`.
    pub fn store(&self) -> Result<Store> {
        Store::connect(self.cache_address.clone(), self.cache_timeout)
    }

    /// Consumer loop settings derived from this configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            poll_delay: self.poll_delay,
            max_slot_attempts: self.max_slot_attempts,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}
