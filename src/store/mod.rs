//! Queue storage over the cache.
//!
//! `Store` owns the cache handle shared by producers and the consumer. The
//! sentinel counters live in [`sentinel`], payload slots in [`payload`].

pub mod payload;
pub mod sentinel;

pub use sentinel::Sentinel;

use crate::cache::{CacheExecutor, Command, HttpCache, MemoryCache};
use crate::error::{Error, Result};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

const COLON_DELIMITER: &str = ":";

/// Default deadline for a single cache command.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Join key segments: `cache_key(&["q1", "head_sentinel"])` is `"q1:head_sentinel"`.
pub fn cache_key(segments: &[&str]) -> String {
    segments.join(COLON_DELIMITER)
}

/// Storage handle. Cloning shares the underlying cache connection.
#[derive(Clone)]
pub struct Store {
    cache: Arc<dyn CacheExecutor>,
    op_timeout: Duration,
}

impl Store {
    pub fn new(cache: Arc<dyn CacheExecutor>, op_timeout: Duration) -> Self {
        Self { cache, op_timeout }
    }

    /// Connect to a cache service over HTTP.
    pub fn connect(address: SecretString, op_timeout: Duration) -> Result<Self> {
        let cache = HttpCache::new(address, op_timeout)?;
        Ok(Self::new(Arc::new(cache), op_timeout))
    }

    /// Store backed by a fresh in-process cache (for testing).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()), DEFAULT_OP_TIMEOUT)
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    /// Run one command under the operation deadline.
    pub(crate) async fn exec(&self, command: &Command) -> Result<Value> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.op_timeout, self.cache.execute(command))
            .await
            .unwrap_or(Err(Error::Timeout(self.op_timeout)));

        let outcome = match &result {
            Ok(_) => "ok",
            Err(Error::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        metrics::cache_commands().add(
            1,
            &[
                KeyValue::new("command", command.name()),
                KeyValue::new("result", outcome),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", command.name())],
        );

        if let Err(ref e) = result {
            tracing::debug!(command = command.name(), error = %e, "cache command failed");
        }
        result
    }
}
