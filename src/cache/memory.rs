//! In-process cache with the same command semantics and reply shapes as the
//! HTTP cache. Used by tests and for local runs without a cache service.

use super::{CacheExecutor, Command, OK_REPLY};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Key-value store held in memory. All commands run under one lock, so INCR
/// is atomic and MGET sees a consistent snapshot.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of `key`, if it exists and expires.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries();
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|at| at - now)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(&self, command: &Command) -> Result<Value> {
        let now = Instant::now();
        let mut entries = self.entries();
        entries.retain(|_, entry| entry.is_live(now));

        match command {
            Command::Set {
                key,
                value,
                expire_seconds,
            } => {
                let expires_at =
                    (*expire_seconds > 0).then(|| now + Duration::from_secs(*expire_seconds));
                entries.insert(
                    key.clone(),
                    Entry {
                        value: value.as_bytes().to_vec(),
                        expires_at,
                    },
                );
                Ok(Value::from(OK_REPLY))
            }
            Command::Get { key } => Ok(entries
                .get(key)
                .map(|entry| Value::from(STANDARD.encode(&entry.value)))
                .unwrap_or(Value::Null)),
            Command::Incr { key } => {
                let current = match entries.get(key) {
                    Some(entry) => parse_counter(&entry.value).ok_or_else(|| {
                        Error::Other(format!("value at {key} is not an integer"))
                    })?,
                    None => 0,
                };
                let next = current + 1;
                let expires_at = entries.get(key).and_then(|e| e.expires_at);
                entries.insert(
                    key.clone(),
                    Entry {
                        value: next.to_string().into_bytes(),
                        expires_at,
                    },
                );
                Ok(Value::from(next))
            }
            Command::MGet { keys } => Ok(Value::Array(
                keys.iter()
                    .map(|key| match entries.get(key) {
                        Some(entry) => parse_counter(&entry.value)
                            .map(Value::from)
                            .unwrap_or_else(|| Value::from(STANDARD.encode(&entry.value))),
                        None => Value::Null,
                    })
                    .collect(),
            )),
            Command::Expire { key, seconds } => match entries.get_mut(key) {
                Some(entry) => {
                    entry.expires_at = Some(now + Duration::from_secs(*seconds));
                    Ok(Value::from(1))
                }
                None => Ok(Value::from(0)),
            },
        }
    }
}

fn parse_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[async_trait]
impl CacheExecutor for MemoryCache {
    async fn execute(&self, command: &Command) -> Result<Value> {
        self.apply(command)
    }
}
