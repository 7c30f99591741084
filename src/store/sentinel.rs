//! Head and tail sentinel counters.
//!
//! Producers INCR the head to allocate a slot, the consumer INCRs the tail to
//! claim one. Both rely on the cache's atomic INCR; nothing here locks.

use super::{Store, cache_key};
use crate::cache::{Command, DAY_IN_SECONDS, reply};
use crate::error::{Error, Result};
use crate::model::{Sentinels, Slot};

const HEAD_SENTINEL: &str = "head_sentinel";
const TAIL_SENTINEL: &str = "tail_sentinel";

/// Which counter of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Head,
    Tail,
}

impl Sentinel {
    /// Cache key of this counter for `identifier`.
    pub fn key(self, identifier: &str) -> String {
        let suffix = match self {
            Sentinel::Head => HEAD_SENTINEL,
            Sentinel::Tail => TAIL_SENTINEL,
        };
        cache_key(&[identifier, suffix])
    }
}

impl Store {
    /// Atomically increment the counter at `key` and return the new value.
    pub async fn increment_sentinel(&self, key: &str) -> Result<i64> {
        let command = Command::Incr {
            key: key.to_string(),
        };
        let reply = self.exec(&command).await?;
        reply::int(command.name(), &reply)
    }

    /// Read head and tail with one MGET.
    ///
    /// Counters that were never written read as 0. A reply that does not hold
    /// exactly two values fails with `SentinelsNotReturned`.
    pub async fn get_sentinels(&self, identifier: &str) -> Result<Sentinels> {
        let command = Command::MGet {
            keys: vec![
                Sentinel::Head.key(identifier),
                Sentinel::Tail.key(identifier),
            ],
        };
        let reply = self.exec(&command).await?;
        match reply::multiple_int(command.name(), &reply)?.as_slice() {
            [head, tail] => Ok(Sentinels {
                head: *head,
                tail: *tail,
            }),
            other => Err(Error::SentinelsNotReturned(other.len())),
        }
    }

    /// Increment one sentinel of `identifier` and return it as a slot.
    ///
    /// On success both counters of the pair have their retention refreshed so
    /// they always expire together.
    pub async fn advance(&self, identifier: &str, sentinel: Sentinel) -> Result<Slot> {
        let value = self.increment_sentinel(&sentinel.key(identifier)).await?;
        self.refresh_sentinels(identifier).await;
        Ok(Slot(value))
    }

    async fn refresh_sentinels(&self, identifier: &str) {
        for sentinel in [Sentinel::Head, Sentinel::Tail] {
            let command = Command::Expire {
                key: sentinel.key(identifier),
                seconds: DAY_IN_SECONDS,
            };
            if let Err(e) = self.exec(&command).await {
                tracing::warn!(identifier, ?sentinel, error = %e, "sentinel retention refresh failed");
            }
        }
    }
}
