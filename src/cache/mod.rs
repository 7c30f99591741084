//! Cache command protocol.
//!
//! The queue keeps all of its state in an external key-value cache that
//! understands five commands (SET, GET, INCR, MGET, EXPIRE). Each command is
//! sent as a JSON instruction array and answered with one JSON value.
//! [`CacheExecutor`] is the seam between the queue and whatever carries those
//! commands: [`HttpCache`] in production, [`MemoryCache`] in tests.

pub mod http;
pub mod memory;
pub(crate) mod reply;

pub use http::HttpCache;
pub use memory::MemoryCache;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

/// Retention applied to every written key.
pub const DAY_IN_SECONDS: u64 = 86_400;

/// Success marker returned by SET.
pub(crate) const OK_REPLY: &str = "OK";

/// One command in the cache protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set {
        key: String,
        value: String,
        expire_seconds: u64,
    },
    Get {
        key: String,
    },
    Incr {
        key: String,
    },
    MGet {
        keys: Vec<String>,
    },
    Expire {
        key: String,
        seconds: u64,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Incr { .. } => "INCR",
            Command::MGet { .. } => "MGET",
            Command::Expire { .. } => "EXPIRE",
        }
    }

    /// Wire form: `["SET", key, value, "EX", seconds]` and so on.
    pub fn to_instructions(&self) -> Value {
        match self {
            Command::Set {
                key,
                value,
                expire_seconds,
            } => json!([self.name(), key, value, "EX", expire_seconds]),
            Command::Get { key } | Command::Incr { key } => json!([self.name(), key]),
            Command::MGet { keys } => {
                let mut instructions = vec![Value::from(self.name())];
                instructions.extend(keys.iter().map(|k| Value::from(k.as_str())));
                Value::Array(instructions)
            }
            Command::Expire { key, seconds } => json!([self.name(), key, seconds]),
        }
    }
}

/// Executes protocol commands against a cache.
///
/// Implementations must give INCR atomic semantics and answer MGET with one
/// consistent snapshot; the queue takes no lock of its own.
#[async_trait]
pub trait CacheExecutor: Send + Sync {
    /// Run one command and return the raw JSON reply.
    async fn execute(&self, command: &Command) -> Result<Value>;
}
