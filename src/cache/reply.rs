//! Reply decoding for the cache protocol.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

fn unexpected(command: &'static str, reply: &Value) -> Error {
    Error::UnexpectedReply {
        command,
        reply: reply.clone(),
    }
}

/// INCR reply: a single integer.
pub(crate) fn int(command: &'static str, reply: &Value) -> Result<i64> {
    match reply {
        Value::Null => Err(unexpected(command, reply)),
        other => counter(other).ok_or_else(|| unexpected(command, other)),
    }
}

/// SET reply: a status string, or `null`.
pub(crate) fn string(command: &'static str, reply: &Value) -> Result<Option<String>> {
    match reply {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(unexpected(command, other)),
    }
}

/// GET reply: base64 of the stored bytes, or `null` when the key is absent.
pub(crate) fn base64(command: &'static str, reply: &Value) -> Result<Option<Vec<u8>>> {
    match reply {
        Value::Null => Ok(None),
        Value::String(encoded) => Ok(Some(STANDARD.decode(encoded)?)),
        other => Err(unexpected(command, other)),
    }
}

/// MGET reply over counters: one integer per key, `null` read as 0.
pub(crate) fn multiple_int(command: &'static str, reply: &Value) -> Result<Vec<i64>> {
    let Value::Array(items) = reply else {
        return Err(unexpected(command, reply));
    };
    items
        .iter()
        .map(|item| counter(item).ok_or_else(|| unexpected(command, reply)))
        .collect()
}

/// Counters arrive as numbers, numeric strings, or base64 of a numeric string.
fn counter(item: &Value) -> Option<i64> {
    match item {
        Value::Null => Some(0),
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok().or_else(|| {
            let bytes = STANDARD.decode(s).ok()?;
            std::str::from_utf8(&bytes).ok()?.trim().parse().ok()
        }),
        _ => None,
    }
}
