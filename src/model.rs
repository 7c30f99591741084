//! Core data model.
//!
//! A queue payload is an HTTP request descriptor to be replayed later. Payloads
//! live in numbered slots; a pair of sentinel counters tracks which slots have
//! been allocated (head) and consumed (tail).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A unit of work: one HTTP request to replay.
///
/// Optional fields are omitted from the wire format entirely when absent,
/// never written as `null` or an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePayload {
    /// Target URL.
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<BTreeMap<String, String>>,

    /// HTTP method, e.g. "GET".
    pub method: String,

    #[serde(
        rename = "requestBody",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_body: Option<String>,

    /// Unix time (seconds) the payload was created.
    #[serde(default)]
    pub timestep: i64,
}

impl QueuePayload {
    /// New payload stamped with the current Unix time.
    pub fn new(address: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            authorization: None,
            cookies: None,
            method: method.into(),
            request_body: None,
            timestep: Utc::now().timestamp(),
        }
    }

    pub fn authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn request_body(mut self, body: impl Into<String>) -> Self {
        self.request_body = Some(body.into());
        self
    }

    pub fn timestep(mut self, timestep: i64) -> Self {
        self.timestep = timestep;
        self
    }
}

// ---------------------------------------------------------------------------
// Slots and sentinels
// ---------------------------------------------------------------------------

/// Position of one enqueued payload, taken from the head sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot(pub i64);

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Head and tail counters for one queue identifier.
///
/// Both start at 0. `tail <= head` always holds; work exists iff `tail < head`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sentinels {
    pub head: i64,
    pub tail: i64,
}

impl Sentinels {
    pub fn has_work(&self) -> bool {
        self.tail < self.head
    }

    /// Allocated but not yet consumed slots.
    pub fn depth(&self) -> u64 {
        (self.head - self.tail).max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// Consumer loop state
// ---------------------------------------------------------------------------

/// Lifecycle of a queue's consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Constructed, never run.
    Idle,
    /// Polling loop active.
    Running,
    /// Stopped by a cancel request.
    Canceled,
    /// Stopped because the handler returned an error.
    FatallyStopped,
}

impl QueueState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: QueueState) -> bool {
        use QueueState::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Running, Running) // superseded by a newer run
                | (Running, Canceled)
                | (Running, FatallyStopped)
                | (Canceled, Running)
                | (FatallyStopped, Running)
        )
    }

    /// Is the loop stopped?
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueState::Canceled | QueueState::FatallyStopped)
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueState::Idle => "idle",
            QueueState::Running => "running",
            QueueState::Canceled => "canceled",
            QueueState::FatallyStopped => "fatally_stopped",
        };
        write!(f, "{s}")
    }
}
