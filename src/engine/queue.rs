//! Queue facade: owns configuration, the handler, and the active cancel token.

use super::{CancelToken, Handler};
use crate::error::Result;
use crate::model::{QueuePayload, QueueState, Sentinels, Slot};
use crate::store::{DEFAULT_OP_TIMEOUT, Store};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use secrecy::SecretString;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Configuration for the consumer loop.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Cooldown after a tick that found no work or failed softly.
    pub poll_delay: Duration,
    /// Fetch attempts for one claimed slot before it is skipped.
    pub max_slot_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_secs(1),
            max_slot_attempts: 3,
        }
    }
}

pub(super) struct Active {
    pub(super) token: Option<CancelToken>,
    pub(super) state: QueueState,
}

/// A FIFO queue stored in the cache under one identifier.
///
/// Any number of tasks may call [`enqueue`](Queue::enqueue) concurrently. At
/// most one consumer loop ([`run`](Queue::run)) should drain an identifier;
/// the caller spawns it as its own task.
pub struct Queue {
    pub(super) store: Store,
    pub(super) identifier: String,
    pub(super) config: QueueConfig,
    pub(super) handler: Arc<dyn Handler>,
    pub(super) active: Mutex<Active>,
    pub(super) run_lock: tokio::sync::Mutex<()>,
}

impl Queue {
    pub fn new(
        store: Store,
        identifier: impl Into<String>,
        config: QueueConfig,
        handler: impl Handler + 'static,
    ) -> Self {
        Self {
            store,
            identifier: identifier.into(),
            config,
            handler: Arc::new(handler),
            active: Mutex::new(Active {
                token: None,
                state: QueueState::Idle,
            }),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Queue over the HTTP cache at `cache_address`, default settings otherwise.
    pub fn connect(
        cache_address: SecretString,
        identifier: impl Into<String>,
        poll_delay: Duration,
        handler: impl Handler + 'static,
    ) -> Result<Self> {
        let store = Store::connect(cache_address, DEFAULT_OP_TIMEOUT)?;
        let config = QueueConfig {
            poll_delay,
            ..QueueConfig::default()
        };
        Ok(Self::new(store, identifier, config, handler))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current consumer loop state.
    pub fn state(&self) -> QueueState {
        self.lock_active().state
    }

    /// Append a payload. Returns the slot it was written to.
    pub async fn enqueue(&self, payload: &QueuePayload) -> Result<Slot> {
        let result = self
            .store
            .add_request_to_queue(&self.identifier, Some(payload))
            .await;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("identifier", self.identifier.clone()),
                KeyValue::new(
                    "operation",
                    if result.is_ok() { "enqueue" } else { "enqueue_failed" },
                ),
            ],
        );
        if let Err(ref e) = result {
            tracing::warn!(identifier = %self.identifier, error = %e, "enqueue failed");
        }
        result
    }

    /// Head and tail as currently stored.
    pub async fn sentinels(&self) -> Result<Sentinels> {
        self.store.get_sentinels(&self.identifier).await
    }

    /// Slots allocated but not yet consumed.
    pub async fn depth(&self) -> Result<u64> {
        Ok(self.sentinels().await?.depth())
    }

    /// Signal the active consumer loop to stop. No-op if none is running.
    pub fn cancel(&self) {
        if let Some(token) = &self.lock_active().token {
            token.cancel();
        }
    }

    pub(super) fn lock_active(&self) -> MutexGuard<'_, Active> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
