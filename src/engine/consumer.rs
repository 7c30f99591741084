//! Consumer loop: poll sentinels, claim the next slot, dispatch in order.

use super::CancelToken;
use super::queue::Queue;
use crate::error::{Error, HandlerError, Result};
use crate::model::{QueuePayload, QueueState, Slot};
use crate::store::Sentinel;
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_state_transition, start_dispatch_span, start_loop_span};
use opentelemetry::KeyValue;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, info, warn};

/// A slot whose tail increment succeeded but whose payload has not been
/// dispatched yet. The loop keeps fetching it until it reads or is skipped.
#[derive(Debug)]
struct PendingSlot {
    slot: Slot,
    attempts: u32,
}

/// Per-loop delivery position.
#[derive(Debug, Default)]
struct Cursor {
    pending: Option<PendingSlot>,
    /// Tail value a failed advance would have produced had the cache applied
    /// the INCR and only the reply been lost. Checked on the next claim.
    unconfirmed_tail: Option<i64>,
}

impl Queue {
    /// Run the consumer loop until it is canceled or the handler fails.
    ///
    /// Cancels any loop this queue already runs, then drains slots in order.
    /// The returned error is the one that ended the loop: [`Error::Canceled`]
    /// after [`cancel`](Queue::cancel), [`Error::Handler`] when the handler
    /// returned an error, or [`Error::InvalidDelay`] if the poll delay is zero
    /// (in which case the loop never starts).
    pub async fn run(&self) -> Error {
        self.cancel();
        if self.config.poll_delay.is_zero() {
            warn!(identifier = %self.identifier, "poll delay must be positive");
            return Error::InvalidDelay;
        }

        let token = CancelToken::new();
        self.lock_active().token = Some(token.clone());

        // A superseded loop releases this once it sees its own cancellation.
        let _running = self.run_lock.lock().await;

        let span = start_loop_span(&self.identifier);
        self.transition(&token, &span, QueueState::Running);
        info!(identifier = %self.identifier, poll_delay = ?self.config.poll_delay, "consumer started");

        let error = self.poll(&token).instrument(span.clone()).await;

        let terminal = match error {
            Error::Canceled => QueueState::Canceled,
            _ => QueueState::FatallyStopped,
        };
        self.transition(&token, &span, terminal);
        info!(identifier = %self.identifier, %error, "consumer stopped");
        error
    }

    async fn poll(&self, token: &CancelToken) -> Error {
        let mut cursor = Cursor::default();
        let mut cooldown: Option<Instant> = None;

        loop {
            if token.is_cancelled() {
                return Error::Canceled;
            }

            if let Some(until) = cooldown.take() {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep_until(until) => {}
                }
                continue;
            }

            match self.next_delivery(&mut cursor).await {
                Ok(Some((slot, payload))) => {
                    if let Err(e) = self.dispatch(slot, payload, token).await {
                        return Error::Handler(e);
                    }
                }
                Ok(None) => {
                    self.record("empty");
                    cooldown = Some(Instant::now() + self.config.poll_delay);
                }
                Err(e) => {
                    warn!(identifier = %self.identifier, error = %e, "poll failed, cooling down");
                    self.record("soft_fail");
                    cooldown = Some(Instant::now() + self.config.poll_delay);
                }
            }
        }
    }

    /// Claim the next slot (or reuse the pending one) and fetch its payload.
    ///
    /// `Ok(None)` means the queue is drained.
    async fn next_delivery(
        &self,
        cursor: &mut Cursor,
    ) -> Result<Option<(Slot, QueuePayload)>> {
        let slot = match cursor.pending.as_ref().map(|claimed| claimed.slot) {
            Some(slot) => slot,
            None => {
                let Some(slot) = self.claim(cursor).await? else {
                    return Ok(None);
                };
                cursor.pending = Some(PendingSlot { slot, attempts: 0 });
                slot
            }
        };

        let fetched = match self.store.get_queue_payload(&self.identifier, slot).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(Error::PayloadMissing(slot)),
            Err(e) => Err(e),
        };

        match fetched {
            Ok(payload) => {
                cursor.pending = None;
                Ok(Some((slot, payload)))
            }
            Err(e) => {
                let attempts = cursor.pending.as_mut().map_or(1, |claimed| {
                    claimed.attempts += 1;
                    claimed.attempts
                });
                if e.is_poison() || attempts >= self.config.max_slot_attempts.max(1) {
                    warn!(
                        identifier = %self.identifier,
                        %slot,
                        attempts,
                        error = %e,
                        "skipping unreadable slot"
                    );
                    self.record("skip");
                    cursor.pending = None;
                }
                Err(e)
            }
        }
    }

    /// Advance the tail past the next allocated slot. `Ok(None)` when drained.
    ///
    /// The loop is the only writer of the tail, so after a failed advance the
    /// next read tells whether the INCR was applied anyway: a tail one past
    /// the value read before the advance means the slot is already ours.
    async fn claim(&self, cursor: &mut Cursor) -> Result<Option<Slot>> {
        let sentinels = self.store.get_sentinels(&self.identifier).await?;

        let unconfirmed = cursor.unconfirmed_tail.take();
        if let Some(expected) = unconfirmed.filter(|&tail| tail == sentinels.tail) {
            warn!(
                identifier = %self.identifier,
                slot = expected,
                "tail advance applied despite failed reply, resuming slot"
            );
            self.record("recovered");
            return Ok(Some(Slot(expected)));
        }

        if !sentinels.has_work() {
            return Ok(None);
        }
        match self.store.advance(&self.identifier, Sentinel::Tail).await {
            Ok(slot) => Ok(Some(slot)),
            Err(e) => {
                cursor.unconfirmed_tail = Some(sentinels.tail + 1);
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        slot: Slot,
        payload: QueuePayload,
        token: &CancelToken,
    ) -> std::result::Result<(), HandlerError> {
        let span = start_dispatch_span(&self.identifier, slot);
        debug!(parent: &span, method = %payload.method, address = %payload.address, "dispatching");
        self.record("dispatch");
        self.handler.handle(payload, token).instrument(span).await
    }

    /// Move the loop owning `token` to `to`. Ignored once a newer run has
    /// installed its own token.
    fn transition(&self, token: &CancelToken, span: &Span, to: QueueState) {
        let mut active = self.lock_active();
        if !active.token.as_ref().is_some_and(|t| t.same_as(token)) {
            return;
        }
        let from = active.state;
        if !from.can_transition_to(to) {
            warn!(identifier = %self.identifier, %from, %to, "unexpected queue state transition");
        }
        active.state = to;
        record_state_transition(span, &from.to_string(), &to.to_string());
    }

    fn record(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("identifier", self.identifier.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}
