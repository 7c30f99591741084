//! Span helpers for the consumer loop.

use crate::model::Slot;
use tracing::Span;

/// Span covering one consumer loop from start to stop.
///
/// `queue.state` is declared empty and updated by
/// [`record_state_transition`].
pub fn start_loop_span(identifier: &str) -> Span {
    tracing::info_span!(
        "queue.consume",
        "queue.identifier" = identifier,
        "queue.state" = tracing::field::Empty,
    )
}

/// Span around one handler invocation.
pub fn start_dispatch_span(identifier: &str, slot: Slot) -> Span {
    tracing::info_span!(
        "queue.dispatch",
        "queue.identifier" = identifier,
        "queue.slot" = slot.0,
    )
}

/// Record a loop state transition on `span` and emit it as an event.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("queue.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
