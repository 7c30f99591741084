//! Metric instruments for sentinelq.
//!
//! Instruments come from the `"sentinelq"` meter of the globally registered
//! `MeterProvider`; without one they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("sentinelq")
}

/// Counter: queue-level events.
/// Labels: `identifier`, `operation` ("enqueue" | "enqueue_failed" |
/// "dispatch" | "empty" | "soft_fail" | "skip" | "recovered").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("sentinelq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: cache protocol commands.
/// Labels: `command`, `result` ("ok" | "error" | "timeout").
pub fn cache_commands() -> Counter<u64> {
    meter()
        .u64_counter("sentinelq.cache.commands")
        .with_description("Number of cache commands executed")
        .build()
}

/// Histogram: cache command latency in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("sentinelq.operation.duration_ms")
        .with_description("Cache command duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: HTTP requests replayed from payloads.
/// Labels: `http.request.method`, `http.response.status_code` (0 on transport error).
pub fn replayed_requests() -> Counter<u64> {
    meter()
        .u64_counter("sentinelq.replay.requests")
        .with_description("Number of payloads replayed as HTTP requests")
        .build()
}
