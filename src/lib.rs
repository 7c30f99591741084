//! # sentinelq
//!
//! Durable FIFO work queue stored entirely in an external key-value cache.
//!
//! Producers allocate slots by atomically incrementing a head sentinel and
//! write request descriptors into them; a single consumer per queue
//! identifier advances the tail sentinel and hands each payload to a
//! [`Handler`](engine::Handler) in strict enqueue order.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod replay;
pub mod store;
pub mod telemetry;
