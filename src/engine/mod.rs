//! Queue engine: producer, consumer loop, cancellation.

pub mod cancel;
mod consumer;
pub mod handler;
pub mod queue;

pub use cancel::CancelToken;
pub use handler::Handler;
pub use queue::{Queue, QueueConfig};
