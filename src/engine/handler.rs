//! Dispatch target for consumed payloads.

use super::CancelToken;
use crate::error::HandlerError;
use crate::model::QueuePayload;
use async_trait::async_trait;
use std::future::Future;

/// Receives each payload the consumer loop drains, in slot order.
///
/// Returning `Err` stops the loop for good and becomes the return value of
/// [`Queue::run`](super::Queue::run). The handler may also stop its own loop
/// through `cancel`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        payload: QueuePayload,
        cancel: &CancelToken,
    ) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(QueuePayload, CancelToken) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        payload: QueuePayload,
        cancel: &CancelToken,
    ) -> std::result::Result<(), HandlerError> {
        (self)(payload, cancel.clone()).await
    }
}
