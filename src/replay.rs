//! Replay queued payloads as HTTP requests.
//!
//! [`ReplayHandler`] is a ready-made [`Handler`] that sends each payload to
//! its `address` with its method, authorization, cookies, and body.
//!
//! # Example
//! ```no_run
//! use sentinelq::engine::{Queue, QueueConfig};
//! use sentinelq::replay::ReplayHandler;
//! use sentinelq::store::Store;
//!
//! # async fn demo(store: Store) {
//! let queue = Queue::new(store, "outbox", QueueConfig::default(), ReplayHandler::default());
//! let stopped_by = queue.run().await;
//! # }
//! ```

use crate::engine::{CancelToken, Handler};
use crate::error::{Error, HandlerError, Result};
use crate::model::QueuePayload;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE,
};
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::{Method, StatusCode};

/// Sends every payload it receives as an HTTP request.
#[derive(Debug, Clone, Default)]
pub struct ReplayHandler {
    client: reqwest::Client,
    stop_on_error: bool,
}

impl ReplayHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            stop_on_error: false,
        }
    }

    /// When set, a failed replay (transport error or non-2xx status) stops the
    /// consumer loop instead of being logged and skipped.
    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Build the request described by `payload` without sending it.
    ///
    /// Cookies are folded into one `Cookie` header ordered by name.
    pub fn build_request(&self, payload: &QueuePayload) -> Result<reqwest::Request> {
        let method = Method::from_bytes(payload.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::Other(format!("invalid HTTP method {:?}", payload.method)))?;

        let mut request = self.client.request(method, &payload.address);
        if let Some(authorization) = &payload.authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        if let Some(cookies) = payload.cookies.as_ref().filter(|c| !c.is_empty()) {
            let header = cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(COOKIE, header);
        }
        if let Some(body) = &payload.request_body {
            request = request.body(body.clone());
        }
        Ok(request.build()?)
    }

    /// Send the request described by `payload` and return the response status.
    pub async fn replay(&self, payload: &QueuePayload) -> Result<StatusCode> {
        let request = self.build_request(payload)?;
        let method = request.method().to_string();
        let result = self.client.execute(request).await;

        let status_code = result.as_ref().map_or(0, |r| i64::from(r.status().as_u16()));
        metrics::replayed_requests().add(
            1,
            &[
                KeyValue::new(HTTP_REQUEST_METHOD, method),
                KeyValue::new(HTTP_RESPONSE_STATUS_CODE, status_code),
            ],
        );

        Ok(result?.status())
    }
}

#[async_trait]
impl Handler for ReplayHandler {
    async fn handle(
        &self,
        payload: QueuePayload,
        _cancel: &CancelToken,
    ) -> std::result::Result<(), HandlerError> {
        let failure: HandlerError = match self.replay(&payload).await {
            Ok(status) if status.is_success() => {
                tracing::debug!(address = %payload.address, %status, "replayed");
                return Ok(());
            }
            Ok(status) => format!("{} {} answered {status}", payload.method, payload.address).into(),
            Err(e) => Box::new(e),
        };

        if self.stop_on_error {
            return Err(failure);
        }
        tracing::warn!(address = %payload.address, error = %failure, "replay failed, skipping");
        Ok(())
    }
}
