//! HTTP executor for the cache command protocol.
//!
//! Every command is one `POST` of its JSON instruction array to the cache
//! address; the response body is the JSON reply.

use super::{CacheExecutor, Command};
use crate::error::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;

/// Cache handle over HTTP. Cheap to clone; the connection pool is shared.
#[derive(Debug, Clone)]
pub struct HttpCache {
    client: reqwest::Client,
    address: SecretString,
}

impl HttpCache {
    /// Build a client for the cache at `address`.
    ///
    /// `timeout` bounds each request end to end.
    pub fn new(address: SecretString, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, address))
    }

    /// Use an existing reqwest client (shared pools, custom TLS).
    pub fn with_client(client: reqwest::Client, address: SecretString) -> Self {
        Self { client, address }
    }
}

#[async_trait]
impl CacheExecutor for HttpCache {
    async fn execute(&self, command: &Command) -> Result<Value> {
        let response = self
            .client
            .post(self.address.expose_secret())
            .json(&command.to_instructions())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::CacheStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Value>().await?)
    }
}
