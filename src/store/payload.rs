//! Payload slots: serialize, store, and fetch work items by slot number.

use super::{Store, cache_key};
use crate::cache::{Command, DAY_IN_SECONDS, OK_REPLY, reply};
use crate::error::{Error, Result};
use crate::model::{QueuePayload, Slot};
use crate::store::Sentinel;

const SENTINEL_VALUE: &str = "sentinel_value";

/// Cache key of the payload at `slot`: `"<identifier>:<slot>:sentinel_value"`.
pub fn slot_key(identifier: &str, slot: Slot) -> String {
    cache_key(&[identifier, &slot.to_string(), SENTINEL_VALUE])
}

impl Store {
    /// Write `payload` into `slot` with one day of retention.
    ///
    /// Succeeds only if the cache acknowledges with "OK".
    pub async fn set_queue_payload(
        &self,
        identifier: &str,
        slot: Slot,
        payload: &QueuePayload,
    ) -> Result<()> {
        let command = Command::Set {
            key: slot_key(identifier, slot),
            value: serde_json::to_string(payload)?,
            expire_seconds: DAY_IN_SECONDS,
        };
        let reply = self.exec(&command).await?;
        match reply::string(command.name(), &reply)? {
            Some(status) if status == OK_REPLY => Ok(()),
            _ => Err(Error::RequestFailedToResolve),
        }
    }

    /// Read and decode the payload at `slot`. `None` if nothing is stored there.
    pub async fn get_queue_payload(
        &self,
        identifier: &str,
        slot: Slot,
    ) -> Result<Option<QueuePayload>> {
        let command = Command::Get {
            key: slot_key(identifier, slot),
        };
        let reply = self.exec(&command).await?;
        let Some(bytes) = reply::base64(command.name(), &reply)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Allocate the next head slot and write `payload` into it.
    ///
    /// Never reads queue depth and never waits on the consumer.
    pub async fn add_request_to_queue(
        &self,
        identifier: &str,
        payload: Option<&QueuePayload>,
    ) -> Result<Slot> {
        let payload = payload.ok_or(Error::NilPayload)?;
        let slot = self.advance(identifier, Sentinel::Head).await?;
        self.set_queue_payload(identifier, slot, payload).await?;
        Ok(slot)
    }
}
