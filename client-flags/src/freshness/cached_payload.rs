use chrono::{DateTime, TimeDelta, Utc};
use common_kv_store::{Client as KvClient, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::instrument;

use super::RemotePayload;
use crate::errors::{CacheError, PayloadError};

/// The only unit ever written to storage. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPayload<P> {
    pub saved_at: DateTime<Utc>,
    pub next_fetch_at: DateTime<Utc>,
    pub payload: P,
}

impl<P: RemotePayload> CachedPayload<P> {
    pub fn new(payload: P, saved_at: DateTime<Utc>, ttl: TimeDelta) -> Self {
        let ttl = ttl.max(TimeDelta::zero());
        let next_fetch_at = saved_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            saved_at,
            next_fetch_at,
            payload,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_fetch_at
    }

    /// Decodes a persisted entry, applying the same boundary checks as a network payload.
    pub fn decode(raw: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(PayloadError::NotAnObject);
        }
        let envelope: Envelope = serde_json::from_value(value)?;
        if envelope.next_fetch_at < envelope.saved_at {
            return Err(PayloadError::Invalid(
                "nextFetchAt is earlier than savedAt".to_string(),
            ));
        }
        Ok(Self {
            saved_at: envelope.saved_at,
            next_fetch_at: envelope.next_fetch_at,
            payload: P::from_value(envelope.payload)?,
        })
    }

    pub fn encode(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    saved_at: DateTime<Utc>,
    next_fetch_at: DateTime<Utc>,
    payload: Value,
}

/// Read/write/clear access to one persisted `CachedPayload` under a single key.
pub struct PayloadCache<P> {
    client: Arc<dyn KvClient + Send + Sync>,
    key: String,
    _payload: PhantomData<fn() -> P>,
}

impl<P: RemotePayload> PayloadCache<P> {
    pub fn new(client: Arc<dyn KvClient + Send + Sync>, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            _payload: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `Ok(None)` when nothing was ever stored; `Err(Corrupted)` when what's stored is unusable.
    #[instrument(skip_all, fields(kind = P::KIND))]
    pub async fn read(&self) -> Result<Option<CachedPayload<P>>, CacheError> {
        let Some(raw) = self.client.get(self.key.clone()).await? else {
            return Ok(None);
        };
        let entry = CachedPayload::decode(&raw).map_err(|e| {
            tracing::warn!("discarding persisted {} cache: {}", P::KIND, e);
            CacheError::Corrupted(e)
        })?;
        Ok(Some(entry))
    }

    #[instrument(skip_all, fields(kind = P::KIND))]
    pub async fn write(&self, entry: &CachedPayload<P>) -> Result<(), CacheError> {
        let raw = entry.encode()?;
        self.client.set(self.key.clone(), raw).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.client.remove(self.key.clone()).await
    }
}
