//! TTL-driven caching of remotely supplied documents.
//!
//! Flags and entitlements share this machinery. Each one owns a [`PayloadCache`] (the single
//! persisted copy) and a [`FreshnessController`] (the in-memory snapshot plus the refresh state
//! machine). Both only ever deal with payloads that already passed [`RemotePayload::parse`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

use crate::errors::PayloadError;

pub mod cached_payload;
pub mod clock;
pub mod controller;

pub use cached_payload::{CachedPayload, PayloadCache};
pub use clock::{Clock, SystemClock};
pub use controller::{
    ControllerState, FreshnessController, Hydration, HydrationSource, RefreshOutcome,
    RefreshState, SkipReason, Snapshot,
};

/// A backend document with TTL bookkeeping, validated at the boundary.
pub trait RemotePayload:
    Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Label used in logs and metrics.
    const KIND: &'static str;

    fn ttl_seconds(&self) -> Option<i64>;

    /// Semantic checks that serde cannot express.
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }

    /// Decodes an untrusted body. Anything but a well-formed object is rejected as a whole.
    fn parse(body: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self, PayloadError> {
        if !value.is_object() {
            return Err(PayloadError::NotAnObject);
        }
        let payload: Self = serde_json::from_value(value)?;
        payload.validate()?;
        Ok(payload)
    }
}
