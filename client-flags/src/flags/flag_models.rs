use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::PayloadError;
use crate::freshness::RemotePayload;

/// A rollout-shaped remote value. A missing `rollout` means fully on when `enabled`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RolloutValue {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RemoteFlagValue {
    Bool(bool),
    Rollout(RolloutValue),
}

/// The backend's view of the flags, as served and as persisted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFeaturesPayload {
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
    pub flags: HashMap<String, RemoteFlagValue>,
}

impl RemoteFeaturesPayload {
    pub fn get(&self, name: &str) -> Option<&RemoteFlagValue> {
        self.flags.get(name)
    }
}

impl RemotePayload for RemoteFeaturesPayload {
    const KIND: &'static str = "flags";

    fn ttl_seconds(&self) -> Option<i64> {
        self.ttl_seconds
    }

    fn validate(&self) -> Result<(), PayloadError> {
        for (name, value) in &self.flags {
            if let RemoteFlagValue::Rollout(RolloutValue {
                rollout: Some(rollout),
                ..
            }) = value
            {
                if !rollout.is_finite() {
                    return Err(PayloadError::Invalid(format!(
                        "rollout for `{name}` is not a finite number"
                    )));
                }
            }
        }
        Ok(())
    }
}
