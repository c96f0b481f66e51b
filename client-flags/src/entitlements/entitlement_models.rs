use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::freshness::RemotePayload;

/// Owned paid features for the signed-in user, as served and as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntitlementsPayload {
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
    pub entitlements: HashMap<String, bool>,
}

impl RemotePayload for RemoteEntitlementsPayload {
    const KIND: &'static str = "entitlements";

    fn ttl_seconds(&self) -> Option<i64> {
        self.ttl_seconds
    }
}
