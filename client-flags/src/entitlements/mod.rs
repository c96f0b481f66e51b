pub mod entitlement_models;
pub mod entitlement_service;

pub use entitlement_models::RemoteEntitlementsPayload;
pub use entitlement_service::{EnsureFresh, EntitlementStatus, EntitlementStore, RefreshReason};
