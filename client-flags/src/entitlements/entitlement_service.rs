use std::sync::Arc;
use strum::{Display, EnumString};
use tokio::task::JoinHandle;
use tracing::instrument;

use super::entitlement_models::RemoteEntitlementsPayload;
use crate::freshness::{FreshnessController, RefreshOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementStatus {
    Owned,
    NotOwned,
    /// Nothing has been loaded yet, or ownership rests only on a snapshot that no fetch has
    /// confirmed during this session.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RefreshReason {
    Boot,
    Foreground,
    Login,
    Purchase,
    Manual,
}

impl RefreshReason {
    /// Reasons after which the backend state is known to have changed.
    fn requires_fetch(self) -> bool {
        matches!(self, RefreshReason::Login | RefreshReason::Purchase)
    }
}

#[derive(Debug)]
pub enum EnsureFresh {
    AlreadyFresh,
    /// A fetch was required and has completed (or was skipped by a guard).
    Fetched(RefreshOutcome),
    /// The snapshot is usable but stale; a refresh runs in the background.
    RefreshingInBackground(JoinHandle<RefreshOutcome>),
}

/// Paid entitlements on top of the shared freshness machinery.
///
/// Lookups fail closed: anything not positively known to be owned reads as not owned. Claims
/// from a persisted snapshot are only trusted once a fetch this session has confirmed it; a
/// confirmed snapshot keeps answering while it is stale.
pub struct EntitlementStore {
    controller: Arc<FreshnessController<RemoteEntitlementsPayload>>,
}

impl EntitlementStore {
    pub fn new(controller: Arc<FreshnessController<RemoteEntitlementsPayload>>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<FreshnessController<RemoteEntitlementsPayload>> {
        &self.controller
    }

    pub fn status(&self, key: &str) -> EntitlementStatus {
        match self.controller.snapshot() {
            None => EntitlementStatus::Unknown,
            Some(snapshot) => match snapshot.payload.entitlements.get(key) {
                Some(true) if snapshot.fetched_this_session => EntitlementStatus::Owned,
                Some(true) => EntitlementStatus::Unknown,
                _ => EntitlementStatus::NotOwned,
            },
        }
    }

    pub fn has_entitlement(&self, key: &str) -> bool {
        self.status(key) == EntitlementStatus::Owned
    }

    /// `true` once the snapshot comes from a fetch made during this session.
    pub fn is_confirmed(&self) -> bool {
        self.controller
            .snapshot()
            .is_some_and(|snapshot| snapshot.fetched_this_session)
    }

    /// Makes sure entitlement claims can be trusted for `reason`.
    ///
    /// An unconfirmed snapshot (or none at all) and reasons that imply a backend change force
    /// an awaited fetch. A confirmed but stale snapshot keeps serving while a background
    /// refresh runs.
    #[instrument(skip_all, fields(reason = %reason))]
    pub async fn ensure_fresh(&self, reason: RefreshReason) -> EnsureFresh {
        let hydration = self.controller.hydrate().await;
        if let Some(outcome) = hydration.settled().await {
            return EnsureFresh::Fetched(outcome);
        }

        if !self.is_confirmed() || reason.requires_fetch() {
            tracing::debug!("entitlements need a confirmed fetch");
            return EnsureFresh::Fetched(self.controller.refresh(true).await);
        }

        if self.controller.is_stale() {
            return EnsureFresh::RefreshingInBackground(self.controller.spawn_refresh(false));
        }

        EnsureFresh::AlreadyFresh
    }

    /// Forgets everything known about the previous user.
    pub async fn on_logout(&self) {
        self.controller.clear().await;
    }
}
