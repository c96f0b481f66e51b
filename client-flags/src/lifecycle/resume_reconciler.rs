use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use strum::{Display, EnumString};
use tokio::task::JoinHandle;

use crate::freshness::{ControllerState, FreshnessController, RefreshOutcome, RemotePayload};
use crate::metrics::consts::RESUME_REFRESH_TRIGGERED_COUNTER;
use crate::metrics::inc;
use crate::session::SessionProvider;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Active,
    Inactive,
    Background,
}

impl LifecyclePhase {
    fn is_backgrounded(self) -> bool {
        matches!(self, LifecyclePhase::Background | LifecyclePhase::Inactive)
    }
}

/// Something the reconciler can refresh when the app comes back to the foreground.
pub trait ResumeTarget: Send + Sync {
    fn label(&self) -> &'static str;
    fn is_refreshing(&self) -> bool;
    fn is_stale(&self) -> bool;
    fn trigger_refresh(self: Arc<Self>) -> JoinHandle<RefreshOutcome>;
}

impl<P: RemotePayload> ResumeTarget for FreshnessController<P> {
    fn label(&self) -> &'static str {
        P::KIND
    }

    fn is_refreshing(&self) -> bool {
        FreshnessController::is_refreshing(self)
    }

    fn is_stale(&self) -> bool {
        FreshnessController::is_stale(self)
    }

    /// A controller nobody has hydrated yet (entitlements before their first use) hydrates
    /// first; the refresh hydration schedules is the one reported.
    fn trigger_refresh(self: Arc<Self>) -> JoinHandle<RefreshOutcome> {
        if self.state() != ControllerState::Uninitialized {
            return self.spawn_refresh(false);
        }
        tokio::spawn(async move {
            match self.hydrate().await.settled().await {
                Some(outcome) => outcome,
                None => self.refresh(false).await,
            }
        })
    }
}

/// The single subscriber to the host's lifecycle signal.
///
/// A refresh fires only on a background/inactive → active transition, for a signed-in user,
/// and only for targets that are stale and idle. Refreshes are spawned and never awaited here;
/// their failures land in each controller's `last_error`.
pub struct ResumeReconciler {
    previous_phase: Mutex<LifecyclePhase>,
    session: Arc<dyn SessionProvider>,
    targets: Vec<Arc<dyn ResumeTarget>>,
}

impl ResumeReconciler {
    pub fn new(session: Arc<dyn SessionProvider>, targets: Vec<Arc<dyn ResumeTarget>>) -> Self {
        Self {
            previous_phase: Mutex::new(LifecyclePhase::Active),
            session,
            targets,
        }
    }

    pub fn previous_phase(&self) -> LifecyclePhase {
        match self.previous_phase.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Handles one lifecycle signal. Returns the handles of any refreshes it started.
    pub fn on_phase_change(&self, phase: LifecyclePhase) -> Vec<JoinHandle<RefreshOutcome>> {
        // Swap before anything else so a second signal never sees the old phase.
        let previous = {
            let mut guard = match self.previous_phase.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *guard, phase)
        };

        if !(previous.is_backgrounded() && phase == LifecyclePhase::Active) {
            return Vec::new();
        }
        if !self.session.is_authenticated() {
            tracing::debug!("resumed without a session, nothing to refresh");
            return Vec::new();
        }

        self.targets
            .iter()
            .filter(|target| {
                if target.is_refreshing() {
                    tracing::debug!(kind = target.label(), "refresh already in flight");
                    return false;
                }
                target.is_stale()
            })
            .map(|target| {
                inc(
                    RESUME_REFRESH_TRIGGERED_COUNTER,
                    &[("kind".to_string(), target.label().to_string())],
                    1,
                );
                Arc::clone(target).trigger_refresh()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticSession;
    use crate::test_utils::{entitlements_body, wait_for_calls, EntitlementsHarness};
    use chrono::TimeDelta;
    use test_case::test_case;

    async fn stale_harness() -> EntitlementsHarness {
        let h = EntitlementsHarness::new();
        h.fetcher.respond_with(entitlements_body(&[("pro", true)]));
        h.store.controller().hydrate().await.settled().await;
        h.clock.advance(TimeDelta::seconds(600));
        h
    }

    fn reconciler(h: &EntitlementsHarness, session: StaticSession) -> ResumeReconciler {
        let target: Arc<dyn ResumeTarget> = h.store.controller().clone();
        ResumeReconciler::new(Arc::new(session), vec![target])
    }

    #[test_case(LifecyclePhase::Background, LifecyclePhase::Active, 1)]
    #[test_case(LifecyclePhase::Inactive, LifecyclePhase::Active, 1)]
    #[test_case(LifecyclePhase::Active, LifecyclePhase::Active, 0)]
    #[test_case(LifecyclePhase::Active, LifecyclePhase::Background, 0)]
    #[test_case(LifecyclePhase::Background, LifecyclePhase::Inactive, 0)]
    #[test_case(LifecyclePhase::Inactive, LifecyclePhase::Background, 0)]
    #[tokio::test]
    async fn test_transitions(from: LifecyclePhase, to: LifecyclePhase, refreshes: usize) {
        let h = stale_harness().await;
        let reconciler = reconciler(&h, StaticSession::authenticated("tok"));

        reconciler.on_phase_change(from);
        let handles = reconciler.on_phase_change(to);

        assert_eq!(handles.len(), refreshes);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(h.fetcher.calls(), 1 + refreshes);
        assert_eq!(reconciler.previous_phase(), to);
    }

    #[tokio::test]
    async fn test_no_session_is_a_no_op() {
        let h = stale_harness().await;
        let reconciler = reconciler(&h, StaticSession::anonymous());

        reconciler.on_phase_change(LifecyclePhase::Background);
        assert!(reconciler.on_phase_change(LifecyclePhase::Active).is_empty());
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_target_is_skipped() {
        let h = EntitlementsHarness::new();
        h.fetcher.respond_with(entitlements_body(&[]));
        h.store.controller().hydrate().await.settled().await;
        let reconciler = reconciler(&h, StaticSession::authenticated("tok"));

        reconciler.on_phase_change(LifecyclePhase::Background);
        assert!(reconciler.on_phase_change(LifecyclePhase::Active).is_empty());
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_target_is_skipped() {
        let h = stale_harness().await;
        let reconciler = reconciler(&h, StaticSession::authenticated("tok"));

        h.fetcher.hold();
        let in_flight = h.store.controller().spawn_refresh(false);
        wait_for_calls(&h.fetcher, 2).await;

        reconciler.on_phase_change(LifecyclePhase::Background);
        assert!(reconciler.on_phase_change(LifecyclePhase::Active).is_empty());

        h.fetcher.release();
        in_flight.await.unwrap();
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_back_to_back_signals_refresh_once() {
        let h = stale_harness().await;
        let reconciler = reconciler(&h, StaticSession::authenticated("tok"));

        reconciler.on_phase_change(LifecyclePhase::Background);
        let first = reconciler.on_phase_change(LifecyclePhase::Active);
        let second = reconciler.on_phase_change(LifecyclePhase::Active);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        for handle in first {
            handle.await.unwrap();
        }
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_resume_hydrates_a_target_never_used() {
        let h = EntitlementsHarness::new();
        h.fetcher.respond_with(entitlements_body(&[("pro", true)]));
        let reconciler = reconciler(&h, StaticSession::authenticated("tok"));

        reconciler.on_phase_change(LifecyclePhase::Background);
        let handles = reconciler.on_phase_change(LifecyclePhase::Active);

        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert!(handle.await.unwrap().is_updated());
        }
        assert_eq!(h.fetcher.calls(), 1);
        assert!(h.store.is_confirmed());
        assert!(h.store.has_entitlement("pro"));
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!(
            "background".parse::<LifecyclePhase>(),
            Ok(LifecyclePhase::Background)
        );
        assert_eq!(
            serde_json::from_str::<LifecyclePhase>("\"inactive\"").unwrap(),
            LifecyclePhase::Inactive
        );
        assert_eq!(LifecyclePhase::Active.to_string(), "active");
    }
}
