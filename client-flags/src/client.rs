use common_kv_store::{Client as KvClient, FileClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{BuildMode, Config};
use crate::entitlements::{
    EnsureFresh, EntitlementStatus, EntitlementStore, RefreshReason, RemoteEntitlementsPayload,
};
use crate::errors::TransportError;
use crate::flags::flag_models::RemoteFeaturesPayload;
use crate::flags::overrides::OverrideLayer;
use crate::flags::{Flag, FlagEvaluation, FlagResolver, RolloutContext};
use crate::freshness::{
    Clock, FreshnessController, Hydration, PayloadCache, RefreshOutcome, SystemClock,
};
use crate::lifecycle::{LifecyclePhase, ResumeReconciler, ResumeTarget};
use crate::session::{SessionProvider, StaticSession};
use crate::transport::{Fetcher, HttpFetcher};

/// Everything the client talks to outside this crate.
pub struct Collaborators {
    pub storage: Arc<dyn KvClient + Send + Sync>,
    pub flags_fetcher: Arc<dyn Fetcher>,
    pub entitlements_fetcher: Arc<dyn Fetcher>,
    pub session: Arc<dyn SessionProvider>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// File-backed storage under `STORAGE_DIR` and HTTP fetchers against `API_BASE_URL`.
    pub fn from_config(
        config: &Config,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self, TransportError> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let flags_fetcher = HttpFetcher::new(config.flags_url(), timeout, session.clone())?;
        let entitlements_fetcher =
            HttpFetcher::new(config.entitlements_url(), timeout, session.clone())?;
        Ok(Self {
            storage: Arc::new(FileClient::new(&config.storage_dir)),
            flags_fetcher: Arc::new(flags_fetcher),
            entitlements_fetcher: Arc::new(entitlements_fetcher),
            session,
            clock: Arc::new(SystemClock),
        })
    }
}

/// The caller-facing surface: flag resolution, dev overrides, entitlements and the lifecycle hook.
///
/// Nothing here returns an error. Failures degrade to the last known good state and are
/// available through each controller's `last_error`.
pub struct FeatureClient {
    mode: BuildMode,
    flags: Arc<FreshnessController<RemoteFeaturesPayload>>,
    overrides: Arc<OverrideLayer>,
    resolver: FlagResolver,
    entitlements: EntitlementStore,
    reconciler: ResumeReconciler,
}

impl FeatureClient {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let mode = config.build_mode();
        let flags = Arc::new(FreshnessController::new(
            PayloadCache::new(
                collaborators.storage.clone(),
                config.flags_cache_key.clone(),
            ),
            collaborators.flags_fetcher,
            collaborators.clock.clone(),
            config.flags_ttl_policy(),
        ));
        let entitlements = Arc::new(FreshnessController::<RemoteEntitlementsPayload>::new(
            PayloadCache::new(
                collaborators.storage,
                config.entitlements_cache_key.clone(),
            ),
            collaborators.entitlements_fetcher,
            collaborators.clock,
            config.entitlements_ttl_policy(),
        ));

        let overrides = Arc::new(OverrideLayer::new(mode));
        let resolver = FlagResolver::new(mode, overrides.clone(), flags.clone());
        let flags_target: Arc<dyn ResumeTarget> = flags.clone();
        let entitlements_target: Arc<dyn ResumeTarget> = entitlements.clone();
        let reconciler = ResumeReconciler::new(
            collaborators.session,
            vec![flags_target, entitlements_target],
        );

        Self {
            mode,
            flags,
            overrides,
            resolver,
            entitlements: EntitlementStore::new(entitlements),
            reconciler,
        }
    }

    /// Production wiring from the environment, with a session seeded from `API_TOKEN`.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let session: Arc<dyn SessionProvider> = match &config.api_token {
            Some(token) => Arc::new(StaticSession::authenticated(token.clone())),
            None => Arc::new(StaticSession::anonymous()),
        };
        let collaborators = Collaborators::from_config(config, session)?;
        Ok(Self::new(config, collaborators))
    }

    pub fn build_mode(&self) -> BuildMode {
        self.mode
    }

    pub fn flags(&self) -> &Arc<FreshnessController<RemoteFeaturesPayload>> {
        &self.flags
    }

    pub fn entitlements(&self) -> &EntitlementStore {
        &self.entitlements
    }

    pub fn is_feature_enabled(&self, name: &str, context: Option<&RolloutContext>) -> bool {
        self.resolver.is_enabled_by_name(name, context)
    }

    pub fn is_enabled(&self, flag: Flag, context: Option<&RolloutContext>) -> bool {
        self.resolver.is_enabled(flag, context)
    }

    pub fn evaluate(&self, flag: Flag, context: Option<&RolloutContext>) -> FlagEvaluation {
        self.resolver.evaluate(flag, context)
    }

    /// Every registered flag with how it resolved.
    pub fn evaluate_all(&self, context: Option<&RolloutContext>) -> Vec<(Flag, FlagEvaluation)> {
        Flag::ALL
            .iter()
            .map(|flag| (*flag, self.resolver.evaluate(*flag, context)))
            .collect()
    }

    /// Loads the persisted flags and schedules a refresh if they are missing or expired.
    ///
    /// Call once at boot; later calls return `AlreadyHydrated`. Entitlements hydrate lazily,
    /// in [`FeatureClient::ensure_fresh_entitlements`] or on the first foreground resume.
    pub async fn hydrate(&self) -> Hydration {
        self.flags.hydrate().await
    }

    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        self.flags.refresh(force).await
    }

    /// Forces `name` on or off (`None` removes the override). Development builds only.
    pub fn set_dev_override(&self, name: &str, value: Option<bool>) {
        match Flag::from_name(name) {
            Some(flag) => self.overrides.set_override(flag, value),
            None if self.mode.is_development() => {
                panic!("unknown feature flag `{name}`; add it to the flag registry")
            }
            None => tracing::warn!(flag = name, "ignoring override for unknown feature flag"),
        }
    }

    pub fn clear_dev_overrides(&self) {
        self.overrides.clear_all_overrides();
    }

    pub fn has_entitlement(&self, key: &str) -> bool {
        self.entitlements.has_entitlement(key)
    }

    pub fn entitlement_status(&self, key: &str) -> EntitlementStatus {
        self.entitlements.status(key)
    }

    pub async fn ensure_fresh_entitlements(&self, reason: RefreshReason) -> EnsureFresh {
        self.entitlements.ensure_fresh(reason).await
    }

    /// Entry point for the host's lifecycle signal.
    pub fn on_lifecycle_change(&self, phase: LifecyclePhase) -> Vec<JoinHandle<RefreshOutcome>> {
        self.reconciler.on_phase_change(phase)
    }

    /// Call after the host's session has switched to the new user.
    pub async fn on_login(&self) -> EnsureFresh {
        self.entitlements.ensure_fresh(RefreshReason::Login).await
    }

    pub async fn on_logout(&self) {
        self.entitlements.on_logout().await;
    }
}
