use std::sync::Arc;
use strum::{Display, EnumString};

use super::flag_models::{RemoteFeaturesPayload, RemoteFlagValue, RolloutValue};
use super::hash::{bucket, rollout_seed};
use super::overrides::OverrideLayer;
use super::registry::Flag;
use crate::config::BuildMode;
use crate::freshness::FreshnessController;
use crate::metrics::consts::{ROLLOUT_MISSING_STABLE_ID_COUNTER, UNKNOWN_FLAG_COUNTER};
use crate::metrics::inc;

/// Caller-supplied identity used only for bucketing. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutContext {
    pub stable_id: Option<String>,
}

impl RolloutContext {
    pub fn with_stable_id(stable_id: impl Into<String>) -> Self {
        Self {
            stable_id: Some(stable_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FlagEvaluationReason {
    Override,
    RemoteBoolean,
    RolloutDisabled,
    FullyEnabled,
    RolloutBucket,
    MissingStableId,
    Default,
    UnknownFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagEvaluation {
    pub enabled: bool,
    pub reason: FlagEvaluationReason,
}

impl FlagEvaluation {
    fn new(enabled: bool, reason: FlagEvaluationReason) -> Self {
        Self { enabled, reason }
    }
}

/// Decides whether a flag is on: override, then remote snapshot, then compiled default.
///
/// Reads only in-memory state and never awaits, so it is safe to call from render paths.
pub struct FlagResolver {
    mode: BuildMode,
    overrides: Arc<OverrideLayer>,
    remote: Arc<FreshnessController<RemoteFeaturesPayload>>,
}

impl FlagResolver {
    pub fn new(
        mode: BuildMode,
        overrides: Arc<OverrideLayer>,
        remote: Arc<FreshnessController<RemoteFeaturesPayload>>,
    ) -> Self {
        Self {
            mode,
            overrides,
            remote,
        }
    }

    pub fn is_enabled(&self, flag: Flag, context: Option<&RolloutContext>) -> bool {
        self.evaluate(flag, context).enabled
    }

    /// String lookup for callers that only have a flag name.
    ///
    /// An unregistered name is a programming error: it panics in development builds and
    /// resolves to `false` in production.
    pub fn is_enabled_by_name(&self, name: &str, context: Option<&RolloutContext>) -> bool {
        self.evaluate_by_name(name, context).enabled
    }

    pub fn evaluate_by_name(&self, name: &str, context: Option<&RolloutContext>) -> FlagEvaluation {
        match Flag::from_name(name) {
            Some(flag) => self.evaluate(flag, context),
            None => {
                inc(UNKNOWN_FLAG_COUNTER, &[], 1);
                if self.mode.is_development() {
                    panic!("unknown feature flag `{name}`; add it to the flag registry");
                }
                tracing::error!(flag = name, "resolving unknown feature flag");
                FlagEvaluation::new(false, FlagEvaluationReason::UnknownFlag)
            }
        }
    }

    pub fn evaluate(&self, flag: Flag, context: Option<&RolloutContext>) -> FlagEvaluation {
        if let Some(value) = self.overrides.get(flag) {
            return FlagEvaluation::new(value, FlagEvaluationReason::Override);
        }

        if let Some(snapshot) = self.remote.snapshot() {
            if let Some(value) = snapshot.payload.get(flag.name()) {
                return self.resolve_remote(flag, value, context);
            }
        }

        FlagEvaluation::new(flag.default_value(), FlagEvaluationReason::Default)
    }

    fn resolve_remote(
        &self,
        flag: Flag,
        value: &RemoteFlagValue,
        context: Option<&RolloutContext>,
    ) -> FlagEvaluation {
        let rollout = match value {
            RemoteFlagValue::Bool(enabled) => {
                return FlagEvaluation::new(*enabled, FlagEvaluationReason::RemoteBoolean)
            }
            RemoteFlagValue::Rollout(RolloutValue { enabled: false, .. }) => {
                return FlagEvaluation::new(false, FlagEvaluationReason::RolloutDisabled)
            }
            RemoteFlagValue::Rollout(RolloutValue {
                enabled: true,
                rollout: None,
            }) => return FlagEvaluation::new(true, FlagEvaluationReason::FullyEnabled),
            RemoteFlagValue::Rollout(RolloutValue {
                enabled: true,
                rollout: Some(rollout),
            }) => *rollout,
        };

        if rollout >= 1.0 {
            return FlagEvaluation::new(true, FlagEvaluationReason::FullyEnabled);
        }
        if rollout <= 0.0 {
            return FlagEvaluation::new(false, FlagEvaluationReason::RolloutDisabled);
        }

        let Some(stable_id) = context.and_then(|c| c.stable_id.as_deref()) else {
            // fail closed: a partial rollout never turns on for an unknown user
            inc(
                ROLLOUT_MISSING_STABLE_ID_COUNTER,
                &[("flag".to_string(), flag.name().to_string())],
                1,
            );
            if self.mode.is_development() {
                tracing::warn!(
                    flag = flag.name(),
                    rollout,
                    "partial rollout resolved without a stable id"
                );
            }
            return FlagEvaluation::new(false, FlagEvaluationReason::MissingStableId);
        };

        let enabled = bucket(&rollout_seed(flag.name(), stable_id)) < rollout;
        FlagEvaluation::new(enabled, FlagEvaluationReason::RolloutBucket)
    }
}
