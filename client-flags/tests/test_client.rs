use assert_json_diff::assert_json_eq;
use chrono::TimeDelta;
use serde_json::{json, Value};
use tempfile::TempDir;

use client_flags::client::FeatureClient;
use client_flags::entitlements::{EnsureFresh, EntitlementStatus, RefreshReason};
use client_flags::errors::{FreshnessError, TransportError};
use client_flags::flags::flag_models::{RemoteFlagValue, RolloutValue};
use client_flags::flags::{Flag, FlagEvaluationReason, RolloutContext};
use client_flags::freshness::{HydrationSource, RefreshOutcome, SkipReason};
use client_flags::lifecycle::LifecyclePhase;
use client_flags::test_utils::{entitlements_body, features_body, wait_for_calls};

use crate::common::*;
mod common;

fn rollout(enabled: bool, rollout: Option<f64>) -> RemoteFlagValue {
    RemoteFlagValue::Rollout(RolloutValue { enabled, rollout })
}

#[tokio::test]
async fn it_hydrates_a_fresh_install_with_the_default_ttl() {
    let handle = ClientHandle::new();
    handle
        .flags_fetcher
        .respond_with(features_body(&[("new_onboarding", RemoteFlagValue::Bool(true))], None));

    let hydration = handle.client.hydrate().await;
    assert_eq!(hydration.source, HydrationSource::Empty);
    assert!(!handle.client.is_enabled(Flag::NewOnboarding, None));
    assert!(hydration.settled().await.unwrap().is_updated());

    let snapshot = handle.client.flags().snapshot().unwrap();
    assert_eq!(
        snapshot.next_fetch_at,
        snapshot.saved_at + TimeDelta::seconds(3600)
    );
    assert!(handle.client.is_enabled(Flag::NewOnboarding, None));

    handle.clock.advance(TimeDelta::seconds(1));
    assert_eq!(
        handle.client.refresh(false).await,
        RefreshOutcome::Skipped(SkipReason::NotDue)
    );
    assert_eq!(handle.flags_fetcher.calls(), 1);

    let persisted: Value =
        serde_json::from_str(&handle.persisted_flags().await.unwrap()).unwrap();
    assert_json_eq!(
        persisted,
        json!({
            "savedAt": "2026-03-01T12:00:00Z",
            "nextFetchAt": "2026-03-01T13:00:00Z",
            "payload": {"version": 1, "flags": {"new_onboarding": true}}
        })
    );
}

#[tokio::test]
async fn it_serves_a_stale_cache_while_refreshing_once() {
    let handle = ClientHandle::new();
    handle
        .persist_flags(
            "2026-03-01T10:00:00Z",
            600,
            &[("paywall_v2", RemoteFlagValue::Bool(true))],
        )
        .await;
    handle
        .flags_fetcher
        .respond_with(features_body(&[("paywall_v2", RemoteFlagValue::Bool(false))], None));
    handle.flags_fetcher.hold();

    let hydration = handle.client.hydrate().await;

    assert_eq!(hydration.source, HydrationSource::Cache);
    assert!(handle.client.is_feature_enabled("paywall_v2", None));

    wait_for_calls(&handle.flags_fetcher, 1).await;
    handle.flags_fetcher.release();
    assert!(hydration.settled().await.unwrap().is_updated());

    assert!(!handle.client.is_feature_enabled("paywall_v2", None));
    assert_eq!(handle.flags_fetcher.calls(), 1);
}

#[tokio::test]
async fn it_keeps_partial_rollouts_sticky() {
    let handle = ClientHandle::new();
    handle
        .flags_fetcher
        .respond_with(features_body(&[("social_sharing", rollout(true, Some(0.3)))], None));
    handle.client.hydrate().await.settled().await;

    let context = RolloutContext::with_stable_id("user-42");
    let first = handle.client.is_feature_enabled("social_sharing", Some(&context));
    for _ in 0..10 {
        assert_eq!(
            handle.client.is_feature_enabled("social_sharing", Some(&context)),
            first
        );
    }

    // a restarted client reading the same cache buckets the same way
    let restarted = handle.restart();
    let hydration = restarted.client.hydrate().await;
    assert_eq!(hydration.source, HydrationSource::Cache);
    assert!(hydration.pending_refresh.is_none());
    assert_eq!(
        restarted
            .client
            .is_feature_enabled("social_sharing", Some(&context)),
        first
    );
    assert_eq!(restarted.flags_fetcher.calls(), 0);
}

#[tokio::test]
async fn it_ignores_resume_without_backgrounding() {
    let handle = ClientHandle::new();
    handle.flags_fetcher.respond_with(features_body(&[], None));
    handle
        .entitlements_fetcher
        .respond_with(entitlements_body(&[("pro", true)]));
    handle.client.hydrate().await.settled().await;
    handle
        .client
        .ensure_fresh_entitlements(RefreshReason::Boot)
        .await;
    handle.clock.advance(TimeDelta::seconds(7200));

    assert!(handle
        .client
        .on_lifecycle_change(LifecyclePhase::Active)
        .is_empty());
    assert!(handle
        .client
        .on_lifecycle_change(LifecyclePhase::Active)
        .is_empty());

    assert_eq!(handle.flags_fetcher.calls(), 1);
    assert_eq!(handle.entitlements_fetcher.calls(), 1);
}

#[tokio::test]
async fn it_treats_a_corrupted_cache_like_no_cache() {
    let body = features_body(&[("offline_mode", RemoteFlagValue::Bool(false))], None);

    let clean = ClientHandle::new();
    clean.flags_fetcher.respond_with(body.clone());
    let clean_hydration = clean.client.hydrate().await;
    let clean_before = clean.client.evaluate_all(None);
    clean_hydration.settled().await;

    let corrupted_entries = [
        "{\"savedAt\": \"2026-03-01T11:00:00Z\", \"nextFetchAt\": \"2026-03-0",
        r#"{"savedAt": "2026-03-01T11:00:00Z", "nextFetchAt": "2026-03-01T13:00:00Z", "payload": {"version": 1}}"#,
    ];
    for raw in corrupted_entries {
        let handle = ClientHandle::new();
        handle.persist_flags_raw(raw).await;
        handle.flags_fetcher.respond_with(body.clone());

        let hydration = handle.client.hydrate().await;
        assert_eq!(hydration.source, HydrationSource::Corrupted);
        assert_eq!(handle.client.evaluate_all(None), clean_before);

        assert!(hydration.settled().await.unwrap().is_updated());
        assert_eq!(
            handle.client.evaluate_all(None),
            clean.client.evaluate_all(None)
        );
        assert_eq!(handle.flags_fetcher.calls(), 1);
    }
}

#[tokio::test]
async fn it_makes_one_call_for_overlapping_refreshes() {
    let handle = ClientHandle::new();
    handle.flags_fetcher.respond_with(features_body(&[], None));
    handle.client.hydrate().await.settled().await;
    handle.clock.advance(TimeDelta::seconds(3600));

    let (first, second) =
        futures::future::join(handle.client.refresh(false), handle.client.refresh(false)).await;

    assert_eq!(
        [first.is_updated(), second.is_updated()]
            .iter()
            .filter(|updated| **updated)
            .count(),
        1
    );
    assert_eq!(handle.flags_fetcher.calls(), 2);
}

#[tokio::test]
async fn it_leaves_everything_untouched_when_a_refresh_fails() {
    let handle = ClientHandle::new();
    handle
        .flags_fetcher
        .respond_with(features_body(&[("paywall_v2", RemoteFlagValue::Bool(true))], None));
    handle.client.hydrate().await.settled().await;

    let snapshot_before = handle.client.flags().snapshot().unwrap();
    let persisted_before = handle.persisted_flags().await.unwrap();

    handle.clock.advance(TimeDelta::seconds(3600));
    handle
        .flags_fetcher
        .push_response(Err(TransportError::Network("connection reset".to_string())));
    let outcome = handle.client.refresh(false).await;

    assert!(matches!(outcome, RefreshOutcome::Failed(_)));
    assert_eq!(handle.client.flags().snapshot().unwrap(), snapshot_before);
    assert_eq!(handle.persisted_flags().await.unwrap(), persisted_before);
    assert!(handle.client.is_enabled(Flag::PaywallV2, None));
    assert_eq!(
        handle.client.flags().last_error().map(|e| e.kind()),
        Some("transport")
    );
}

#[tokio::test]
async fn it_requires_a_confirmed_fetch_for_entitlements() {
    let handle = ClientHandle::new();
    handle
        .entitlements_fetcher
        .respond_with(entitlements_body(&[("pro", true)]));

    assert!(!handle.client.has_entitlement("pro"));
    let outcome = handle
        .client
        .ensure_fresh_entitlements(RefreshReason::Boot)
        .await;
    assert!(matches!(outcome, EnsureFresh::Fetched(o) if o.is_updated()));
    assert!(handle.client.has_entitlement("pro"));

    // a restart loads the persisted claims but does not grant them until confirmed
    let restarted = handle.restart();
    restarted
        .entitlements_fetcher
        .respond_with(entitlements_body(&[]));
    restarted.client.entitlements().controller().hydrate().await;
    assert!(restarted.client.entitlements().controller().snapshot().is_some());
    assert!(!restarted.client.entitlements().is_confirmed());
    assert_eq!(
        restarted.client.entitlement_status("pro"),
        EntitlementStatus::Unknown
    );
    assert!(!restarted.client.has_entitlement("pro"));

    restarted
        .client
        .ensure_fresh_entitlements(RefreshReason::Foreground)
        .await;
    assert!(!restarted.client.has_entitlement("pro"));
}

#[tokio::test]
async fn it_fetches_over_http_with_the_session_token() {
    let server = StubServer::serving(
        200,
        r#"{"version": 3, "ttlSeconds": 120, "flags": {"paywall_v2": {"enabled": true}}}"#,
    )
    .await;
    let dir = TempDir::new().unwrap();
    let mut config = DEFAULT_CONFIG.clone();
    config.api_base_url = server.url("");
    config.api_token = Some("tok_http".to_string());
    config.storage_dir = dir.path().to_string_lossy().into_owned();

    let client = FeatureClient::from_config(&config).unwrap();
    let outcome = client.hydrate().await.settled().await.unwrap();

    assert!(outcome.is_updated(), "{outcome:?}");
    assert_eq!(
        client.evaluate(Flag::PaywallV2, None).reason,
        FlagEvaluationReason::FullyEnabled
    );
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let head = requests[0].to_lowercase();
    assert!(head.starts_with("get /api/client/features "), "{head}");
    assert!(head.contains("authorization: bearer tok_http"), "{head}");
    assert!(dir.path().join("client_flags_features").exists());
}

#[tokio::test]
async fn it_reports_server_errors_as_failed_refreshes() {
    let server = StubServer::serving(503, r#"{"error": "maintenance"}"#).await;
    let dir = TempDir::new().unwrap();
    let mut config = DEFAULT_CONFIG.clone();
    config.api_base_url = server.url("");
    config.storage_dir = dir.path().to_string_lossy().into_owned();

    let client = FeatureClient::from_config(&config).unwrap();
    let outcome = client.hydrate().await.settled().await.unwrap();

    assert_eq!(
        outcome,
        RefreshOutcome::Failed(FreshnessError::Transport(TransportError::Status(503)))
    );
    assert!(client.is_enabled(Flag::OfflineMode, None));
    assert!(client.flags().snapshot().is_none());
    let head = server.requests()[0].to_lowercase();
    assert!(!head.contains("authorization:"), "{head}");
}
