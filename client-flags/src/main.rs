use anyhow::Context;
use envconfig::Envconfig;
use serde_json::{json, Map, Value};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use client_flags::client::FeatureClient;
use client_flags::config::Config;
use client_flags::flags::RolloutContext;

fn init_logging(debug: bool) {
    let base_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr);

    // Pretty output while developing, JSON otherwise
    let log_layer = if debug {
        base_layer
            .with_ansi(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        base_layer
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

/// Hydrates the flags cache under `STORAGE_DIR`, waits for any refresh it scheduled and prints
/// how every registered flag resolves. An optional first argument is used as the stable id.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("Invalid configuration")?;
    init_logging(*config.debug);

    let client = FeatureClient::from_config(&config).context("Failed to build http client")?;
    let context = std::env::args().nth(1).map(RolloutContext::with_stable_id);

    let hydration = client.hydrate().await;
    let source = hydration.source;
    let refresh = hydration.settled().await;
    if let Some(error) = client.flags().last_error() {
        tracing::warn!(kind = error.kind(), "serving flags without a fresh payload: {}", error);
    }

    let flags: Map<String, Value> = client
        .evaluate_all(context.as_ref())
        .into_iter()
        .map(|(flag, evaluation)| {
            (
                flag.name().to_string(),
                json!({
                    "enabled": evaluation.enabled,
                    "reason": evaluation.reason.to_string(),
                }),
            )
        })
        .collect();

    let report = json!({
        "hydratedFrom": source.as_str(),
        "refresh": refresh.as_ref().map(|outcome| outcome.as_str()),
        "nextFetchAt": client.flags().snapshot().map(|s| s.next_fetch_at.to_rfc3339()),
        "flags": flags,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
