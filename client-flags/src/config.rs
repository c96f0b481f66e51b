use chrono::TimeDelta;
use envconfig::Envconfig;
use once_cell::sync::Lazy;
use std::ops::Deref;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Whether developer-only surfaces (overrides, loud contract checks) are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Development,
    Production,
}

impl BuildMode {
    pub fn is_development(self) -> bool {
        matches!(self, BuildMode::Development)
    }
}

/// TTL bookkeeping for one remote cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub min_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub default_ttl_secs: u64,
    /// Floor between two network fetches, applied even to forced refreshes.
    pub min_fetch_interval_secs: u64,
}

impl TtlPolicy {
    pub fn new(
        min_ttl_secs: u64,
        max_ttl_secs: u64,
        default_ttl_secs: u64,
        min_fetch_interval_secs: u64,
    ) -> Self {
        Self {
            min_ttl_secs,
            max_ttl_secs: max_ttl_secs.max(min_ttl_secs),
            default_ttl_secs,
            min_fetch_interval_secs,
        }
    }

    /// Clamps whatever the backend advertised into `[min, max]`.
    pub fn effective_ttl(&self, advertised_secs: Option<i64>) -> TimeDelta {
        let requested = match advertised_secs {
            Some(secs) => u64::try_from(secs).unwrap_or(0),
            None => self.default_ttl_secs,
        };
        seconds(requested.clamp(self.min_ttl_secs, self.max_ttl_secs))
    }

    pub fn min_fetch_interval(&self) -> TimeDelta {
        seconds(self.min_fetch_interval_secs)
    }
}

// TimeDelta holds milliseconds in an i64
fn seconds(secs: u64) -> TimeDelta {
    let bounded = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    TimeDelta::seconds(bounded)
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,

    #[envconfig(default = "http://localhost:8000")]
    pub api_base_url: String,

    #[envconfig(default = "/api/client/features")]
    pub flags_path: String,

    #[envconfig(default = "/api/client/entitlements")]
    pub entitlements_path: String,

    #[envconfig(default = "5000")]
    pub request_timeout_ms: u64,

    pub api_token: Option<String>,

    #[envconfig(default = ".client-flags")]
    pub storage_dir: String,

    #[envconfig(default = "client_flags:features")]
    pub flags_cache_key: String,

    #[envconfig(default = "client_flags:entitlements")]
    pub entitlements_cache_key: String,

    #[envconfig(default = "60")]
    pub flags_min_ttl_secs: u64,

    #[envconfig(default = "86400")]
    pub flags_max_ttl_secs: u64,

    #[envconfig(default = "3600")]
    pub flags_default_ttl_secs: u64,

    #[envconfig(default = "30")]
    pub entitlements_min_ttl_secs: u64,

    #[envconfig(default = "3600")]
    pub entitlements_max_ttl_secs: u64,

    #[envconfig(default = "300")]
    pub entitlements_default_ttl_secs: u64,

    #[envconfig(default = "30")]
    pub min_fetch_interval_secs: u64,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            debug: FlexBool(true),
            api_base_url: "http://localhost:8000".to_string(),
            flags_path: "/api/client/features".to_string(),
            entitlements_path: "/api/client/entitlements".to_string(),
            request_timeout_ms: 5000,
            api_token: None,
            storage_dir: ".client-flags-test".to_string(),
            flags_cache_key: "client_flags:features".to_string(),
            entitlements_cache_key: "client_flags:entitlements".to_string(),
            flags_min_ttl_secs: 60,
            flags_max_ttl_secs: 86400,
            flags_default_ttl_secs: 3600,
            entitlements_min_ttl_secs: 30,
            entitlements_max_ttl_secs: 3600,
            entitlements_default_ttl_secs: 300,
            min_fetch_interval_secs: 30,
        }
    }

    pub fn build_mode(&self) -> BuildMode {
        if *self.debug {
            BuildMode::Development
        } else {
            BuildMode::Production
        }
    }

    pub fn flags_ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            self.flags_min_ttl_secs,
            self.flags_max_ttl_secs,
            self.flags_default_ttl_secs,
            self.min_fetch_interval_secs,
        )
    }

    pub fn entitlements_ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            self.entitlements_min_ttl_secs,
            self.entitlements_max_ttl_secs,
            self.entitlements_default_ttl_secs,
            self.min_fetch_interval_secs,
        )
    }

    pub fn flags_url(&self) -> String {
        join_url(&self.api_base_url, &self.flags_path)
    }

    pub fn entitlements_url(&self) -> String {
        join_url(&self.api_base_url, &self.entitlements_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub static DEFAULT_TEST_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);
