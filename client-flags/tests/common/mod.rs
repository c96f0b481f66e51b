#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::TimeDelta;
use once_cell::sync::Lazy;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use client_flags::client::{Collaborators, FeatureClient};
use client_flags::config::Config;
use client_flags::flags::flag_models::RemoteFlagValue;
use client_flags::freshness::CachedPayload;
use client_flags::session::StaticSession;
use client_flags::test_utils::{features_payload, parse_time, ManualClock, MockFetcher};
use common_kv_store::{Client, FileClient};

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);

pub const BOOT_TIME: &str = "2026-03-01T12:00:00Z";

/// A client over a real file store in a temp dir, with scripted fetchers and a manual clock.
pub struct ClientHandle {
    pub client: FeatureClient,
    pub flags_fetcher: Arc<MockFetcher>,
    pub entitlements_fetcher: Arc<MockFetcher>,
    pub session: Arc<StaticSession>,
    pub clock: Arc<ManualClock>,
    pub storage: FileClient,
    pub config: Config,
    dir: Arc<TempDir>,
}

impl ClientHandle {
    pub fn new() -> ClientHandle {
        let dir = Arc::new(TempDir::new().expect("failed to create temp dir"));
        let clock = Arc::new(ManualClock::at(BOOT_TIME));
        Self::over(dir, clock)
    }

    /// A second client over the same storage and clock, as after an app restart.
    pub fn restart(&self) -> ClientHandle {
        Self::over(self.dir.clone(), self.clock.clone())
    }

    fn over(dir: Arc<TempDir>, clock: Arc<ManualClock>) -> ClientHandle {
        let mut config = DEFAULT_CONFIG.clone();
        config.storage_dir = dir.path().to_string_lossy().into_owned();

        let storage = FileClient::new(dir.path());
        let flags_fetcher = Arc::new(MockFetcher::new());
        let entitlements_fetcher = Arc::new(MockFetcher::new());
        let session = Arc::new(StaticSession::authenticated("tok_test"));
        let client = FeatureClient::new(
            &config,
            Collaborators {
                storage: Arc::new(storage.clone()),
                flags_fetcher: flags_fetcher.clone(),
                entitlements_fetcher: entitlements_fetcher.clone(),
                session: session.clone(),
                clock: clock.clone(),
            },
        );

        ClientHandle {
            client,
            flags_fetcher,
            entitlements_fetcher,
            session,
            clock,
            storage,
            config,
            dir,
        }
    }

    pub async fn persisted_flags(&self) -> Option<String> {
        self.storage
            .get(self.config.flags_cache_key.clone())
            .await
            .expect("failed to read flags cache")
    }

    pub async fn persist_flags_raw(&self, raw: &str) {
        self.storage
            .set(self.config.flags_cache_key.clone(), raw.to_string())
            .await
            .expect("failed to write flags cache");
    }

    /// Persists a flags entry saved at `saved_at` that expires `ttl_secs` later.
    pub async fn persist_flags(
        &self,
        saved_at: &str,
        ttl_secs: i64,
        flags: &[(&str, RemoteFlagValue)],
    ) {
        let entry = CachedPayload::new(
            features_payload(flags, Some(ttl_secs)),
            parse_time(saved_at),
            TimeDelta::seconds(ttl_secs),
        );
        let raw = entry.encode().expect("failed to encode cache entry");
        self.persist_flags_raw(&raw).await;
    }
}

/// Minimal HTTP/1.1 responder: every request gets the same status and body.
pub struct StubServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn serving(status: u16, body: &'static str) -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    seen.lock()
                        .unwrap()
                        .push(String::from_utf8_lossy(&head).into_owned());

                    let response = format!(
                        "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                    socket.shutdown().await.unwrap();
                });
            }
        });

        StubServer { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}
