use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::errors::TransportError;
use crate::session::SessionProvider;

/// Retrieves the raw body of one remote document.
///
/// Implementations own their timeout; a timeout is reported like any other transport failure.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, TransportError>;
}

/// Authenticated `GET` against a fixed URL.
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
    session: Arc<dyn SessionProvider>,
}

impl HttpFetcher {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::from)?;
        Ok(Self::with_client(client, url, session))
    }

    pub fn with_client(
        client: reqwest::Client,
        url: impl Into<String>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            session,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn fetch(&self) -> Result<Bytes, TransportError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = self.session.access_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let body = response.bytes().await?;
        tracing::debug!(len = body.len(), "fetched remote payload");
        Ok(body)
    }
}
