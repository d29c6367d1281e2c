//! Network transport for remote assets

use crate::error::{FetchError, Result};
use bytes::Bytes;
use std::future::Future;
use tracing::{debug, warn};
use url::Url;

/// Transport collaborator: fetch the bytes behind a URL.
///
/// Implementations own transport policy (timeouts, redirects, proxies);
/// the provider only needs the final payload or a failure, delivered on
/// whatever task the transport runs on.
pub trait RemoteFetcher: Send + Sync + 'static {
    fn fetch(&self, url: Url) -> impl Future<Output = Result<Bytes>> + Send;
}

/// `reqwest`-backed fetcher.
///
/// Timeout behavior is whatever the wrapped client was built with; the
/// cache core imposes none of its own.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a default client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Wrap an existing client (custom timeout, proxy, TLS setup).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch(&self, url: Url) -> impl Future<Output = Result<Bytes>> + Send {
        let client = self.client.clone();
        async move {
            debug!(url = %url, "fetching remote asset");

            let response = client.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                warn!(url = %url, status = %status, "remote asset fetch failed");
                return Err(FetchError::Status(status.as_u16()));
            }

            let bytes = response.bytes().await?;
            debug!(url = %url, size = bytes.len(), "fetched remote asset");
            Ok(bytes)
        }
    }
}
