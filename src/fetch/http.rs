use super::{FetchError, Fetcher};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

/// [`Fetcher`] backed by `reqwest`.
///
/// Relative URLs (e.g. `/cov?x=1`) are resolved against `base_url` when one is set.
/// There is no timeout unless one is configured.
#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Option<Url>,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve `url` against the base URL, if any.
    pub fn resolve(&self, url: &str) -> Result<Url, FetchError> {
        let parsed = match &self.base_url {
            Some(base) => base.join(url),
            None => Url::parse(url),
        };

        parsed.map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: format!("invalid URL: {}", e),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, body: Option<Bytes>) -> Result<Bytes, FetchError> {
        let target = self.resolve(url)?;

        let mut request = match body {
            Some(body) => self.client.post(target).body(body),
            None => self.client.get(target),
        };
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.bytes().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: format!("failed to read response body: {}", e),
        })
    }
}
