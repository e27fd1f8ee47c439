//! Raw byte retrieval for raster payloads.
//!
//! [`FetchCache`] sits in front of a [`Fetcher`] and guarantees at most one in-flight
//! network operation per URL. Successes and terminal failures are cached in a
//! byte-bounded LRU.

mod cache;
mod http;

pub use cache::{EntryState, FetchCache, DEFAULT_CAPACITY_BYTES};
pub use http::HttpFetcher;

use async_trait::async_trait;
use bytes::Bytes;

/// Errors surfaced by the fetch layer.
///
/// Cloneable because one settled result is delivered to every coalesced caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("retrieval of {url} failed")]
    Failed { url: String },

    #[error("in-flight request to {url} was aborted: {message}")]
    Aborted { url: String, message: String },
}

/// Network capability consumed by the cache: GET when `body` is `None`, POST otherwise.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, body: Option<Bytes>) -> Result<Bytes, FetchError>;
}

/// Per-call retrieval options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Bypass the cache for both reads and writes. Coalescing still applies.
    pub disable_cache: bool,
    /// Number of retries after the first failed attempt.
    pub retries: u32,
}

impl RetrieveOptions {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            disable_cache: false,
            retries,
        }
    }

    pub fn uncached(mut self) -> Self {
        self.disable_cache = true;
        self
    }
}
