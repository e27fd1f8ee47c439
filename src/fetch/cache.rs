//! Byte cache with single-flight request coalescing, bounded retries and negative caching.
//!
//! Key features:
//! - Single-flight: concurrent requests for the same URL share one network operation
//! - Retries: a failed attempt is retried up to the caller's budget, each retry installed
//!   as a fresh in-flight entry so late callers join the retry
//! - Negative cache: a terminal failure is remembered so identical requests fail fast
//! - LRU eviction bounded by total buffer bytes

use super::{FetchError, Fetcher, HttpFetcher, RetrieveOptions};
use bytes::Bytes;
use lru::LruCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::broadcast;

/// Default byte budget for cached payloads (64 MB).
pub const DEFAULT_CAPACITY_BYTES: usize = 64 * 1024 * 1024;

/// Size charged for a failure marker.
const FAILED_ENTRY_BYTES: usize = 1;

type Outcome = Result<Bytes, FetchError>;

enum CacheEntry {
    Ready(Bytes),
    Failed,
}

impl CacheEntry {
    fn size_bytes(&self) -> usize {
        match self {
            CacheEntry::Ready(bytes) => bytes.len(),
            CacheEntry::Failed => FAILED_ENTRY_BYTES,
        }
    }
}

/// Observable state of a cache slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// A cached success holding this many bytes
    Ready(usize),
    /// A negative-cache marker
    Failed,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    /// In-flight requests; late callers subscribe to the sender
    pending: HashMap<String, broadcast::Sender<Outcome>>,
    current_bytes: usize,
    capacity_bytes: usize,
}

impl CacheState {
    fn insert(&mut self, key: String, entry: CacheEntry) {
        let size_bytes = entry.size_bytes();

        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes());
        }

        if size_bytes > self.capacity_bytes {
            tracing::debug!(url = %key, bytes = size_bytes, "payload exceeds cache capacity, not cached");
            return;
        }

        while self.current_bytes + size_bytes > self.capacity_bytes {
            match self.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    self.current_bytes = self.current_bytes.saturating_sub(evicted.size_bytes());
                    tracing::debug!(url = %evicted_key, bytes = evicted.size_bytes(), "evicted cache entry");
                }
                None => break,
            }
        }

        self.current_bytes += size_bytes;
        self.entries.put(key, entry);
    }
}

enum Lookup {
    Settled(Outcome),
    InFlight(broadcast::Receiver<Outcome>),
}

struct Inner {
    fetcher: Arc<dyn Fetcher>,
    state: Mutex<CacheState>,
}

/// Owned by an attempt task. If the task ends without settling (the fetcher panicked or
/// the runtime shut down) it clears the pending slot it installed, so the channel closes
/// and attached callers see [`FetchError::Aborted`] instead of waiting forever.
struct PendingGuard {
    cache: FetchCache,
    url: String,
    tx: broadcast::Sender<Outcome>,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.cache.lock();
        let ours = state
            .pending
            .get(&self.url)
            .is_some_and(|pending| pending.same_channel(&self.tx));
        if ours {
            state.pending.remove(&self.url);
            tracing::warn!(url = %self.url, "in-flight request ended without settling");
        }
    }
}

/// Fetch cache and request coalescer.
///
/// Cloning is cheap and yields a handle onto the same cache. Retrieval must run inside a
/// Tokio runtime because network operations are spawned as tasks: dropping a caller's
/// future detaches that caller only, and the operation still completes for the others
/// (and still populates the cache).
#[derive(Clone)]
pub struct FetchCache {
    inner: Arc<Inner>,
}

impl FetchCache {
    pub fn new(fetcher: Arc<dyn Fetcher>, capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    pending: HashMap::new(),
                    current_bytes: 0,
                    capacity_bytes,
                }),
            }),
        }
    }

    /// Process-wide cache over a plain [`HttpFetcher`], built on first use.
    pub fn shared() -> &'static FetchCache {
        static SHARED: OnceLock<FetchCache> = OnceLock::new();
        SHARED.get_or_init(|| FetchCache::new(Arc::new(HttpFetcher::new()), DEFAULT_CAPACITY_BYTES))
    }

    /// Retrieve the bytes behind `url`.
    ///
    /// The POST `body` is not part of the cache key: identical URLs with different bodies
    /// share a cache slot and an in-flight request.
    pub async fn retrieve(
        &self,
        url: &str,
        body: Option<Bytes>,
        options: RetrieveOptions,
    ) -> Result<Bytes, FetchError> {
        let lookup = {
            let mut state = self.lock();
            self.join(&mut state, url, body, options)
        };
        settle(url, lookup).await
    }

    /// Resolve `url` from the cache, attach to its in-flight request, or start a new one.
    fn join(
        &self,
        state: &mut CacheState,
        url: &str,
        body: Option<Bytes>,
        options: RetrieveOptions,
    ) -> Lookup {
        if !options.disable_cache {
            match state.entries.get(url) {
                Some(CacheEntry::Ready(bytes)) => {
                    tracing::debug!(url, bytes = bytes.len(), "fetch cache hit");
                    return Lookup::Settled(Ok(bytes.clone()));
                }
                Some(CacheEntry::Failed) => {
                    tracing::debug!(url, "negative cache hit");
                    return Lookup::Settled(Err(FetchError::Failed {
                        url: url.to_string(),
                    }));
                }
                None => {}
            }
        }

        if let Some(sender) = state.pending.get(url) {
            tracing::debug!(url, "joining in-flight request");
            return Lookup::InFlight(sender.subscribe());
        }

        let (tx, rx) = broadcast::channel(1);
        state.pending.insert(url.to_string(), tx.clone());
        tokio::spawn(self.clone().attempt(url.to_string(), body, options, tx));

        Lookup::InFlight(rx)
    }

    /// One network attempt. Settlement clears the pending entry and writes the cache (or
    /// installs the retry) inside the same critical section.
    async fn attempt(
        self,
        url: String,
        body: Option<Bytes>,
        options: RetrieveOptions,
        tx: broadcast::Sender<Outcome>,
    ) {
        let mut guard = PendingGuard {
            cache: self.clone(),
            url: url.clone(),
            tx,
            armed: true,
        };

        tracing::debug!(url = %url, retries_left = options.retries, "starting network request");
        let outcome = self.inner.fetcher.fetch(&url, body.clone()).await;

        let next = match outcome {
            Ok(bytes) => {
                let mut state = self.lock();
                state.pending.remove(&url);
                if !options.disable_cache {
                    state.insert(url.clone(), CacheEntry::Ready(bytes.clone()));
                }
                Lookup::Settled(Ok(bytes))
            }
            Err(error) if options.retries > 0 => {
                tracing::warn!(url = %url, retries_left = options.retries - 1, %error, "request failed, retrying");
                let retry = RetrieveOptions {
                    retries: options.retries - 1,
                    ..options
                };
                let mut state = self.lock();
                state.pending.remove(&url);
                self.join(&mut state, &url, body, retry)
            }
            Err(error) => {
                tracing::warn!(url = %url, %error, "request failed, retry budget exhausted");
                let mut state = self.lock();
                state.pending.remove(&url);
                if !options.disable_cache {
                    state.insert(url.clone(), CacheEntry::Failed);
                }
                Lookup::Settled(Err(error))
            }
        };
        // Pending slot is cleared (or handed to the retry) from here on
        guard.armed = false;

        let result = settle(&url, next).await;
        // No receivers left is fine: every caller may have detached
        let _ = guard.tx.send(result);
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Inspect a slot without promoting it in the LRU order.
    pub fn entry_state(&self, url: &str) -> Option<EntryState> {
        self.lock().entries.peek(url).map(|entry| match entry {
            CacheEntry::Ready(bytes) => EntryState::Ready(bytes.len()),
            CacheEntry::Failed => EntryState::Failed,
        })
    }

    /// Number of requests currently in flight.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn current_bytes(&self) -> usize {
        self.lock().current_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.lock().capacity_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop every cached entry, successes and failure markers alike. In-flight requests
    /// are unaffected.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.current_bytes = 0;
    }
}

async fn settle(url: &str, lookup: Lookup) -> Outcome {
    match lookup {
        Lookup::Settled(outcome) => outcome,
        Lookup::InFlight(mut rx) => match rx.recv().await {
            Ok(outcome) => outcome,
            Err(e) => Err(FetchError::Aborted {
                url: url.to_string(),
                message: e.to_string(),
            }),
        },
    }
}
