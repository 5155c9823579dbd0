//! Single-flight streaming result cache.
//! Key: blake3 hash of (mode | model | url).
//! Entries are Pending (a producer was admitted) or Succeeded (stream handle attached).
//! Succeeded entries are LRU-bounded and expire after a TTL; Pending entries are
//! never evicted so at most one producer runs per key.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::stream::StreamHandle;
use super::{ModelKind, Mode, TranslateError};

/// Cache identity of a (url, mode, model) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Mode and model names never contain `|`, so the url (last field) cannot
    /// shift a field boundary.
    pub fn new(url: &str, mode: Mode, model: ModelKind) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(mode.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(model.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(url.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12])
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Soft bound on entries; only Succeeded entries are evicted to honour it.
    pub capacity: usize,
    pub ttl: Duration,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl: Duration::from_secs(6 * 3600),
            poll_interval: Duration::from_secs(3),
            wait_timeout: Duration::from_secs(120),
        }
    }
}

/// Observable state of a key, for callers that only need to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Succeeded,
}

enum CacheEntry {
    Pending { ticket: u64 },
    Succeeded { handle: StreamHandle, inserted_at: Instant },
}

/// Result of [`ResultCache::lookup_or_admit`].
pub enum Lookup {
    Hit(StreamHandle),
    /// Caller is now the only producer for the key.
    Admitted(Admission),
    /// Another producer holds the key; use [`ResultCache::await_result`].
    WaitRequired,
}

pub struct ResultCache {
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
    config: CacheConfig,
    next_ticket: AtomicU64,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(LruCache::unbounded()),
            config,
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Hit, admit, or ask the caller to wait. Observing an absent key and
    /// marking it Pending happen under one lock.
    pub fn lookup_or_admit(self: &Arc<Self>, key: &CacheKey) -> Lookup {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some(CacheEntry::Succeeded {
                handle,
                inserted_at,
            }) => {
                if inserted_at.elapsed() < self.config.ttl {
                    return Lookup::Hit(handle.clone());
                }
                // Expired, admit a fresh producer below.
                debug!(key = %key, "cache entry expired");
            }
            Some(CacheEntry::Pending { .. }) => return Lookup::WaitRequired,
            None => {}
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        cache.put(key.clone(), CacheEntry::Pending { ticket });
        self.enforce_capacity(&mut cache);
        Lookup::Admitted(Admission {
            cache: Arc::clone(self),
            key: key.clone(),
            ticket,
            settled: false,
        })
    }

    /// Poll until `key` is Succeeded or the wait timeout elapses.
    /// Never mutates the cache, including on timeout.
    pub async fn await_result(&self, key: &CacheKey) -> Result<StreamHandle, TranslateError> {
        let start = Instant::now();
        loop {
            debug!(key = %key, waited_ms = start.elapsed().as_millis() as u64, "checking cache");
            if let Some(handle) = self.peek_succeeded(key) {
                return Ok(handle);
            }
            let waited = start.elapsed();
            if waited >= self.config.wait_timeout {
                warn!(key = %key, "timed out waiting for in-flight translation");
                return Err(TranslateError::Timeout);
            }
            let remaining = self.config.wait_timeout - waited;
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
    }

    /// Unconditionally install `handle` for `key`, replacing any entry.
    pub fn store(&self, key: &CacheKey, handle: StreamHandle) {
        let mut cache = self.inner.lock();
        cache.put(
            key.clone(),
            CacheEntry::Succeeded {
                handle,
                inserted_at: Instant::now(),
            },
        );
        self.enforce_capacity(&mut cache);
    }

    /// Remove `key` if it is still the Pending entry created under `ticket`.
    fn fail(&self, key: &CacheKey, ticket: u64) {
        let mut cache = self.inner.lock();
        let owned = matches!(
            cache.peek(key),
            Some(CacheEntry::Pending { ticket: t }) if *t == ticket
        );
        if owned {
            cache.pop(key);
            info!(key = %key, "producer failed, cache entry removed");
        }
    }

    /// Remove `key` if it still holds `handle`'s stream. A newer store for the
    /// same key is left alone. Returns whether an entry was removed.
    pub fn evict_if(&self, key: &CacheKey, handle: &StreamHandle) -> bool {
        let mut cache = self.inner.lock();
        let holds = matches!(
            cache.peek(key),
            Some(CacheEntry::Succeeded { handle: cached, .. }) if cached.same_stream(handle)
        );
        if holds {
            cache.pop(key);
            info!(key = %key, stream_id = %handle.id(), "failed stream removed from cache");
        }
        holds
    }

    pub fn state(&self, key: &CacheKey) -> Option<EntryState> {
        match self.inner.lock().peek(key)? {
            CacheEntry::Pending { .. } => Some(EntryState::Pending),
            CacheEntry::Succeeded { .. } => Some(EntryState::Succeeded),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn peek_succeeded(&self, key: &CacheKey) -> Option<StreamHandle> {
        match self.inner.lock().peek(key)? {
            CacheEntry::Succeeded { handle, .. } => Some(handle.clone()),
            CacheEntry::Pending { .. } => None,
        }
    }

    fn enforce_capacity(&self, cache: &mut LruCache<CacheKey, CacheEntry>) {
        while cache.len() > self.config.capacity {
            let victim = cache
                .iter()
                .rev()
                .find(|(_, entry)| matches!(entry, CacheEntry::Succeeded { .. }))
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    cache.pop(&key);
                    debug!(key = %key, "evicted least recently used entry");
                }
                None => {
                    debug!(len = cache.len(), "over capacity with only pending entries");
                    break;
                }
            }
        }
    }
}

/// Exclusive right to produce the value for one key.
/// Dropping it without [`Admission::complete`] removes the Pending entry.
pub struct Admission {
    cache: Arc<ResultCache>,
    key: CacheKey,
    ticket: u64,
    settled: bool,
}

impl Admission {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Pending → Succeeded(handle).
    pub fn complete(mut self, handle: StreamHandle) {
        self.settled = true;
        self.cache.store(&self.key, handle);
    }

    /// Explicit failure; equivalent to dropping the admission.
    pub fn fail(mut self) {
        self.settled = true;
        self.cache.fail(&self.key, self.ticket);
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.fail(&self.key, self.ticket);
        }
    }
}
