//! Cache Storage: named buckets of request → response snapshots.
//!
//! ```text
//! CacheStorage (caches)
//!     └── bucket "turnos-admin-v2.0"
//!             └── (GET, url) → CacheEntry
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use turnos_common::{Clock, SystemClock};
use url::Url;

use crate::request::{Request, Response, ResponseType};
use crate::{Result, ServiceWorkerError};

// ==================== Entries ====================

/// Request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub url: String,
}

impl CacheKey {
    pub fn for_request(request: &Request) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);
        Self {
            method: request.method.clone(),
            url: url.into(),
        }
    }
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub body: Bytes,
    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response, consuming its body.
    pub fn capture(request: &Request, mut response: Response, cached_at: u64) -> Result<Self> {
        let body = response.bytes()?;
        Ok(Self {
            url: request.url.clone(),
            status: response.status,
            headers: response.headers,
            response_type: response.response_type,
            body,
            cached_at,
        })
    }

    /// A fresh, unread response built from the snapshot.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.status, self.body.clone())
            .with_type(self.response_type)
            .with_url(self.url.clone());
        response.headers = self.headers.clone();
        response
    }
}

/// A single named cache.
#[derive(Debug, Default)]
pub struct CacheBucket {
    pub name: String,
    entries: HashMap<CacheKey, CacheEntry>,
}

impl CacheBucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.entries.get(&CacheKey::for_request(request))
    }

    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries.remove(&CacheKey::for_request(request)).is_some()
    }

    /// Stored URLs, sorted.
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.entries.keys().map(|k| k.url.clone()).collect();
        urls.sort();
        urls
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Provider ====================

/// Host capability backing the `caches` global.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Open a bucket, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// All bucket names.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Look a request up in one bucket. A missing bucket is a miss.
    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>>;

    /// Store one response. Only GET requests can be stored.
    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()>;

    /// Store a batch: either every pair is stored or none is.
    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()>;

    /// URLs stored in a bucket.
    async fn urls(&self, name: &str) -> Result<Vec<String>>;
}

fn ensure_cacheable(request: &Request) -> Result<()> {
    if request.method != Method::GET {
        return Err(ServiceWorkerError::cache(format!(
            "cannot cache {} request for {}",
            request.method, request.url
        )));
    }
    Ok(())
}

/// Cache storage kept in process memory.
#[derive(Clone)]
pub struct MemoryCacheStorage {
    caches: Arc<RwLock<HashMap<String, CacheBucket>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            caches: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// When an entry was stored, if present.
    pub async fn cached_at(&self, name: &str, request: &Request) -> Option<u64> {
        let caches = self.caches.read().await;
        caches
            .get(name)
            .and_then(|bucket| bucket.match_request(request))
            .map(|entry| entry.cached_at)
    }
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| CacheBucket::new(name));
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        let caches = self.caches.read().await;
        let hit = caches
            .get(name)
            .and_then(|bucket| bucket.match_request(request))
            .map(CacheEntry::to_response);
        trace!(cache = name, url = %request.url, hit = hit.is_some(), "Cache lookup");
        Ok(hit)
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
        ensure_cacheable(request)?;
        let entry = CacheEntry::capture(request, response, self.clock.now_millis())?;

        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| CacheBucket::new(name))
            .put(CacheKey::for_request(request), entry);
        debug!(cache = name, url = %request.url, "Stored response");
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        // Snapshot everything before taking the lock so a bad pair leaves the bucket untouched.
        let now = self.clock.now_millis();
        let mut snapshots = Vec::with_capacity(entries.len());
        for (request, response) in entries {
            ensure_cacheable(&request)?;
            let key = CacheKey::for_request(&request);
            snapshots.push((key, CacheEntry::capture(&request, response, now)?));
        }

        let count = snapshots.len();
        let mut caches = self.caches.write().await;
        let bucket = caches
            .entry(name.to_string())
            .or_insert_with(|| CacheBucket::new(name));
        for (key, entry) in snapshots {
            bucket.put(key, entry);
        }
        debug!(cache = name, count, "Stored batch");
        Ok(())
    }

    async fn urls(&self, name: &str) -> Result<Vec<String>> {
        let caches = self.caches.read().await;
        Ok(caches.get(name).map(CacheBucket::urls).unwrap_or_default())
    }
}
