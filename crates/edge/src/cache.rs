//! Edge cache capability
//!
//! The cache plane consumes this capability rather than a concrete edge
//! runtime. A request is a cache key (a URL); a response carries status,
//! headers, and body. Implementations are best-effort by contract: the
//! layers above absorb every [`CacheError`], so a flaky cache degrades to
//! origin reads and never to user-visible failures.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// A cache lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheRequest {
    /// Full request URL; the cache key
    pub url: String,
}

impl CacheRequest {
    /// Create a request for a URL
    pub fn new(url: impl Into<String>) -> Self {
        CacheRequest { url: url.into() }
    }
}

/// A cached response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResponse {
    /// HTTP-style status code
    pub status: u16,
    /// Response headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl CacheResponse {
    /// Create a 200 response with a body
    pub fn ok(body: Vec<u8>) -> Self {
        CacheResponse {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header value, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Cache failure; always absorbed by callers
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The cache backend could not serve the call
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// The cache capability consumed by the plane
pub trait EdgeCache: Send + Sync {
    /// Look up a cached response
    fn lookup(&self, request: &CacheRequest) -> Result<Option<CacheResponse>, CacheError>;

    /// Insert a response; puts may race, last write wins
    fn put(&self, request: &CacheRequest, response: CacheResponse) -> Result<(), CacheError>;

    /// Delete an entry; returns whether something was removed
    fn delete(&self, request: &CacheRequest) -> Result<bool, CacheError>;
}

/// In-memory edge cache for tests
///
/// Failure toggles simulate an unavailable edge so the absorb-everything
/// policy of the layers above can be exercised.
#[derive(Default)]
pub struct MemoryEdgeCache {
    entries: RwLock<HashMap<String, CacheResponse>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryEdgeCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `lookup` fail until disabled
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `put`/`delete` fail until disabled
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether a URL is cached
    pub fn contains(&self, url: &str) -> bool {
        self.entries.read().contains_key(url)
    }
}

impl EdgeCache for MemoryEdgeCache {
    fn lookup(&self, request: &CacheRequest) -> Result<Option<CacheResponse>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected read failure".into()));
        }
        Ok(self.entries.read().get(&request.url).cloned())
    }

    fn put(&self, request: &CacheRequest, response: CacheResponse) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected write failure".into()));
        }
        self.entries.write().insert(request.url.clone(), response);
        Ok(())
    }

    fn delete(&self, request: &CacheRequest) -> Result<bool, CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected write failure".into()));
        }
        Ok(self.entries.write().remove(&request.url).is_some())
    }
}
