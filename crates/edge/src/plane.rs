//! Edge cache plane
//!
//! Keys chunks, manifests, bloom filters, and query segments into the edge
//! cache with the freshness policy each artifact deserves:
//!
//! | Artifact | Policy |
//! |---|---|
//! | Chunk | immutable, one year |
//! | Manifest | 60 s + stale-while-revalidate |
//! | Bloom filter | immutable, one year (content-addressed per version) |
//! | Segment | configured TTL, optional swr |
//!
//! Content-addressed artifacts get immutable semantics because their bytes
//! can never change under a given key; mutable artifacts get a short
//! max-age plus swr. Every entry carries cache tags for logical
//! invalidation.
//!
//! The plane never throws: reads degrade to `None`, writes drop silently
//! (with a warn trace), so a failing edge costs latency, never correctness.

use crate::cache::{CacheRequest, CacheResponse, EdgeCache};
use crate::metrics::CacheMetrics;
use lattice_core::{now_millis, Namespace};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// `encodeURIComponent`-equivalent escape set
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Cache-Control for content-addressed artifacts (chunks, bloom versions)
pub const IMMUTABLE_CACHE_CONTROL: &str =
    "public, max-age=31536000, s-maxage=31536000, immutable";

/// Cache-Control for manifests
pub const MANIFEST_CACHE_CONTROL: &str =
    "public, max-age=60, s-maxage=60, stale-while-revalidate=300";

/// Header carrying the chunk id on chunk responses
pub const HEADER_CHUNK_ID: &str = "X-Chunk-Id";
/// Header recording insertion time (epoch millis) on every put
pub const HEADER_CACHE_TIMESTAMP: &str = "X-Cache-Timestamp";
/// Header carrying the bloom version on bloom responses
pub const HEADER_BLOOM_VERSION: &str = "X-Bloom-Version";
/// Version pin checked on reads; a mismatch is a miss
pub const HEADER_CACHE_VERSION: &str = "X-Cache-Version";
/// Header carrying logical invalidation tags
pub const HEADER_CACHE_TAG: &str = "Cache-Tag";

/// Plane configuration
#[derive(Debug, Clone)]
pub struct CachePlaneConfig {
    /// Edge domain the cache URLs live under
    pub domain: String,
    /// Path prefix for all cached artifacts
    pub prefix: String,
    /// TTL for query segments, seconds
    pub segment_ttl_secs: u32,
    /// Optional stale-while-revalidate for segments, seconds
    pub segment_swr_secs: Option<u32>,
}

impl Default for CachePlaneConfig {
    fn default() -> Self {
        CachePlaneConfig {
            domain: "cache.lattice.dev".to_string(),
            prefix: "gdb".to_string(),
            segment_ttl_secs: 300,
            segment_swr_secs: None,
        }
    }
}

/// The edge cache plane
pub struct CachePlane {
    cache: Arc<dyn EdgeCache>,
    config: CachePlaneConfig,
    metrics: Option<Arc<CacheMetrics>>,
}

impl CachePlane {
    /// Create a plane over a cache capability
    pub fn new(cache: Arc<dyn EdgeCache>, config: CachePlaneConfig) -> Self {
        CachePlane {
            cache,
            config,
            metrics: None,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The attached metrics collector, if any
    pub fn metrics(&self) -> Option<&Arc<CacheMetrics>> {
        self.metrics.as_ref()
    }

    // =========================================================================
    // URL scheme
    // =========================================================================

    fn base(&self) -> String {
        format!("https://{}/{}", self.config.domain, self.config.prefix)
    }

    /// Percent-encode a namespace for use as a path segment
    pub fn encode_namespace(namespace: &Namespace) -> String {
        utf8_percent_encode(namespace.as_str(), COMPONENT).to_string()
    }

    /// Cache URL for a chunk
    pub fn chunk_url(&self, namespace: &Namespace, chunk_id: &str) -> String {
        format!(
            "{}/{}/chunks/{}.gcol",
            self.base(),
            Self::encode_namespace(namespace),
            chunk_id
        )
    }

    /// Cache URL for a namespace manifest
    pub fn manifest_url(&self, namespace: &Namespace) -> String {
        format!(
            "{}/{}/manifest.json",
            self.base(),
            Self::encode_namespace(namespace)
        )
    }

    /// Cache URL for a bloom filter version (content-addressed)
    pub fn bloom_url(&self, namespace: &Namespace, version: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base(),
            Self::encode_namespace(namespace),
            version
        )
    }

    /// Cache URL for a query segment
    pub fn segment_url(&self, namespace: &Namespace, segment_id: &str) -> String {
        format!(
            "{}/segment/{}/{}",
            self.base(),
            Self::encode_namespace(namespace),
            segment_id
        )
    }

    /// Recover `(namespace, chunk_id)` from a chunk cache URL
    pub fn parse_chunk_url(&self, url: &str) -> Option<(String, String)> {
        let rest = url.strip_prefix(&format!("{}/", self.base()))?;
        let (enc_ns, file) = rest.split_once("/chunks/")?;
        let chunk_id = file.strip_suffix(".gcol")?;
        let namespace = percent_decode_str(enc_ns).decode_utf8().ok()?.into_owned();
        Some((namespace, chunk_id.to_string()))
    }

    /// Derive the cache chunk id of a blob-store chunk key
    ///
    /// `.com/.example/crm/_wal/2024-01-15/103045-123.gcol` under namespace
    /// path `.com/.example/crm` becomes `wal-2024-01-15-103045-123`.
    pub fn chunk_id_for_key(namespace: &Namespace, blob_key: &str) -> Option<String> {
        let ns_prefix = format!("{}/", namespace.storage_path());
        let local = blob_key.strip_prefix(&ns_prefix)?;
        let stem = local.strip_suffix(".gcol")?;
        Some(stem.trim_start_matches('_').replace('/', "-"))
    }

    /// Logical invalidation tags for a chunk entry
    pub fn chunk_tags(&self, namespace: &Namespace, chunk_id: &str) -> Vec<String> {
        vec![
            format!(
                "chunk:{}:{}",
                Self::encode_namespace(namespace),
                chunk_id
            ),
            format!("ns:{}{}", namespace.host(), namespace.path()),
            format!("host:{}", namespace.host()),
        ]
    }

    // =========================================================================
    // Chunks
    // =========================================================================

    /// Read a chunk body from the edge
    ///
    /// `expected_version`, when given, must match the entry's
    /// `X-Cache-Version` header; a mismatch is a miss.
    pub fn get_chunk(
        &self,
        namespace: &Namespace,
        chunk_id: &str,
        expected_version: Option<&str>,
    ) -> Option<Vec<u8>> {
        self.read(&self.chunk_url(namespace, chunk_id), namespace, expected_version)
            .map(|r| r.body)
    }

    /// Cache a chunk body with immutable semantics
    pub fn put_chunk(&self, namespace: &Namespace, chunk_id: &str, bytes: &[u8]) {
        let response = CacheResponse::ok(bytes.to_vec())
            .with_header("Content-Type", "application/octet-stream")
            .with_header("Cache-Control", IMMUTABLE_CACHE_CONTROL)
            .with_header(HEADER_CHUNK_ID, chunk_id)
            .with_header(HEADER_CACHE_TIMESTAMP, now_millis().to_string())
            .with_header(
                HEADER_CACHE_TAG,
                self.chunk_tags(namespace, chunk_id).join(","),
            );
        self.write(&self.chunk_url(namespace, chunk_id), response);
    }

    /// Remove a chunk entry; `false` when absent or the cache failed
    pub fn delete_chunk(&self, namespace: &Namespace, chunk_id: &str) -> bool {
        self.remove(&self.chunk_url(namespace, chunk_id))
    }

    // =========================================================================
    // Manifests
    // =========================================================================

    /// Read the cached manifest document
    pub fn get_manifest(
        &self,
        namespace: &Namespace,
        expected_version: Option<&str>,
    ) -> Option<Vec<u8>> {
        self.read(&self.manifest_url(namespace), namespace, expected_version)
            .map(|r| r.body)
    }

    /// Cache a manifest document with swr semantics
    ///
    /// `version` is pinned into `X-Cache-Version` so readers can demand a
    /// floor.
    pub fn put_manifest(&self, namespace: &Namespace, body: &[u8], version: Option<&str>) {
        let mut response = CacheResponse::ok(body.to_vec())
            .with_header("Content-Type", "application/json")
            .with_header("Cache-Control", MANIFEST_CACHE_CONTROL)
            .with_header(HEADER_CACHE_TIMESTAMP, now_millis().to_string())
            .with_header(
                HEADER_CACHE_TAG,
                format!("ns:{}{}", namespace.host(), namespace.path()),
            );
        if let Some(version) = version {
            response = response.with_header(HEADER_CACHE_VERSION, version);
        }
        self.write(&self.manifest_url(namespace), response);
    }

    /// Remove the manifest entry
    pub fn delete_manifest(&self, namespace: &Namespace) -> bool {
        self.remove(&self.manifest_url(namespace))
    }

    // =========================================================================
    // Bloom filters
    // =========================================================================

    /// Read a serialized bloom filter for `(namespace, version)`
    pub fn get_bloom(&self, namespace: &Namespace, version: &str) -> Option<String> {
        self.read(&self.bloom_url(namespace, version), namespace, None)
            .and_then(|r| String::from_utf8(r.body).ok())
    }

    /// Cache a serialized bloom filter under its content-address
    ///
    /// A different version is a different key; existing slots are never
    /// rewritten, they expire naturally.
    pub fn put_bloom(&self, namespace: &Namespace, version: &str, serialized: &str) {
        let response = CacheResponse::ok(serialized.as_bytes().to_vec())
            .with_header("Content-Type", "application/json")
            .with_header("Cache-Control", IMMUTABLE_CACHE_CONTROL)
            .with_header(HEADER_BLOOM_VERSION, version)
            .with_header(HEADER_CACHE_TIMESTAMP, now_millis().to_string())
            .with_header(
                HEADER_CACHE_TAG,
                format!("ns:{}{}", namespace.host(), namespace.path()),
            );
        self.write(&self.bloom_url(namespace, version), response);
    }

    /// Remove a bloom filter slot
    pub fn delete_bloom(&self, namespace: &Namespace, version: &str) -> bool {
        self.remove(&self.bloom_url(namespace, version))
    }

    // =========================================================================
    // Segments
    // =========================================================================

    /// Read a cached query segment, optionally pulling from a fallback
    ///
    /// On a miss the `fallback` loader (an origin-bucket read, typically) is
    /// consulted; when it produces a body and `cache_on_miss` is set, the
    /// segment is populated into the cache on the way out.
    pub fn get_segment(
        &self,
        namespace: &Namespace,
        segment_id: &str,
        fallback: Option<&dyn Fn() -> Option<Vec<u8>>>,
        cache_on_miss: bool,
    ) -> Option<Vec<u8>> {
        if let Some(hit) = self.read(&self.segment_url(namespace, segment_id), namespace, None)
        {
            return Some(hit.body);
        }
        let body = fallback.and_then(|load| load())?;
        if cache_on_miss {
            self.put_segment(namespace, segment_id, &body);
        }
        Some(body)
    }

    /// Cache a query segment with the configured TTL
    pub fn put_segment(&self, namespace: &Namespace, segment_id: &str, body: &[u8]) {
        let cache_control = match self.config.segment_swr_secs {
            Some(swr) => format!(
                "max-age={}, stale-while-revalidate={}",
                self.config.segment_ttl_secs, swr
            ),
            None => format!("max-age={}", self.config.segment_ttl_secs),
        };
        let response = CacheResponse::ok(body.to_vec())
            .with_header("Cache-Control", cache_control)
            .with_header(HEADER_CACHE_TIMESTAMP, now_millis().to_string());
        self.write(&self.segment_url(namespace, segment_id), response);
    }

    // =========================================================================
    // Absorbing primitives
    // =========================================================================

    fn read(
        &self,
        url: &str,
        namespace: &Namespace,
        expected_version: Option<&str>,
    ) -> Option<CacheResponse> {
        let started = Instant::now();
        let outcome = self.cache.lookup(&CacheRequest::new(url));
        let latency = started.elapsed().as_secs_f64() * 1000.0;

        let response = match outcome {
            Ok(Some(response)) => {
                let version_ok = match expected_version {
                    Some(expected) => response.header(HEADER_CACHE_VERSION) == Some(expected),
                    None => true,
                };
                if version_ok {
                    Some(response)
                } else {
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(url = %url, error = %e, "cache read failed, treating as miss");
                None
            }
        };

        if let Some(metrics) = &self.metrics {
            match &response {
                Some(r) => metrics.record_hit(
                    Some(namespace.as_str()),
                    Some(latency),
                    r.body.len() as u64,
                ),
                None => metrics.record_miss(Some(namespace.as_str()), Some(latency), 0),
            }
        }
        response
    }

    fn write(&self, url: &str, response: CacheResponse) {
        if let Err(e) = self.cache.put(&CacheRequest::new(url), response) {
            warn!(url = %url, error = %e, "cache write failed, dropping");
        }
    }

    fn remove(&self, url: &str) -> bool {
        match self.cache.delete(&CacheRequest::new(url)) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(url = %url, error = %e, "cache delete failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryEdgeCache;

    fn plane() -> (Arc<MemoryEdgeCache>, CachePlane) {
        let cache = Arc::new(MemoryEdgeCache::new());
        let plane = CachePlane::new(cache.clone(), CachePlaneConfig::default());
        (cache, plane)
    }

    fn namespace() -> Namespace {
        Namespace::parse("https://api.example.com/crm/").unwrap()
    }

    #[test]
    fn test_chunk_url_template_and_parse() {
        let (_cache, plane) = plane();
        let ns = namespace();
        let url = plane.chunk_url(&ns, "wal-2024-01-15-103045-123");

        assert_eq!(
            url,
            "https://cache.lattice.dev/gdb/https%3A%2F%2Fapi.example.com%2Fcrm%2F/chunks/wal-2024-01-15-103045-123.gcol"
        );
        let (parsed_ns, chunk_id) = plane.parse_chunk_url(&url).unwrap();
        assert_eq!(parsed_ns, ns.as_str());
        assert_eq!(chunk_id, "wal-2024-01-15-103045-123");
    }

    #[test]
    fn test_parse_chunk_url_rejects_foreign_urls() {
        let (_cache, plane) = plane();
        assert!(plane.parse_chunk_url("https://elsewhere/x/chunks/a.gcol").is_none());
        assert!(plane
            .parse_chunk_url("https://cache.lattice.dev/gdb/ns/manifest.json")
            .is_none());
    }

    #[test]
    fn test_chunk_headers_are_immutable() {
        let (cache, plane) = plane();
        let ns = namespace();
        plane.put_chunk(&ns, "c1", b"chunk-bytes");

        let url = plane.chunk_url(&ns, "c1");
        let entry = cache.lookup(&CacheRequest::new(url.as_str())).unwrap().unwrap();
        assert_eq!(
            entry.header("Cache-Control"),
            Some("public, max-age=31536000, s-maxage=31536000, immutable")
        );
        assert_eq!(entry.header("Content-Type"), Some("application/octet-stream"));
        assert_eq!(entry.header(HEADER_CHUNK_ID), Some("c1"));
        assert!(entry.header(HEADER_CACHE_TIMESTAMP).is_some());

        assert_eq!(plane.get_chunk(&ns, "c1", None).unwrap(), b"chunk-bytes");
    }

    #[test]
    fn test_chunk_tags() {
        let (cache, plane) = plane();
        let ns = namespace();
        plane.put_chunk(&ns, "c1", b"x");

        let url = plane.chunk_url(&ns, "c1");
        let entry = cache.lookup(&CacheRequest::new(url.as_str())).unwrap().unwrap();
        let tags = entry.header(HEADER_CACHE_TAG).unwrap();
        assert!(tags.contains("chunk:https%3A%2F%2Fapi.example.com%2Fcrm%2F:c1"));
        assert!(tags.contains("ns:api.example.com/crm/"));
        assert!(tags.contains("host:api.example.com"));
    }

    #[test]
    fn test_manifest_headers_use_swr() {
        let (cache, plane) = plane();
        let ns = namespace();
        plane.put_manifest(&ns, b"{\"version\":3}", Some("3"));

        let url = plane.manifest_url(&ns);
        let entry = cache.lookup(&CacheRequest::new(url.as_str())).unwrap().unwrap();
        assert_eq!(
            entry.header("Cache-Control"),
            Some("public, max-age=60, s-maxage=60, stale-while-revalidate=300")
        );
        assert_eq!(entry.header("Content-Type"), Some("application/json"));
        assert_eq!(entry.header(HEADER_CACHE_VERSION), Some("3"));
    }

    #[test]
    fn test_version_mismatch_is_a_miss() {
        let (_cache, plane) = plane();
        let ns = namespace();
        plane.put_manifest(&ns, b"{}", Some("3"));

        assert!(plane.get_manifest(&ns, Some("3")).is_some());
        assert!(plane.get_manifest(&ns, Some("4")).is_none());
        assert!(plane.get_manifest(&ns, None).is_some());
    }

    #[test]
    fn test_bloom_content_addressing() {
        let (cache, plane) = plane();
        let ns = namespace();
        plane.put_bloom(&ns, "v1", "{\"bits\":\"AA\"}");
        plane.put_bloom(&ns, "v2", "{\"bits\":\"BB\"}");

        // Distinct versions are distinct slots
        assert_eq!(plane.get_bloom(&ns, "v1").unwrap(), "{\"bits\":\"AA\"}");
        assert_eq!(plane.get_bloom(&ns, "v2").unwrap(), "{\"bits\":\"BB\"}");
        assert_eq!(cache.len(), 2);

        let url = plane.bloom_url(&ns, "v1");
        let entry = cache.lookup(&CacheRequest::new(url.as_str())).unwrap().unwrap();
        assert_eq!(entry.header(HEADER_BLOOM_VERSION), Some("v1"));
        assert_eq!(entry.header("Cache-Control"), Some(IMMUTABLE_CACHE_CONTROL));
    }

    #[test]
    fn test_segment_fallback_and_populate() {
        let (cache, plane) = plane();
        let ns = namespace();

        // Miss with no fallback
        assert!(plane.get_segment(&ns, "s1", None, false).is_none());

        // Miss with fallback, no populate
        let loader = || Some(b"segment-body".to_vec());
        let body = plane.get_segment(&ns, "s1", Some(&loader), false).unwrap();
        assert_eq!(body, b"segment-body");
        assert!(cache.is_empty());

        // Miss with fallback and populate
        let body = plane.get_segment(&ns, "s1", Some(&loader), true).unwrap();
        assert_eq!(body, b"segment-body");
        assert!(cache.contains(&plane.segment_url(&ns, "s1")));

        // Now a hit without the fallback
        assert!(plane.get_segment(&ns, "s1", None, false).is_some());
    }

    #[test]
    fn test_segment_ttl_header() {
        let cache = Arc::new(MemoryEdgeCache::new());
        let plane = CachePlane::new(
            cache.clone(),
            CachePlaneConfig {
                segment_ttl_secs: 120,
                segment_swr_secs: Some(60),
                ..CachePlaneConfig::default()
            },
        );
        let ns = namespace();
        plane.put_segment(&ns, "s1", b"x");

        let entry = cache
            .lookup(&CacheRequest::new(plane.segment_url(&ns, "s1")))
            .unwrap()
            .unwrap();
        assert_eq!(
            entry.header("Cache-Control"),
            Some("max-age=120, stale-while-revalidate=60")
        );
    }

    #[test]
    fn test_cache_failures_never_surface() {
        let (cache, plane) = plane();
        let ns = namespace();

        cache.set_fail_writes(true);
        plane.put_chunk(&ns, "c1", b"x"); // silently dropped
        assert!(!plane.delete_chunk(&ns, "c1"));
        cache.set_fail_writes(false);

        plane.put_chunk(&ns, "c1", b"x");
        cache.set_fail_reads(true);
        assert!(plane.get_chunk(&ns, "c1", None).is_none()); // read error = miss
        cache.set_fail_reads(false);
        assert!(plane.get_chunk(&ns, "c1", None).is_some());
    }

    #[test]
    fn test_metrics_record_hits_and_misses() {
        let cache = Arc::new(MemoryEdgeCache::new());
        let metrics = Arc::new(CacheMetrics::with_defaults());
        let plane =
            CachePlane::new(cache, CachePlaneConfig::default()).with_metrics(metrics.clone());
        let ns = namespace();

        plane.get_chunk(&ns, "c1", None); // miss
        plane.put_chunk(&ns, "c1", b"abc");
        plane.get_chunk(&ns, "c1", None); // hit

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.bytes_saved, 3);
    }

    #[test]
    fn test_chunk_id_for_key() {
        let ns = namespace();
        let key = format!("{}/_wal/2024-01-15/103045-123.gcol", ns.storage_path());
        assert_eq!(
            CachePlane::chunk_id_for_key(&ns, &key).unwrap(),
            "wal-2024-01-15-103045-123"
        );

        let l2 = format!("{}/_l2/2024-02-01/000000-000.gcol", ns.storage_path());
        assert_eq!(
            CachePlane::chunk_id_for_key(&ns, &l2).unwrap(),
            "l2-2024-02-01-000000-000"
        );

        // Foreign namespace keys don't map
        assert!(CachePlane::chunk_id_for_key(&ns, ".org/.other/_wal/2024-01-15/1.gcol").is_none());
    }
}
