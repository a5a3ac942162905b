//! Bloom-backed entity checks and query routing
//!
//! Two read-path concerns live here:
//!
//! - [`BloomRouter`] answers "might this entity exist?" from the cached,
//!   content-addressed bloom filter, consulting an injected fallback loader
//!   on a miss. Every failure degrades to "might exist" so a broken filter
//!   plane can cause extra origin reads but never a false 404.
//! - [`QueryRouter`] extracts entity URLs from query text, maps their
//!   namespaces to shards, decides whether the query is cacheable, and
//!   estimates its cost.
//!
//! The URL extractor is a deliberate, conservative scanner rather than a
//! regex: it takes everything from a scheme marker up to whitespace,
//! brackets, or quotes, and leaves interpretation to the URL parser.

use crate::plane::CachePlane;
use lattice_core::{fnv1a_32, BloomFilter, EntityUrl, Namespace, ShardAssignment, ShardRouter};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a bloom-backed entity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityCheck {
    /// `false` means definitely absent; `true` means possibly present
    pub might_exist: bool,
    /// Whether the answer came from the edge cache
    pub cache_hit: bool,
}

impl EntityCheck {
    /// The safe pass-through answer
    pub fn pass_through() -> Self {
        EntityCheck {
            might_exist: true,
            cache_hit: false,
        }
    }
}

/// Loads a serialized bloom filter from origin: `(namespace, version)`
pub type BloomFallback = Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// Cache-first negative lookup over bloom filters
pub struct BloomRouter {
    plane: Arc<CachePlane>,
    fallback: Option<BloomFallback>,
    cache_on_load: bool,
}

impl BloomRouter {
    /// Create a router over the cache plane
    pub fn new(plane: Arc<CachePlane>) -> Self {
        BloomRouter {
            plane,
            fallback: None,
            cache_on_load: true,
        }
    }

    /// Install a fallback loader consulted on cache misses
    pub fn with_fallback(mut self, fallback: BloomFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Whether fallback-loaded filters are populated into the cache
    pub fn with_cache_on_load(mut self, cache_on_load: bool) -> Self {
        self.cache_on_load = cache_on_load;
        self
    }

    /// Check whether an entity might exist in a namespace
    ///
    /// Tries the cached filter for `(namespace, version)` first, then the
    /// fallback loader. With no filter available at all, or on any error,
    /// the answer is pass-through.
    pub fn check_entity(&self, namespace: &Namespace, version: &str, entity_id: &str) -> EntityCheck {
        if let Some(serialized) = self.plane.get_bloom(namespace, version) {
            match BloomFilter::deserialize(&serialized) {
                Ok(filter) => {
                    return EntityCheck {
                        might_exist: filter.might_exist(entity_id),
                        cache_hit: true,
                    };
                }
                Err(e) => {
                    warn!(namespace = %namespace, version, error = %e, "cached bloom filter unreadable");
                }
            }
        }

        if let Some(loader) = &self.fallback {
            if let Some(serialized) = loader(namespace.as_str(), version) {
                if self.cache_on_load {
                    self.plane.put_bloom(namespace, version, &serialized);
                }
                match BloomFilter::deserialize(&serialized) {
                    Ok(filter) => {
                        return EntityCheck {
                            might_exist: filter.might_exist(entity_id),
                            cache_hit: false,
                        };
                    }
                    Err(e) => {
                        warn!(namespace = %namespace, version, error = %e, "fallback bloom filter unreadable");
                    }
                }
            }
        }

        debug!(namespace = %namespace, version, "no bloom filter available, passing through");
        EntityCheck::pass_through()
    }
}

// =============================================================================
// Query routing
// =============================================================================

/// Keywords that make a query uncacheable (checked against the uppercased text)
const MUTATION_MARKERS: [&str; 8] = [
    "MUTATE",
    "INSERT",
    "DELETE",
    "UPDATE",
    "SET",
    "NOW()",
    "CURRENT_TIMESTAMP",
    "CURRENT_DATE",
];

/// Dot-suffixes treated as domain labels rather than traversal hops
const RECOGNIZED_TLDS: [&str; 16] = [
    "com", "org", "net", "io", "dev", "app", "edu", "gov", "co", "ai", "us", "uk", "de", "fr",
    "jp", "info",
];

/// Maximum query cost
pub const MAX_QUERY_COST: u32 = 100;

/// Routing decision for one query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRoute {
    /// Namespaces referenced by the query, deduplicated in appearance order
    pub namespaces: Vec<String>,
    /// Shards owning those namespaces, deduplicated
    pub shards: Vec<ShardAssignment>,
    /// Whether the result may be served from cache
    pub cacheable: bool,
    /// Cache key for cacheable queries
    pub cache_key: Option<String>,
    /// Cache TTL in seconds for cacheable queries
    pub ttl_secs: Option<u32>,
    /// Estimated execution cost, `1..=100`
    pub cost: u32,
}

/// Maps query text to shards and cacheability
#[derive(Debug, Clone)]
pub struct QueryRouter {
    shards: ShardRouter,
    cache_ttl_secs: u32,
}

impl Default for QueryRouter {
    fn default() -> Self {
        QueryRouter {
            shards: ShardRouter::default(),
            cache_ttl_secs: 300,
        }
    }
}

impl QueryRouter {
    /// Create a router over `shard_count` shards with the given cache TTL
    pub fn new(shard_count: u32, cache_ttl_secs: u32) -> Self {
        QueryRouter {
            shards: ShardRouter::new(shard_count),
            cache_ttl_secs,
        }
    }

    /// Route a query
    pub fn route_query(&self, text: &str) -> QueryRoute {
        let spans = extract_url_spans(text);
        let raw_urls: Vec<&str> = spans.iter().map(|(s, e)| &text[*s..*e]).collect();

        let mut namespaces: Vec<String> = Vec::new();
        for raw in &raw_urls {
            if let Ok(entity) = EntityUrl::parse(raw) {
                let ns = entity.namespace().as_str().to_string();
                if !namespaces.contains(&ns) {
                    namespaces.push(ns);
                }
            }
        }
        // No URL parsed cleanly: route by the first raw substring so the
        // query still lands somewhere deterministic.
        if namespaces.is_empty() {
            if let Some(first) = raw_urls.first() {
                namespaces.push(first.to_string());
            }
        }

        let mut shards: Vec<ShardAssignment> = Vec::new();
        for ns in &namespaces {
            let assignment = self.shards.assign_key(ns);
            if !shards.contains(&assignment) {
                shards.push(assignment);
            }
        }

        let cacheable = can_serve_from_cache(text);
        let cache_key = cacheable.then(|| query_cache_key(text));
        let ttl_secs = cacheable.then_some(self.cache_ttl_secs);
        let cost = estimate_query_cost(text);

        QueryRoute {
            namespaces,
            shards,
            cacheable,
            cache_key,
            ttl_secs,
            cost,
        }
    }
}

/// Whether a query may be served from cache
///
/// False exactly when the uppercased text contains a mutation marker or a
/// volatile time function.
pub fn can_serve_from_cache(text: &str) -> bool {
    let upper = text.to_uppercase();
    !MUTATION_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Deterministic cache key for a query: `gdb-{fnv1a(normalized):08x}`
pub fn query_cache_key(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("gdb-{:08x}", fnv1a_32(&normalized))
}

/// Estimate a query's execution cost
///
/// `1 + hops + 5 * (namespaces - 1) + 2 * filters`, clamped to
/// `[1, 100]`. A hop is a dot-led property that is neither a recognized
/// TLD nor part of a URL authority; a filter is a `[?` predicate.
pub fn estimate_query_cost(text: &str) -> u32 {
    let spans = extract_url_spans(text);
    let mut namespaces: Vec<String> = Vec::new();
    for (start, end) in &spans {
        if let Ok(entity) = EntityUrl::parse(&text[*start..*end]) {
            let ns = entity.namespace().as_str().to_string();
            if !namespaces.contains(&ns) {
                namespaces.push(ns);
            }
        }
    }

    let hops = count_hops(text, &spans);
    let filters = text.matches("[?").count() as u32;
    let namespace_spread = 5 * (namespaces.len().max(1) as u32 - 1);

    (1 + hops + namespace_spread + 2 * filters).clamp(1, MAX_QUERY_COST)
}

/// Byte spans of URL-looking substrings in the query text
fn extract_url_spans(text: &str) -> Vec<(usize, usize)> {
    const STOPPERS: &[char] = &[
        '"', '\'', '`', '<', '>', '[', ']', '(', ')', '{', '}', ',', ';',
    ];
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &text[i..];
        if rest.starts_with("https://") || rest.starts_with("http://") {
            let mut end = i;
            for (offset, c) in rest.char_indices() {
                if c.is_whitespace() || STOPPERS.contains(&c) {
                    break;
                }
                end = i + offset + c.len_utf8();
            }
            spans.push((i, end));
            i = end.max(i + 1);
        } else {
            // Advance one character, not one byte
            i += rest.chars().next().map(char::len_utf8).unwrap_or(1);
        }
    }
    spans
}

/// Count traversal hops: `.prop` occurrences outside URL authorities that
/// are not recognized TLDs
fn count_hops(text: &str, url_spans: &[(usize, usize)]) -> u32 {
    // Authority portion of each URL: between "://" and the next '/'
    let authority_spans: Vec<(usize, usize)> = url_spans
        .iter()
        .filter_map(|(start, end)| {
            let url = &text[*start..*end];
            let after_scheme = url.find("://")? + 3;
            let auth_end = url[after_scheme..]
                .find('/')
                .map(|p| after_scheme + p)
                .unwrap_or(url.len());
            Some((*start + after_scheme, *start + auth_end))
        })
        .collect();

    let mut hops = 0u32;
    for (index, _) in text.match_indices('.') {
        let ident: String = text[index + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if ident.is_empty() || !ident.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
        {
            continue;
        }
        if authority_spans
            .iter()
            .any(|(start, end)| index >= *start && index < *end)
        {
            continue;
        }
        if RECOGNIZED_TLDS.contains(&ident.to_ascii_lowercase().as_str()) {
            continue;
        }
        hops += 1;
    }
    hops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryEdgeCache;
    use crate::plane::CachePlaneConfig;
    use lattice_core::BloomFilter;

    fn bloom_setup() -> (Arc<MemoryEdgeCache>, Arc<CachePlane>) {
        let cache = Arc::new(MemoryEdgeCache::new());
        let plane = Arc::new(CachePlane::new(cache.clone(), CachePlaneConfig::default()));
        (cache, plane)
    }

    fn namespace() -> Namespace {
        Namespace::parse("https://example.com/api/").unwrap()
    }

    fn filter_with(entries: &[&str], version: &str) -> String {
        let mut filter = BloomFilter::with_capacity(1000, 0.01, version);
        filter.add_many(entries);
        filter.serialize()
    }

    #[test]
    fn test_check_entity_cache_hit() {
        let (_cache, plane) = bloom_setup();
        let ns = namespace();
        plane.put_bloom(&ns, "v1", &filter_with(&["https://example.com/api/entity/123"], "v1"));

        let router = BloomRouter::new(plane);
        let present = router.check_entity(&ns, "v1", "https://example.com/api/entity/123");
        assert!(present.might_exist);
        assert!(present.cache_hit);

        let absent = router.check_entity(&ns, "v1", "https://example.com/api/entity/999");
        assert!(!absent.might_exist);
        assert!(absent.cache_hit);
    }

    #[test]
    fn test_check_entity_fallback_populates_cache() {
        let (cache, plane) = bloom_setup();
        let ns = namespace();

        let serialized = filter_with(&["https://example.com/api/entity/1"], "v7");
        let router = BloomRouter::new(plane.clone()).with_fallback(Box::new(move |_ns, version| {
            (version == "v7").then(|| serialized.clone())
        }));

        let check = router.check_entity(&ns, "v7", "https://example.com/api/entity/1");
        assert!(check.might_exist);
        assert!(!check.cache_hit);
        assert_eq!(cache.len(), 1, "fallback result should be cached");

        // Second check is now a hit
        let check = router.check_entity(&ns, "v7", "https://example.com/api/entity/1");
        assert!(check.cache_hit);
    }

    #[test]
    fn test_check_entity_cache_on_load_disabled() {
        let (cache, plane) = bloom_setup();
        let ns = namespace();
        let serialized = filter_with(&["x"], "v1");
        let router = BloomRouter::new(plane)
            .with_fallback(Box::new(move |_, _| Some(serialized.clone())))
            .with_cache_on_load(false);

        router.check_entity(&ns, "v1", "x");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_check_entity_pass_through() {
        let (cache, plane) = bloom_setup();
        let ns = namespace();
        let router = BloomRouter::new(plane);

        // No filter anywhere
        assert_eq!(router.check_entity(&ns, "v1", "anything"), EntityCheck::pass_through());

        // Broken cache: still pass-through
        cache.set_fail_reads(true);
        assert_eq!(router.check_entity(&ns, "v1", "anything"), EntityCheck::pass_through());
    }

    #[test]
    fn test_check_entity_corrupt_filter_passes_through() {
        let (_cache, plane) = bloom_setup();
        let ns = namespace();
        plane.put_bloom(&ns, "v1", "definitely not a filter");

        let router = BloomRouter::new(plane);
        assert_eq!(router.check_entity(&ns, "v1", "x"), EntityCheck::pass_through());
    }

    // === Query routing ===

    #[test]
    fn test_route_simple_traversal() {
        let router = QueryRouter::default();
        let route = router.route_query("https://example.com/users/123.friends");

        assert_eq!(route.namespaces, vec!["https://example.com/users/"]);
        assert_eq!(route.shards.len(), 1);
        assert!(route.cacheable);
        assert!(route.cache_key.as_ref().unwrap().starts_with("gdb-"));
        assert_eq!(route.ttl_secs, Some(300));
    }

    #[test]
    fn test_route_mutation_is_uncacheable() {
        let router = QueryRouter::default();
        let route = router.route_query("UPDATE https://example.com/users/123");

        assert!(!route.cacheable);
        assert!(route.cache_key.is_none());
        assert!(route.ttl_secs.is_none());
        assert_eq!(route.namespaces, vec!["https://example.com/users/"]);
    }

    #[test]
    fn test_cacheability_markers() {
        for query in [
            "MUTATE x",
            "insert into y",
            "DELETE https://e.com/a/b",
            "select NOW() from z",
            "where t > CURRENT_TIMESTAMP",
            "where d = CURRENT_DATE",
            "offset SET",
        ] {
            assert!(!can_serve_from_cache(query), "{:?} should be uncacheable", query);
        }
        assert!(can_serve_from_cache("https://example.com/users/123.friends"));
    }

    #[test]
    fn test_cache_key_normalizes_whitespace() {
        let a = query_cache_key("  https://e.com/a   .friends ");
        let b = query_cache_key("https://e.com/a .friends");
        assert_eq!(a, b);
        assert_eq!(a.len(), "gdb-".len() + 8);
    }

    #[test]
    fn test_shard_dedup_across_same_namespace() {
        let router = QueryRouter::default();
        let route = router.route_query(
            "https://example.com/users/1.friends https://example.com/users/2.name",
        );
        assert_eq!(route.namespaces, vec!["https://example.com/users/"]);
        assert_eq!(route.shards.len(), 1);
    }

    #[test]
    fn test_multiple_namespaces() {
        let router = QueryRouter::default();
        let route = router
            .route_query("https://a.example.com/x/1 joined with https://b.example.com/y/2");
        assert_eq!(
            route.namespaces,
            vec!["https://a.example.com/x/", "https://b.example.com/y/"]
        );
        assert_eq!(route.shards.len(), 2);
    }

    #[test]
    fn test_unparseable_url_falls_back_to_raw_substring() {
        let router = QueryRouter::default();
        // Userinfo makes this invalid as an entity URL
        let route = router.route_query("https://user@host/thing");
        assert_eq!(route.namespaces, vec!["https://user@host/thing"]);
        assert_eq!(route.shards.len(), 1);
    }

    #[test]
    fn test_no_urls_at_all() {
        let router = QueryRouter::default();
        let route = router.route_query("friends of friends");
        assert!(route.namespaces.is_empty());
        assert!(route.shards.is_empty());
    }

    #[test]
    fn test_url_extraction_stops_at_structure() {
        let spans = extract_url_spans("match [https://e.com/a] then \"https://e.com/b\" end");
        let urls: Vec<&str> = {
            let text = "match [https://e.com/a] then \"https://e.com/b\" end";
            spans.iter().map(|(s, e)| &text[*s..*e]).collect()
        };
        assert_eq!(urls, vec!["https://e.com/a", "https://e.com/b"]);
    }

    #[test]
    fn test_cost_base_case() {
        assert_eq!(estimate_query_cost("https://example.com/users/123"), 1);
    }

    #[test]
    fn test_cost_counts_hops_not_authority_dots() {
        // ".com" is in the authority, ".friends" and ".name" are hops
        let cost = estimate_query_cost("https://example.com/users/123.friends.name");
        assert_eq!(cost, 3);
    }

    #[test]
    fn test_cost_skips_recognized_tlds() {
        // A bare domain-ish token outside a URL: ".com" is recognized
        assert_eq!(estimate_query_cost("example.com"), 1);
        // ".friends" is not a TLD
        assert_eq!(estimate_query_cost("user.friends"), 2);
    }

    #[test]
    fn test_cost_namespace_spread_and_filters() {
        let two_ns = "https://a.example.com/x/1 https://b.example.com/y/2";
        assert_eq!(estimate_query_cost(two_ns), 1 + 5);

        let with_filters = "https://a.example.com/x/1 [?age > 30] [?active]";
        assert_eq!(estimate_query_cost(with_filters), 1 + 4);
    }

    #[test]
    fn test_cost_is_capped() {
        let mut query = String::from("https://example.com/users/1");
        for _ in 0..200 {
            query.push_str(".hop");
        }
        assert_eq!(estimate_query_cost(&query), 100);
    }

    #[test]
    fn test_cost_monotonicity() {
        let base = "https://example.com/users/1";
        let c0 = estimate_query_cost(base);
        let c1 = estimate_query_cost("https://example.com/users/1.friends");
        let c2 = estimate_query_cost("https://example.com/users/1.friends [?x]");
        assert!(c0 <= c1 && c1 <= c2);
    }
}
