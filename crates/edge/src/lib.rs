//! Edge cache plane for the Lattice triple store
//!
//! Everything that sits between readers and the blob store:
//! - the [`cache`] capability (with an in-memory fake)
//! - the [`plane`] that keys chunks, manifests, bloom filters, and query
//!   segments with the right freshness policy per artifact
//! - windowed [`metrics`] for hits, misses, latencies, and bytes
//! - [`invalidation`] driven by compaction events
//! - bloom filter [`publish`]ing keyed to manifest versions
//! - the [`router`]: bloom-backed negative lookups and query routing
//!
//! The whole layer is best-effort by contract: cache failures degrade to
//! origin reads and safe pass-through answers, never to errors.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod invalidation;
pub mod metrics;
pub mod plane;
pub mod publish;
pub mod router;

pub use cache::{CacheError, CacheRequest, CacheResponse, EdgeCache, MemoryEdgeCache};
pub use invalidation::{
    CacheInvalidator, InvalidationReport, InvalidatorConfig, NamespaceInvalidationOptions,
};
pub use metrics::{
    CacheEventKind, CacheMetrics, CacheMetricsConfig, DetailEntry, MetricsDelta, MetricsSnapshot,
    NamespaceCounts,
};
pub use plane::{
    CachePlane, CachePlaneConfig, HEADER_BLOOM_VERSION, HEADER_CACHE_TAG, HEADER_CACHE_TIMESTAMP,
    HEADER_CACHE_VERSION, HEADER_CHUNK_ID, IMMUTABLE_CACHE_CONTROL, MANIFEST_CACHE_CONTROL,
};
pub use publish::{BloomPublisher, BloomPublisherConfig, PublishedBloom};
pub use router::{
    can_serve_from_cache, estimate_query_cost, query_cache_key, BloomFallback, BloomRouter,
    EntityCheck, QueryRoute, QueryRouter, MAX_QUERY_COST,
};
