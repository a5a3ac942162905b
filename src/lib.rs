//! Lattice: a namespaced triple-store storage engine
//!
//! Lattice stores graph triples in self-describing columnar chunks on an
//! immutable blob store, compacts them in tiers, and serves reads through a
//! content-addressed bloom filter and edge cache plane.
//!
//! The workspace splits into three crates, re-exported here:
//! - [`core`](lattice_core): identifiers, namespaces, typed values,
//!   triples, bloom filters, shard routing
//! - [`storage`](lattice_storage): the blob-store capability, the GraphCol
//!   chunk format, the CDC writer, tiered compaction, and point-in-time
//!   restore
//! - [`edge`](lattice_edge): the cache capability, the cache plane, metrics,
//!   invalidation, and the bloom/query routers
//!
//! [`GraphStore`] assembles the full pipeline over a blob store and an edge
//! cache; the individual pieces remain directly usable.
//!
//! # Example
//!
//! ```
//! use latticedb::{
//!     CdcEvent, CdcWriter, CdcWriterConfig, MemoryBlobStore, Namespace, Triple, TypedValue,
//! };
//! use std::sync::Arc;
//!
//! let blob = Arc::new(MemoryBlobStore::new());
//! let namespace = Namespace::parse("https://example.com/crm/").unwrap();
//! let writer = CdcWriter::new(namespace, blob, CdcWriterConfig::default());
//!
//! writer
//!     .write(CdcEvent::insert(Triple::new(
//!         "https://example.com/crm/acme",
//!         "name",
//!         TypedValue::String("Acme Corp".into()),
//!     )))
//!     .unwrap();
//! writer.flush().unwrap();
//! ```

#![warn(missing_docs)]

mod store;

pub use store::{GraphStore, GraphStoreConfig};

pub use lattice_core::{
    fnv1a_32, now_millis, url_from_storage_path, validate_predicate, BloomBuilder, BloomFilter,
    CdcEvent, CdcOp, EntityIdErrorKind, EntityUrl, GeoPoint, JsonErrorKind, LatticeError,
    Namespace, ObjectType, SerializedBloom, ShardAssignment, ShardRouter, Triple, TxId,
    TypedValue, ValueRow, DEFAULT_FP_RATE, DEFAULT_SHARD_COUNT, MAX_ENTITY_URL_LEN,
};

pub use lattice_storage::{
    chunk_path, decode_chunk, encode_chunk, format_date_path, parse_chunk_timestamp,
    select_chunks_for_compaction, BackupMetadata, BackupSnapshot, BlobStore, BlobStoreError,
    CdcWriter, CdcWriterConfig, ChunkDecodeError, ChunkInfo, ChunkStats, CompactionEvent,
    CompactionTier, Compactor, CompactorConfig, Level, ListBackupsOptions, ManifestStore,
    MemoryBlobStore, NamespaceManifest, ObjectMeta, RestoreEngine, RestoreOptions,
    RestoreProgress, RestoreResult, StorageError, WriterErrorEvent, WriterRegistry, WriterStats,
};

pub use lattice_edge::{
    can_serve_from_cache, estimate_query_cost, query_cache_key, BloomPublisher,
    BloomPublisherConfig, BloomRouter, CacheInvalidator, CacheMetrics, CacheMetricsConfig,
    CachePlane, CachePlaneConfig, CacheRequest, CacheResponse, EdgeCache, EntityCheck,
    InvalidationReport, InvalidatorConfig, MemoryEdgeCache, MetricsSnapshot,
    NamespaceInvalidationOptions, PublishedBloom, QueryRoute, QueryRouter,
};
