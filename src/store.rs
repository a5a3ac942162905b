//! The assembled storage engine
//!
//! [`GraphStore`] wires the pipeline together over the two injected
//! capabilities (blob store and edge cache): CDC events route to
//! per-namespace writers, compactions substitute sources for targets and
//! push invalidations plus a fresh bloom filter to the edge, and reads go
//! through the bloom and query routers.
//!
//! Each piece remains usable on its own; the facade only sequences them
//! the way the data flow demands (write -> manifest -> compact ->
//! invalidate -> publish).

use lattice_core::{CdcEvent, EntityUrl, Namespace, Triple};
use lattice_edge::{
    BloomPublisher, BloomPublisherConfig, BloomRouter, CacheInvalidator, CacheMetrics,
    CacheMetricsConfig, CachePlane, CachePlaneConfig, EdgeCache, EntityCheck, InvalidatorConfig,
    MetricsSnapshot, QueryRoute, QueryRouter,
};
use lattice_storage::{
    BlobStore, CdcWriterConfig, CompactionEvent, CompactionTier, Compactor, CompactorConfig,
    Level, ManifestStore, NamespaceManifest, RestoreEngine, RestoreOptions, RestoreProgress,
    RestoreResult, Result, WriterRegistry,
};
use std::sync::Arc;
use tracing::warn;

/// Configuration for the assembled engine
#[derive(Debug, Clone, Default)]
pub struct GraphStoreConfig {
    /// CDC writer settings, shared by all namespaces
    pub writer: CdcWriterConfig,
    /// Compactor thresholds and lock settings
    pub compactor: CompactorConfig,
    /// Edge cache key scheme and TTLs
    pub plane: CachePlaneConfig,
    /// Invalidation batching and retries
    pub invalidator: InvalidatorConfig,
    /// Bloom filter sizing
    pub publisher: BloomPublisherConfig,
    /// Metrics window configuration
    pub metrics: CacheMetricsConfig,
}

/// A namespaced triple store over a blob store and an edge cache
pub struct GraphStore {
    blob: Arc<dyn BlobStore>,
    writers: WriterRegistry,
    compactor: Compactor,
    manifests: ManifestStore,
    plane: Arc<CachePlane>,
    invalidator: CacheInvalidator,
    publisher: BloomPublisher,
    bloom_router: BloomRouter,
    query_router: QueryRouter,
    restore: RestoreEngine,
    metrics: Arc<CacheMetrics>,
}

impl GraphStore {
    /// Assemble the engine over the two capabilities
    pub fn new(
        blob: Arc<dyn BlobStore>,
        cache: Arc<dyn EdgeCache>,
        config: GraphStoreConfig,
    ) -> Self {
        let metrics = Arc::new(CacheMetrics::new(config.metrics));
        let plane = Arc::new(
            CachePlane::new(cache, config.plane).with_metrics(Arc::clone(&metrics)),
        );
        GraphStore {
            writers: WriterRegistry::new(Arc::clone(&blob), config.writer),
            compactor: Compactor::new(Arc::clone(&blob), config.compactor),
            manifests: ManifestStore::new(Arc::clone(&blob)),
            invalidator: CacheInvalidator::new(Arc::clone(&plane), config.invalidator),
            publisher: BloomPublisher::new(Arc::clone(&blob), Arc::clone(&plane), config.publisher),
            bloom_router: BloomRouter::new(Arc::clone(&plane)),
            query_router: QueryRouter::default(),
            restore: RestoreEngine::new(Arc::clone(&blob)),
            blob,
            plane,
            metrics,
        }
    }

    /// Accept a CDC event, routed to its subject's namespace writer
    pub fn ingest(&self, event: CdcEvent) -> Result<()> {
        self.writers.ingest(event)
    }

    /// Flush every namespace's buffered events to L0 chunks
    pub fn flush(&self) -> Result<usize> {
        self.writers.flush_all()
    }

    /// Reconcile a namespace's manifest with the chunks actually stored
    ///
    /// Lists all three levels and commits the union as the live set. The
    /// manifest version advances only when the set changed.
    pub fn sync_manifest(&self, namespace: &Namespace) -> Result<NamespaceManifest> {
        let ns_path = namespace.storage_path();
        let mut live: Vec<String> = Vec::new();
        for level in [Level::L0, Level::L1, Level::L2] {
            let prefix = lattice_storage::level_prefix(&ns_path, level);
            for meta in self.blob.list(&prefix)? {
                if lattice_storage::is_chunk_key(&meta.key) {
                    live.push(meta.key);
                }
            }
        }
        self.manifests.commit(namespace, |chunks| {
            if *chunks == live {
                false
            } else {
                *chunks = live;
                true
            }
        })
    }

    /// Run one compaction and propagate its consequences
    ///
    /// On a successful merge: the manifest substitutes sources for the
    /// target (one version bump), the edge drops the stale entries, and a
    /// bloom filter for the new manifest version is published. Returns the
    /// compaction event, or `None` when nothing ran.
    pub fn compact(
        &self,
        namespace: &Namespace,
        tier: CompactionTier,
    ) -> Result<Option<CompactionEvent>> {
        let Some(event) = self.compactor.compact(namespace, tier)? else {
            return Ok(None);
        };

        self.manifests
            .replace_chunks(namespace, &event.source_chunks, &event.target_chunk)?;
        self.invalidator.on_compaction(&event);
        if let Err(e) = self.publisher.publish(namespace) {
            // The edge simply keeps answering from the previous version.
            warn!(namespace = %namespace, error = %e, "bloom publication failed");
        }
        Ok(Some(event))
    }

    /// Publish the bloom filter for a namespace's current live set
    pub fn publish_bloom(&self, namespace: &Namespace) -> Result<String> {
        Ok(self.publisher.publish(namespace)?.version)
    }

    /// Check whether an entity might exist
    ///
    /// Derives the namespace from the entity URL and consults the bloom
    /// filter published for the current manifest version. Any downstream
    /// failure degrades to pass-through.
    pub fn check_entity(&self, entity_url: &str) -> Result<EntityCheck> {
        let namespace = EntityUrl::parse(entity_url)?.namespace();
        let version = match self.manifests.load(&namespace) {
            Ok(manifest) => format!("m{}", manifest.version),
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "manifest unreadable, passing through");
                return Ok(EntityCheck::pass_through());
            }
        };
        Ok(self
            .bloom_router
            .check_entity(&namespace, &version, entity_url))
    }

    /// Route a query to shards and decide its cacheability
    pub fn route_query(&self, text: &str) -> QueryRoute {
        self.query_router.route_query(text)
    }

    /// Read an entity's current triples
    ///
    /// The read path of the engine: the bloom filter short-circuits
    /// definite absences, then every live chunk is fetched edge-first
    /// (misses fall back to the blob store and populate the cache), and
    /// the entity's events fold in timestamp order into its current
    /// state, one triple per predicate. Deletes remove their predicate.
    pub fn read_entity(&self, entity_url: &str) -> Result<Vec<Triple>> {
        let entity = EntityUrl::parse(entity_url)?;
        let namespace = entity.namespace();

        if !self.check_entity(entity_url)?.might_exist {
            return Ok(Vec::new());
        }

        let manifest = self.manifests.load(&namespace)?;
        let mut events: Vec<CdcEvent> = Vec::new();
        for key in &manifest.chunks {
            let Some(bytes) = self.fetch_chunk(&namespace, key)? else {
                warn!(chunk = %key, "live chunk missing during read");
                continue;
            };
            match lattice_storage::decode_chunk(&bytes) {
                Ok(chunk_events) => events.extend(
                    chunk_events
                        .into_iter()
                        .filter(|e| e.triple.subject == entity_url),
                ),
                Err(e) => {
                    warn!(chunk = %key, error = %e, "skipping undecodable chunk during read");
                }
            }
        }
        events.sort_by_key(CdcEvent::timestamp_ms);

        // Fold into current state: last write per predicate wins, a
        // delete clears its predicate.
        let mut state: std::collections::BTreeMap<String, Triple> = std::collections::BTreeMap::new();
        for event in events {
            match event.op {
                lattice_core::CdcOp::Delete => {
                    state.remove(&event.triple.predicate);
                }
                _ => {
                    state.insert(event.triple.predicate.clone(), event.triple);
                }
            }
        }
        Ok(state.into_values().collect())
    }

    /// Fetch a chunk edge-first, populating the cache on a blob-store hit
    fn fetch_chunk(&self, namespace: &Namespace, blob_key: &str) -> Result<Option<Vec<u8>>> {
        let chunk_id = CachePlane::chunk_id_for_key(namespace, blob_key);
        if let Some(id) = &chunk_id {
            if let Some(bytes) = self.plane.get_chunk(namespace, id, None) {
                return Ok(Some(bytes));
            }
        }
        let Some(bytes) = self.blob.get(blob_key)? else {
            return Ok(None);
        };
        if let Some(id) = &chunk_id {
            self.plane.put_chunk(namespace, id, &bytes);
        }
        Ok(Some(bytes))
    }

    /// Replay a namespace's CDC stream (see [`RestoreEngine`])
    pub fn restore_from_backup<H, P>(
        &self,
        namespace: &Namespace,
        handler: H,
        options: &RestoreOptions,
        on_progress: Option<P>,
    ) -> Result<RestoreResult>
    where
        H: FnMut(&[CdcEvent]) -> Result<()>,
        P: FnMut(&RestoreProgress),
    {
        self.restore
            .restore_from_backup(namespace, handler, options, on_progress)
    }

    /// The restore engine, for backup enumeration
    pub fn restore_engine(&self) -> &RestoreEngine {
        &self.restore
    }

    /// The cache plane, for direct artifact access
    pub fn plane(&self) -> &Arc<CachePlane> {
        &self.plane
    }

    /// Current cache metrics
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Release all writers (buffered events are not flushed)
    pub fn close(&self) {
        self.writers.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{CdcOp, Triple, TxId, TypedValue};
    use lattice_edge::MemoryEdgeCache;
    use lattice_storage::MemoryBlobStore;
    use std::time::Duration;

    fn store() -> GraphStore {
        let config = GraphStoreConfig {
            writer: CdcWriterConfig {
                flush_interval: Duration::ZERO,
                retry_backoff: Duration::from_millis(1),
                ..CdcWriterConfig::default()
            },
            ..GraphStoreConfig::default()
        };
        GraphStore::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryEdgeCache::new()),
            config,
        )
    }

    fn event(subject: &str, ts: u64) -> CdcEvent {
        CdcEvent {
            op: CdcOp::Insert,
            triple: Triple {
                subject: subject.to_string(),
                predicate: "name".to_string(),
                object: TypedValue::String("x".into()),
                timestamp_ms: ts,
                tx_id: TxId::from_parts(ts, &[5u8; 10]),
            },
        }
    }

    fn namespace() -> Namespace {
        Namespace::parse("https://example.com/crm/").unwrap()
    }

    #[test]
    fn test_ingest_flush_sync() {
        let store = store();
        let ns = namespace();

        for i in 0..3 {
            store
                .ingest(event(&format!("https://example.com/crm/e{}", i), 1_000 + i))
                .unwrap();
        }
        assert_eq!(store.flush().unwrap(), 3);

        let manifest = store.sync_manifest(&ns).unwrap();
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.chunks.len(), 1);

        // Re-sync without changes: version stays
        assert_eq!(store.sync_manifest(&ns).unwrap().version, 1);
    }

    #[test]
    fn test_compact_updates_manifest_and_bloom() {
        let store = store();
        let ns = namespace();

        // Four separate flushes: four WAL chunks
        let base = 1_705_314_645_000u64;
        for chunk in 0..4u64 {
            for i in 0..5u64 {
                store
                    .ingest(event(
                        &format!("https://example.com/crm/e{}", chunk * 5 + i),
                        base + chunk * 60_000 + i,
                    ))
                    .unwrap();
            }
            store.flush().unwrap();
        }
        store.sync_manifest(&ns).unwrap();

        let outcome = store
            .compact(&ns, CompactionTier::L0ToL1)
            .unwrap()
            .expect("should compact");
        assert_eq!(outcome.source_chunks.len(), 4);

        // Manifest now lists only the merged target, at version 2
        let manifest = store.sync_manifest(&ns).unwrap();
        assert_eq!(manifest.version, 2);
        assert_eq!(manifest.chunks, vec![outcome.target_chunk.clone()]);

        // The bloom for the post-compaction manifest version answers reads
        let present = store
            .check_entity("https://example.com/crm/e7")
            .unwrap();
        assert!(present.might_exist);
        assert!(present.cache_hit);

        let absent = store
            .check_entity("https://example.com/crm/never-written")
            .unwrap();
        assert!(!absent.might_exist);
    }

    #[test]
    fn test_check_entity_without_any_state_passes_through() {
        let store = store();
        let check = store
            .check_entity("https://example.com/crm/anything")
            .unwrap();
        assert_eq!(check, EntityCheck::pass_through());

        // Invalid entity ids are a caller error, not a pass-through
        assert!(store.check_entity("ftp://example.com/x").is_err());
    }

    #[test]
    fn test_read_entity_folds_events() {
        let store = store();
        let ns = namespace();
        let subject = "https://example.com/crm/acme";

        let mut write = |predicate: &str, value: TypedValue, ts: u64, op: CdcOp| {
            store
                .ingest(CdcEvent {
                    op,
                    triple: Triple {
                        subject: subject.to_string(),
                        predicate: predicate.to_string(),
                        object: value,
                        timestamp_ms: ts,
                        tx_id: TxId::from_parts(ts, &[2u8; 10]),
                    },
                })
                .unwrap();
        };
        write("name", TypedValue::String("Acme".into()), 1_000, CdcOp::Insert);
        write("employees", TypedValue::Int64(40), 2_000, CdcOp::Insert);
        write("employees", TypedValue::Int64(55), 3_000, CdcOp::Update);
        write("name", TypedValue::Null, 4_000, CdcOp::Delete);
        drop(write);

        store.flush().unwrap();
        store.sync_manifest(&ns).unwrap();
        store.publish_bloom(&ns).unwrap();

        let triples = store.read_entity(subject).unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].predicate, "employees");
        assert_eq!(triples[0].object, TypedValue::Int64(55));
    }

    #[test]
    fn test_read_entity_short_circuits_on_bloom_absence() {
        let store = store();
        let ns = namespace();
        store
            .ingest(event("https://example.com/crm/known", 1_000))
            .unwrap();
        store.flush().unwrap();
        store.sync_manifest(&ns).unwrap();
        store.publish_bloom(&ns).unwrap();

        let absent = store
            .read_entity("https://example.com/crm/unknown")
            .unwrap();
        assert!(absent.is_empty());

        let known = store.read_entity("https://example.com/crm/known").unwrap();
        assert_eq!(known.len(), 1);
    }

    #[test]
    fn test_read_entity_populates_edge_cache() {
        let store = store();
        let ns = namespace();
        store
            .ingest(event("https://example.com/crm/e1", 1_000))
            .unwrap();
        store.flush().unwrap();
        store.sync_manifest(&ns).unwrap();

        // First read pulls from the blob store and populates the edge
        store.read_entity("https://example.com/crm/e1").unwrap();
        let manifest = store.sync_manifest(&ns).unwrap();
        let chunk_id =
            lattice_edge::CachePlane::chunk_id_for_key(&ns, &manifest.chunks[0]).unwrap();
        assert!(store.plane().get_chunk(&ns, &chunk_id, None).is_some());
    }

    #[test]
    fn test_restore_through_facade() {
        let store = store();
        let ns = namespace();
        store
            .ingest(event("https://example.com/crm/e1", 1_705_314_645_000))
            .unwrap();
        store.flush().unwrap();

        let mut count = 0usize;
        let result = store
            .restore_from_backup(
                &ns,
                |batch| {
                    count += batch.len();
                    Ok(())
                },
                &RestoreOptions::default(),
                None::<fn(&RestoreProgress)>,
            )
            .unwrap();
        assert_eq!(result.events_replayed, 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_metrics_flow_through_the_plane() {
        let store = store();
        let ns = namespace();

        // A bloom read misses (nothing published yet)
        store.sync_manifest(&ns).ok();
        store
            .check_entity("https://example.com/crm/e1")
            .unwrap();
        let snapshot = store.metrics_snapshot();
        assert!(snapshot.misses >= 1);
    }
}
