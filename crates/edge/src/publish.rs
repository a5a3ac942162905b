//! Bloom filter publication
//!
//! Builds a namespace's bloom filter from its live chunks and publishes it
//! to the edge under a content-address derived from the manifest version.
//! Because the manifest version moves on every live-set change, each
//! published filter lands in a fresh immutable slot and readers pinned to
//! an older version keep a consistent view until they advance.
//!
//! The filter indexes triple **subjects**, which is what the read path's
//! negative lookup asks about.

use crate::plane::CachePlane;
use lattice_core::{BloomFilter, Namespace, DEFAULT_FP_RATE};
use lattice_storage::{decode_chunk, BlobStore, ManifestStore, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct BloomPublisherConfig {
    /// Sizing floor so tiny namespaces still get a usable filter
    pub min_capacity: usize,
    /// Target false-positive rate
    pub fp_rate: f64,
}

impl Default for BloomPublisherConfig {
    fn default() -> Self {
        BloomPublisherConfig {
            min_capacity: 1024,
            fp_rate: DEFAULT_FP_RATE,
        }
    }
}

/// Outcome of one publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedBloom {
    /// The version the filter was published under
    pub version: String,
    /// Distinct subjects indexed
    pub subject_count: usize,
    /// Chunks that contributed (undecodable chunks are skipped)
    pub chunks_read: usize,
}

/// Builds and publishes per-namespace bloom filters
pub struct BloomPublisher {
    blob: Arc<dyn BlobStore>,
    plane: Arc<CachePlane>,
    config: BloomPublisherConfig,
}

impl BloomPublisher {
    /// Create a publisher over the blob store and cache plane
    pub fn new(
        blob: Arc<dyn BlobStore>,
        plane: Arc<CachePlane>,
        config: BloomPublisherConfig,
    ) -> Self {
        BloomPublisher {
            blob,
            plane,
            config,
        }
    }

    /// Build the filter for a namespace's current live set and publish it
    ///
    /// Reads the manifest, decodes every live chunk, and indexes the
    /// distinct subjects. The publication version is
    /// `m{manifest_version}`; chunks that fail to read or decode are
    /// skipped with a warning rather than failing the publication.
    pub fn publish(&self, namespace: &Namespace) -> Result<PublishedBloom> {
        let manifest = ManifestStore::new(Arc::clone(&self.blob)).load(namespace)?;
        let version = format!("m{}", manifest.version);

        let mut subjects: BTreeSet<String> = BTreeSet::new();
        let mut chunks_read = 0usize;
        for key in &manifest.chunks {
            let bytes = match self.blob.get(key) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    warn!(chunk = %key, "live chunk missing, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(chunk = %key, error = %e, "live chunk unreadable, skipping");
                    continue;
                }
            };
            match decode_chunk(&bytes) {
                Ok(events) => {
                    chunks_read += 1;
                    for event in events {
                        subjects.insert(event.triple.subject);
                    }
                }
                Err(e) => {
                    warn!(chunk = %key, error = %e, "live chunk undecodable, skipping");
                }
            }
        }

        let mut filter = BloomFilter::with_capacity(
            subjects.len().max(self.config.min_capacity),
            self.config.fp_rate,
            version.clone(),
        );
        filter.add_many(&subjects);
        self.plane.put_bloom(namespace, &version, &filter.serialize());

        info!(
            namespace = %namespace,
            version = %version,
            subjects = subjects.len(),
            chunks = chunks_read,
            "bloom filter published"
        );
        Ok(PublishedBloom {
            version,
            subject_count: subjects.len(),
            chunks_read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryEdgeCache;
    use crate::plane::CachePlaneConfig;
    use crate::router::BloomRouter;
    use lattice_core::{CdcEvent, CdcOp, Triple, TxId, TypedValue};
    use lattice_storage::{chunk_path, encode_chunk, Level, MemoryBlobStore};

    fn namespace() -> Namespace {
        Namespace::parse("https://example.com/crm/").unwrap()
    }

    fn event(subject: &str, ts: u64) -> CdcEvent {
        CdcEvent {
            op: CdcOp::Insert,
            triple: Triple {
                subject: subject.to_string(),
                predicate: "name".to_string(),
                object: TypedValue::Null,
                timestamp_ms: ts,
                tx_id: TxId::from_parts(ts, &[9u8; 10]),
            },
        }
    }

    fn setup() -> (Arc<MemoryBlobStore>, Arc<CachePlane>, BloomPublisher) {
        let blob = Arc::new(MemoryBlobStore::new());
        let plane = Arc::new(CachePlane::new(
            Arc::new(MemoryEdgeCache::new()),
            CachePlaneConfig::default(),
        ));
        let publisher = BloomPublisher::new(
            blob.clone(),
            plane.clone(),
            BloomPublisherConfig::default(),
        );
        (blob, plane, publisher)
    }

    fn seed_live_chunk(blob: &Arc<MemoryBlobStore>, ns: &Namespace, subjects: &[&str], ts: u64) {
        let events: Vec<CdcEvent> = subjects
            .iter()
            .enumerate()
            .map(|(i, s)| event(s, ts + i as u64))
            .collect();
        let key = chunk_path(&ns.storage_path(), Level::L0, ts, 0);
        blob.put(&key, &encode_chunk(&events)).unwrap();
        ManifestStore::new(blob.clone())
            .add_chunks(ns, &[key])
            .unwrap();
    }

    #[test]
    fn test_publish_indexes_live_subjects() {
        let (blob, plane, publisher) = setup();
        let ns = namespace();
        seed_live_chunk(
            &blob,
            &ns,
            &[
                "https://example.com/crm/acme",
                "https://example.com/crm/globex",
            ],
            1_705_314_645_000,
        );

        let published = publisher.publish(&ns).unwrap();
        assert_eq!(published.version, "m1");
        assert_eq!(published.subject_count, 2);
        assert_eq!(published.chunks_read, 1);

        let router = BloomRouter::new(plane);
        assert!(
            router
                .check_entity(&ns, "m1", "https://example.com/crm/acme")
                .might_exist
        );
        let absent = router.check_entity(&ns, "m1", "https://example.com/crm/initech");
        assert!(!absent.might_exist);
        assert!(absent.cache_hit);
    }

    #[test]
    fn test_versions_track_the_manifest() {
        let (blob, plane, publisher) = setup();
        let ns = namespace();

        seed_live_chunk(&blob, &ns, &["https://example.com/crm/a"], 1_705_314_645_000);
        let first = publisher.publish(&ns).unwrap();
        assert_eq!(first.version, "m1");

        seed_live_chunk(&blob, &ns, &["https://example.com/crm/b"], 1_705_314_745_000);
        let second = publisher.publish(&ns).unwrap();
        assert_eq!(second.version, "m2");

        // Both slots remain live and independently addressable
        assert!(plane.get_bloom(&ns, "m1").is_some());
        assert!(plane.get_bloom(&ns, "m2").is_some());
    }

    #[test]
    fn test_empty_namespace_publishes_pass_through_filter() {
        let (_blob, plane, publisher) = setup();
        let ns = namespace();

        let published = publisher.publish(&ns).unwrap();
        assert_eq!(published.version, "m0");
        assert_eq!(published.subject_count, 0);

        // An empty filter answers pass-through rather than "absent"
        let serialized = plane.get_bloom(&ns, "m0").unwrap();
        let filter = BloomFilter::deserialize(&serialized).unwrap();
        assert!(filter.might_exist("anything"));
    }

    #[test]
    fn test_undecodable_chunk_is_skipped() {
        let (blob, _plane, publisher) = setup();
        let ns = namespace();
        seed_live_chunk(&blob, &ns, &["https://example.com/crm/a"], 1_705_314_645_000);

        // A second live chunk that is garbage
        let junk = chunk_path(&ns.storage_path(), Level::L0, 1_705_314_745_000, 0);
        blob.put(&junk, b"junk").unwrap();
        ManifestStore::new(blob.clone())
            .add_chunks(&ns, &[junk])
            .unwrap();

        let published = publisher.publish(&ns).unwrap();
        assert_eq!(published.chunks_read, 1);
        assert_eq!(published.subject_count, 1);
        assert_eq!(published.version, "m2");
    }
}
