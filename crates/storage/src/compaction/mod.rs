//! Tiered chunk compaction
//!
//! Small chunks merge into bigger ones across two defined tiers:
//! `L0 -> L1` (WAL chunks) and `L1 -> L2`. A run selects a time-ordered
//! prefix of source chunks, merge-sorts their events, writes one target
//! chunk at the next level, then deletes the sources in a single batch.
//!
//! # Key invariants
//!
//! - The target is durably written **before** any source is deleted; a
//!   failed write leaves every source in place.
//! - At most one compaction runs per namespace at a time, serialized by a
//!   lock file in the blob store.
//! - A source chunk that fails to decode after selection aborts the run;
//!   undecodable chunks discovered during enumeration are skipped.
//!
//! Each successful run yields a [`CompactionEvent`] for downstream cache
//! invalidation.

pub mod lock;
pub mod select;

pub use lock::{CompactionLock, LockRecord};
pub use select::{select_chunks_for_compaction, ChunkInfo};

use crate::blob::BlobStore;
use crate::chunk::{decode_chunk, encode_chunk, ChunkStats};
use crate::error::{BlobStoreError, Result};
use crate::paths::{chunk_path, is_chunk_key, level_prefix, Level};
use lattice_core::{now_millis, CdcEvent, Namespace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The two defined compaction tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompactionTier {
    /// Merge WAL chunks into L1
    L0ToL1,
    /// Merge L1 chunks into L2
    L1ToL2,
}

impl CompactionTier {
    /// The level chunks are read from
    pub fn source(self) -> Level {
        match self {
            CompactionTier::L0ToL1 => Level::L0,
            CompactionTier::L1ToL2 => Level::L1,
        }
    }

    /// The level the merged chunk is written to
    pub fn target(self) -> Level {
        match self {
            CompactionTier::L0ToL1 => Level::L1,
            CompactionTier::L1ToL2 => Level::L2,
        }
    }

    /// The size threshold governing this tier
    pub fn threshold_bytes(self, config: &CompactorConfig) -> u64 {
        match self {
            CompactionTier::L0ToL1 => config.l1_threshold_bytes,
            CompactionTier::L1ToL2 => config.l2_threshold_bytes,
        }
    }
}

impl std::fmt::Display for CompactionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompactionTier::L0ToL1 => "L0->L1",
            CompactionTier::L1ToL2 => "L1->L2",
        };
        write!(f, "{}", name)
    }
}

/// Compactor configuration
#[derive(Debug, Clone)]
pub struct CompactorConfig {
    /// Target size for L1 chunks
    pub l1_threshold_bytes: u64,
    /// Target size for L2 chunks
    pub l2_threshold_bytes: u64,
    /// Minimum source chunks per run
    pub min_chunks_to_compact: usize,
    /// Age after which a lock file may be displaced
    pub lock_timeout_ms: u64,
    /// Attempts per blob operation, including the first
    pub max_retries: u32,
    /// Base backoff between retries
    pub retry_backoff: Duration,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        CompactorConfig {
            l1_threshold_bytes: 8 * 1024 * 1024,
            l2_threshold_bytes: 128 * 1024 * 1024,
            min_chunks_to_compact: 4,
            lock_timeout_ms: 5 * 60 * 1000,
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Emitted after each successful compaction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionEvent {
    /// The namespace that was compacted
    pub namespace: String,
    /// Source chunk keys that were merged and deleted
    pub source_chunks: Vec<String>,
    /// The merged chunk key
    pub target_chunk: String,
    /// Completion time, milliseconds since epoch
    pub timestamp_ms: u64,
    /// Which tier ran
    pub tier: CompactionTier,
}

/// Merges small chunks into larger ones under the namespace lock
pub struct Compactor {
    blob: Arc<dyn BlobStore>,
    config: CompactorConfig,
}

impl Compactor {
    /// Create a compactor over a blob store
    pub fn new(blob: Arc<dyn BlobStore>, config: CompactorConfig) -> Self {
        Compactor { blob, config }
    }

    /// The active configuration
    pub fn config(&self) -> &CompactorConfig {
        &self.config
    }

    /// Run one compaction for a namespace and tier
    ///
    /// Returns `Ok(None)` when the lock is held elsewhere or no selection
    /// qualifies; either way no work was done. On a write error the sources
    /// are left untouched and the error surfaces after the lock is released.
    pub fn compact(
        &self,
        namespace: &Namespace,
        tier: CompactionTier,
    ) -> Result<Option<CompactionEvent>> {
        let ns_path = namespace.storage_path();
        let lock = match CompactionLock::acquire(
            Arc::clone(&self.blob),
            &ns_path,
            self.config.lock_timeout_ms,
        )? {
            Some(lock) => lock,
            None => {
                debug!(namespace = %namespace, %tier, "compaction lock held, yielding");
                return Ok(None);
            }
        };

        let result = self.compact_locked(namespace, &ns_path, tier);
        lock.release();
        result
    }

    fn compact_locked(
        &self,
        namespace: &Namespace,
        ns_path: &str,
        tier: CompactionTier,
    ) -> Result<Option<CompactionEvent>> {
        // Enumerate source chunks and their stats. Undecodable chunks are
        // skipped here; they only become fatal once selected for a merge.
        let prefix = level_prefix(ns_path, tier.source());
        let listing = self.blob.list(&prefix)?;

        let mut candidates = Vec::new();
        let mut bodies: HashMap<String, Vec<u8>> = HashMap::new();
        for meta in listing.into_iter().filter(|m| is_chunk_key(&m.key)) {
            let Some(bytes) = self.retry(|| self.blob.get(&meta.key))? else {
                continue;
            };
            match ChunkStats::from_bytes(&bytes) {
                Ok(stats) => {
                    candidates.push(ChunkInfo {
                        path: meta.key.clone(),
                        size: meta.size,
                        min_timestamp: stats.min_timestamp,
                        max_timestamp: stats.max_timestamp,
                        triple_count: stats.triple_count,
                    });
                    bodies.insert(meta.key, bytes);
                }
                Err(e) => {
                    warn!(chunk = %meta.key, error = %e, "skipping undecodable chunk");
                }
            }
        }

        let selected = select_chunks_for_compaction(
            candidates,
            tier.threshold_bytes(&self.config),
            self.config.min_chunks_to_compact,
        );
        if selected.is_empty() {
            debug!(namespace = %namespace, %tier, "nothing to compact");
            return Ok(None);
        }

        // Decode every selected source. A parse failure here is fatal to
        // the run; the sources stay in place for inspection.
        let mut merged: Vec<CdcEvent> = Vec::new();
        let mut max_source_ts = 0u64;
        for info in &selected {
            let bytes = bodies
                .get(&info.path)
                .ok_or_else(|| BlobStoreError::Fatal(format!("{} vanished mid-run", info.path)))?;
            merged.extend(decode_chunk(bytes)?);
            max_source_ts = max_source_ts.max(info.max_timestamp);
        }
        merged.sort_by_key(CdcEvent::timestamp_ms);

        // Write the target first; only then delete the sources, in one batch.
        let target = chunk_path(ns_path, tier.target(), max_source_ts, 0);
        let encoded = encode_chunk(&merged);
        self.retry(|| self.blob.put(&target, &encoded))?;

        let sources: Vec<String> = selected.iter().map(|c| c.path.clone()).collect();
        if let Err(e) = self.retry(|| self.blob.delete_many(&sources)) {
            // The target is durable; surfacing the error lets the caller
            // re-drive source deletion without losing data.
            warn!(namespace = %namespace, target = %target, error = %e, "source deletion failed");
            return Err(e.into());
        }

        let event = CompactionEvent {
            namespace: namespace.to_string(),
            source_chunks: sources,
            target_chunk: target,
            timestamp_ms: now_millis(),
            tier,
        };
        info!(
            namespace = %namespace,
            %tier,
            sources = event.source_chunks.len(),
            triples = merged.len(),
            target = %event.target_chunk,
            "compaction complete"
        );
        Ok(Some(event))
    }

    /// Retry a blob operation on transient errors with exponential backoff
    fn retry<T, F>(&self, mut op: F) -> std::result::Result<T, BlobStoreError>
    where
        F: FnMut() -> std::result::Result<T, BlobStoreError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    warn!(attempt, error = %e, "transient blob error, backing off");
                    std::thread::sleep(self.config.retry_backoff * 2u32.pow(attempt - 1));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::paths::parse_chunk_timestamp;
    use lattice_core::{CdcOp, Triple, TxId, TypedValue};

    fn namespace() -> Namespace {
        Namespace::parse("https://example.com/crm/").unwrap()
    }

    fn event(ts: u64, n: u64) -> CdcEvent {
        CdcEvent {
            op: CdcOp::Insert,
            triple: Triple {
                subject: format!("https://example.com/crm/acme/{}", n),
                predicate: "name".to_string(),
                object: TypedValue::String(format!("v{}", n)),
                timestamp_ms: ts,
                tx_id: TxId::from_parts(ts, &[n as u8; 10]),
            },
        }
    }

    fn test_config() -> CompactorConfig {
        CompactorConfig {
            retry_backoff: Duration::from_millis(1),
            ..CompactorConfig::default()
        }
    }

    /// Write `count` WAL chunks of 10 events each, one day apart per chunk
    fn seed_wal(blob: &Arc<MemoryBlobStore>, ns: &Namespace, count: u64) -> Vec<String> {
        let mut keys = Vec::new();
        for c in 0..count {
            let base = 1_705_314_645_000 + c * 86_400_000;
            let events: Vec<CdcEvent> = (0..10).map(|i| event(base + i * 1000, c * 10 + i)).collect();
            let key = chunk_path(&ns.storage_path(), Level::L0, base, 0);
            blob.put(&key, &encode_chunk(&events)).unwrap();
            keys.push(key);
        }
        keys
    }

    #[test]
    fn test_happy_path_merges_four_wal_chunks() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ns = namespace();
        let sources = seed_wal(&blob, &ns, 4);

        let compactor = Compactor::new(blob.clone(), test_config());
        let outcome = compactor.compact(&ns, CompactionTier::L0ToL1).unwrap();
        let outcome = outcome.expect("compaction should run");

        // Sources gone, target present
        for source in &sources {
            assert!(blob.head(source).unwrap().is_none(), "{} not deleted", source);
        }
        assert!(blob.head(&outcome.target_chunk).unwrap().is_some());
        assert!(outcome.target_chunk.contains("/_l1/"));
        assert_eq!(outcome.source_chunks, sources);

        // Merged chunk holds all 40 triples in timestamp order
        let merged = decode_chunk(&blob.get(&outcome.target_chunk).unwrap().unwrap()).unwrap();
        assert_eq!(merged.len(), 40);
        let timestamps: Vec<u64> = merged.iter().map(CdcEvent::timestamp_ms).collect();
        let mut sorted = timestamps.clone();
        sorted.sort_unstable();
        assert_eq!(timestamps, sorted);

        // Target path derives from the maximum source timestamp
        let expected_ts = merged.iter().map(CdcEvent::timestamp_ms).max().unwrap();
        assert_eq!(parse_chunk_timestamp(&outcome.target_chunk), Some(expected_ts));

        // Lock released
        assert!(blob
            .get(&crate::paths::lock_path(&ns.storage_path()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_too_few_chunks_yields_nothing() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ns = namespace();
        seed_wal(&blob, &ns, 3);

        let compactor = Compactor::new(blob.clone(), test_config());
        assert!(compactor
            .compact(&ns, CompactionTier::L0ToL1)
            .unwrap()
            .is_none());
        assert_eq!(blob.list(&level_prefix(&ns.storage_path(), Level::L0)).unwrap().len(), 3);
    }

    #[test]
    fn test_held_lock_yields_without_work() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ns = namespace();
        seed_wal(&blob, &ns, 4);

        let held = CompactionLock::acquire(blob.clone(), &ns.storage_path(), 300_000)
            .unwrap()
            .unwrap();
        let compactor = Compactor::new(blob.clone(), test_config());
        assert!(compactor
            .compact(&ns, CompactionTier::L0ToL1)
            .unwrap()
            .is_none());
        held.release();

        // Sources untouched
        assert_eq!(
            blob.list(&level_prefix(&ns.storage_path(), Level::L0)).unwrap().len(),
            4
        );
    }

    #[test]
    fn test_write_failure_preserves_sources() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ns = namespace();
        let sources = seed_wal(&blob, &ns, 4);

        let config = CompactorConfig {
            max_retries: 1,
            ..test_config()
        };
        let compactor = Compactor::new(blob.clone(), config);

        // Fail only the target-level writes: the lock file still lands,
        // then the merged chunk upload dies.
        blob.fail_next_puts_matching("/_l1/", 10);
        let err = compactor.compact(&ns, CompactionTier::L0ToL1).unwrap_err();
        assert!(err.is_transient());
        for source in &sources {
            assert!(blob.head(source).unwrap().is_some(), "{} was deleted", source);
        }
        // Lock released despite the failure
        assert!(blob
            .get(&crate::paths::lock_path(&ns.storage_path()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_corrupt_selected_source_aborts() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ns = namespace();
        let sources = seed_wal(&blob, &ns, 4);

        // Corrupt one source's payload but keep its header readable, so it
        // survives enumeration and fails the merge decode.
        let mut bytes = blob.get(&sources[1]).unwrap().unwrap();
        let n = bytes.len();
        bytes[n - 10] ^= 0xFF;
        blob.put(&sources[1], &bytes).unwrap();

        let compactor = Compactor::new(blob.clone(), test_config());
        let err = compactor.compact(&ns, CompactionTier::L0ToL1).unwrap_err();
        assert!(err.is_decode());

        // All sources remain, lock released
        for source in &sources {
            assert!(blob.head(source).unwrap().is_some());
        }
        assert!(blob
            .get(&crate::paths::lock_path(&ns.storage_path()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_fully_undecodable_chunk_is_skipped_in_enumeration() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ns = namespace();
        seed_wal(&blob, &ns, 4);

        // A garbage .gcol file alongside the real sources
        let junk = format!("{}/_wal/2024-01-20/999.gcol", ns.storage_path());
        blob.put(&junk, b"not a chunk").unwrap();

        let compactor = Compactor::new(blob.clone(), test_config());
        let outcome = compactor
            .compact(&ns, CompactionTier::L0ToL1)
            .unwrap()
            .expect("real chunks still compact");
        assert_eq!(outcome.source_chunks.len(), 4);
        assert!(blob.head(&junk).unwrap().is_some(), "junk must not be deleted");
    }

    #[test]
    fn test_l1_to_l2_tier() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ns = namespace();

        for c in 0..4u64 {
            let base = 1_705_314_645_000 + c * 3_600_000;
            let events: Vec<CdcEvent> = (0..5).map(|i| event(base + i, c * 5 + i)).collect();
            let key = chunk_path(&ns.storage_path(), Level::L1, base, 0);
            blob.put(&key, &encode_chunk(&events)).unwrap();
        }

        let compactor = Compactor::new(blob.clone(), test_config());
        let outcome = compactor
            .compact(&ns, CompactionTier::L1ToL2)
            .unwrap()
            .unwrap();
        assert!(outcome.target_chunk.contains("/_l2/"));
        assert_eq!(outcome.tier, CompactionTier::L1ToL2);
        assert!(blob.list(&level_prefix(&ns.storage_path(), Level::L1)).unwrap().is_empty());
    }

    #[test]
    fn test_ignores_non_chunk_keys() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ns = namespace();
        seed_wal(&blob, &ns, 4);
        let stray = format!("{}/_wal/2024-01-15/notes.txt", ns.storage_path());
        blob.put(&stray, b"hello").unwrap();

        let compactor = Compactor::new(blob.clone(), test_config());
        compactor.compact(&ns, CompactionTier::L0ToL1).unwrap().unwrap();
        assert!(blob.head(&stray).unwrap().is_some());
    }
}
