//! Per-namespace compaction lock, externalized to the blob store
//!
//! The lock is a small JSON object at `{nsPath}/_compaction.lock`. A lock is
//! fresh while `now - locked_at < timeout`; stale and malformed locks may be
//! displaced. This gives at-most-one compaction per namespace among
//! well-behaved participants without any coordination service.

use crate::blob::BlobStore;
use crate::error::Result;
use crate::paths::lock_path;
use lattice_core::now_millis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Persisted lock record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Acquisition time, milliseconds since epoch
    pub locked_at: u64,
    /// Opaque owner identity
    pub owner: String,
}

/// A held compaction lock
///
/// Released explicitly via [`CompactionLock::release`] or on drop. Release
/// is best-effort: failures are logged, never raised, so an errored
/// compaction still unwinds cleanly and a dangling lock simply ages out.
pub struct CompactionLock {
    blob: Arc<dyn BlobStore>,
    key: String,
    owner: String,
    released: bool,
}

impl CompactionLock {
    /// Try to acquire the lock for a namespace
    ///
    /// Returns `None` when another owner holds a fresh lock. Stale, missing,
    /// or malformed lock files are overwritten.
    pub fn acquire(
        blob: Arc<dyn BlobStore>,
        ns_path: &str,
        timeout_ms: u64,
    ) -> Result<Option<Self>> {
        let key = lock_path(ns_path);

        if let Some(bytes) = blob.get(&key)? {
            match serde_json::from_slice::<LockRecord>(&bytes) {
                Ok(record) => {
                    let age = now_millis().saturating_sub(record.locked_at);
                    if age < timeout_ms {
                        debug!(key = %key, owner = %record.owner, age_ms = age, "lock held");
                        return Ok(None);
                    }
                    warn!(key = %key, owner = %record.owner, age_ms = age, "displacing stale lock");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "displacing malformed lock");
                }
            }
        }

        let owner = uuid::Uuid::new_v4().to_string();
        let record = LockRecord {
            locked_at: now_millis(),
            owner: owner.clone(),
        };
        let body = serde_json::to_vec(&record).unwrap_or_default();
        blob.put(&key, &body)?;

        // Read back and confirm ownership: two racing writers both reach
        // the put, but only the one whose record survived proceeds.
        match blob.get(&key)? {
            Some(bytes) => match serde_json::from_slice::<LockRecord>(&bytes) {
                Ok(record) if record.owner == owner => {}
                _ => {
                    debug!(key = %key, "lost lock race");
                    return Ok(None);
                }
            },
            None => return Ok(None),
        }

        Ok(Some(CompactionLock {
            blob,
            key,
            owner,
            released: false,
        }))
    }

    /// The owner identity written into the lock file
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release the lock (best effort)
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.blob.delete(&self.key) {
            warn!(key = %self.key, error = %e, "failed to release compaction lock");
        }
    }
}

impl Drop for CompactionLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    const NS: &str = ".com/.example/crm";

    #[test]
    fn test_acquire_and_release() {
        let blob = Arc::new(MemoryBlobStore::new());
        let lock = CompactionLock::acquire(blob.clone(), NS, 300_000)
            .unwrap()
            .unwrap();
        assert!(blob.get(&lock_path(NS)).unwrap().is_some());

        lock.release();
        assert!(blob.get(&lock_path(NS)).unwrap().is_none());
    }

    #[test]
    fn test_fresh_lock_blocks_acquisition() {
        let blob = Arc::new(MemoryBlobStore::new());
        let _held = CompactionLock::acquire(blob.clone(), NS, 300_000)
            .unwrap()
            .unwrap();

        let second = CompactionLock::acquire(blob.clone(), NS, 300_000).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_stale_lock_is_displaced() {
        let blob = Arc::new(MemoryBlobStore::new());
        let stale = LockRecord {
            locked_at: now_millis() - 600_000,
            owner: "elsewhere".into(),
        };
        blob.put(&lock_path(NS), &serde_json::to_vec(&stale).unwrap())
            .unwrap();

        let lock = CompactionLock::acquire(blob.clone(), NS, 300_000)
            .unwrap()
            .unwrap();
        assert_ne!(lock.owner(), "elsewhere");
    }

    #[test]
    fn test_malformed_lock_is_displaced() {
        let blob = Arc::new(MemoryBlobStore::new());
        blob.put(&lock_path(NS), b"not json").unwrap();

        let lock = CompactionLock::acquire(blob.clone(), NS, 300_000).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn test_drop_releases() {
        let blob = Arc::new(MemoryBlobStore::new());
        {
            let _lock = CompactionLock::acquire(blob.clone(), NS, 300_000)
                .unwrap()
                .unwrap();
        }
        assert!(blob.get(&lock_path(NS)).unwrap().is_none());
    }
}
