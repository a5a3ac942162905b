//! Blob-store capability
//!
//! The engine never talks to a concrete object store; it consumes this
//! capability. Production deployments back it with an object-store client;
//! tests use [`MemoryBlobStore`].
//!
//! All methods are blocking suspension points from the engine's point of
//! view. Implementations classify failures as transient (retryable) or
//! fatal via [`BlobStoreError`].

use crate::error::BlobStoreError;
use lattice_core::now_millis;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Metadata for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Content hash
    pub etag: String,
    /// Insertion time, milliseconds since epoch
    pub uploaded_ms: u64,
}

/// Result alias for blob operations
pub type BlobResult<T> = std::result::Result<T, BlobStoreError>;

/// The blob-store capability consumed by the engine
pub trait BlobStore: Send + Sync {
    /// Store an object, overwriting any existing object at `key`
    fn put(&self, key: &str, bytes: &[u8]) -> BlobResult<ObjectMeta>;

    /// Fetch an object's bytes, or `None` if absent
    fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>>;

    /// Fetch an object's metadata without its body, or `None` if absent
    fn head(&self, key: &str) -> BlobResult<Option<ObjectMeta>>;

    /// Delete an object; deleting an absent key is not an error
    fn delete(&self, key: &str) -> BlobResult<()>;

    /// Delete a batch of objects in one call
    fn delete_many(&self, keys: &[String]) -> BlobResult<()>;

    /// List objects under a key prefix, sorted lexically by key
    fn list(&self, prefix: &str) -> BlobResult<Vec<ObjectMeta>>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    etag: String,
    uploaded_ms: u64,
}

/// In-memory blob store for tests
///
/// Keys are held in a sorted map so `list` naturally returns lexical order,
/// matching object-store semantics. Supports injecting transient `put`
/// failures to exercise retry paths.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    put_failures: AtomicU32,
    put_failure_filter: RwLock<Option<String>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `put` calls fail with a transient error
    pub fn fail_next_puts(&self, n: u32) {
        *self.put_failure_filter.write() = None;
        self.put_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` `put` calls whose key contains `pattern` fail
    pub fn fail_next_puts_matching(&self, pattern: &str, n: u32) {
        *self.put_failure_filter.write() = Some(pattern.to_string());
        self.put_failures.store(n, Ordering::SeqCst);
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn meta(key: &str, obj: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: obj.bytes.len() as u64,
            etag: obj.etag.clone(),
            uploaded_ms: obj.uploaded_ms,
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> BlobResult<ObjectMeta> {
        let applies = self
            .put_failure_filter
            .read()
            .as_ref()
            .map(|pattern| key.contains(pattern))
            .unwrap_or(true);
        if applies {
            let remaining = self.put_failures.load(Ordering::SeqCst);
            if remaining > 0
                && self
                    .put_failures
                    .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Err(BlobStoreError::Transient("injected put failure".into()));
            }
        }

        let obj = StoredObject {
            bytes: bytes.to_vec(),
            etag: format!("{:08x}", crc32fast::hash(bytes)),
            uploaded_ms: now_millis(),
        };
        let meta = Self::meta(key, &obj);
        self.objects.write().insert(key.to_string(), obj);
        Ok(meta)
    }

    fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>> {
        Ok(self.objects.read().get(key).map(|o| o.bytes.clone()))
    }

    fn head(&self, key: &str) -> BlobResult<Option<ObjectMeta>> {
        Ok(self.objects.read().get(key).map(|o| Self::meta(key, o)))
    }

    fn delete(&self, key: &str) -> BlobResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> BlobResult<()> {
        let mut objects = self.objects.write();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> BlobResult<Vec<ObjectMeta>> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| Self::meta(k, o))
            .collect())
    }
}
