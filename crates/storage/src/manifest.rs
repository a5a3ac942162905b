//! Per-namespace chunk manifest
//!
//! The manifest is a small JSON document listing the namespace's live chunk
//! keys plus a version counter. The version strictly increases on every
//! mutation that changes the live set, which is what lets a short-TTL cache
//! serve it with stale-while-revalidate semantics: a reader that sees an
//! older version only ever sees a consistent earlier state.

use crate::blob::BlobStore;
use crate::error::{Result, StorageError};
use crate::paths::manifest_path;
use lattice_core::{now_millis, Namespace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The live chunk set of one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceManifest {
    /// Strictly increasing on every live-set mutation
    pub version: u64,
    /// Keys of the currently live chunks
    pub chunks: Vec<String>,
    /// Last mutation time, milliseconds since epoch
    pub updated_at_ms: u64,
}

impl NamespaceManifest {
    /// An empty manifest at version 0
    pub fn empty() -> Self {
        NamespaceManifest {
            version: 0,
            chunks: Vec::new(),
            updated_at_ms: 0,
        }
    }
}

/// Loads and commits manifests against the blob store
pub struct ManifestStore {
    blob: Arc<dyn BlobStore>,
}

impl ManifestStore {
    /// Create a manifest store over a blob store
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        ManifestStore { blob }
    }

    /// Load a namespace's manifest, or an empty one if none exists
    pub fn load(&self, namespace: &Namespace) -> Result<NamespaceManifest> {
        let key = manifest_path(&namespace.storage_path());
        match self.blob.get(&key)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::Serialization(format!("manifest {}: {}", key, e))
            }),
            None => Ok(NamespaceManifest::empty()),
        }
    }

    /// Apply a mutation to the live chunk set and persist the result
    ///
    /// The mutation receives the current chunk list. If it reports a change,
    /// the version advances by exactly one and the document is written back;
    /// otherwise nothing is persisted. Returns the resulting manifest.
    pub fn commit<F>(&self, namespace: &Namespace, mutate: F) -> Result<NamespaceManifest>
    where
        F: FnOnce(&mut Vec<String>) -> bool,
    {
        let mut manifest = self.load(namespace)?;
        if !mutate(&mut manifest.chunks) {
            return Ok(manifest);
        }

        manifest.version += 1;
        manifest.updated_at_ms = now_millis();

        let key = manifest_path(&namespace.storage_path());
        let body = serde_json::to_vec(&manifest)
            .map_err(|e| StorageError::Serialization(format!("manifest encode: {}", e)))?;
        self.blob.put(&key, &body)?;
        debug!(
            namespace = %namespace,
            version = manifest.version,
            chunks = manifest.chunks.len(),
            "manifest committed"
        );
        Ok(manifest)
    }

    /// Record freshly written chunks as live
    pub fn add_chunks(&self, namespace: &Namespace, added: &[String]) -> Result<NamespaceManifest> {
        self.commit(namespace, |chunks| {
            let mut changed = false;
            for key in added {
                if !chunks.contains(key) {
                    chunks.push(key.clone());
                    changed = true;
                }
            }
            changed
        })
    }

    /// Substitute compacted sources with their target in one version bump
    pub fn replace_chunks(
        &self,
        namespace: &Namespace,
        removed: &[String],
        added: &str,
    ) -> Result<NamespaceManifest> {
        self.commit(namespace, |chunks| {
            chunks.retain(|c| !removed.contains(c));
            if !chunks.contains(&added.to_string()) {
                chunks.push(added.to_string());
            }
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    fn store() -> (ManifestStore, Namespace) {
        (
            ManifestStore::new(Arc::new(MemoryBlobStore::new())),
            Namespace::parse("https://example.com/crm/").unwrap(),
        )
    }

    #[test]
    fn test_load_missing_is_empty() {
        let (store, ns) = store();
        let manifest = store.load(&ns).unwrap();
        assert_eq!(manifest, NamespaceManifest::empty());
    }

    #[test]
    fn test_version_strictly_increases() {
        let (store, ns) = store();

        let v1 = store.add_chunks(&ns, &["a.gcol".to_string()]).unwrap();
        assert_eq!(v1.version, 1);

        let v2 = store.add_chunks(&ns, &["b.gcol".to_string()]).unwrap();
        assert_eq!(v2.version, 2);

        let v3 = store
            .replace_chunks(&ns, &["a.gcol".to_string(), "b.gcol".to_string()], "c.gcol")
            .unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.chunks, vec!["c.gcol"]);
    }

    #[test]
    fn test_noop_mutation_does_not_bump_version() {
        let (store, ns) = store();
        store.add_chunks(&ns, &["a.gcol".to_string()]).unwrap();

        // Adding an already-live chunk changes nothing
        let same = store.add_chunks(&ns, &["a.gcol".to_string()]).unwrap();
        assert_eq!(same.version, 1);
        assert_eq!(store.load(&ns).unwrap().version, 1);
    }

    #[test]
    fn test_persisted_round_trip() {
        let (store, ns) = store();
        store
            .add_chunks(&ns, &["x.gcol".to_string(), "y.gcol".to_string()])
            .unwrap();

        let loaded = store.load(&ns).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.chunks, vec!["x.gcol", "y.gcol"]);
        assert!(loaded.updated_at_ms > 0);
    }
}
