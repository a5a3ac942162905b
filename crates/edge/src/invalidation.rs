//! Cache invalidation
//!
//! Chunks are immutable, so the only invalidation the plane ever needs is
//! removal: after a compaction substitutes sources for a target, the source
//! entries and the namespace manifest must leave the edge. The invalidator
//! drives those deletes, in parallel batches for bulk work, and keeps going
//! on partial failure; a missed delete only costs an entry its natural TTL.

use crate::plane::CachePlane;
use lattice_core::Namespace;
use lattice_storage::{CompactionEvent, NamespaceManifest};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Invalidator configuration
#[derive(Debug, Clone)]
pub struct InvalidatorConfig {
    /// Extra delete attempts per key after the first
    pub retry_attempts: u32,
    /// Keys deleted concurrently per batch
    pub batch_size: usize,
}

impl Default for InvalidatorConfig {
    fn default() -> Self {
        InvalidatorConfig {
            retry_attempts: 0,
            batch_size: 50,
        }
    }
}

/// Options for [`CacheInvalidator::invalidate_namespace`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceInvalidationOptions {
    /// Also invalidate every chunk the cached manifest lists
    pub include_chunks: bool,
    /// Leave the manifest entry in place
    pub skip_manifest: bool,
}

/// Outcome of a bulk invalidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Whether every requested key was invalidated
    pub success: bool,
    /// Keys confirmed removed
    pub invalidated_count: usize,
    /// The removed keys
    pub invalidated_keys: Vec<String>,
    /// Failure descriptions for keys that could not be removed
    pub errors: Vec<String>,
}

impl InvalidationReport {
    fn empty() -> Self {
        InvalidationReport {
            success: true,
            invalidated_count: 0,
            invalidated_keys: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Drives cache removal for chunks, manifests, and compaction events
pub struct CacheInvalidator {
    plane: Arc<CachePlane>,
    config: InvalidatorConfig,
}

impl CacheInvalidator {
    /// Create an invalidator over a cache plane
    pub fn new(plane: Arc<CachePlane>, config: InvalidatorConfig) -> Self {
        CacheInvalidator { plane, config }
    }

    /// Invalidate a single chunk entry
    ///
    /// Retries up to the configured budget; returns whether an entry was
    /// removed.
    pub fn invalidate_chunk(&self, namespace: &Namespace, chunk_id: &str) -> bool {
        let mut attempts = 0;
        loop {
            if self.plane.delete_chunk(namespace, chunk_id) {
                if let Some(metrics) = self.plane.metrics() {
                    metrics.record_invalidations(Some(namespace.as_str()), 1);
                }
                return true;
            }
            if attempts >= self.config.retry_attempts {
                return false;
            }
            attempts += 1;
        }
    }

    /// Invalidate many chunk entries in parallel batches
    ///
    /// Continues past individual failures; the report lists what succeeded
    /// and what did not.
    pub fn invalidate_chunks(&self, namespace: &Namespace, chunk_ids: &[String]) -> InvalidationReport {
        let removed: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let failed: Mutex<Vec<String>> = Mutex::new(Vec::new());

        for batch in chunk_ids.chunks(self.config.batch_size.max(1)) {
            let removed = &removed;
            let failed = &failed;
            std::thread::scope(|scope| {
                for chunk_id in batch {
                    scope.spawn(move || {
                        if self.invalidate_chunk(namespace, chunk_id) {
                            removed.lock().push(chunk_id.clone());
                        } else {
                            failed.lock().push(format!("{}: not invalidated", chunk_id));
                        }
                    });
                }
            });
        }

        let mut invalidated_keys = removed.into_inner();
        invalidated_keys.sort();
        let errors = failed.into_inner();
        debug!(
            namespace = %namespace,
            removed = invalidated_keys.len(),
            failed = errors.len(),
            "bulk chunk invalidation"
        );
        InvalidationReport {
            success: errors.is_empty(),
            invalidated_count: invalidated_keys.len(),
            invalidated_keys,
            errors,
        }
    }

    /// Invalidate a namespace's cached state
    ///
    /// Deletes the manifest entry (unless skipped) and, when requested,
    /// every chunk the cached manifest enumerates.
    pub fn invalidate_namespace(
        &self,
        namespace: &Namespace,
        options: NamespaceInvalidationOptions,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::empty();

        if options.include_chunks {
            let chunk_ids: Vec<String> = self
                .plane
                .get_manifest(namespace, None)
                .and_then(|body| serde_json::from_slice::<NamespaceManifest>(&body).ok())
                .map(|manifest| {
                    manifest
                        .chunks
                        .iter()
                        .filter_map(|key| CachePlane::chunk_id_for_key(namespace, key))
                        .collect()
                })
                .unwrap_or_default();
            report = self.invalidate_chunks(namespace, &chunk_ids);
        }

        if !options.skip_manifest && self.plane.delete_manifest(namespace) {
            report.invalidated_count += 1;
            report
                .invalidated_keys
                .push("manifest.json".to_string());
            if let Some(metrics) = self.plane.metrics() {
                metrics.record_invalidations(Some(namespace.as_str()), 1);
            }
        }

        report
    }

    /// React to a compaction: drop the merged sources, then the manifest
    pub fn on_compaction(&self, event: &CompactionEvent) -> InvalidationReport {
        let namespace = match Namespace::parse(&event.namespace) {
            Ok(ns) => ns,
            Err(e) => {
                warn!(namespace = %event.namespace, error = %e, "unparseable compaction namespace");
                return InvalidationReport {
                    success: false,
                    invalidated_count: 0,
                    invalidated_keys: Vec::new(),
                    errors: vec![format!("bad namespace: {}", e)],
                };
            }
        };

        let chunk_ids: Vec<String> = event
            .source_chunks
            .iter()
            .filter_map(|key| CachePlane::chunk_id_for_key(&namespace, key))
            .collect();
        let mut report = self.invalidate_chunks(&namespace, &chunk_ids);

        if self.plane.delete_manifest(&namespace) {
            report.invalidated_count += 1;
            report.invalidated_keys.push("manifest.json".to_string());
        }
        if let Some(metrics) = self.plane.metrics() {
            metrics.record_compaction();
        }
        info!(
            namespace = %event.namespace,
            tier = %event.tier,
            sources = event.source_chunks.len(),
            "compaction invalidation applied"
        );
        report
    }
}
