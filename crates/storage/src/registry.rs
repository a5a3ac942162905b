//! Per-namespace writer registry
//!
//! CDC events arrive addressed by entity URL; each namespace gets exactly
//! one writer. The registry derives the namespace from an event's subject,
//! creates writers on first use, and shuts them all down together.
//!
//! Writers are shared (`Arc`), so callers may hold one across calls while
//! the registry keeps ownership of the lifecycle.

use crate::blob::BlobStore;
use crate::error::Result;
use crate::writer::{CdcWriter, CdcWriterConfig, WriterStats};
use lattice_core::{CdcEvent, EntityUrl, Namespace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Creates and owns one CDC writer per namespace
pub struct WriterRegistry {
    blob: Arc<dyn BlobStore>,
    config: CdcWriterConfig,
    writers: Mutex<HashMap<Namespace, Arc<CdcWriter>>>,
}

impl WriterRegistry {
    /// Create a registry whose writers share one configuration
    pub fn new(blob: Arc<dyn BlobStore>, config: CdcWriterConfig) -> Self {
        WriterRegistry {
            blob,
            config,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// The writer for a namespace, created on first use
    pub fn writer(&self, namespace: &Namespace) -> Arc<CdcWriter> {
        let mut writers = self.writers.lock();
        if let Some(writer) = writers.get(namespace) {
            return Arc::clone(writer);
        }
        info!(namespace = %namespace, "creating CDC writer");
        let writer = Arc::new(CdcWriter::new(
            namespace.clone(),
            Arc::clone(&self.blob),
            self.config.clone(),
        ));
        writers.insert(namespace.clone(), Arc::clone(&writer));
        writer
    }

    /// Route an event to the writer of its subject's namespace
    ///
    /// The namespace is derived from the triple subject; an invalid subject
    /// is a validation error, not a routing decision.
    pub fn ingest(&self, event: CdcEvent) -> Result<()> {
        let namespace = EntityUrl::parse(&event.triple.subject)?.namespace();
        self.writer(&namespace).write(event)
    }

    /// Namespaces with an active writer
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.writers.lock().keys().cloned().collect()
    }

    /// Flush every writer, surfacing the first terminal failure
    ///
    /// All writers are flushed even when one fails; the first error is
    /// returned after the sweep. Returns the total events persisted.
    pub fn flush_all(&self) -> Result<usize> {
        let writers: Vec<Arc<CdcWriter>> = {
            let map = self.writers.lock();
            map.values().cloned().collect()
        };
        let mut total = 0;
        let mut first_error = None;
        for writer in writers {
            match writer.flush() {
                Ok(count) => total += count,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Aggregate stats across all writers, keyed by namespace
    pub fn stats(&self) -> HashMap<Namespace, WriterStats> {
        self.writers
            .lock()
            .iter()
            .map(|(ns, writer)| (ns.clone(), writer.stats()))
            .collect()
    }

    /// Release every writer
    ///
    /// Each writer's flush timer stops when its last handle drops; like
    /// [`CdcWriter::close`], nothing is flushed implicitly, so call
    /// [`WriterRegistry::flush_all`] first when the tail matters.
    pub fn close(&self) {
        self.writers.lock().clear();
    }
}
