//! Point-in-time restore from CDC chunks
//!
//! Every L0 chunk the writer uploads is also a backup record: the WAL
//! directory of a namespace, grouped by date, is its backup catalog. The
//! restore engine enumerates those snapshots and replays their events to a
//! caller-supplied handler in the order they were written, optionally
//! stopping at a target timestamp.
//!
//! Restores are resumable: progress callbacks carry an opaque token
//! (`base64url` of `{"f": file, "e": event}`) that a later call can pass to
//! skip everything already applied. Per-file read or decode failures are
//! logged and skipped; the restore keeps going.

use crate::blob::BlobStore;
use crate::chunk::{decode_chunk, ChunkStats};
use crate::error::{Result, StorageError};
use crate::paths::{chunk_date, format_date_path, is_chunk_key, level_prefix, Level};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use lattice_core::{CdcEvent, CdcOp, Namespace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One day's worth of CDC files for a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    /// UTC date, `YYYY-MM-DD`
    pub date: String,
    /// Chunk keys in chronological order
    pub files: Vec<String>,
}

/// Filters for [`RestoreEngine::list_backups`]
#[derive(Debug, Clone, Default)]
pub struct ListBackupsOptions {
    /// Earliest date to include, inclusive (`YYYY-MM-DD`)
    pub start_date: Option<String>,
    /// Latest date to include, inclusive (`YYYY-MM-DD`)
    pub end_date: Option<String>,
    /// Maximum number of snapshots to return (oldest first)
    pub limit: Option<usize>,
}

/// Aggregate description of one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetadata {
    /// Snapshot date
    pub date: String,
    /// Number of CDC files
    pub file_count: usize,
    /// Total encoded size
    pub total_size_bytes: u64,
    /// Smallest event timestamp (from the first file)
    pub min_timestamp: u64,
    /// Largest event timestamp (from the last file)
    pub max_timestamp: u64,
}

/// Options for [`RestoreEngine::restore_from_backup`]
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Replay only events with `timestamp <= target_timestamp`
    pub target_timestamp: Option<u64>,
    /// Events per handler invocation
    pub batch_size: usize,
    /// Whether delete events are replayed
    pub include_deletes: bool,
    /// Count and report without invoking the handler
    pub dry_run: bool,
    /// Opaque token from a previous run's progress
    pub resume_token: Option<String>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        RestoreOptions {
            target_timestamp: None,
            batch_size: 1000,
            include_deletes: true,
            dry_run: false,
            resume_token: None,
        }
    }
}

/// Progress report emitted after each file
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreProgress {
    /// Files consumed so far (including unreadable ones)
    pub files_processed: u64,
    /// Total files in the restore
    pub total_files: u64,
    /// Events delivered (or counted, under dry-run)
    pub events_replayed: u64,
    /// Events filtered out
    pub events_skipped: u64,
    /// Completion percentage, 100 on the terminal report
    pub percent_complete: f64,
    /// Largest applied event timestamp
    pub latest_timestamp: Option<u64>,
    /// Token to resume after this point; `None` on the terminal report
    pub resume_token: Option<String>,
}

/// Final accounting of a restore run
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreResult {
    /// Whether the run reached the end of the stream
    pub success: bool,
    /// Events delivered (or counted, under dry-run)
    pub events_replayed: u64,
    /// Events filtered out
    pub events_skipped: u64,
    /// Files consumed
    pub files_processed: u64,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Largest applied event timestamp
    pub latest_timestamp: Option<u64>,
    /// Always `None`: a completed restore has nothing to resume
    pub resume_token: Option<String>,
}

/// Position within the CDC stream: file index plus event offset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ResumePoint {
    /// File index
    f: usize,
    /// Event offset within that file
    e: usize,
}

impl ResumePoint {
    fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| StorageError::Serialization(format!("resume token: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Serialization(format!("resume token: {}", e)))
    }
}

/// Streams CDC events back out of the blob store
pub struct RestoreEngine {
    blob: Arc<dyn BlobStore>,
}

impl RestoreEngine {
    /// Create a restore engine over a blob store
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        RestoreEngine { blob }
    }

    /// Enumerate a namespace's snapshots, oldest first
    pub fn list_backups(
        &self,
        namespace: &Namespace,
        options: &ListBackupsOptions,
    ) -> Result<Vec<BackupSnapshot>> {
        let prefix = level_prefix(&namespace.storage_path(), Level::L0);
        let mut by_date: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for meta in self.blob.list(&prefix)? {
            if !is_chunk_key(&meta.key) {
                continue;
            }
            let Some(date) = chunk_date(&meta.key) else {
                continue;
            };
            if let Some(start) = &options.start_date {
                if date < start.as_str() {
                    continue;
                }
            }
            if let Some(end) = &options.end_date {
                if date > end.as_str() {
                    continue;
                }
            }
            by_date.entry(date.to_string()).or_default().push(meta.key);
        }

        let mut snapshots: Vec<BackupSnapshot> = by_date
            .into_iter()
            .map(|(date, files)| BackupSnapshot { date, files })
            .collect();
        if let Some(limit) = options.limit {
            snapshots.truncate(limit);
        }
        Ok(snapshots)
    }

    /// Compute the size and timestamp bounds of a snapshot
    ///
    /// Reads only the first and last files' headers; sizes come from `head`.
    pub fn backup_metadata(&self, snapshot: &BackupSnapshot) -> Result<BackupMetadata> {
        let mut total_size = 0u64;
        for file in &snapshot.files {
            if let Some(meta) = self.blob.head(file)? {
                total_size += meta.size;
            }
        }

        let bounds = |key: &str| -> Result<Option<ChunkStats>> {
            match self.blob.get(key)? {
                Some(bytes) => Ok(ChunkStats::from_bytes(&bytes).ok()),
                None => Ok(None),
            }
        };
        let first = snapshot.files.first().map(|f| bounds(f)).transpose()?.flatten();
        let last = snapshot.files.last().map(|f| bounds(f)).transpose()?.flatten();

        Ok(BackupMetadata {
            date: snapshot.date.clone(),
            file_count: snapshot.files.len(),
            total_size_bytes: total_size,
            min_timestamp: first.map(|s| s.min_timestamp).unwrap_or(0),
            max_timestamp: last.map(|s| s.max_timestamp).unwrap_or(0),
        })
    }

    /// The latest snapshot whose date is at or before `timestamp_ms`
    pub fn find_backup_before(
        &self,
        namespace: &Namespace,
        timestamp_ms: u64,
    ) -> Result<Option<BackupSnapshot>> {
        let cutoff = format_date_path(timestamp_ms);
        let snapshots = self.list_backups(namespace, &ListBackupsOptions::default())?;
        Ok(snapshots.into_iter().rev().find(|s| s.date <= cutoff))
    }

    /// Replay a namespace's CDC stream into `handler`
    ///
    /// Events are delivered in file order with files in chronological
    /// order, batched to `batch_size`. See [`RestoreOptions`] for the
    /// point-in-time and delete filters. `on_progress` fires after every
    /// file and once more with the terminal 100% report.
    pub fn restore_from_backup<H, P>(
        &self,
        namespace: &Namespace,
        mut handler: H,
        options: &RestoreOptions,
        mut on_progress: Option<P>,
    ) -> Result<RestoreResult>
    where
        H: FnMut(&[CdcEvent]) -> Result<()>,
        P: FnMut(&RestoreProgress),
    {
        let started = Instant::now();
        let prefix = level_prefix(&namespace.storage_path(), Level::L0);
        let files: Vec<String> = self
            .blob
            .list(&prefix)?
            .into_iter()
            .map(|m| m.key)
            .filter(|k| is_chunk_key(k))
            .collect();

        let resume = match &options.resume_token {
            Some(token) => ResumePoint::decode(token)?,
            None => ResumePoint::default(),
        };

        let total_files = files.len() as u64;
        let mut events_replayed = 0u64;
        let mut events_skipped = 0u64;
        let mut files_processed = 0u64;
        let mut latest_timestamp: Option<u64> = None;
        let mut batch: Vec<CdcEvent> = Vec::with_capacity(options.batch_size.max(1));

        let mut deliver = |batch: &mut Vec<CdcEvent>,
                           replayed: &mut u64,
                           latest: &mut Option<u64>|
         -> Result<()> {
            if batch.is_empty() {
                return Ok(());
            }
            if !options.dry_run {
                handler(batch)?;
            }
            *replayed += batch.len() as u64;
            let max_ts = batch.iter().map(CdcEvent::timestamp_ms).max();
            *latest = (*latest).max(max_ts);
            batch.clear();
            Ok(())
        };

        for (index, file) in files.iter().enumerate().skip(resume.f) {
            let skip_events = if index == resume.f { resume.e } else { 0 };

            match self.blob.get(file) {
                Ok(Some(bytes)) => match decode_chunk(&bytes) {
                    Ok(events) => {
                        for event in events.into_iter().skip(skip_events) {
                            if let Some(target) = options.target_timestamp {
                                if event.timestamp_ms() > target {
                                    events_skipped += 1;
                                    continue;
                                }
                            }
                            if !options.include_deletes && event.op == CdcOp::Delete {
                                events_skipped += 1;
                                continue;
                            }
                            batch.push(event);
                            if batch.len() >= options.batch_size.max(1) {
                                deliver(&mut batch, &mut events_replayed, &mut latest_timestamp)?;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(file = %file, error = %e, "skipping undecodable CDC file");
                    }
                },
                Ok(None) => {
                    warn!(file = %file, "CDC file vanished during restore");
                }
                Err(e) => {
                    warn!(file = %file, error = %e, "failed to read CDC file, continuing");
                }
            }
            files_processed += 1;

            if let Some(progress) = on_progress.as_mut() {
                progress(&RestoreProgress {
                    files_processed,
                    total_files,
                    events_replayed,
                    events_skipped,
                    percent_complete: if total_files == 0 {
                        100.0
                    } else {
                        (index + 1) as f64 / total_files as f64 * 100.0
                    },
                    latest_timestamp,
                    resume_token: Some(ResumePoint { f: index + 1, e: 0 }.encode()),
                });
            }
        }

        deliver(&mut batch, &mut events_replayed, &mut latest_timestamp)?;

        if let Some(progress) = on_progress.as_mut() {
            progress(&RestoreProgress {
                files_processed,
                total_files,
                events_replayed,
                events_skipped,
                percent_complete: 100.0,
                latest_timestamp,
                resume_token: None,
            });
        }

        let result = RestoreResult {
            success: true,
            events_replayed,
            events_skipped,
            files_processed,
            duration_ms: started.elapsed().as_millis() as u64,
            latest_timestamp,
            resume_token: None,
        };
        info!(
            namespace = %namespace,
            events = result.events_replayed,
            skipped = result.events_skipped,
            files = result.files_processed,
            "restore complete"
        );
        Ok(result)
    }
}
