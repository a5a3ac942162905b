//! Chunk path scheme
//!
//! Chunks live under a namespace's storage path in per-level directories:
//!
//! ```text
//! {nsPath}/_wal/{YYYY-MM-DD}/{HHMMSS-mmm}.gcol      (L0, freshly written)
//! {nsPath}/_l1/{YYYY-MM-DD}/{HHMMSS-mmm}.gcol       (first merge level)
//! {nsPath}/_l2/{YYYY-MM-DD}/{HHMMSS-mmm}.gcol       (largest merge level)
//! ```
//!
//! Dates and times are UTC. Within one namespace and level, lexical key
//! order equals chronological order, so prefix listings come back in time
//! order for free.
//!
//! Writers disambiguate two flushes inside the same millisecond with a
//! numeric suffix (`HHMMSS-mmm-NNN.gcol`). The parser accepts that form,
//! the plain form, and legacy `NNN.gcol` sequence names.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Chunk file extension
pub const CHUNK_EXT: &str = ".gcol";

/// Compaction lock file name within a namespace
pub const LOCK_FILE: &str = "_compaction.lock";

/// Manifest file name within a namespace
pub const MANIFEST_FILE: &str = "manifest.json";

/// Compaction levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Level {
    /// Write-ahead level, written directly by CDC writers
    L0,
    /// First merge level
    L1,
    /// Largest merge level
    L2,
}

impl Level {
    /// Directory name for this level
    pub fn dir(self) -> &'static str {
        match self {
            Level::L0 => "_wal",
            Level::L1 => "_l1",
            Level::L2 => "_l2",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Level::L0 => "L0",
            Level::L1 => "L1",
            Level::L2 => "L2",
        };
        write!(f, "{}", name)
    }
}

/// The `{nsPath}/{level_dir}/` listing prefix for a level
pub fn level_prefix(ns_path: &str, level: Level) -> String {
    format!("{}/{}/", ns_path, level.dir())
}

/// The `{nsPath}/_compaction.lock` key
pub fn lock_path(ns_path: &str) -> String {
    format!("{}/{}", ns_path, LOCK_FILE)
}

/// The `{nsPath}/manifest.json` key
pub fn manifest_path(ns_path: &str) -> String {
    format!("{}/{}", ns_path, MANIFEST_FILE)
}

/// Format the UTC date directory component for a timestamp
pub fn format_date_path(timestamp_ms: u64) -> String {
    utc(timestamp_ms).format("%Y-%m-%d").to_string()
}

/// Build a chunk key for a namespace, level, and timestamp
///
/// `seq` disambiguates same-millisecond writes; zero means no suffix.
pub fn chunk_path(ns_path: &str, level: Level, timestamp_ms: u64, seq: u32) -> String {
    let at = utc(timestamp_ms);
    let file = if seq == 0 {
        format!(
            "{}-{:03}{}",
            at.format("%H%M%S"),
            at.timestamp_subsec_millis(),
            CHUNK_EXT
        )
    } else {
        format!(
            "{}-{:03}-{:03}{}",
            at.format("%H%M%S"),
            at.timestamp_subsec_millis(),
            seq,
            CHUNK_EXT
        )
    };
    format!(
        "{}/{}/{}/{}",
        ns_path,
        level.dir(),
        at.format("%Y-%m-%d"),
        file
    )
}

/// Whether a key names a chunk file
pub fn is_chunk_key(key: &str) -> bool {
    key.ends_with(CHUNK_EXT)
}

/// Extract the `YYYY-MM-DD` date component of a chunk key
pub fn chunk_date(key: &str) -> Option<&str> {
    let mut parts = key.rsplit('/');
    let _file = parts.next()?;
    let date = parts.next()?;
    if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() {
        Some(date)
    } else {
        None
    }
}

/// Recover the millisecond timestamp a chunk key was derived from
///
/// Plain and suffixed `HHMMSS-mmm` names resolve to their exact time;
/// legacy `NNN.gcol` sequence names resolve to midnight of their date
/// directory.
pub fn parse_chunk_timestamp(key: &str) -> Option<u64> {
    let mut parts = key.rsplit('/');
    let file = parts.next()?;
    let date_str = parts.next()?;
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;
    let stem = file.strip_suffix(CHUNK_EXT)?;

    // Legacy sequence name: date midnight
    if stem.bytes().all(|b| b.is_ascii_digit()) {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis() as u64);
    }

    // HHMMSS-mmm or HHMMSS-mmm-NNN
    let mut fields = stem.split('-');
    let hms = fields.next()?;
    let millis: u32 = fields.next()?.parse().ok()?;
    if hms.len() != 6 || millis > 999 {
        return None;
    }
    let h: u32 = hms[0..2].parse().ok()?;
    let m: u32 = hms[2..4].parse().ok()?;
    let s: u32 = hms[4..6].parse().ok()?;
    let at = date.and_hms_milli_opt(h, m, s, millis)?;
    Some(at.and_utc().timestamp_millis() as u64)
}

fn utc(timestamp_ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(timestamp_ms as i64)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-15T10:30:45.123Z
    const TS: u64 = 1_705_314_645_123;

    #[test]
    fn test_chunk_path_format() {
        let path = chunk_path(".com/.example/crm", Level::L0, TS, 0);
        assert_eq!(path, ".com/.example/crm/_wal/2024-01-15/103045-123.gcol");

        let path = chunk_path(".com/.example/crm", Level::L1, TS, 0);
        assert_eq!(path, ".com/.example/crm/_l1/2024-01-15/103045-123.gcol");
    }

    #[test]
    fn test_chunk_path_with_sequence_suffix() {
        let path = chunk_path(".com/.example/crm", Level::L0, TS, 7);
        assert_eq!(path, ".com/.example/crm/_wal/2024-01-15/103045-123-007.gcol");
    }

    #[test]
    fn test_format_date_path() {
        assert_eq!(format_date_path(TS), "2024-01-15");
        assert_eq!(format_date_path(0), "1970-01-01");
    }

    #[test]
    fn test_parse_round_trip() {
        let path = chunk_path(".com/.example/crm", Level::L0, TS, 0);
        assert_eq!(parse_chunk_timestamp(&path), Some(TS));

        let path = chunk_path(".com/.example/crm", Level::L2, TS, 3);
        assert_eq!(parse_chunk_timestamp(&path), Some(TS));
    }

    #[test]
    fn test_parse_legacy_sequence_name() {
        let ts = parse_chunk_timestamp(".com/.example/_wal/2024-01-15/042.gcol").unwrap();
        assert_eq!(format_date_path(ts), "2024-01-15");
        assert_eq!(ts % 86_400_000, 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_chunk_timestamp("ns/_wal/not-a-date/103045-123.gcol"), None);
        assert_eq!(parse_chunk_timestamp("ns/_wal/2024-01-15/1030.gcol"), None);
        assert_eq!(parse_chunk_timestamp("ns/_wal/2024-01-15/103045-123.json"), None);
    }

    #[test]
    fn test_lexical_order_is_chronological() {
        let earlier = chunk_path("ns", Level::L0, TS, 0);
        let later_same_day = chunk_path("ns", Level::L0, TS + 90_000, 0);
        let next_day = chunk_path("ns", Level::L0, TS + 86_400_000, 0);
        assert!(earlier < later_same_day);
        assert!(later_same_day < next_day);
    }

    #[test]
    fn test_level_prefix_and_lock_path() {
        assert_eq!(level_prefix("ns", Level::L0), "ns/_wal/");
        assert_eq!(level_prefix("ns", Level::L2), "ns/_l2/");
        assert_eq!(lock_path("ns"), "ns/_compaction.lock");
        assert_eq!(manifest_path("ns"), "ns/manifest.json");
    }

    #[test]
    fn test_chunk_date_extraction() {
        assert_eq!(
            chunk_date("ns/_wal/2024-01-15/103045-123.gcol"),
            Some("2024-01-15")
        );
        assert_eq!(chunk_date("ns/_wal/nope/103045-123.gcol"), None);
    }

    #[test]
    fn test_is_chunk_key() {
        assert!(is_chunk_key("a/b.gcol"));
        assert!(!is_chunk_key("a/manifest.json"));
        assert!(!is_chunk_key("a/_compaction.lock"));
    }
}
