//! Source selection for compaction
//!
//! Candidates are ordered by their minimum timestamp and accumulated
//! greedily: a chunk joins the selection while the running size stays under
//! the level threshold, or while the selection has not yet reached the
//! minimum chunk count. Accumulation stops once the threshold is met. A
//! selection smaller than the minimum count is discarded, so tiny tails
//! wait for more data instead of churning.

/// Summary of one candidate chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Blob-store key
    pub path: String,
    /// Encoded size in bytes
    pub size: u64,
    /// Smallest triple timestamp
    pub min_timestamp: u64,
    /// Largest triple timestamp
    pub max_timestamp: u64,
    /// Number of triples
    pub triple_count: u32,
}

/// Pick the chunks to merge for one compaction run
///
/// Returns an empty vector when no compaction should run. The input order
/// of equal-timestamp candidates is preserved (the sort is stable).
pub fn select_chunks_for_compaction(
    mut candidates: Vec<ChunkInfo>,
    threshold_bytes: u64,
    min_chunks: usize,
) -> Vec<ChunkInfo> {
    candidates.sort_by_key(|c| c.min_timestamp);

    let mut selected = Vec::new();
    let mut total: u64 = 0;
    for chunk in candidates {
        if total >= threshold_bytes {
            break;
        }
        if total + chunk.size <= threshold_bytes || selected.len() < min_chunks {
            total += chunk.size;
            selected.push(chunk);
        } else {
            break;
        }
    }

    if selected.len() < min_chunks {
        return Vec::new();
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn info(path: &str, size: u64, min_ts: u64) -> ChunkInfo {
        ChunkInfo {
            path: path.to_string(),
            size,
            min_timestamp: min_ts,
            max_timestamp: min_ts + 10,
            triple_count: 1,
        }
    }

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_selects_oldest_first() {
        let candidates = vec![
            info("c", 100, 300),
            info("a", 100, 100),
            info("b", 100, 200),
            info("d", 100, 400),
        ];
        let selected = select_chunks_for_compaction(candidates, 8 * MIB, 4);
        let paths: Vec<&str> = selected.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_below_min_count_selects_nothing() {
        let candidates = vec![info("a", 100, 1), info("b", 100, 2), info("c", 100, 3)];
        assert!(select_chunks_for_compaction(candidates, 8 * MIB, 4).is_empty());
    }

    #[test]
    fn test_stops_at_threshold() {
        let candidates = vec![
            info("a", 2 * MIB, 1),
            info("b", 2 * MIB, 2),
            info("c", 2 * MIB, 3),
            info("d", 2 * MIB, 4),
            info("e", 2 * MIB, 5),
        ];
        // a..d accumulate to exactly the threshold; e is never considered.
        let selected = select_chunks_for_compaction(candidates, 8 * MIB, 4);
        let paths: Vec<&str> = selected.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_min_count_overshoot_can_void_the_selection() {
        // Three 3 MiB chunks cross the threshold before reaching the
        // minimum count, so the run selects nothing at all.
        let candidates = vec![
            info("a", 3 * MIB, 1),
            info("b", 3 * MIB, 2),
            info("c", 3 * MIB, 3),
            info("d", 3 * MIB, 4),
        ];
        assert!(select_chunks_for_compaction(candidates, 8 * MIB, 4).is_empty());
    }

    #[test]
    fn test_oversized_tail_is_excluded_once_min_met() {
        let candidates = vec![
            info("a", MIB, 1),
            info("b", MIB, 2),
            info("c", MIB, 3),
            info("d", MIB, 4),
            info("e", 100 * MIB, 5),
        ];
        let selected = select_chunks_for_compaction(candidates, 8 * MIB, 4);
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn test_equal_timestamps_preserve_input_order() {
        let candidates = vec![
            info("first", 100, 50),
            info("second", 100, 50),
            info("third", 100, 50),
            info("fourth", 100, 50),
        ];
        let selected = select_chunks_for_compaction(candidates, 8 * MIB, 4);
        let paths: Vec<&str> = selected.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(select_chunks_for_compaction(Vec::new(), 8 * MIB, 4).is_empty());
    }

    proptest! {
        #[test]
        fn prop_selection_is_a_time_ordered_prefix(
            sizes in proptest::collection::vec(1u64..MIB, 0..20),
            threshold in MIB..(16 * MIB),
        ) {
            let candidates: Vec<ChunkInfo> = sizes
                .iter()
                .enumerate()
                .map(|(i, s)| info(&format!("c{}", i), *s, (i as u64) * 1000))
                .collect();
            let selected = select_chunks_for_compaction(candidates.clone(), threshold, 4);

            // Either nothing, or at least the minimum count
            prop_assert!(selected.is_empty() || selected.len() >= 4);

            // Selected chunks are the oldest prefix in order
            let mut sorted = candidates;
            sorted.sort_by_key(|c| c.min_timestamp);
            for (sel, expect) in selected.iter().zip(sorted.iter()) {
                prop_assert_eq!(&sel.path, &expect.path);
            }
        }
    }
}
