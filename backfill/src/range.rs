//! Key ranges, partitioning, and chunk iteration.
//!
//! A backfill operates over a closed interval of primary-key values. The
//! interval is partitioned into contiguous sub-ranges, one per worker, and
//! each worker walks its sub-range in fixed-size chunks.

use std::fmt;

use crate::bail;
use crate::error::{BackfillResult, ErrorKind};

/// A closed interval of primary-key values assigned to one worker.
///
/// Both endpoints are inclusive and `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyRange {
    start: i64,
    end: i64,
}

impl KeyRange {
    /// Creates a new range, rejecting inverted bounds.
    pub fn new(start: i64, end: i64) -> BackfillResult<Self> {
        if start > end {
            bail!(
                ErrorKind::InvalidRange,
                "Range start exceeds range end",
                format!("start {start}, end {end}")
            );
        }

        Ok(Self { start, end })
    }

    /// Returns the first key of the range.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Returns the last key of the range.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Returns the number of keys covered by the range.
    pub fn len(&self) -> u64 {
        self.end.abs_diff(self.start) + 1
    }

    /// Returns an iterator over contiguous chunks of at most `chunk_size` keys.
    ///
    /// The last chunk is truncated at the range end. `chunk_size` must be
    /// non-zero, which the configuration layer guarantees.
    pub fn chunks(&self, chunk_size: u64) -> ChunkIter {
        ChunkIter {
            next_start: Some(self.start),
            end: self.end,
            chunk_size,
        }
    }

    /// Returns the portion of the range starting at `new_start`.
    ///
    /// Returns `None` when `new_start` lies past the range end, meaning there
    /// is nothing left to process.
    pub fn trim_start(&self, new_start: i64) -> Option<KeyRange> {
        if new_start > self.end {
            return None;
        }

        Some(KeyRange {
            start: new_start.max(self.start),
            end: self.end,
        })
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Iterator over the chunks of a [`KeyRange`].
#[derive(Debug)]
pub struct ChunkIter {
    next_start: Option<i64>,
    end: i64,
    chunk_size: u64,
}

impl Iterator for ChunkIter {
    type Item = KeyRange;

    fn next(&mut self) -> Option<KeyRange> {
        let start = self.next_start?;
        let len = self.chunk_size.max(1) as i64;
        let end = start.saturating_add(len - 1).min(self.end);

        self.next_start = if end < self.end { Some(end + 1) } else { None };

        Some(KeyRange { start, end })
    }
}

/// Splits `range` into at most `parts` contiguous, non-overlapping sub-ranges.
///
/// Sub-range width is `ceil(len / parts)` with the last sub-range truncated
/// at the range end, so fewer than `parts` sub-ranges are returned when the
/// range holds fewer than `parts` keys. The result is sorted, gap-free, and
/// its union equals `range`.
pub fn partition(range: KeyRange, parts: usize) -> Vec<KeyRange> {
    let parts = parts.max(1) as u64;
    let width = range.len().div_ceil(parts) as i64;

    let mut sub_ranges = Vec::new();
    let mut start = range.start;
    while start <= range.end {
        let end = start.saturating_add(width - 1).min(range.end);
        sub_ranges.push(KeyRange { start, end });
        start = match end.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }

    sub_ranges
}

/// Splits `range` into sub-ranges aligned to multiples of `width`.
///
/// Every returned sub-range lies entirely within one aligned stripe
/// `[k * width, (k + 1) * width - 1]`. Used by the repartition task so a
/// sub-range never spans two destination partition tables. Keys are assumed
/// non-negative, matching sequence-number semantics.
pub fn partition_aligned(range: KeyRange, width: u64) -> Vec<KeyRange> {
    let width = width.max(1) as i64;

    let mut sub_ranges = Vec::new();
    let mut start = range.start;
    while start <= range.end {
        let stripe_end = (start / width + 1) * width - 1;
        let end = stripe_end.min(range.end);
        sub_ranges.push(KeyRange { start, end });
        start = end + 1;
    }

    sub_ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: i64, end: i64) -> KeyRange {
        KeyRange::new(start, end).unwrap()
    }

    #[test]
    fn new_rejects_inverted_bounds() {
        assert!(KeyRange::new(10, 9).is_err());
        assert!(KeyRange::new(10, 10).is_ok());
    }

    #[test]
    fn partition_matches_worked_example() {
        let sub_ranges = partition(range(0, 999), 4);
        assert_eq!(
            sub_ranges,
            vec![
                range(0, 249),
                range(250, 499),
                range(500, 749),
                range(750, 999),
            ]
        );
    }

    #[test]
    fn partition_covers_range_without_overlap() {
        for (start, end) in [(0, 999), (0, 1000), (7, 7), (3, 1001), (-50, 49)] {
            for parts in 1..=12 {
                let sub_ranges = partition(range(start, end), parts);

                assert!(!sub_ranges.is_empty());
                assert_eq!(sub_ranges[0].start(), start);
                assert_eq!(sub_ranges.last().unwrap().end(), end);
                for pair in sub_ranges.windows(2) {
                    assert_eq!(pair[0].end() + 1, pair[1].start());
                }

                let total: u64 = sub_ranges.iter().map(|r| r.len()).sum();
                assert_eq!(total, range(start, end).len());
            }
        }
    }

    #[test]
    fn partition_with_more_parts_than_keys() {
        let sub_ranges = partition(range(0, 2), 10);
        assert_eq!(sub_ranges, vec![range(0, 0), range(1, 1), range(2, 2)]);
    }

    #[test]
    fn partition_aligned_never_spans_a_stripe() {
        let sub_ranges = partition_aligned(range(5, 34), 10);
        assert_eq!(
            sub_ranges,
            vec![range(5, 9), range(10, 19), range(20, 29), range(30, 34)]
        );

        for sub_range in &sub_ranges {
            assert_eq!(sub_range.start() / 10, sub_range.end() / 10);
        }
    }

    #[test]
    fn partition_aligned_single_stripe() {
        let sub_ranges = partition_aligned(range(20, 25), 100);
        assert_eq!(sub_ranges, vec![range(20, 25)]);
    }

    #[test]
    fn chunks_truncate_the_last_chunk() {
        let chunks: Vec<_> = range(0, 24).chunks(10).collect();
        assert_eq!(chunks, vec![range(0, 9), range(10, 19), range(20, 24)]);
    }

    #[test]
    fn chunks_with_oversized_chunk_size() {
        let chunks: Vec<_> = range(100, 199).chunks(10_000).collect();
        assert_eq!(chunks, vec![range(100, 199)]);
    }

    #[test]
    fn trim_start_drops_processed_prefix() {
        assert_eq!(range(100, 199).trim_start(150), Some(range(150, 199)));
        assert_eq!(range(100, 199).trim_start(100), Some(range(100, 199)));
        // A resume key before the range start keeps the full range.
        assert_eq!(range(100, 199).trim_start(0), Some(range(100, 199)));
        assert_eq!(range(100, 199).trim_start(200), None);
    }
}
