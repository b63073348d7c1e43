//! Page-range planning for large documents.
//!
//! A document longer than the threshold is cut into ordered, overlapping
//! half-open ranges `[start, end)` over 0-indexed pages. Consecutive ranges
//! share `overlap` pages so a finding that straddles a boundary is seen in
//! full by at least one step.
//!
//! ```text
//! 105 pages, 35 per step, overlap 2
//!
//!   [0 ─────────── 35)
//!               [33 ─────────── 68)
//!                           [66 ─────────── 101)
//!                                        [99 ── 105)
//! ```

use crate::config::ReviewConfig;
use crate::error::ReviewError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One planned page range. Immutable once planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position in the plan.
    pub index: usize,
    /// First page, 0-indexed, inclusive.
    pub start: usize,
    /// Last page, 0-indexed, exclusive.
    pub end: usize,
}

impl Chunk {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    /// 1-indexed step number, as shown to users.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// First true (1-indexed) page number covered.
    pub fn first_page(&self) -> usize {
        self.start + 1
    }

    /// Last true (1-indexed) page number covered.
    pub fn last_page(&self) -> usize {
        self.end
    }

    /// Whether a true page number lies inside this range.
    pub fn contains_page(&self, page: usize) -> bool {
        page >= self.first_page() && page <= self.last_page()
    }

    /// Display range, e.g. `"34-68"`.
    pub fn page_label(&self) -> String {
        format!("{}-{}", self.first_page(), self.last_page())
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} (pages {})", self.number(), self.page_label())
    }
}

/// Decides whether a document needs splitting and plans the ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    pub pages_per_step: usize,
    pub overlap: usize,
    pub threshold: usize,
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self {
            pages_per_step: 35,
            overlap: 2,
            threshold: 40,
        }
    }
}

impl From<&ReviewConfig> for ChunkPlanner {
    fn from(config: &ReviewConfig) -> Self {
        Self {
            pages_per_step: config.pages_per_step,
            overlap: config.overlap,
            threshold: config.threshold,
        }
    }
}

impl ChunkPlanner {
    /// True iff the document is longer than the threshold.
    pub fn needs_chunking(&self, page_count: usize) -> bool {
        page_count > self.threshold
    }

    /// Plan overlapping ranges covering `[0, page_count)`.
    ///
    /// Each range spans `min(start + pages_per_step, page_count)`; the next
    /// one starts `overlap` pages before the previous end. Planning stops as
    /// soon as a range reaches the last page, so a tail shorter than the
    /// overlap never produces a range that fails to advance.
    pub fn plan(&self, page_count: usize) -> Result<Vec<Chunk>, ReviewError> {
        if page_count == 0 {
            return Err(ReviewError::NoPages);
        }
        if self.pages_per_step == 0 || self.overlap >= self.pages_per_step {
            return Err(ReviewError::InvalidConfig(format!(
                "cannot plan with {} pages per step and overlap {}",
                self.pages_per_step, self.overlap
            )));
        }

        let mut chunks = Vec::with_capacity(self.max_steps(page_count));
        let mut start = 0;

        loop {
            let end = (start + self.pages_per_step).min(page_count);
            chunks.push(Chunk {
                index: chunks.len(),
                start,
                end,
            });

            if end == page_count {
                break;
            }

            let next = end - self.overlap;
            if next <= start {
                break;
            }
            start = next;
        }

        Ok(chunks)
    }

    /// The plan actually executed for a review: one implicit step covering
    /// the whole document when no splitting is needed.
    pub fn plan_review(&self, page_count: usize) -> Result<Vec<Chunk>, ReviewError> {
        if page_count == 0 {
            return Err(ReviewError::NoPages);
        }
        if self.needs_chunking(page_count) {
            self.plan(page_count)
        } else {
            Ok(vec![Chunk {
                index: 0,
                start: 0,
                end: page_count,
            }])
        }
    }

    /// Upper bound on the number of steps: `ceil(page_count / (step - overlap))`.
    pub fn max_steps(&self, page_count: usize) -> usize {
        let stride = self.pages_per_step.saturating_sub(self.overlap).max(1);
        page_count.div_ceil(stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(chunks: &[Chunk]) -> Vec<(usize, usize)> {
        chunks.iter().map(|c| (c.start, c.end)).collect()
    }

    #[test]
    fn threshold_is_exclusive() {
        let p = ChunkPlanner::default();
        assert!(!p.needs_chunking(1));
        assert!(!p.needs_chunking(40));
        assert!(p.needs_chunking(41));
    }

    #[test]
    fn plan_105_pages() {
        let chunks = ChunkPlanner::default().plan(105).unwrap();
        assert_eq!(
            ranges(&chunks),
            vec![(0, 35), (33, 68), (66, 101), (99, 105)]
        );
        assert!(chunks[0].is_first());
        assert!(!chunks[1].is_first());
        assert_eq!(chunks[3].page_label(), "100-105");
    }

    #[test]
    fn zero_pages_is_an_error() {
        assert!(matches!(
            ChunkPlanner::default().plan(0),
            Err(ReviewError::NoPages)
        ));
    }

    #[test]
    fn short_tail_terminates() {
        // 35 + 34 = 69 → second range ends at 68, tail of one page.
        let chunks = ChunkPlanner::default().plan(69).unwrap();
        assert_eq!(ranges(&chunks), vec![(0, 35), (33, 68), (66, 69)]);
    }

    #[test]
    fn tail_shorter_than_overlap() {
        let p = ChunkPlanner {
            pages_per_step: 10,
            overlap: 4,
            threshold: 5,
        };
        let chunks = p.plan(11).unwrap();
        assert_eq!(ranges(&chunks), vec![(0, 10), (6, 11)]);
    }

    #[test]
    fn coverage_overlap_and_bound_hold_for_many_sizes() {
        let p = ChunkPlanner::default();
        for pages in 41..=400 {
            let chunks = p.plan(pages).unwrap();
            assert_eq!(chunks[0].start, 0);
            assert_eq!(chunks.last().unwrap().end, pages);
            assert!(chunks.len() <= p.max_steps(pages), "pages={pages}");
            for pair in chunks.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                assert!(b.start > a.start);
                assert!(!b.is_empty());
                assert_eq!(a.end - b.start, p.overlap, "pages={pages}");
            }
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.index, i);
            }
        }
    }

    #[test]
    fn small_document_is_one_implicit_step() {
        let chunks = ChunkPlanner::default().plan_review(12).unwrap();
        assert_eq!(ranges(&chunks), vec![(0, 12)]);
        assert!(chunks[0].is_first());
    }

    #[test]
    fn contains_page_uses_true_numbers() {
        let c = Chunk {
            index: 1,
            start: 33,
            end: 68,
        };
        assert!(!c.contains_page(33));
        assert!(c.contains_page(34));
        assert!(c.contains_page(68));
        assert!(!c.contains_page(69));
    }
}
