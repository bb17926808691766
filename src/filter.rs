// Row and column selection applied while ingesting
//
// Rows are selected by their index in the source (empty lines count), then
// optionally by a content matcher that sees every cell of the row. Selected
// rows are renumbered densely in source order, and selected columns are
// renumbered densely by their position in the column set.

use std::fmt;
use std::sync::Arc;

use crate::{Index, MAX_INDEX};

/// Ordered set of disjoint inclusive index ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<(Index, Index)>,
    /// Number of indices in all ranges before range `i`.
    prefix: Vec<u64>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every addressable index.
    pub fn all() -> Self {
        let mut set = Self::new();
        set.insert(0, MAX_INDEX);
        set
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = (Index, Index)>) -> Self {
        let mut set = Self::new();
        for (lo, hi) in ranges {
            set.insert(lo, hi);
        }
        set
    }

    /// Add `lo..=hi`, merging with overlapping or adjacent ranges.
    pub fn insert(&mut self, lo: Index, hi: Index) {
        let (mut lo, mut hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        // First range that ends at or after lo - 1
        let start = self
            .ranges
            .partition_point(|&(_, h)| (h as u64) + 1 < lo as u64);
        let mut end = start;
        while end < self.ranges.len() && self.ranges[end].0 as u64 <= hi as u64 + 1 {
            lo = lo.min(self.ranges[end].0);
            hi = hi.max(self.ranges[end].1);
            end += 1;
        }
        self.ranges.splice(start..end, std::iter::once((lo, hi)));
        self.rebuild_prefix();
    }

    pub fn insert_value(&mut self, value: Index) {
        self.insert(value, value);
    }

    fn rebuild_prefix(&mut self) {
        self.prefix.clear();
        let mut total = 0u64;
        for &(lo, hi) in &self.ranges {
            self.prefix.push(total);
            total += hi as u64 - lo as u64 + 1;
        }
    }

    #[inline]
    fn locate(&self, value: u64) -> Option<usize> {
        let idx = self.ranges.partition_point(|&(_, hi)| (hi as u64) < value);
        self.ranges
            .get(idx)
            .filter(|&&(lo, _)| lo as u64 <= value)
            .map(|_| idx)
    }

    pub fn contains(&self, value: u64) -> bool {
        self.locate(value).is_some()
    }

    /// Position of `value` among all members, if it is one.
    pub fn rank(&self, value: u64) -> Option<u64> {
        let idx = self.locate(value)?;
        Some(self.prefix[idx] + value - self.ranges[idx].0 as u64)
    }

    pub fn first(&self) -> Option<Index> {
        self.ranges.first().map(|r| r.0)
    }

    pub fn last(&self) -> Option<Index> {
        self.ranges.last().map(|r| r.1)
    }

    /// Number of member indices.
    pub fn len(&self) -> u64 {
        match (self.prefix.last(), self.ranges.last()) {
            (Some(&before), Some(&(lo, hi))) => before + hi as u64 - lo as u64 + 1,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[(Index, Index)] {
        &self.ranges
    }
}

impl FromIterator<Index> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = Index>>(iter: I) -> Self {
        let mut set = IntervalSet::new();
        for value in iter {
            set.insert_value(value);
        }
        set
    }
}

/// Decides from all cells of a row whether the row is kept.
pub type ContentMatcher = Arc<dyn Fn(&[&[u8]]) -> bool + Send + Sync>;

/// Which rows and columns an ingestion keeps. The default keeps everything.
#[derive(Clone, Default)]
pub struct FilterPredicate {
    include_rows: Option<IntervalSet>,
    include_columns: Option<IntervalSet>,
    content_matcher: Option<ContentMatcher>,
}

impl fmt::Debug for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPredicate")
            .field("include_rows", &self.include_rows)
            .field("include_columns", &self.include_columns)
            .field("content_matcher", &self.content_matcher.is_some())
            .finish()
    }
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, rows: IntervalSet) -> Self {
        self.include_rows = Some(rows);
        self
    }

    pub fn with_columns(mut self, columns: IntervalSet) -> Self {
        self.include_columns = Some(columns);
        self
    }

    pub fn with_content_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[&[u8]]) -> bool + Send + Sync + 'static,
    {
        self.content_matcher = Some(Arc::new(matcher));
        self
    }

    pub fn include_rows(&self) -> Option<&IntervalSet> {
        self.include_rows.as_ref()
    }

    pub fn include_columns(&self) -> Option<&IntervalSet> {
        self.include_columns.as_ref()
    }

    pub fn has_content_matcher(&self) -> bool {
        self.content_matcher.is_some()
    }

    /// True when nothing is filtered.
    pub fn is_pass_through(&self) -> bool {
        self.include_rows.is_none() && self.include_columns.is_none() && self.content_matcher.is_none()
    }

    #[inline]
    pub fn includes_row(&self, source_row: u64) -> bool {
        self.include_rows
            .as_ref()
            .map_or(true, |rows| rows.contains(source_row))
    }

    /// Stored index for source column `col`, or `None` if the column is not kept.
    #[inline]
    pub fn column_slot(&self, col: Index) -> Option<Index> {
        match &self.include_columns {
            None => Some(col),
            Some(columns) => columns.rank(col as u64).map(|rank| rank as Index),
        }
    }

    pub fn keeps_content(&self, cells: &[&[u8]]) -> bool {
        self.content_matcher
            .as_ref()
            .map_or(true, |matcher| matcher(cells))
    }

    /// True once no row at or after `source_row` can be included.
    #[inline]
    pub fn is_past_last_row(&self, source_row: u64) -> bool {
        match &self.include_rows {
            None => false,
            Some(rows) => rows.last().map_or(true, |last| source_row > last as u64),
        }
    }
}
