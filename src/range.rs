//! Interval Tracking
//!
//! [`Range`] is a half-open integer interval `[start, start + size)` and
//! [`RangeList`] an ordered collection of them. Used wherever a sparse set of
//! modified sub-regions of a larger linear resource must be tracked compactly
//! (color-buffer dirty scanlines, client buffer-object updates).
//!
//! Insertion does not coalesce; callers bulk-insert and then call
//! [`RangeList::merge`] once.

use std::collections::BTreeSet;

/// A half-open interval `[start, start + size)`.
///
/// Ordering is lexicographic on `(start, end)`, which keeps a set of ranges
/// sorted by position and, for equal starts, by length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Range {
    start: i32,
    end: i32,
}

impl Range {
    /// Creates the interval `[start, start + size)`.
    #[inline]
    #[must_use]
    pub fn new(start: i32, size: i32) -> Self {
        Self {
            start,
            end: start + size,
        }
    }

    /// Creates the interval `[start, end)`.
    #[inline]
    #[must_use]
    pub fn from_bounds(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    #[inline]
    #[must_use]
    pub fn start(&self) -> i32 {
        self.start
    }

    /// Exclusive end of the interval.
    #[inline]
    #[must_use]
    pub fn end(&self) -> i32 {
        self.end
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> i32 {
        self.end - self.start
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the overlap of the two intervals, or `None` when it is empty.
    ///
    /// Numerically adjacent ranges (`self.end() == other.start()`) produce a
    /// zero-size overlap and therefore `None`.
    #[must_use]
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        if self.start > other.end || other.start > self.end {
            return None;
        }
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            Some(Range::from_bounds(start, end))
        } else {
            None
        }
    }

    /// Returns the bounding interval whenever the two ranges touch or
    /// overlap, `None` when they are disjoint.
    #[must_use]
    pub fn union_with(&self, other: &Range) -> Option<Range> {
        if self.start > other.end || other.start > self.end {
            return None;
        }
        Some(Range::from_bounds(
            self.start.min(other.start),
            self.end.max(other.end),
        ))
    }
}

/// An ordered set of intervals.
///
/// The set is non-overlapping only after [`merge`](RangeList::merge); plain
/// insertion keeps whatever the caller put in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeList {
    ranges: BTreeSet<Range>,
}

impl RangeList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, r: Range) {
        self.ranges.insert(r);
    }

    pub fn add_all(&mut self, other: &RangeList) {
        self.ranges.extend(other.ranges.iter().copied());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = Range> + '_ {
        self.ranges.iter().copied()
    }

    /// Removes `r` from the collection.
    ///
    /// An interval that only partially intersects `r` is split into its
    /// surviving sub-interval(s). Every actually-removed sub-interval (the
    /// portion that truly intersected, not the whole original interval) is
    /// accumulated into `deleted`. Zero-size `r` is a no-op.
    pub fn del_range(&mut self, r: Range, deleted: &mut RangeList) {
        if r.is_empty() {
            return;
        }

        let mut kept = BTreeSet::new();
        for cur in &self.ranges {
            if let Some(hit) = r.intersection(cur) {
                if hit != *cur {
                    // survivor on the left
                    if cur.start() != hit.start() {
                        kept.insert(Range::from_bounds(cur.start(), hit.start()));
                    }
                    // survivor on the right
                    if cur.end() != hit.end() {
                        kept.insert(Range::from_bounds(hit.end(), cur.end()));
                    }
                }
                deleted.add(hit);
            } else {
                kept.insert(*cur);
            }
        }
        self.ranges = kept;
    }

    /// Applies [`del_range`](RangeList::del_range) for every interval in
    /// `list`, accumulating all deletions.
    pub fn del_ranges(&mut self, list: &RangeList, deleted: &mut RangeList) {
        for r in &list.ranges {
            self.del_range(*r, deleted);
        }
    }

    /// Coalesces the collection into the minimal set of disjoint intervals
    /// covering the same union.
    ///
    /// Single left-to-right sweep: when the running interval's end reaches
    /// the next interval's start they are coalesced by extending the running
    /// end to the max of the two (which also swallows fully-nested
    /// intervals). Idempotent.
    pub fn merge(&mut self) {
        let mut iter = self.ranges.iter().copied();
        let Some(mut current) = iter.next() else {
            return;
        };

        let mut merged = BTreeSet::new();
        for next in iter {
            if current.end() >= next.start() {
                current = Range::from_bounds(current.start(), current.end().max(next.end()));
            } else {
                merged.insert(current);
                current = next;
            }
        }
        merged.insert(current);
        self.ranges = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(ranges: &[(i32, i32)]) -> RangeList {
        let mut list = RangeList::new();
        for &(start, size) in ranges {
            list.add(Range::new(start, size));
        }
        list
    }

    fn collect(list: &RangeList) -> Vec<(i32, i32)> {
        list.iter().map(|r| (r.start(), r.end())).collect()
    }

    #[test]
    fn test_intersection_overlap() {
        let a = Range::new(0, 10);
        let b = Range::new(5, 10);
        assert_eq!(a.intersection(&b), Some(Range::from_bounds(5, 10)));
    }

    #[test]
    fn test_intersection_touching_is_none() {
        // [0,5) and [5,10) share only the endpoint; the overlap has size 0.
        let a = Range::new(0, 5);
        let b = Range::new(5, 5);
        assert_eq!(a.intersection(&b), None);
    }

    #[test]
    fn test_intersection_disjoint_is_none() {
        assert_eq!(Range::new(0, 3).intersection(&Range::new(7, 2)), None);
    }

    #[test]
    fn test_union_overlapping_and_touching() {
        let a = Range::new(0, 5);
        assert_eq!(
            a.union_with(&Range::new(3, 5)),
            Some(Range::from_bounds(0, 8))
        );
        // touching ranges still produce a union
        assert_eq!(
            a.union_with(&Range::new(5, 5)),
            Some(Range::from_bounds(0, 10))
        );
    }

    #[test]
    fn test_union_disjoint_is_none() {
        assert_eq!(Range::new(0, 2).union_with(&Range::new(5, 2)), None);
    }

    #[test]
    fn test_del_range_splits_interval() {
        let mut list = list_of(&[(0, 10)]);
        let mut deleted = RangeList::new();
        list.del_range(Range::new(3, 4), &mut deleted);

        assert_eq!(collect(&list), vec![(0, 3), (7, 10)]);
        assert_eq!(collect(&deleted), vec![(3, 7)]);
    }

    #[test]
    fn test_del_range_removes_only_the_intersected_portion() {
        let mut list = list_of(&[(0, 4), (10, 4)]);
        let mut deleted = RangeList::new();
        list.del_range(Range::new(2, 10), &mut deleted);

        assert_eq!(collect(&list), vec![(0, 2), (12, 14)]);
        // deleted holds r ∩ original, not r itself
        assert_eq!(collect(&deleted), vec![(2, 4), (10, 12)]);
    }

    #[test]
    fn test_del_range_zero_size_is_noop() {
        let mut list = list_of(&[(0, 10)]);
        let mut deleted = RangeList::new();
        list.del_range(Range::new(5, 0), &mut deleted);

        assert_eq!(collect(&list), vec![(0, 10)]);
        assert!(deleted.is_empty());
    }

    #[test]
    fn test_del_range_leaves_nothing_intersecting() {
        let mut list = list_of(&[(0, 5), (4, 8), (20, 5)]);
        let mut deleted = RangeList::new();
        let r = Range::new(3, 10);
        list.del_range(r, &mut deleted);

        for remaining in list.iter() {
            assert_eq!(remaining.intersection(&r), None);
        }
    }

    #[test]
    fn test_del_ranges_accumulates() {
        let mut list = list_of(&[(0, 10)]);
        let mut deleted = RangeList::new();
        list.del_ranges(&list_of(&[(1, 2), (6, 2)]), &mut deleted);

        assert_eq!(collect(&list), vec![(0, 1), (3, 6), (8, 10)]);
        assert_eq!(collect(&deleted), vec![(1, 3), (6, 8)]);
    }

    #[test]
    fn test_merge_coalesces_overlap_and_touch() {
        let mut list = list_of(&[(0, 5), (5, 5), (12, 3), (14, 1)]);
        list.merge();
        assert_eq!(collect(&list), vec![(0, 10), (12, 15)]);
    }

    #[test]
    fn test_merge_handles_nested_interval() {
        // [0,20) fully contains [5,8); the running end must not shrink.
        let mut list = list_of(&[(0, 20), (5, 3), (25, 2)]);
        list.merge();
        assert_eq!(collect(&list), vec![(0, 20), (25, 27)]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = list_of(&[(0, 4), (2, 6), (9, 1), (10, 2)]);
        once.merge();
        let mut twice = once.clone();
        twice.merge();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_preserves_union() {
        fn coverage(list: &RangeList) -> Vec<bool> {
            (0..40)
                .map(|p| list.iter().any(|r| r.start() <= p && p < r.end()))
                .collect()
        }

        let mut list = list_of(&[(0, 4), (2, 6), (9, 1), (10, 2), (30, 5)]);
        let before = coverage(&list);
        list.merge();
        assert_eq!(coverage(&list), before);
    }
}
