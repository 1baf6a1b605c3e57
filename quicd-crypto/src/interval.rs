//! # Byte Range Sets
//!
//! Send and receive bookkeeping both reduce to sets of half-open
//! `[start, end)` byte ranges: bytes acked, bytes lost, bytes consumed at a
//! given encryption level, bytes received out of order.
//!
//! [`IntervalSet`] keeps its ranges disjoint and non-adjacent: inserting a
//! range that touches or overlaps existing ones merges them, so iteration
//! always yields the coarsest representation in ascending order.

#![forbid(unsafe_code)]

use core::ops::Range;
use std::collections::BTreeMap;

/// An ordered set of disjoint, non-adjacent `[start, end)` ranges over `u64`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    /// start -> end (exclusive)
    ranges: BTreeMap<u64, u64>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding exactly `[start, end)` (empty if `start >= end`).
    pub fn from_range(start: u64, end: u64) -> Self {
        let mut set = Self::new();
        set.add(start, end);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges in the set.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Total number of bytes covered.
    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Lowest range in the set.
    pub fn first(&self) -> Option<Range<u64>> {
        self.ranges.iter().next().map(|(&s, &e)| s..e)
    }

    /// Iterate ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().map(|(&s, &e)| s..e)
    }

    /// Add `[start, end)`, merging with any overlapping or adjacent ranges.
    pub fn add(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }

        let mut new_start = start;
        let mut new_end = end;

        // Everything starting at or before `end` that reaches `start` touches
        // the new range. Ends grow with starts, so walk backwards until one
        // falls short.
        let touching: Vec<(u64, u64)> = self
            .ranges
            .range(..=end)
            .rev()
            .take_while(|&(_, &e)| e >= start)
            .map(|(&s, &e)| (s, e))
            .collect();

        for (s, e) in touching {
            self.ranges.remove(&s);
            new_start = new_start.min(s);
            new_end = new_end.max(e);
        }

        self.ranges.insert(new_start, new_end);
    }

    /// Add every range of `other`.
    pub fn add_set(&mut self, other: &IntervalSet) {
        for range in other.iter() {
            self.add(range.start, range.end);
        }
    }

    /// Remove `[start, end)` from the set, splitting ranges as needed.
    pub fn remove(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }

        let overlapping: Vec<(u64, u64)> = self
            .ranges
            .range(..end)
            .rev()
            .take_while(|&(_, &e)| e > start)
            .map(|(&s, &e)| (s, e))
            .collect();

        for (s, e) in overlapping {
            self.ranges.remove(&s);
            if s < start {
                self.ranges.insert(s, start);
            }
            if e > end {
                self.ranges.insert(end, e);
            }
        }
    }

    /// Remove every range of `other` from `self`.
    pub fn difference(&mut self, other: &IntervalSet) {
        for range in other.iter() {
            self.remove(range.start, range.end);
        }
    }

    /// Keep only bytes that are also in `other`.
    pub fn intersection(&mut self, other: &IntervalSet) {
        let mut result = IntervalSet::new();
        for range in other.iter() {
            result.add_set(&self.intersect_range(range.start, range.end));
        }
        *self = result;
    }

    /// Portion of `self` that falls inside `[start, end)`.
    pub fn intersect_range(&self, start: u64, end: u64) -> IntervalSet {
        let mut result = IntervalSet::new();
        if start >= end {
            return result;
        }
        for (&s, &e) in self.ranges.range(..end).rev().take_while(|&(_, &e)| e > start) {
            result.ranges.insert(s.max(start), e.min(end));
        }
        result
    }

    /// True if any byte of `[start, end)` is in the set.
    pub fn intersects_range(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return false;
        }
        match self.ranges.range(..end).next_back() {
            Some((_, &e)) => e > start,
            None => false,
        }
    }

    /// True if any byte is in both sets.
    pub fn intersects(&self, other: &IntervalSet) -> bool {
        other.iter().any(|r| self.intersects_range(r.start, r.end))
    }

    /// True if every byte of `[start, end)` is in the set.
    pub fn contains_range(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return true;
        }
        match self.ranges.range(..=start).next_back() {
            Some((_, &e)) => e >= end,
            None => false,
        }
    }

    /// True if `value` is in the set.
    pub fn contains(&self, value: u64) -> bool {
        value < u64::MAX && self.contains_range(value, value + 1)
    }

    /// Replace the set with `[min, max)` minus its current contents.
    pub fn complement(&mut self, min: u64, max: u64) {
        let mut result = IntervalSet::from_range(min, max);
        result.difference(self);
        *self = result;
    }
}

impl<'a> IntoIterator for &'a IntervalSet {
    type Item = Range<u64>;
    type IntoIter = Box<dyn Iterator<Item = Range<u64>> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
