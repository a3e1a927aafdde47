//! Compact range set over sequential numbers
//!
//! Backs every allocation window: the agent's per-channel pool and the
//! depot's per-channel and per-agent given ranges. Ranges are half-open,
//! disjoint and never adjacent (adjacent ranges are coalesced).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRangeSet {
    /// begin → end (exclusive)
    ranges: BTreeMap<u64, u64>,
    /// Number of points covered
    count: u64,
}

impl IdRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_range(begin: u64, end: u64) -> Self {
        let mut set = Self::new();
        set.add_range(begin, end);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of points in the set
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn contains(&self, value: u64) -> bool {
        self.ranges
            .range(..=value)
            .next_back()
            .map_or(false, |(_, &end)| value < end)
    }

    pub fn min(&self) -> Option<u64> {
        self.ranges.keys().next().copied()
    }

    /// Add `[begin, end)`, merging with overlapping or adjacent ranges
    pub fn add_range(&mut self, begin: u64, end: u64) {
        if begin >= end {
            return;
        }
        let (mut begin, mut end) = (begin, end);

        if let Some((&s, &e)) = self.ranges.range(..=begin).next_back() {
            if e >= begin {
                begin = s;
                end = end.max(e);
                self.ranges.remove(&s);
                self.count -= e - s;
            }
        }

        while let Some((&s, &e)) = self.ranges.range(begin..).next() {
            if s > end {
                break;
            }
            end = end.max(e);
            self.ranges.remove(&s);
            self.count -= e - s;
        }

        self.ranges.insert(begin, end);
        self.count += end - begin;
    }

    pub fn add_point(&mut self, value: u64) {
        self.add_range(value, value.saturating_add(1));
    }

    /// Remove `[begin, end)`; points not present are ignored
    pub fn remove_range(&mut self, begin: u64, end: u64) {
        if begin >= end {
            return;
        }
        let overlapping: Vec<(u64, u64)> = self
            .ranges
            .range(..end)
            .rev()
            .take_while(|entry| *entry.1 > begin)
            .map(|(&s, &e)| (s, e))
            .collect();

        for (s, e) in overlapping {
            self.ranges.remove(&s);
            self.count -= e - s;
            if s < begin {
                self.ranges.insert(s, begin);
                self.count += begin - s;
            }
            if e > end {
                self.ranges.insert(end, e);
                self.count += e - end;
            }
        }
    }

    /// Remove a single point.
    ///
    /// Returns `None` when the point was not in the set, otherwise whether it
    /// was the minimum before removal.
    pub fn remove_point(&mut self, value: u64) -> Option<bool> {
        if !self.contains(value) {
            return None;
        }
        let was_least = self.min() == Some(value);
        self.remove_range(value, value.saturating_add(1));
        Some(was_least)
    }

    /// Take the smallest point out of the set
    pub fn pop_min(&mut self) -> Option<u64> {
        let value = self.min()?;
        self.remove_range(value, value + 1);
        Some(value)
    }

    /// Drop every point below `valid_since` and return the dropped part
    pub fn trim(&mut self, valid_since: u64) -> IdRangeSet {
        let kept = self.ranges.split_off(&valid_since);
        let mut low = std::mem::replace(&mut self.ranges, kept);

        if let Some((&s, &e)) = low.iter().next_back() {
            if e > valid_since {
                low.insert(s, valid_since);
                self.ranges.insert(valid_since, e);
            }
        }

        let removed_count: u64 = low.iter().map(|(s, e)| e - s).sum();
        self.count -= removed_count;
        IdRangeSet {
            ranges: low,
            count: removed_count,
        }
    }

    /// Remove every point of `other` from this set
    pub fn subtract(&mut self, other: &IdRangeSet) {
        for (begin, end) in other.iter_ranges() {
            self.remove_range(begin, end);
        }
    }

    /// Iterate over `[begin, end)` ranges in ascending order
    pub fn iter_ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranges.iter().map(|(&s, &e)| (s, e))
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
        self.count = 0;
    }
}

impl fmt::Display for IdRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (s, e)) in self.iter_ranges().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}-{}", s, e)?;
        }
        write!(f, "]")
    }
}
