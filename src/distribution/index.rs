//! Strided index range along one axis

use serde::{Deserialize, Serialize};
use std::fmt;

/// One arithmetic progression `first, first + stride, ..., last`
///
/// The constructor normalizes the range so that `first <= last` and `last`
/// is an actual member of the progression. An empty range (`first > last`) is
/// only ever produced by the overlap calculator, through [`Index::empty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    pub first: u64,
    pub last: u64,
    pub stride: u64,
}

impl Index {
    /// Create a normalized index range
    ///
    /// Swaps `first` and `last` if given in descending order and snaps `last`
    /// down onto the progression. A zero stride is treated as 1.
    pub fn new(first: u64, last: u64, stride: u64) -> Self {
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        let stride = stride.max(1);
        let last = first + (last - first) / stride * stride;

        Self { first, last, stride }
    }

    /// A single-element range
    pub fn single(value: u64) -> Self {
        Self::new(value, value, 1)
    }

    /// The empty range
    pub fn empty() -> Self {
        Self {
            first: 1,
            last: 0,
            stride: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first > self.last
    }

    /// Number of points in the progression
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.last - self.first) / self.stride + 1
        }
    }

    pub fn contains(&self, value: u64) -> bool {
        !self.is_empty()
            && value >= self.first
            && value <= self.last
            && (value - self.first) % self.stride == 0
    }

    /// Position of `value` within the progression (0 for `first`)
    pub fn position(&self, value: u64) -> Option<u64> {
        if self.contains(value) {
            Some((value - self.first) / self.stride)
        } else {
            None
        }
    }

    /// Iterate over the members of the progression
    pub fn iter(&self) -> impl Iterator<Item = u64> {
        let stride = self.stride;
        let count = self.len();
        let first = self.first;
        (0..count).map(move |k| first + k * stride)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[]")
        } else {
            write!(f, "[{}..={}; {}]", self.first, self.last, self.stride)
        }
    }
}
