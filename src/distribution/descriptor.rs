//! N-dimensional distribution descriptor

use crate::distributed::address::EndpointAddress;
use crate::distribution::Index;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A participant's share of the logical array
///
/// One strided [`Index`] per axis, in row-major order (the last axis varies
/// fastest in local buffers), together with the endpoint that owns the data
/// and the participant's rank within its group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionDescriptor {
    /// Participant rank within its group
    pub rank: u32,

    /// Endpoint that owns (provider) or receives (consumer) this block
    pub address: EndpointAddress,

    /// One strided range per axis
    pub axes: Vec<Index>,
}

impl DistributionDescriptor {
    pub fn new(rank: u32, address: EndpointAddress, axes: Vec<Index>) -> Self {
        Self { rank, address, axes }
    }

    /// Number of axes
    pub fn dimensions(&self) -> usize {
        self.axes.len()
    }

    /// True if any axis is empty
    pub fn is_empty(&self) -> bool {
        self.axes.iter().any(Index::is_empty)
    }

    /// Number of array elements covered
    pub fn len(&self) -> u64 {
        self.axes.iter().map(Index::len).product()
    }

    /// Per-axis point counts, i.e. the shape of the local buffer
    pub fn shape(&self) -> Vec<u64> {
        self.axes.iter().map(Index::len).collect()
    }

    pub fn contains(&self, point: &[u64]) -> bool {
        point.len() == self.axes.len()
            && self.axes.iter().zip(point).all(|(axis, &v)| axis.contains(v))
    }

    /// Row-major element offset of a global point inside this block
    pub fn local_offset(&self, point: &[u64]) -> Option<u64> {
        if point.len() != self.axes.len() {
            return None;
        }

        let mut offset = 0u64;
        for (axis, &value) in self.axes.iter().zip(point) {
            offset = offset * axis.len() + axis.position(value)?;
        }
        Some(offset)
    }

    /// Iterate over all global points in row-major order
    pub fn points(&self) -> Points<'_> {
        Points::new(&self.axes)
    }
}

impl fmt::Display for DistributionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {}@{} ", self.rank, self.address)?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, "x")?;
            }
            write!(f, "{}", axis)?;
        }
        Ok(())
    }
}

/// Row-major iterator over the points of a descriptor
pub struct Points<'a> {
    axes: &'a [Index],
    current: Option<Vec<u64>>,
}

impl<'a> Points<'a> {
    fn new(axes: &'a [Index]) -> Self {
        let current = if axes.iter().any(Index::is_empty) {
            None
        } else {
            Some(axes.iter().map(|a| a.first).collect())
        };
        Self { axes, current }
    }
}

impl Iterator for Points<'_> {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Vec<u64>> {
        let point = self.current.take()?;

        // Odometer step: bump the last axis, carry into earlier ones
        let mut next = point.clone();
        for axis in (0..self.axes.len()).rev() {
            let index = &self.axes[axis];
            // Overflow past u64::MAX is a carry like stepping past `last`
            if let Some(step) = next[axis].checked_add(index.stride).filter(|&v| v <= index.last) {
                next[axis] = step;
                self.current = Some(next);
                return Some(point);
            }
            next[axis] = index.first;
        }

        Some(point)
    }
}
