//! Array distribution descriptors
//!
//! This module describes how a shared logical N-dimensional array is split
//! between the participants of a redistribution, and computes where two such
//! splits overlap.
//!
//! # Model
//!
//! - **Index**: one strided range `first..=last` step `stride` along one axis
//! - **DistributionDescriptor**: one `Index` per axis plus the owning endpoint
//!   address and participant rank
//! - **Overlap**: the intersection of two descriptors, computed axis by axis
//!   with GCD/LCM and the Chinese Remainder Theorem
//! - **Layout**: moving the elements of an overlap region between the
//!   row-major local buffers of two participants
//!
//! # Example
//!
//! ```
//! use redist::distribution::{DistributionDescriptor, Index, overlap};
//! use redist::distributed::EndpointAddress;
//!
//! let provider = DistributionDescriptor::new(
//!     0,
//!     EndpointAddress::new("node-a", 7000),
//!     vec![Index::new(0, 9, 1)],
//! );
//! let consumer = DistributionDescriptor::new(
//!     0,
//!     EndpointAddress::new("node-b", 7001),
//!     vec![Index::new(5, 14, 1)],
//! );
//!
//! let region = overlap::intersect(&provider, &consumer).unwrap();
//! assert_eq!(region.axes, vec![Index::new(5, 9, 1)]);
//! ```

pub mod descriptor;
pub mod index;
pub mod layout;
pub mod overlap;

pub use descriptor::{DistributionDescriptor, Points};
pub use index::Index;
pub use overlap::{intersect, is_intersecting};
