//! redist - Peer-to-peer redistribution of strided arrays
//!
//! A provider group of processes, each owning a strided block of a shared
//! N-dimensional array, delivers that array to a consumer group that splits it
//! differently. Each consumer receives exactly the regions it overlaps, from
//! exactly the providers it overlaps, with no central broker.
//!
//! # Architecture
//!
//! - **Distribution**: strided per-axis index ranges, exact overlap via
//!   GCD/LCM/CRT, row-major packing of overlap regions
//! - **Transport**: TCP endpoints with addressable mailboxes and a framed
//!   MessagePack wire format
//! - **Coordination**: metadata phase, per-round completion tracking and the
//!   provider's single-assignment array cell
//! - **Exchange**: one participant's driver tying the above together

pub mod config;
pub mod distributed;
pub mod distribution;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{Endpoint, Exchange, RedistributionCoordinator, Role};
pub use distribution::{DistributionDescriptor, Index};
pub use error::{RedistError, Result};
