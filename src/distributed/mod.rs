//! Distributed redistribution runtime
//!
//! # Architecture
//!
//! Every participant runs one transport endpoint and, per exchange, one
//! coordinator. There is no central broker:
//!
//! - **Endpoint**: listener, sender and per-connection reader tasks moving
//!   tagged messages between mailboxes of peer endpoints
//! - **Coordinator**: registry of provider and consumer descriptors, per-round
//!   received blocks and the provider's single-assignment array cell
//! - **Exchange**: drives the metadata and data phases of one participant over
//!   an endpoint and a coordinator
//!
//! # Modules
//!
//! - `address`: published `host:port` of an endpoint
//! - `protocol`: wire framing, handshake and payload records
//! - `endpoint`: transport endpoint and mailboxes
//! - `coordinator`: redistribution coordinator
//! - `exchange`: exchange driver

pub mod address;
pub mod coordinator;
pub mod endpoint;
pub mod exchange;
pub mod protocol;

// Re-export key types
pub use address::EndpointAddress;
pub use coordinator::{AssembledArray, Overlap, Phase, ReceivedBlock, RedistributionCoordinator, Role};
pub use endpoint::{Endpoint, Mailbox, Message};
pub use exchange::Exchange;
pub use protocol::{DATA_MAILBOX, METADATA_MAILBOX, PROTOCOL_VERSION};
