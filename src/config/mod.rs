//! Configuration module
//!
//! Handles CLI argument parsing, TOML scenario files, and validation.
//!
//! A scenario file names one exchange, the provider and consumer groups with
//! their per-axis decompositions, and the endpoint settings:
//!
//! ```toml
//! [exchange]
//! name = "pressure"
//! rounds = 3
//! element_size = 8
//!
//! [endpoint]
//! bind_host = "0.0.0.0"
//!
//! [[providers]]
//! rank = 0
//! address = "10.0.1.10:7000"
//! axes = [{ first = 0, last = 9 }]
//!
//! [[consumers]]
//! rank = 0
//! address = "10.0.1.20:7000"
//! axes = [{ first = 5, last = 14 }]
//! ```

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use crate::distributed::address::EndpointAddress;
use crate::distributed::protocol::{DATA_MAILBOX, METADATA_MAILBOX};
use crate::distribution::{DistributionDescriptor, Index};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Complete scenario configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub providers: Vec<ParticipantConfig>,
    #[serde(default)]
    pub consumers: Vec<ParticipantConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Built-in scenario used when no file is given
    ///
    /// Two providers split `0..=19`; consumer 0 straddles both, consumer 1
    /// takes every third element, consumer 2 lies outside the array and
    /// receives nothing.
    pub fn demo() -> Self {
        let axis = |first, last, stride| AxisConfig { first, last, stride };
        Self {
            exchange: ExchangeConfig::default(),
            endpoint: EndpointConfig::default(),
            providers: vec![
                ParticipantConfig::new(0, vec![axis(0, 9, 1)]),
                ParticipantConfig::new(1, vec![axis(10, 19, 1)]),
            ],
            consumers: vec![
                ParticipantConfig::new(0, vec![axis(5, 14, 1)]),
                ParticipantConfig::new(1, vec![axis(1, 19, 3)]),
                ParticipantConfig::new(2, vec![axis(20, 29, 1)]),
            ],
            runtime: RuntimeConfig::default(),
        }
    }

    /// Total number of descriptors the metadata phase waits for
    pub fn participant_count(&self) -> usize {
        self.providers.len() + self.consumers.len()
    }
}

/// Exchange-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Name shared by all participants of the collective exchange
    #[serde(default = "default_exchange_name")]
    pub name: String,
    /// Number of redistribution rounds to run
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Bytes per array element
    #[serde(default = "default_element_size")]
    pub element_size: usize,
    /// Mailbox carrying descriptor advertisements
    #[serde(default = "default_metadata_mailbox")]
    pub metadata_mailbox: u32,
    /// Mailbox carrying data blocks
    #[serde(default = "default_data_mailbox")]
    pub data_mailbox: u32,
    /// Connection attempts per peer while announcing
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// Delay between connection attempts (milliseconds)
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
}

fn default_exchange_name() -> String {
    "redist".to_string()
}

fn default_rounds() -> u32 {
    1
}

fn default_element_size() -> usize {
    8
}

fn default_metadata_mailbox() -> u32 {
    METADATA_MAILBOX
}

fn default_data_mailbox() -> u32 {
    DATA_MAILBOX
}

fn default_connect_retries() -> u32 {
    20
}

fn default_connect_retry_delay_ms() -> u64 {
    250
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: default_exchange_name(),
            rounds: default_rounds(),
            element_size: default_element_size(),
            metadata_mailbox: default_metadata_mailbox(),
            data_mailbox: default_data_mailbox(),
            connect_retries: default_connect_retries(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
        }
    }
}

/// Transport endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Interface to bind the listener to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Listening port (0 = ephemeral)
    #[serde(default)]
    pub port: u16,
    /// Host published to peers (defaults to the bind host, or the machine's
    /// hostname when binding a wildcard address)
    pub advertise_host: Option<String>,
    /// Listener poll interval used to observe shutdown (milliseconds)
    #[serde(default = "default_accept_poll_interval_ms")]
    pub accept_poll_interval_ms: u64,
    /// Largest accepted payload (bytes)
    #[serde(default = "default_max_payload")]
    pub max_payload: u64,
    /// Time allowed for draining the send queue on close (milliseconds)
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_accept_poll_interval_ms() -> u64 {
    100
}

fn default_max_payload() -> u64 {
    256 * 1024 * 1024
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port: 0,
            advertise_host: None,
            accept_poll_interval_ms: default_accept_poll_interval_ms(),
            max_payload: default_max_payload(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// One participant of a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// Rank within the provider or consumer group
    pub rank: u32,
    /// Published endpoint address (participant mode only)
    pub address: Option<String>,
    /// Per-axis decomposition
    pub axes: Vec<AxisConfig>,
}

impl ParticipantConfig {
    pub fn new(rank: u32, axes: Vec<AxisConfig>) -> Self {
        Self {
            rank,
            address: None,
            axes,
        }
    }

    /// Normalized index ranges
    pub fn indices(&self) -> Vec<Index> {
        self.axes.iter().map(AxisConfig::to_index).collect()
    }

    /// Descriptor owned by the endpoint at `address`
    pub fn descriptor(&self, address: EndpointAddress) -> DistributionDescriptor {
        DistributionDescriptor::new(self.rank, address, self.indices())
    }
}

/// One strided axis range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub first: u64,
    pub last: u64,
    #[serde(default = "default_stride")]
    pub stride: u64,
}

fn default_stride() -> u64 {
    1
}

impl AxisConfig {
    pub fn to_index(&self) -> Index {
        Index::new(self.first, self.last, self.stride)
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Validate and print the scenario without running it
    #[serde(default)]
    pub dry_run: bool,
    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

// Display trait implementations

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Exchange: {}", self.exchange)?;
        writeln!(f, "  Endpoint: {}", self.endpoint)?;
        for p in &self.providers {
            writeln!(f, "  Provider {}", p)?;
        }
        for c in &self.consumers {
            writeln!(f, "  Consumer {}", c)?;
        }
        Ok(())
    }
}

impl fmt::Display for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} round(s), {}-byte elements, mailboxes meta={} data={})",
            self.name, self.rounds, self.element_size, self.metadata_mailbox, self.data_mailbox
        )
    }
}

impl fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bind={}:{}", self.bind_host, self.port)?;
        if let Some(ref host) = self.advertise_host {
            write!(f, ", advertise={}", host)?;
        }
        write!(f, ", max_payload={}", self.max_payload)
    }
}

impl fmt::Display for ParticipantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.rank)?;
        for index in self.indices() {
            write!(f, " {}", index)?;
        }
        if let Some(ref address) = self.address {
            write!(f, " @ {}", address)?;
        }
        Ok(())
    }
}
