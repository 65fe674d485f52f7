//! Exchange driver
//!
//! Ties one transport endpoint to one coordinator:
//!
//! - **Metadata phase**: the local descriptor is broadcast to every peer on
//!   the exchange's metadata mailbox; incoming adverts feed the coordinator.
//!   A participant that hears from a rank for the first time answers with its
//!   own advert, so peers that joined late still learn about each other.
//! - **Data phase**: a provider publishes its local array once per round and
//!   sends each overlapping consumer its region; a consumer's data pump hands
//!   arriving blocks to the coordinator.

use crate::config::ExchangeConfig;
use crate::distributed::address::EndpointAddress;
use crate::distributed::coordinator::{Advertised, AssembledArray, RedistributionCoordinator, Role};
use crate::distributed::endpoint::{Endpoint, Mailbox};
use crate::distributed::protocol::{self, BlockHeader, MetadataMessage};
use crate::distribution::layout;
use crate::error::{RedistError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One participant's side of a named exchange
pub struct Exchange {
    coordinator: Arc<RedistributionCoordinator>,
    endpoint: Arc<Endpoint>,
    peers: Vec<EndpointAddress>,
    config: ExchangeConfig,
    metadata: Mailbox,
    data: Mailbox,
    advert: Bytes,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Exchange {
    /// Create the driver and register its mailboxes on `endpoint`
    ///
    /// `peers` are the published addresses the local descriptor is announced
    /// to; the endpoint's own address is skipped if listed.
    pub fn new(
        coordinator: Arc<RedistributionCoordinator>,
        endpoint: Arc<Endpoint>,
        peers: Vec<EndpointAddress>,
        config: &ExchangeConfig,
    ) -> Result<Self> {
        let advert = protocol::encode_metadata(&MetadataMessage::Advertise {
            exchange: coordinator.name().to_string(),
            role: coordinator.role(),
            descriptor: coordinator.local().clone(),
        })?;

        let metadata = endpoint.mailbox(config.metadata_mailbox);
        let data = endpoint.mailbox(config.data_mailbox);

        Ok(Self {
            coordinator,
            endpoint,
            peers,
            config: config.clone(),
            metadata,
            data,
            advert: Bytes::from(advert),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn coordinator(&self) -> &Arc<RedistributionCoordinator> {
        &self.coordinator
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    fn remote_peers(&self) -> impl Iterator<Item = &EndpointAddress> {
        let own = self.endpoint.address();
        self.peers.iter().filter(move |p| *p != own)
    }

    async fn connect_with_retry(&self, peer: &EndpointAddress) -> Result<()> {
        let delay = Duration::from_millis(self.config.connect_retry_delay_ms);
        let mut attempt = 1;

        loop {
            match self.endpoint.connect(peer).await {
                Ok(()) => return Ok(()),
                Err(err) if matches!(err, RedistError::TransportSetup { .. }) && attempt < self.config.connect_retries => {
                    debug!(%peer, attempt, %err, "connect failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Broadcast the local descriptor to every peer
    ///
    /// Peers that are not listening yet are retried; giving up on one returns
    /// its setup error.
    pub async fn announce(&self) -> Result<()> {
        let mut sent = 0;
        for peer in self.remote_peers() {
            self.connect_with_retry(peer).await?;
            self.endpoint
                .send_shared(peer, self.config.metadata_mailbox, self.advert.clone())?;
            sent += 1;
        }

        info!(
            exchange = %self.coordinator.name(),
            role = %self.coordinator.role(),
            rank = self.coordinator.local().rank,
            peers = sent,
            "descriptor announced"
        );
        Ok(())
    }

    /// Apply incoming adverts and withdrawals to the coordinator
    pub fn spawn_metadata_pump(&self) {
        let coordinator = self.coordinator.clone();
        let endpoint = self.endpoint.clone();
        let mailbox = self.metadata.clone();
        let advert = self.advert.clone();

        let handle = tokio::spawn(async move {
            while let Ok(message) = mailbox.recv().await {
                let record = match protocol::decode_metadata(&message.payload) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(%err, sender = %message.sender, "ignoring metadata");
                        continue;
                    }
                };

                if record.exchange() != coordinator.name() {
                    debug!(exchange = record.exchange(), "metadata for another exchange");
                    continue;
                }

                match record {
                    MetadataMessage::Advertise { role, descriptor, .. } => {
                        let reply_to = descriptor.address.clone();
                        match coordinator.advertise(role, descriptor) {
                            Ok(Advertised::New) => {
                                if let Err(err) = endpoint.send_shared(&reply_to, mailbox.id(), advert.clone()) {
                                    debug!(%err, peer = %reply_to, "advert reply not sent");
                                }
                            }
                            Ok(Advertised::Replaced) => {}
                            Err(err) => warn!(%err, sender = %message.sender, "rejecting advert"),
                        }
                    }
                    MetadataMessage::Withdraw { role, rank, .. } => {
                        coordinator.withdraw(role, rank);
                    }
                }
            }

            debug!(exchange = %coordinator.name(), "metadata pump stopped");
        });

        self.tasks.lock().push(handle);
    }

    /// Hand arriving data blocks to the coordinator (consumer side)
    pub fn spawn_data_pump(&self) {
        let coordinator = self.coordinator.clone();
        let mailbox = self.data.clone();

        let handle = tokio::spawn(async move {
            while let Ok(message) = mailbox.recv().await {
                let (header, block) = match protocol::decode_block(message.payload) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!(%err, sender = %message.sender, "ignoring data block");
                        continue;
                    }
                };

                if header.exchange != coordinator.name() {
                    debug!(exchange = %header.exchange, "block for another exchange");
                    continue;
                }

                if header.round < coordinator.round() {
                    warn!(
                        provider = header.provider_rank,
                        round = header.round,
                        current = coordinator.round(),
                        "dropping stale block"
                    );
                    continue;
                }

                if let Some(rank) = coordinator.provider_rank_of(&message.sender) {
                    if rank != header.provider_rank {
                        warn!(
                            sender = %message.sender,
                            advertised = rank,
                            claimed = header.provider_rank,
                            "block rank differs from advertised rank"
                        );
                    }
                }

                coordinator.mark_received(header.provider_rank, header.round, block);
            }

            debug!(exchange = %coordinator.name(), "data pump stopped");
        });

        self.tasks.lock().push(handle);
    }

    /// Send this round's array to every overlapping consumer (provider side)
    ///
    /// The first call in a round publishes `data` and sends it. Later calls
    /// in the same round send nothing and return 0. Returns the number of
    /// consumers sent to.
    pub async fn deliver(&self, data: Bytes, element_size: usize) -> Result<usize> {
        self.coordinator.wait_for_metadata().await?;

        let round = self.coordinator.round();
        let (array, first) = self.coordinator.set_array(data);
        if !first {
            debug!(exchange = %self.coordinator.name(), round, "array already delivered this round");
            return Ok(0);
        }

        let local = self.coordinator.local();
        let destinations = self.coordinator.destinations()?;

        for destination in &destinations {
            let packed = layout::extract(local, &destination.region, element_size, &array)?;
            let header = BlockHeader {
                exchange: self.coordinator.name().to_string(),
                provider_rank: local.rank,
                round,
            };
            let block = protocol::encode_block(&header, &packed)?;

            debug!(
                consumer = destination.peer.rank,
                peer = %destination.peer.address,
                region = %destination.region,
                bytes = packed.len(),
                "sending block"
            );
            self.endpoint
                .send(&destination.peer.address, self.config.data_mailbox, block)?;
        }

        self.coordinator.mark_delivered();
        info!(
            exchange = %self.coordinator.name(),
            rank = local.rank,
            round,
            destinations = destinations.len(),
            "round delivered"
        );

        Ok(destinations.len())
    }

    /// Wait for this round's blocks (consumer side)
    pub async fn collect(&self) -> Result<Option<AssembledArray>> {
        self.coordinator.wait_for_complete_array().await
    }

    /// Start the next round (provider side)
    pub fn finish_round(&self) {
        self.coordinator.reset_round();
    }

    /// Tell every peer this participant is leaving
    pub fn withdraw(&self) -> Result<()> {
        let payload = Bytes::from(protocol::encode_metadata(&MetadataMessage::Withdraw {
            exchange: self.coordinator.name().to_string(),
            role: self.coordinator.role(),
            rank: self.coordinator.local().rank,
        })?);

        for peer in self.remote_peers() {
            self.endpoint
                .send_shared(peer, self.config.metadata_mailbox, payload.clone())?;
        }
        Ok(())
    }

    /// Wake the coordinator's waiters and stop the pumps
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    pub fn role(&self) -> Role {
        self.coordinator.role()
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}
