//! Redistribution coordinator
//!
//! Tracks one collective redistribution between a provider group and a
//! consumer group, as seen from one participant.
//!
//! # Round Lifecycle
//!
//! ```text
//! CollectingMetadata --metadata_complete--> Ready --first block / set_array--> Exchanging
//!        ^                                    ^                                     |
//!        |                                    +------ reset_round / next block -----+--> Complete
//! ```
//!
//! Metadata is collected once. After it is complete only data re-blocks:
//! a consumer waits until every provider whose descriptor overlaps its own has
//! delivered a block, a provider publishes its array once per round through
//! a single-assignment cell.
//!
//! # Waking
//!
//! `mark_received` wakes one waiter without telling it which rank arrived.
//! Waiters re-scan the whole pending set on every wake, so racing signals
//! never cause a missed or mismatched completion.

use crate::distributed::address::EndpointAddress;
use crate::distribution::{layout, overlap, DistributionDescriptor};
use crate::error::{RedistError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Side of the exchange a participant is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Provider,
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Provider => write!(f, "provider"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CollectingMetadata,
    Ready,
    Exchanging,
    Complete,
}

/// Outcome of [`RedistributionCoordinator::advertise`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advertised {
    New,
    Replaced,
}

/// A remote descriptor that overlaps the local one
#[derive(Debug, Clone, PartialEq)]
pub struct Overlap {
    pub peer: DistributionDescriptor,
    /// Points owned by both sides, carrying the peer's rank and address
    pub region: DistributionDescriptor,
}

/// One provider's contribution to an assembled array
#[derive(Debug, Clone)]
pub struct ReceivedBlock {
    pub provider_rank: u32,
    pub region: DistributionDescriptor,
    /// Region elements packed row-major
    pub payload: Bytes,
}

/// Everything a consumer received in one round
#[derive(Debug, Clone)]
pub struct AssembledArray {
    pub round: u64,
    pub blocks: Vec<ReceivedBlock>,
}

impl AssembledArray {
    /// Unpack every block into the consumer's local buffer
    pub fn scatter_into(&self, local: &DistributionDescriptor, element_size: usize, out: &mut [u8]) -> Result<()> {
        for block in &self.blocks {
            layout::scatter(local, &block.region, element_size, &block.payload, out)?;
        }
        Ok(())
    }

    /// Local buffer with every received region filled in, zeros elsewhere
    pub fn to_local(&self, local: &DistributionDescriptor, element_size: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; local.len() as usize * element_size];
        self.scatter_into(local, element_size, &mut out)?;
        Ok(out)
    }

    /// Number of elements received this round
    pub fn element_count(&self) -> u64 {
        self.blocks.iter().map(|b| b.region.len()).sum()
    }
}

struct State {
    providers: BTreeMap<u32, DistributionDescriptor>,
    consumers: BTreeMap<u32, DistributionDescriptor>,
    expected: Option<usize>,
    /// Blocks per provider rank, oldest first
    received: HashMap<u32, VecDeque<(u64, Bytes)>>,
    round: u64,
    phase: Phase,
}

impl State {
    fn group(&self, role: Role) -> &BTreeMap<u32, DistributionDescriptor> {
        match role {
            Role::Provider => &self.providers,
            Role::Consumer => &self.consumers,
        }
    }

    fn group_mut(&mut self, role: Role) -> &mut BTreeMap<u32, DistributionDescriptor> {
        match role {
            Role::Provider => &mut self.providers,
            Role::Consumer => &mut self.consumers,
        }
    }

    fn registered(&self) -> usize {
        self.providers.len() + self.consumers.len()
    }
}

enum Progress {
    NoSources,
    Pending(Vec<u32>),
    Complete(AssembledArray),
}

/// Coordinator for one participant of a named exchange
pub struct RedistributionCoordinator {
    name: String,
    role: Role,
    local: DistributionDescriptor,
    state: Mutex<State>,
    metadata_ready: watch::Sender<bool>,
    data_ready: Notify,
    array: watch::Sender<Option<Bytes>>,
    shutdown: CancellationToken,
}

impl RedistributionCoordinator {
    /// Create a coordinator; `local` is registered under `role` right away
    pub fn new(name: impl Into<String>, role: Role, local: DistributionDescriptor) -> Self {
        let mut state = State {
            providers: BTreeMap::new(),
            consumers: BTreeMap::new(),
            expected: None,
            received: HashMap::new(),
            round: 0,
            phase: Phase::CollectingMetadata,
        };
        state.group_mut(role).insert(local.rank, local.clone());

        Self {
            name: name.into(),
            role,
            local,
            state: Mutex::new(state),
            metadata_ready: watch::Sender::new(false),
            data_ready: Notify::new(),
            array: watch::Sender::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local(&self) -> &DistributionDescriptor {
        &self.local
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Rounds completed so far
    pub fn round(&self) -> u64 {
        self.state.lock().round
    }

    /// Register a participant's descriptor
    ///
    /// Re-advertising a rank replaces its entry (reconnection). Doing so while
    /// a round is in flight is logged as a [`RedistError::DuplicateAdvertise`]
    /// warning, the new descriptor still wins.
    pub fn advertise(&self, role: Role, descriptor: DistributionDescriptor) -> Result<Advertised> {
        if descriptor.dimensions() != self.local.dimensions() {
            return Err(RedistError::MismatchedDimensionality {
                left: self.local.dimensions(),
                right: descriptor.dimensions(),
            });
        }

        let mut state = self.state.lock();
        let rank = descriptor.rank;
        let previous = state.group_mut(role).insert(rank, descriptor);

        let outcome = match previous {
            Some(_) if state.phase == Phase::Exchanging => {
                let err = RedistError::DuplicateAdvertise {
                    name: self.name.clone(),
                    rank,
                };
                warn!(%err, %role, "replacing descriptor");
                Advertised::Replaced
            }
            Some(_) => {
                debug!(exchange = %self.name, %role, rank, "descriptor replaced");
                Advertised::Replaced
            }
            None => {
                debug!(exchange = %self.name, %role, rank, registered = state.registered(), "descriptor registered");
                Advertised::New
            }
        };

        self.check_metadata(&mut state);
        drop(state);

        // A replaced provider may change which blocks a consumer waits for
        self.data_ready.notify_waiters();
        Ok(outcome)
    }

    /// Remove a participant's descriptor
    ///
    /// The local descriptor cannot be withdrawn. Returns whether an entry was
    /// removed.
    pub fn withdraw(&self, role: Role, rank: u32) -> bool {
        if role == self.role && rank == self.local.rank {
            return false;
        }

        let removed = {
            let mut state = self.state.lock();
            let removed = state.group_mut(role).remove(&rank).is_some();
            if removed && role == Role::Provider {
                state.received.remove(&rank);
            }
            removed
        };

        if removed {
            info!(exchange = %self.name, %role, rank, "descriptor withdrawn");
            self.data_ready.notify_waiters();
        }
        removed
    }

    /// Release metadata waiters once `expected` descriptors are registered
    ///
    /// Counts both groups, including the local descriptor. Once released,
    /// metadata stays released for every later round.
    pub fn metadata_complete(&self, expected: usize) {
        let mut state = self.state.lock();
        state.expected = Some(expected);
        self.check_metadata(&mut state);
    }

    fn check_metadata(&self, state: &mut State) {
        if *self.metadata_ready.borrow() {
            return;
        }

        let Some(expected) = state.expected else {
            return;
        };

        if state.registered() >= expected {
            if state.phase == Phase::CollectingMetadata {
                state.phase = Phase::Ready;
            }
            self.metadata_ready.send_replace(true);
            info!(
                exchange = %self.name,
                providers = state.providers.len(),
                consumers = state.consumers.len(),
                "metadata complete"
            );
        }
    }

    pub fn is_metadata_complete(&self) -> bool {
        *self.metadata_ready.borrow()
    }

    /// Wait until metadata is complete
    pub async fn wait_for_metadata(&self) -> Result<()> {
        let mut ready = self.metadata_ready.subscribe();
        let released = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            released = async { ready.wait_for(|r| *r).await.is_ok() } => released,
        };

        if released {
            Ok(())
        } else {
            Err(RedistError::Shutdown)
        }
    }

    /// Registered descriptors of one group, ordered by rank
    pub fn descriptors(&self, role: Role) -> Vec<DistributionDescriptor> {
        self.state.lock().group(role).values().cloned().collect()
    }

    fn overlaps(&self, role: Role) -> Result<Vec<Overlap>> {
        let peers = self.descriptors(role);
        let mut found = Vec::new();
        for peer in peers {
            let region = overlap::intersect(&self.local, &peer)?;
            if !region.is_empty() {
                found.push(Overlap { peer, region });
            }
        }
        Ok(found)
    }

    /// Consumers whose descriptor overlaps the local one (provider side)
    pub fn destinations(&self) -> Result<Vec<Overlap>> {
        self.overlaps(Role::Consumer)
    }

    /// Providers whose descriptor overlaps the local one (consumer side)
    pub fn sources(&self) -> Result<Vec<Overlap>> {
        self.overlaps(Role::Provider)
    }

    /// Rank of the provider published at `address`
    pub fn provider_rank_of(&self, address: &EndpointAddress) -> Option<u32> {
        self.state
            .lock()
            .providers
            .values()
            .find(|d| d.address == *address)
            .map(|d| d.rank)
    }

    /// Record that provider `rank` delivered its block for `round`
    ///
    /// Blocks for later rounds are queued until their round comes up. Blocks
    /// for rounds already consumed are discarded when the next round is
    /// assembled.
    pub fn mark_received(&self, rank: u32, round: u64, payload: Bytes) {
        {
            let mut state = self.state.lock();
            let queue = state.received.entry(rank).or_default();
            queue.push_back((round, payload));
            let queued = queue.len();
            if matches!(state.phase, Phase::Ready | Phase::Complete) {
                state.phase = Phase::Exchanging;
            }
            debug!(exchange = %self.name, rank, block_round = round, queued, round = state.round, "block received");
        }
        self.data_ready.notify_one();
    }

    /// Whether a block from `rank` for the current round is waiting
    pub fn is_received(&self, rank: u32) -> bool {
        let state = self.state.lock();
        state
            .received
            .get(&rank)
            .is_some_and(|q| q.iter().any(|(round, _)| *round == state.round))
    }

    /// Overlapping providers that have not delivered this round
    pub fn pending(&self) -> Result<Vec<u32>> {
        match self.progress(false)? {
            Progress::NoSources => Ok(Vec::new()),
            Progress::Pending(ranks) => Ok(ranks),
            Progress::Complete(_) => Ok(Vec::new()),
        }
    }

    /// Scan the whole pending set; with `take`, consume a complete round
    fn progress(&self, take: bool) -> Result<Progress> {
        let mut state = self.state.lock();

        let mut sources = Vec::new();
        for provider in state.providers.values() {
            let region = overlap::intersect(&self.local, provider)?;
            if !region.is_empty() {
                sources.push((provider.rank, region));
            }
        }

        if sources.is_empty() {
            return Ok(Progress::NoSources);
        }

        let current = state.round;
        for (rank, queue) in state.received.iter_mut() {
            while queue.front().is_some_and(|(round, _)| *round < current) {
                if let Some((round, _)) = queue.pop_front() {
                    warn!(exchange = %self.name, rank = *rank, round, current, "discarding block from a finished round");
                }
            }
        }

        let missing: Vec<u32> = sources
            .iter()
            .filter(|(rank, _)| {
                !state
                    .received
                    .get(rank)
                    .and_then(VecDeque::front)
                    .is_some_and(|(round, _)| *round == current)
            })
            .map(|(rank, _)| *rank)
            .collect();

        if !missing.is_empty() || !take {
            return Ok(Progress::Pending(missing));
        }

        let round = current;
        let mut blocks = Vec::with_capacity(sources.len());
        for (rank, region) in sources {
            if let Some((_, payload)) = state.received.get_mut(&rank).and_then(VecDeque::pop_front) {
                blocks.push(ReceivedBlock {
                    provider_rank: rank,
                    region,
                    payload,
                });
            }
        }

        state.round += 1;
        state.phase = Phase::Complete;
        info!(exchange = %self.name, round, blocks = blocks.len(), "array complete");

        Ok(Progress::Complete(AssembledArray { round, blocks }))
    }

    /// Wait until every overlapping provider has delivered this round
    ///
    /// Waits for metadata first. Returns `Ok(None)` right away when no
    /// provider overlaps the local descriptor. There is no timeout: a
    /// provider that never delivers blocks the caller until shutdown.
    pub async fn wait_for_complete_array(&self) -> Result<Option<AssembledArray>> {
        self.wait_for_metadata().await?;

        loop {
            // Register interest before scanning so a signal between the scan
            // and the wait is not lost
            let notified = self.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.progress(true)? {
                Progress::NoSources => {
                    debug!(exchange = %self.name, "no overlapping provider");
                    return Ok(None);
                }
                Progress::Complete(array) => return Ok(Some(array)),
                Progress::Pending(missing) => {
                    debug!(exchange = %self.name, ?missing, "waiting for blocks");
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(RedistError::Shutdown),
                _ = &mut notified => {}
            }
        }
    }

    /// Publish this round's array; the first call wins
    ///
    /// Returns the stored value and whether this call stored it. The value
    /// is `value` for the first caller and the earlier value for everyone
    /// after it until [`reset_round`].
    ///
    /// [`reset_round`]: RedistributionCoordinator::reset_round
    pub fn set_array(&self, value: Bytes) -> (Bytes, bool) {
        let mut stored = None;
        let first = self.array.send_if_modified(|slot| match slot {
            Some(existing) => {
                stored = Some(existing.clone());
                false
            }
            None => {
                *slot = Some(value.clone());
                true
            }
        });

        if first {
            let mut state = self.state.lock();
            if state.phase != Phase::CollectingMetadata {
                state.phase = Phase::Exchanging;
            }
            debug!(exchange = %self.name, round = state.round, len = value.len(), "array published");
        }

        (stored.unwrap_or(value), first)
    }

    /// Wait for this round's array
    pub async fn get_array_wait(&self) -> Result<Bytes> {
        let mut slot = self.array.subscribe();
        let value = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            value = async { slot.wait_for(Option::is_some).await.ok().and_then(|v| v.clone()) } => value,
        };

        value.ok_or(RedistError::Shutdown)
    }

    /// Provider side: every destination has been sent this round's block
    pub fn mark_delivered(&self) {
        let mut state = self.state.lock();
        if state.phase == Phase::Exchanging {
            state.phase = Phase::Complete;
        }
    }

    /// Provider side: clear the array cell and start the next round
    pub fn reset_round(&self) {
        self.array.send_replace(None);

        let mut state = self.state.lock();
        state.round += 1;
        if state.phase != Phase::CollectingMetadata {
            state.phase = Phase::Ready;
        }
        debug!(exchange = %self.name, round = state.round, "round reset");
    }

    /// Wake every waiter with [`RedistError::Shutdown`]
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.data_ready.notify_waiters();
        info!(exchange = %self.name, "coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Index;
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn desc(rank: u32, port: u16, axes: Vec<Index>) -> DistributionDescriptor {
        DistributionDescriptor::new(rank, EndpointAddress::new("127.0.0.1", port), axes)
    }

    fn line(first: u64, last: u64, stride: u64) -> Vec<Index> {
        vec![Index::new(first, last, stride)]
    }

    /// Consumer `[5, 14]` against providers `[0, 9]` and `[10, 19]`
    fn straddling_consumer() -> Arc<RedistributionCoordinator> {
        let c = RedistributionCoordinator::new("test", Role::Consumer, desc(0, 8000, line(5, 14, 1)));
        c.advertise(Role::Provider, desc(0, 7000, line(0, 9, 1))).unwrap();
        c.advertise(Role::Provider, desc(1, 7001, line(10, 19, 1))).unwrap();
        c.metadata_complete(3);
        Arc::new(c)
    }

    #[test]
    fn test_metadata_completion() {
        let c = RedistributionCoordinator::new("test", Role::Consumer, desc(0, 8000, line(5, 14, 1)));
        assert_eq!(c.phase(), Phase::CollectingMetadata);

        c.metadata_complete(3);
        assert!(!c.is_metadata_complete());

        c.advertise(Role::Provider, desc(0, 7000, line(0, 9, 1))).unwrap();
        assert!(!c.is_metadata_complete());
        c.advertise(Role::Provider, desc(1, 7001, line(10, 19, 1))).unwrap();
        assert!(c.is_metadata_complete());
        assert_eq!(c.phase(), Phase::Ready);

        // Stays released when a participant leaves
        assert!(c.withdraw(Role::Provider, 1));
        assert!(c.is_metadata_complete());
    }

    #[test]
    fn test_readvertise_replaces() {
        let c = RedistributionCoordinator::new("test", Role::Provider, desc(0, 7000, line(0, 9, 1)));
        assert_eq!(
            c.advertise(Role::Consumer, desc(0, 8000, line(0, 4, 1))).unwrap(),
            Advertised::New
        );
        assert_eq!(
            c.advertise(Role::Consumer, desc(0, 8001, line(5, 9, 1))).unwrap(),
            Advertised::Replaced
        );

        let consumers = c.descriptors(Role::Consumer);
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].address.port, 8001);
    }

    #[test]
    fn test_advertise_rejects_other_dimensionality() {
        let c = RedistributionCoordinator::new("test", Role::Provider, desc(0, 7000, line(0, 9, 1)));
        let flat = desc(0, 8000, vec![Index::new(0, 9, 1), Index::new(0, 9, 1)]);
        assert!(matches!(
            c.advertise(Role::Consumer, flat),
            Err(RedistError::MismatchedDimensionality { left: 1, right: 2 })
        ));
    }

    #[test]
    fn test_local_descriptor_cannot_be_withdrawn() {
        let c = RedistributionCoordinator::new("test", Role::Provider, desc(3, 7000, line(0, 9, 1)));
        assert!(!c.withdraw(Role::Provider, 3));
        assert_eq!(c.descriptors(Role::Provider).len(), 1);
    }

    #[test]
    fn test_destinations_k_of_c() {
        let p = RedistributionCoordinator::new("test", Role::Provider, desc(0, 7000, line(0, 9, 1)));
        p.advertise(Role::Consumer, desc(0, 8000, line(5, 14, 1))).unwrap();
        p.advertise(Role::Consumer, desc(1, 8001, line(1, 19, 3))).unwrap();
        p.advertise(Role::Consumer, desc(2, 8002, line(20, 29, 1))).unwrap();

        let dest = p.destinations().unwrap();
        let ranks: Vec<u32> = dest.iter().map(|o| o.peer.rank).collect();
        assert_eq!(ranks, vec![0, 1]);
        assert_eq!(dest[0].region.axes, line(5, 9, 1));
        assert_eq!(dest[1].region.axes, line(1, 7, 3));
        assert_eq!(dest[1].region.address.port, 8001);
    }

    #[test]
    fn test_provider_rank_of() {
        let c = straddling_consumer();
        assert_eq!(c.provider_rank_of(&EndpointAddress::new("127.0.0.1", 7001)), Some(1));
        assert_eq!(c.provider_rank_of(&EndpointAddress::new("127.0.0.1", 9999)), None);
    }

    #[tokio::test]
    async fn test_waits_for_both_overlapping_providers() {
        let c = straddling_consumer();
        assert_eq!(c.pending().unwrap(), vec![0, 1]);

        let waiter = tokio::spawn({
            let c = c.clone();
            async move { c.wait_for_complete_array().await }
        });

        // Out of order arrival
        c.mark_received(1, 0, Bytes::from_static(&[10, 11, 12, 13, 14]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(c.pending().unwrap(), vec![0]);
        assert_eq!(c.phase(), Phase::Exchanging);

        c.mark_received(0, 0, Bytes::from_static(&[5, 6, 7, 8, 9]));

        let array = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap().unwrap().unwrap();
        assert_eq!(array.round, 0);
        assert_eq!(array.blocks.len(), 2);
        assert_eq!(array.blocks[0].region.axes, line(5, 9, 1));
        assert_eq!(array.blocks[1].region.axes, line(10, 14, 1));
        assert_eq!(array.element_count(), 10);

        let local = c.local().clone();
        let out = array.to_local(&local, 1).unwrap();
        assert_eq!(out, (5u8..=14).collect::<Vec<_>>());

        assert_eq!(c.round(), 1);
        assert_eq!(c.phase(), Phase::Complete);
        assert!(!c.is_received(0));
        assert!(!c.is_received(1));
    }

    #[tokio::test]
    async fn test_no_overlap_returns_none() {
        let c = RedistributionCoordinator::new("test", Role::Consumer, desc(2, 8002, line(20, 29, 1)));
        c.advertise(Role::Provider, desc(0, 7000, line(0, 9, 1))).unwrap();
        c.advertise(Role::Provider, desc(1, 7001, line(10, 19, 1))).unwrap();
        c.metadata_complete(3);

        let result = tokio::time::timeout(WAIT, c.wait_for_complete_array()).await.unwrap().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_waits_for_metadata_before_data() {
        let c = Arc::new(RedistributionCoordinator::new(
            "test",
            Role::Consumer,
            desc(0, 8000, line(0, 9, 1)),
        ));

        let waiter = tokio::spawn({
            let c = c.clone();
            async move { c.wait_for_complete_array().await }
        });

        // Block arrives before the provider's advert
        c.mark_received(0, 0, Bytes::from_static(&[1; 10]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        c.advertise(Role::Provider, desc(0, 7000, line(0, 9, 1))).unwrap();
        c.metadata_complete(2);

        let array = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap().unwrap().unwrap();
        assert_eq!(array.blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_early_blocks_kept_for_next_round() {
        let c = straddling_consumer();

        c.mark_received(0, 0, Bytes::from_static(b"r0-p0"));
        c.mark_received(0, 1, Bytes::from_static(b"r1-p0"));
        c.mark_received(1, 0, Bytes::from_static(b"r0-p1"));

        let first = c.wait_for_complete_array().await.unwrap().unwrap();
        assert_eq!(first.blocks[0].payload.as_ref(), b"r0-p0");
        assert!(c.is_received(0));
        assert_eq!(c.pending().unwrap(), vec![1]);

        c.mark_received(1, 1, Bytes::from_static(b"r1-p1"));
        let second = c.wait_for_complete_array().await.unwrap().unwrap();
        assert_eq!(second.round, 1);
        assert_eq!(second.blocks[0].payload.as_ref(), b"r1-p0");
        assert_eq!(second.blocks[1].payload.as_ref(), b"r1-p1");
    }

    #[tokio::test]
    async fn test_duplicate_block_discarded_in_next_round() {
        let c = straddling_consumer();

        c.mark_received(0, 0, Bytes::from_static(b"r0-p0"));
        c.mark_received(0, 0, Bytes::from_static(b"r0-p0-again"));
        c.mark_received(1, 0, Bytes::from_static(b"r0-p1"));
        let first = c.wait_for_complete_array().await.unwrap().unwrap();
        assert_eq!(first.blocks[0].payload.as_ref(), b"r0-p0");

        // The leftover round 0 block must not stand in for round 1
        assert!(!c.is_received(0));
        assert_eq!(c.pending().unwrap(), vec![0, 1]);

        c.mark_received(1, 1, Bytes::from_static(b"r1-p1"));
        c.mark_received(0, 1, Bytes::from_static(b"r1-p0"));
        let second = tokio::time::timeout(WAIT, c.wait_for_complete_array()).await.unwrap().unwrap().unwrap();
        assert_eq!(second.round, 1);
        assert_eq!(second.blocks[0].payload.as_ref(), b"r1-p0");
        assert_eq!(second.blocks[1].payload.as_ref(), b"r1-p1");
    }

    #[tokio::test]
    async fn test_unrelated_block_does_not_complete_round() {
        let c = straddling_consumer();
        c.advertise(Role::Provider, desc(2, 7002, line(20, 29, 1))).unwrap();

        let waiter = tokio::spawn({
            let c = c.clone();
            async move { c.wait_for_complete_array().await }
        });

        c.mark_received(0, 0, Bytes::from_static(&[5, 6, 7, 8, 9]));
        // Provider 2 does not overlap, a rank never advertised neither
        c.mark_received(2, 0, Bytes::from_static(&[0; 10]));
        c.mark_received(9, 0, Bytes::from_static(&[0; 10]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(c.pending().unwrap(), vec![1]);
        assert_eq!(c.round(), 0);

        c.mark_received(1, 0, Bytes::from_static(&[10, 11, 12, 13, 14]));
        let array = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap().unwrap().unwrap();
        let ranks: Vec<u32> = array.blocks.iter().map(|b| b.provider_rank).collect();
        assert_eq!(ranks, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_withdraw_releases_waiter() {
        let c = straddling_consumer();
        let waiter = tokio::spawn({
            let c = c.clone();
            async move { c.wait_for_complete_array().await }
        });

        c.mark_received(0, 0, Bytes::from_static(&[0; 5]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        c.withdraw(Role::Provider, 1);
        let array = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap().unwrap().unwrap();
        assert_eq!(array.blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_first_set_array_wins() {
        let p = Arc::new(RedistributionCoordinator::new(
            "test",
            Role::Provider,
            desc(0, 7000, line(0, 9, 1)),
        ));
        p.metadata_complete(1);

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let p = p.clone();
                tokio::spawn(async move { p.get_array_wait().await })
            })
            .collect();

        let first = Bytes::from_static(b"first");
        let second = Bytes::from_static(b"second");
        assert_eq!(p.set_array(first.clone()), (first.clone(), true));
        assert_eq!(p.set_array(second), (first.clone(), false));
        assert_eq!(p.phase(), Phase::Exchanging);

        for reader in readers {
            let value = tokio::time::timeout(WAIT, reader).await.unwrap().unwrap().unwrap();
            assert_eq!(value, first);
        }

        // Late readers in the same round see the same value
        assert_eq!(p.get_array_wait().await.unwrap(), first);

        p.mark_delivered();
        assert_eq!(p.phase(), Phase::Complete);

        p.reset_round();
        assert_eq!(p.round(), 1);
        assert_eq!(p.phase(), Phase::Ready);

        let next = Bytes::from_static(b"next");
        assert_eq!(p.set_array(next.clone()), (next, true));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let c = straddling_consumer();
        let p = Arc::new(RedistributionCoordinator::new(
            "test",
            Role::Provider,
            desc(0, 7000, line(0, 9, 1)),
        ));
        let idle = Arc::new(RedistributionCoordinator::new(
            "test",
            Role::Consumer,
            desc(0, 8000, line(0, 9, 1)),
        ));

        let data = tokio::spawn({
            let c = c.clone();
            async move { c.wait_for_complete_array().await }
        });
        let array = tokio::spawn({
            let p = p.clone();
            async move { p.get_array_wait().await }
        });
        let metadata = tokio::spawn({
            let idle = idle.clone();
            async move { idle.wait_for_metadata().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        c.shutdown();
        p.shutdown();
        idle.shutdown();

        assert!(matches!(
            tokio::time::timeout(WAIT, data).await.unwrap().unwrap(),
            Err(RedistError::Shutdown)
        ));
        assert!(matches!(
            tokio::time::timeout(WAIT, array).await.unwrap().unwrap(),
            Err(RedistError::Shutdown)
        ));
        assert!(matches!(
            tokio::time::timeout(WAIT, metadata).await.unwrap().unwrap(),
            Err(RedistError::Shutdown)
        ));
        assert!(c.is_shut_down());
    }
}
