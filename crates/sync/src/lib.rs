//! Per-peer protocol handler for chain synchronization.
//!
//! One [`EthPeerHandler`] is bound to each peer connection. It negotiates
//! the eth handshake, drives the header/body download state machine against
//! that peer, validates every response against the request that solicited
//! it, and feeds validated headers and blocks into the shared download
//! queue. The chain database, download queue, transport and listeners are
//! reached through the trait seams below.

pub mod config;
pub mod handler;
pub mod stats;

use std::future::Future;
use std::sync::Mutex;

use alloy_primitives::{B256, U256};

use chain::{Block, BlockBody, BlockHeader, BlockIdentifier, BlockRef, ChainStore};
use ethwire::{DisconnectReason, EthMessage, EthVersion, StatusMessage};

pub use config::{ConfigError, SyncConfig};
pub use handler::EthPeerHandler;
pub use stats::SyncStats;

/// Cap on headers served in a single BLOCK_HEADERS reply.
pub const MAX_HEADERS_TO_SEND: u64 = 65_536;
/// Headers asked per batch while covering a fork.
pub const FORK_COVER_BATCH_SIZE: u64 = 192;

/// devp2p node id of a peer.
pub type NodeId = [u8; 64];

/// Short form of a node id for logging.
pub fn node_id_short(id: &NodeId) -> String {
    hex::encode(&id[..8])
}

/// Outcome of the eth status exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    StatusSucceeded,
    StatusFailed,
}

/// Phase of the per-peer sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    HashRetrieving,
    DoneHashRetrieving,
    BlockRetrieving,
}

/// A header paired with the peer that supplied it, so that a different
/// peer is not punished for a missing body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeaderWrapper {
    header: BlockHeader,
    node_id: NodeId,
}

impl BlockHeaderWrapper {
    pub fn new(header: BlockHeader, node_id: NodeId) -> Self {
        Self { header, node_id }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn into_header(self) -> BlockHeader {
        self.header
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn sent_by(&self, node_id: &NodeId) -> bool {
        &self.node_id == node_id
    }
}

/// Headers named in an outstanding GET_BLOCK_BODIES request.
///
/// Mutex-guarded because the shutdown path drains it from the supervisor
/// task while the message path reserves and completes on the connection
/// task. The guard is never held across an await point.
#[derive(Debug, Default)]
pub struct SentHeaders {
    inner: Mutex<Vec<BlockHeaderWrapper>>,
}

impl SentHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<BlockHeaderWrapper>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the reserved set with a fresh batch.
    pub fn reserve(&self, headers: Vec<BlockHeaderWrapper>) {
        *self.guard() = headers;
    }

    /// Take every reserved wrapper, leaving the set empty.
    pub fn drain(&self) -> Vec<BlockHeaderWrapper> {
        std::mem::take(&mut *self.guard())
    }

    pub fn snapshot(&self) -> Vec<BlockHeaderWrapper> {
        self.guard().clone()
    }

    /// Drop the first `count` wrappers, covered by a response.
    pub fn complete_prefix(&self, count: usize) {
        let mut guard = self.guard();
        let count = count.min(guard.len());
        guard.drain(..count);
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Local-chain lookups the handler consumes.
pub trait ChainSource: Send + Sync {
    fn genesis_hash(&self) -> B256;
    fn best_block(&self) -> BlockIdentifier;
    fn best_total_difficulty(&self) -> U256;
    fn is_block_known(&self, hash: &B256) -> bool;
    fn total_difficulty_of(&self, hash: &B256) -> Option<U256>;
    fn headers_starting_from(
        &self,
        start: &BlockRef,
        skip: u64,
        max: u64,
        reverse: bool,
    ) -> Vec<BlockHeader>;
    fn bodies_by_hashes(&self, hashes: &[B256]) -> Vec<BlockBody>;
}

impl ChainSource for ChainStore {
    fn genesis_hash(&self) -> B256 {
        ChainStore::genesis_hash(self)
    }

    fn best_block(&self) -> BlockIdentifier {
        ChainStore::best_block(self)
    }

    fn best_total_difficulty(&self) -> U256 {
        ChainStore::best_total_difficulty(self)
    }

    fn is_block_known(&self, hash: &B256) -> bool {
        ChainStore::contains(self, hash)
    }

    fn total_difficulty_of(&self, hash: &B256) -> Option<U256> {
        ChainStore::total_difficulty_of(self, hash)
    }

    fn headers_starting_from(
        &self,
        start: &BlockRef,
        skip: u64,
        max: u64,
        reverse: bool,
    ) -> Vec<BlockHeader> {
        ChainStore::headers_starting_from(self, start, skip, max, reverse)
    }

    fn bodies_by_hashes(&self, hashes: &[B256]) -> Vec<BlockBody> {
        ChainStore::bodies_by_hashes(self, hashes)
    }
}

/// The shared download queue. Holds pending headers across peers, accepts
/// validated blocks, and supports reclamation when a peer is lost.
pub trait DownloadQueue: Send + Sync {
    fn poll_headers(&self) -> impl Future<Output = Vec<BlockHeaderWrapper>> + Send;
    fn return_headers(&self, headers: Vec<BlockHeaderWrapper>) -> impl Future<Output = ()> + Send;
    fn validate_and_add_headers(
        &self,
        headers: Vec<BlockHeader>,
        node_id: NodeId,
    ) -> impl Future<Output = bool> + Send;
    fn add_blocks(&self, blocks: Vec<Block>, node_id: NodeId) -> impl Future<Output = ()> + Send;
    fn validate_and_add_new_block(
        &self,
        block: Block,
        node_id: NodeId,
    ) -> impl Future<Output = bool> + Send;
    fn last_header(&self) -> impl Future<Output = Option<BlockHeader>> + Send;
    fn header_store_size(&self) -> impl Future<Output = usize> + Send;
    fn drop_headers(&self, node_id: NodeId) -> impl Future<Output = ()> + Send;
    fn drop_blocks(&self, node_id: NodeId) -> impl Future<Output = ()> + Send;
}

/// Outbound side of the peer connection.
///
/// Send and disconnect report `false` once the peer is detached; the
/// handler treats that as old news and moves on.
pub trait PeerTransport: Send + Sync {
    fn send_message(&self, msg: EthMessage) -> impl Future<Output = bool> + Send;
    fn disconnect(&self, reason: DisconnectReason) -> impl Future<Output = bool> + Send;
    /// Remove the handler from the connection pipeline.
    fn detach(&self) -> impl Future<Output = bool> + Send;
    /// Hard-close the underlying transport.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Global sync listener notifications.
pub trait SyncListener: Send + Sync {
    fn on_status(&self, node_id: &NodeId, status: &StatusMessage);
    fn on_new_block_number(&self, number: u64);
}

/// Sink for transactions relayed by the peer.
pub trait TxRelay: Send + Sync {
    fn add_transactions(&self, transactions: Vec<Vec<u8>>) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// Orchestrator surface
// ---------------------------------------------------------------------------

/// The surface a protocol handler offers to the sync orchestrator and the
/// connection supervisor. Versioned handlers are a tagged enum at channel
/// setup; each variant implements this trait.
pub trait ProtocolHandler: Send {
    fn version(&self) -> EthVersion;

    /// Transmit the local STATUS; called when the channel becomes active.
    fn activate(&mut self) -> impl Future<Output = ()> + Send;

    /// Route one inbound message.
    fn process_message(&mut self, msg: EthMessage) -> impl Future<Output = ()> + Send;

    /// Move the sync state machine; no-op when the state is unchanged.
    fn change_state(&mut self, state: SyncState) -> impl Future<Output = ()> + Send;

    /// Start recovering the gap ending at `block`.
    fn recover_gap(&mut self, block: BlockIdentifier) -> impl Future<Output = ()> + Send;

    /// Idle the handler and return reserved headers to the queue.
    fn on_shutdown(&mut self) -> impl Future<Output = ()> + Send;

    fn on_sync_done(&mut self, done: bool);
    fn enable_transactions(&mut self);
    fn disable_transactions(&mut self);

    fn is_hash_retrieving(&self) -> bool;
    fn is_hash_retrieving_done(&self) -> bool;
    fn is_idle(&self) -> bool;
    fn has_status_passed(&self) -> bool;
    fn has_status_succeeded(&self) -> bool;
    fn best_known_block(&self) -> Option<BlockIdentifier>;
    fn stats(&self) -> &SyncStats;
    fn log_sync_stats(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use chain::types::empty_uncle_hash;

    fn header(number: u64) -> BlockHeader {
        BlockHeader {
            parent_hash: B256::ZERO,
            uncle_hash: empty_uncle_hash(),
            coinbase: Address::ZERO,
            state_root: B256::ZERO,
            transactions_root: chain::trie::empty_trie_hash(),
            receipts_root: B256::ZERO,
            logs_bloom: [0u8; 256],
            difficulty: U256::from(131_072u64),
            number,
            gas_limit: 5_000_000,
            gas_used: 0,
            timestamp: 1_600_000_000,
            extra_data: vec![],
            mix_hash: B256::ZERO,
            nonce: [0u8; 8],
        }
    }

    fn node(n: u8) -> NodeId {
        let mut id = [0u8; 64];
        id[0] = n;
        id
    }

    #[test]
    fn wrapper_tracks_sender() {
        let wrapper = BlockHeaderWrapper::new(header(5), node(1));
        assert!(wrapper.sent_by(&node(1)));
        assert!(!wrapper.sent_by(&node(2)));
        assert_eq!(wrapper.number(), 5);
    }

    #[test]
    fn sent_headers_reserve_replaces() {
        let sent = SentHeaders::new();
        sent.reserve(vec![BlockHeaderWrapper::new(header(1), node(1))]);
        sent.reserve(vec![
            BlockHeaderWrapper::new(header(2), node(1)),
            BlockHeaderWrapper::new(header(3), node(1)),
        ]);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent.snapshot()[0].number(), 2);
    }

    #[test]
    fn sent_headers_drain_empties() {
        let sent = SentHeaders::new();
        sent.reserve(vec![
            BlockHeaderWrapper::new(header(1), node(1)),
            BlockHeaderWrapper::new(header(2), node(1)),
        ]);
        let drained = sent.drain();
        assert_eq!(drained.len(), 2);
        assert!(sent.is_empty());
        assert!(sent.drain().is_empty());
    }

    #[test]
    fn sent_headers_complete_prefix() {
        let sent = SentHeaders::new();
        sent.reserve(vec![
            BlockHeaderWrapper::new(header(1), node(1)),
            BlockHeaderWrapper::new(header(2), node(1)),
            BlockHeaderWrapper::new(header(3), node(1)),
        ]);
        sent.complete_prefix(2);
        let rest = sent.snapshot();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].number(), 3);
        sent.complete_prefix(5);
        assert!(sent.is_empty());
    }

    #[test]
    fn node_id_short_is_first_eight_bytes() {
        let id = node(0xab);
        assert_eq!(node_id_short(&id), "ab00000000000000");
    }
}
