use std::sync::Arc;

use alloy_primitives::B256;
use tracing::{debug, info, trace};

use chain::{Block, BlockHeader, BlockIdentifier, BlockRef};
use ethwire::{
    BlockBodiesMessage, BlockHeadersMessage, DisconnectReason, EthMessage, EthVersion,
    GetBlockBodiesMessage, GetBlockHeadersMessage, NewBlockHashesMessage, NewBlockMessage,
    StatusMessage, TransactionsMessage,
};

use crate::{
    node_id_short, ChainSource, DownloadQueue, HandshakeState, NodeId, PeerTransport,
    ProtocolHandler, SentHeaders, SyncConfig, SyncListener, SyncState, SyncStats, TxRelay,
    FORK_COVER_BATCH_SIZE, MAX_HEADERS_TO_SEND,
};

/// Per-peer handler of the eth/62 sub-protocol.
///
/// Bound 1:1 to a connection. Owns the handshake and sync state for its
/// peer and reaches the shared collaborators through trait seams. Inbound
/// messages are processed one at a time in receive order; the only
/// cross-task entry point is [`EthPeerHandler::on_shutdown`].
pub struct EthPeerHandler<C, Q, T, L, R> {
    version: EthVersion,
    config: SyncConfig,
    node_id: NodeId,

    chain: Arc<C>,
    queue: Arc<Q>,
    transport: Arc<T>,
    listener: Arc<L>,
    tx_relay: Arc<R>,

    handshake: HandshakeState,
    sync_state: SyncState,
    sync_done: bool,
    transactions_enabled: bool,

    /// Last outstanding headers request; responses are validated against it.
    headers_request: Option<GetBlockHeadersMessage>,
    /// Headers named in the outstanding bodies request.
    sent_headers: SentHeaders,

    /// Highest (number, hash) the peer has advertised to us.
    best_known_block: Option<BlockIdentifier>,
    /// Hash of the last header received in the current forward stream; the
    /// next response must descend from it.
    eldest_hash: Option<B256>,
    /// Terminal hash ending the current gap-recovery stream.
    last_hash_to_ask: Option<B256>,
    common_ancestor_found: bool,
    gap_block: Option<BlockIdentifier>,

    stats: SyncStats,
}

impl<C, Q, T, L, R> EthPeerHandler<C, Q, T, L, R>
where
    C: ChainSource,
    Q: DownloadQueue,
    T: PeerTransport,
    L: SyncListener,
    R: TxRelay,
{
    pub fn new(
        config: SyncConfig,
        node_id: NodeId,
        chain: Arc<C>,
        queue: Arc<Q>,
        transport: Arc<T>,
        listener: Arc<L>,
        tx_relay: Arc<R>,
    ) -> Self {
        Self {
            version: EthVersion::V62,
            config,
            node_id,
            chain,
            queue,
            transport,
            listener,
            tx_relay,
            handshake: HandshakeState::Init,
            sync_state: SyncState::Idle,
            sync_done: false,
            transactions_enabled: false,
            headers_request: None,
            sent_headers: SentHeaders::new(),
            best_known_block: None,
            eldest_hash: None,
            last_hash_to_ask: None,
            common_ancestor_found: true,
            gap_block: None,
            stats: SyncStats::new(),
        }
    }

    pub fn version(&self) -> EthVersion {
        self.version
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    pub fn best_known_block(&self) -> Option<BlockIdentifier> {
        self.best_known_block
    }

    pub fn common_ancestor_found(&self) -> bool {
        self.common_ancestor_found
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn is_hash_retrieving(&self) -> bool {
        self.sync_state == SyncState::HashRetrieving
    }

    pub fn is_hash_retrieving_done(&self) -> bool {
        self.sync_state == SyncState::DoneHashRetrieving
    }

    pub fn is_idle(&self) -> bool {
        self.sync_state == SyncState::Idle
    }

    pub fn has_status_passed(&self) -> bool {
        self.handshake != HandshakeState::Init
    }

    pub fn has_status_succeeded(&self) -> bool {
        self.handshake == HandshakeState::StatusSucceeded
    }

    pub fn on_sync_done(&mut self, done: bool) {
        self.sync_done = done;
    }

    pub fn enable_transactions(&mut self) {
        self.transactions_enabled = true;
    }

    pub fn disable_transactions(&mut self) {
        self.transactions_enabled = false;
    }

    /// Transmit the local STATUS. Called when the channel becomes active.
    pub async fn activate(&mut self) {
        trace!(peer = %node_id_short(&self.node_id), "sending status");
        self.send_status().await;
    }

    /// Route one inbound message by command and handshake phase.
    ///
    /// Until the handshake completes, only the status exchange and plain
    /// chain queries are served; sync-state messages are ignored. After a
    /// failed handshake everything is ignored.
    pub async fn process_message(&mut self, msg: EthMessage) {
        if self.handshake == HandshakeState::StatusFailed {
            trace!(
                peer = %node_id_short(&self.node_id),
                command = msg.command(),
                "status failed, message ignored"
            );
            return;
        }

        match msg {
            EthMessage::Status(m) => self.process_status(m).await,
            EthMessage::GetBlockHeaders(m) => self.process_get_block_headers(m).await,
            EthMessage::GetBlockBodies(m) => self.process_get_block_bodies(m).await,
            EthMessage::BlockHeaders(m) => self.process_block_headers(m).await,
            other if self.handshake == HandshakeState::Init => {
                trace!(
                    peer = %node_id_short(&self.node_id),
                    command = other.command(),
                    "handshake not finished, message ignored"
                );
            }
            EthMessage::NewBlockHashes(m) => self.process_new_block_hashes(m).await,
            EthMessage::Transactions(m) => self.process_transactions(m).await,
            EthMessage::BlockBodies(m) => self.process_block_bodies(m).await,
            EthMessage::NewBlock(m) => self.process_new_block(m).await,
        }
    }

    // -----------------------------------------------------------------------
    // Message sending
    // -----------------------------------------------------------------------

    async fn send_status(&mut self) {
        let best = self.chain.best_block();
        let msg = StatusMessage {
            protocol_version: self.version.code(),
            network_id: self.config.network_id,
            total_difficulty: self.chain.best_total_difficulty(),
            best_hash: best.hash,
            genesis_hash: self.chain.genesis_hash(),
        };
        self.send_message(EthMessage::Status(msg)).await;
    }

    /// Announce a block of ours to the peer.
    pub async fn send_new_block_hashes(&self, block: &Block) {
        let msg = NewBlockHashesMessage {
            identifiers: vec![block.identifier()],
        };
        self.send_message(EthMessage::NewBlockHashes(msg)).await;
    }

    pub async fn send_transactions(&self, transactions: Vec<Vec<u8>>) {
        self.send_message(EthMessage::Transactions(TransactionsMessage { transactions }))
            .await;
    }

    /// Relay a full block; the announced total difficulty is the parent's
    /// plus the block's own.
    pub async fn send_new_block(&self, block: Block) {
        let Some(parent_td) = self.chain.total_difficulty_of(&block.parent_hash()) else {
            debug!(
                peer = %node_id_short(&self.node_id),
                parent = %block.parent_hash(),
                "parent difficulty unknown, NewBlock not sent"
            );
            return;
        };
        let total_difficulty = parent_td + block.difficulty();
        self.send_message(EthMessage::NewBlock(NewBlockMessage {
            block,
            total_difficulty,
        }))
        .await;
    }

    async fn send_get_block_headers(&mut self, number: u64, max_headers: u64) {
        trace!(
            peer = %node_id_short(&self.node_id),
            number,
            max_headers,
            "send GetBlockHeaders"
        );
        let request = GetBlockHeadersMessage::by_number(number, max_headers);
        self.headers_request = Some(request.clone());
        self.send_message(EthMessage::GetBlockHeaders(request)).await;
    }

    async fn send_get_block_headers_by_hash(
        &mut self,
        hash: B256,
        max_headers: u64,
        skip: u64,
        reverse: bool,
    ) {
        trace!(
            peer = %node_id_short(&self.node_id),
            hash = %hash,
            max_headers,
            skip,
            reverse,
            "send GetBlockHeaders"
        );
        let request = GetBlockHeadersMessage::by_hash(hash, max_headers, skip, reverse);
        self.headers_request = Some(request.clone());
        self.send_message(EthMessage::GetBlockHeaders(request)).await;
    }

    /// Reserve one batch of queued headers and ask the peer for their
    /// bodies. Collapses to `Idle` and returns false when the queue is dry.
    async fn send_get_block_bodies(&mut self) -> bool {
        let headers = self.queue.poll_headers().await;
        if headers.is_empty() {
            trace!(peer = %node_id_short(&self.node_id), "no more headers in queue, idle");
            self.sync_state = SyncState::Idle;
            return false;
        }

        let hashes: Vec<B256> = headers.iter().map(|w| w.hash()).collect();
        self.sent_headers.reserve(headers);

        trace!(
            peer = %node_id_short(&self.node_id),
            count = hashes.len(),
            "send GetBlockBodies"
        );
        self.send_message(EthMessage::GetBlockBodies(GetBlockBodiesMessage { hashes }))
            .await;
        true
    }

    async fn send_message(&self, msg: EthMessage) {
        if !self.transport.send_message(msg).await {
            debug!(peer = %node_id_short(&self.node_id), "transport gone, message dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Message processing
    // -----------------------------------------------------------------------

    async fn process_status(&mut self, msg: StatusMessage) {
        if msg.genesis_hash != self.chain.genesis_hash()
            || msg.protocol_version != self.version.code()
        {
            info!(
                peer = %node_id_short(&self.node_id),
                "removing handler due to protocol incompatibility"
            );
            self.handshake = HandshakeState::StatusFailed;
            self.disconnect(DisconnectReason::IncompatibleProtocol).await;
            self.transport.detach().await;
            return;
        }

        if msg.network_id != self.config.network_id {
            self.handshake = HandshakeState::StatusFailed;
            self.disconnect(DisconnectReason::NullIdentity).await;
            return;
        }

        if self.config.peer_discovery_mode {
            debug!(
                peer = %node_id_short(&self.node_id),
                "peer discovery mode: STATUS received, disconnecting"
            );
            self.disconnect(DisconnectReason::Requested).await;
            self.transport.close().await;
            return;
        }

        self.listener.on_status(&self.node_id, &msg);

        // learn the number behind the peer's best hash
        self.send_get_block_headers_by_hash(msg.best_hash, 1, 0, false)
            .await;
    }

    async fn process_new_block_hashes(&mut self, msg: NewBlockHashesMessage) {
        trace!(
            peer = %node_id_short(&self.node_id),
            count = msg.identifiers.len(),
            "processing NewBlockHashes"
        );

        let identifiers = msg.identifiers;
        if identifiers.is_empty() {
            return;
        }

        for id in &identifiers {
            self.update_best_block(*id);
        }
        if let Some(best) = self.best_known_block {
            self.listener.on_new_block_number(best.number);
        }

        // queueing new blocks doesn't make sense while long sync is in progress
        if !self.sync_done {
            return;
        }

        if self.sync_state != SyncState::HashRetrieving {
            let first = identifiers[0].number;
            let last = identifiers[identifiers.len() - 1].number;
            self.send_get_block_headers(first, last.saturating_sub(first) + 1)
                .await;
        }
    }

    async fn process_transactions(&mut self, msg: TransactionsMessage) {
        if !self.transactions_enabled {
            return;
        }
        self.tx_relay.add_transactions(msg.transactions).await;
    }

    async fn process_get_block_headers(&mut self, msg: GetBlockHeadersMessage) {
        let max = msg.max_headers.min(MAX_HEADERS_TO_SEND);
        let headers = self
            .chain
            .headers_starting_from(&msg.start, msg.skip, max, msg.reverse);
        self.send_message(EthMessage::BlockHeaders(BlockHeadersMessage { headers }))
            .await;
    }

    async fn process_block_headers(&mut self, msg: BlockHeadersMessage) {
        trace!(
            peer = %node_id_short(&self.node_id),
            count = msg.headers.len(),
            "processing BlockHeaders"
        );

        if !self.is_valid_headers_response(&msg) {
            self.drop_connection().await;
            return;
        }

        let received = msg.headers;

        if self.handshake == HandshakeState::Init {
            self.process_init_headers(&received);
        } else if !self.sync_done {
            self.process_header_retrieving(received).await;
        } else if self.sync_state != SyncState::HashRetrieving {
            self.process_new_block_headers(received).await;
        } else if !self.common_ancestor_found {
            self.process_fork_coverage(received).await;
        } else {
            self.process_gap_recovery(received).await;
        }
    }

    async fn process_get_block_bodies(&mut self, msg: GetBlockBodiesMessage) {
        let bodies = self.chain.bodies_by_hashes(&msg.hashes);
        self.send_message(EthMessage::BlockBodies(BlockBodiesMessage { bodies }))
            .await;
    }

    async fn process_block_bodies(&mut self, msg: BlockBodiesMessage) {
        trace!(
            peer = %node_id_short(&self.node_id),
            count = msg.bodies.len(),
            "processing BlockBodies"
        );

        if !self.is_valid_bodies_response(&msg) {
            self.drop_connection().await;
            return;
        }

        self.stats.add_blocks(msg.bodies.len() as u64);

        let blocks = match self.validate_and_merge(msg) {
            Some(blocks) => blocks,
            None => {
                // reserved headers are returned by on_shutdown
                self.drop_connection().await;
                return;
            }
        };

        self.return_headers().await;

        self.queue.add_blocks(blocks, self.node_id).await;

        if self.sync_state == SyncState::BlockRetrieving {
            self.send_get_block_bodies().await;
        }
    }

    async fn process_new_block(&mut self, msg: NewBlockMessage) {
        info!(
            peer = %node_id_short(&self.node_id),
            number = msg.block.number(),
            "new block received"
        );

        // skip new block if TD is lower than ours
        let local_td = self.chain.best_total_difficulty();
        if msg.total_difficulty < local_td {
            trace!(
                peer = %node_id_short(&self.node_id),
                announced = %msg.total_difficulty,
                local = %local_td,
                "new block difficulty lower than ours, skip"
            );
            return;
        }

        self.update_best_block(msg.block.identifier());
        self.listener.on_new_block_number(msg.block.number());

        // queueing new blocks doesn't make sense while long sync is in progress
        if !self.sync_done {
            return;
        }

        if !self
            .queue
            .validate_and_add_new_block(msg.block, self.node_id)
            .await
        {
            self.drop_connection().await;
        }
    }

    // -----------------------------------------------------------------------
    // Sync management
    // -----------------------------------------------------------------------

    /// Move the state machine. A no-op on equal input; entering
    /// `HashRetrieving` or `BlockRetrieving` resets stats and issues the
    /// first request, and a dry queue collapses `BlockRetrieving` to `Idle`.
    pub async fn change_state(&mut self, new_state: SyncState) {
        if self.sync_state == new_state {
            return;
        }

        trace!(
            peer = %node_id_short(&self.node_id),
            from = ?self.sync_state,
            to = ?new_state,
            "changing state"
        );

        let mut target = new_state;
        if target == SyncState::HashRetrieving {
            self.stats.reset();
            self.start_header_retrieving().await;
        }
        if target == SyncState::BlockRetrieving {
            self.stats.reset();
            if !self.send_get_block_bodies().await {
                target = SyncState::Idle;
            }
        }
        self.sync_state = target;
    }

    /// Idle the handler and return reserved headers to the queue. Invoked
    /// by the supervisor on disconnect, whatever the cause.
    pub async fn on_shutdown(&mut self) {
        self.change_state(SyncState::Idle).await;
        self.return_headers().await;
    }

    /// Start recovering the gap that ends at `block`.
    pub async fn recover_gap(&mut self, block: BlockIdentifier) {
        self.sync_state = SyncState::HashRetrieving;
        self.start_gap_recovery(block).await;
    }

    fn process_init_headers(&mut self, received: &[BlockHeader]) {
        let Some(first) = received.first() else {
            return;
        };
        self.update_best_block(first.identifier());
        self.handshake = HandshakeState::StatusSucceeded;
        trace!(
            peer = %node_id_short(&self.node_id),
            best = %first.identifier(),
            "init request succeeded"
        );
    }

    async fn process_header_retrieving(&mut self, received: Vec<BlockHeader>) {
        // an empty response ends header sync
        if received.is_empty() {
            self.change_state(SyncState::DoneHashRetrieving).await;
        } else {
            self.stats.add_headers(received.len() as u64);
            debug!(count = received.len(), "adding headers to the queue");

            let latest = received.last().map(|h| (h.hash(), h.number));
            if !self
                .queue
                .validate_and_add_headers(received, self.node_id)
                .await
            {
                self.drop_connection().await;
                return;
            }

            if self.sync_state == SyncState::HashRetrieving {
                if let Some((hash, number)) = latest {
                    self.eldest_hash = Some(hash);
                    self.send_get_block_headers(number + 1, self.config.max_hashes_ask)
                        .await;
                }
            }
        }

        if self.sync_state == SyncState::DoneHashRetrieving {
            let headers_in_queue = self.queue.header_store_size().await;
            info!(
                peer = %node_id_short(&self.node_id),
                headers_in_queue,
                "header sync completed"
            );
        }
    }

    async fn process_new_block_headers(&mut self, received: Vec<BlockHeader>) {
        debug!(count = received.len(), "adding headers to the queue");

        if !self
            .queue
            .validate_and_add_headers(received, self.node_id)
            .await
        {
            self.drop_connection().await;
        }
    }

    async fn process_gap_recovery(&mut self, received: Vec<BlockHeader>) {
        // an empty response ends header sync
        if received.is_empty() {
            self.change_state(SyncState::BlockRetrieving).await;
        } else {
            self.stats.add_headers(received.len() as u64);

            let last_number = received.last().map(|h| h.number);
            let mut adding = Vec::with_capacity(received.len());
            let mut terminal_reached = false;
            for header in received {
                let hash = header.hash();
                adding.push(header);
                if Some(hash) == self.last_hash_to_ask {
                    trace!(
                        peer = %node_id_short(&self.node_id),
                        hash = %hash,
                        "got terminal hash"
                    );
                    terminal_reached = true;
                    break;
                }
            }

            debug!(count = adding.len(), "adding headers to the queue");
            if !self
                .queue
                .validate_and_add_headers(adding, self.node_id)
                .await
            {
                self.drop_connection().await;
                return;
            }

            if terminal_reached {
                self.change_state(SyncState::BlockRetrieving).await;
            } else if self.sync_state == SyncState::HashRetrieving {
                if let Some(number) = last_number {
                    self.send_get_block_headers(number + 1, self.config.max_hashes_ask)
                        .await;
                }
            }
        }

        if self.sync_state == SyncState::BlockRetrieving {
            let headers_in_queue = self.queue.header_store_size().await;
            info!(
                peer = %node_id_short(&self.node_id),
                headers_in_queue,
                "header sync completed"
            );
        }
    }

    async fn start_header_retrieving(&mut self) {
        self.last_hash_to_ask = None;
        self.common_ancestor_found = true;

        info!(
            peer = %node_id_short(&self.node_id),
            ask_limit = self.config.max_hashes_ask,
            "hash retrieving initiated"
        );

        // continue from whichever is further along: the queue or the chain
        let local_best = self.chain.best_block();
        let latest = match self.queue.last_header().await {
            Some(header) if header.number > local_best.number => header.identifier(),
            _ => local_best,
        };

        self.eldest_hash = Some(latest.hash);
        self.send_get_block_headers(latest.number + 1, self.config.max_hashes_ask)
            .await;
    }

    async fn return_headers(&mut self) {
        let headers = self.sent_headers.drain();
        if headers.is_empty() {
            return;
        }
        debug!(
            peer = %node_id_short(&self.node_id),
            count = headers.len(),
            "returning headers to the queue"
        );
        self.queue.return_headers(headers).await;
    }

    fn update_best_block(&mut self, id: BlockIdentifier) {
        match self.best_known_block {
            Some(best) if id.number <= best.number => {}
            _ => self.best_known_block = Some(id),
        }
    }

    // -----------------------------------------------------------------------
    // Fork coverage
    // -----------------------------------------------------------------------

    async fn start_gap_recovery(&mut self, block: BlockIdentifier) {
        self.gap_block = Some(block);
        self.last_hash_to_ask = Some(block.hash);

        info!(
            peer = %node_id_short(&self.node_id),
            last_hash_to_ask = %block.hash,
            ask_limit = self.config.max_hashes_ask,
            "hash retrieving initiated"
        );

        self.common_ancestor_found = false;
        self.eldest_hash = None;

        if self.is_negative_gap() {
            // the local chain must adopt a remote fork; fetch it backwards
            trace!(peer = %node_id_short(&self.node_id), "start fetching remote fork");
            self.send_get_block_headers_by_hash(block.hash, FORK_COVER_BATCH_SIZE, 0, true)
                .await;
            return;
        }

        trace!(peer = %node_id_short(&self.node_id), "start looking for common ancestor");

        let best_number = self.chain.best_block().number;
        let start = best_number.saturating_sub(FORK_COVER_BATCH_SIZE - 1);
        let max = FORK_COVER_BATCH_SIZE.min(best_number - start + 1);
        self.send_get_block_headers(start, max).await;
    }

    async fn process_fork_coverage(&mut self, mut received: Vec<BlockHeader>) {
        let negative_gap = self.is_negative_gap();

        // iterate newest to oldest
        if !negative_gap {
            received.reverse();
        }

        if negative_gap {
            let gap_hash = self.gap_block.map(|g| g.hash);
            if received.first().map(|h| h.hash()) != gap_hash {
                info!(
                    peer = %node_id_short(&self.node_id),
                    "invalid response, gap block is missed"
                );
                self.drop_connection().await;
                return;
            }
        }

        // walk back until a header the local chain already has
        let mut headers = Vec::new();
        for header in received {
            let hash = header.hash();
            if self.chain.is_block_known(&hash) {
                self.common_ancestor_found = true;
                trace!(
                    peer = %node_id_short(&self.node_id),
                    number = header.number,
                    hash = %hash,
                    "common ancestor found"
                );
                break;
            }
            headers.push(header);
        }

        if !self.common_ancestor_found {
            info!(
                peer = %node_id_short(&self.node_id),
                "invalid response, common ancestor is not found"
            );
            self.drop_connection().await;
            return;
        }

        // add missed headers
        let _ = self
            .queue
            .validate_and_add_headers(headers, self.node_id)
            .await;

        if self.is_negative_gap() {
            trace!(peer = %node_id_short(&self.node_id), "remote fork is fetched");
            self.change_state(SyncState::BlockRetrieving).await;
            return;
        }

        // ancestor sits on the local chain; resume forward header sync
        self.send_get_block_headers(self.chain.best_block().number + 1, self.config.max_hashes_ask)
            .await;
    }

    fn is_negative_gap(&self) -> bool {
        match self.gap_block {
            Some(gap) => gap.number <= self.chain.best_block().number,
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Merge bodies with the reserved headers pairwise. Any pair that does
    /// not merge poisons the whole response; merged wrappers leave the
    /// reserved set, unmatched ones stay.
    fn validate_and_merge(&mut self, msg: BlockBodiesMessage) -> Option<Vec<Block>> {
        let wrappers = self.sent_headers.snapshot();

        let mut blocks = Vec::with_capacity(msg.bodies.len());
        for (wrapper, body) in wrappers.iter().zip(msg.bodies.into_iter()) {
            match Block::from_parts(wrapper.header().clone(), body) {
                Ok(block) => blocks.push(block),
                Err(err) => {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        header = %wrapper.header().identifier(),
                        err = %err,
                        "invalid response to GetBlockBodies, header can't be merged with body"
                    );
                    return None;
                }
            }
        }

        self.sent_headers.complete_prefix(blocks.len());
        Some(blocks)
    }

    fn is_valid_bodies_response(&self, msg: &BlockBodiesMessage) -> bool {
        let sent = self.sent_headers.snapshot();

        // against best known block: during long sync the peer must own a
        // body for every header at or below its own best
        if !self.sync_done {
            if let Some(best) = self.best_known_block {
                let expected = sent
                    .iter()
                    .take_while(|w| w.number() <= best.number)
                    .count();
                if msg.bodies.len() < expected {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        expected,
                        got = msg.bodies.len(),
                        "invalid response to GetBlockBodies, expected count not covered"
                    );
                    return false;
                }
            }
        }

        // the peer owes bodies for headers it supplied itself
        if msg.bodies.len() < sent.len() && sent[msg.bodies.len()].sent_by(&self.node_id) {
            info!(
                peer = %node_id_short(&self.node_id),
                header = %sent[msg.bodies.len()].header().identifier(),
                "invalid response to GetBlockBodies, body wasn't returned"
            );
            return false;
        }

        true
    }

    fn is_valid_headers_response(&self, msg: &BlockHeadersMessage) -> bool {
        let Some(request) = &self.headers_request else {
            info!(
                peer = %node_id_short(&self.node_id),
                "unsolicited BlockHeaders response"
            );
            return false;
        };

        let headers = &msg.headers;

        // max headers
        if headers.len() as u64 > request.max_headers {
            info!(
                peer = %node_id_short(&self.node_id),
                request = %request,
                count = headers.len(),
                "invalid response, exceeds maxHeaders limit"
            );
            return false;
        }

        // emptiness against best known block
        if headers.is_empty() {
            let Some(best) = self.best_known_block else {
                // nothing known about the peer's best: this was the initial
                // probe and it must return something
                info!(
                    peer = %node_id_short(&self.node_id),
                    request = %request,
                    "invalid response to initial request, empty"
                );
                return false;
            };

            if let Some(start_number) = request.start_number() {
                if start_number <= best.number {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        request = %request,
                        best_known = %best,
                        "invalid response, empty below best known block"
                    );
                    return false;
                }
            }

            return true;
        }

        let first = &headers[0];
        match request.start {
            BlockRef::Hash(hash) => {
                if request.skip == 0 && first.hash() != hash {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        request = %request,
                        got = %first.identifier(),
                        "invalid response, first header mismatches requested hash"
                    );
                    return false;
                }
            }
            BlockRef::Number(number) => {
                let expected = number + request.skip;
                if first.number != expected {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        request = %request,
                        got = first.number,
                        expected,
                        "invalid response, first header has wrong number"
                    );
                    return false;
                }

                // the first header must descend from the previous stream,
                // checked in long sync only
                if !self.sync_done {
                    if let Some(eldest) = self.eldest_hash {
                        if first.parent_hash != eldest {
                            info!(
                                peer = %node_id_short(&self.node_id),
                                request = %request,
                                got = %first.parent_hash,
                                expected = %eldest,
                                "invalid response, wrong parent of first header"
                            );
                            return false;
                        }
                    }
                }
            }
        }

        // outside of HASH_RETRIEVING this is a response to new block hashes;
        // chaining is not required
        if self.sync_state != SyncState::HashRetrieving {
            return true;
        }

        // numbers and ancestry must chain
        for pair in headers.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if request.reverse {
                if cur.number + 1 != prev.number {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        request = %request,
                        got = cur.number,
                        expected = prev.number.saturating_sub(1),
                        "invalid response, headers are not descending"
                    );
                    return false;
                }
                if prev.parent_hash != cur.hash() {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        request = %request,
                        number = prev.number,
                        got = %prev.parent_hash,
                        expected = %cur.hash(),
                        "invalid response, broken parent link"
                    );
                    return false;
                }
            } else {
                if cur.number != prev.number + 1 {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        request = %request,
                        got = cur.number,
                        expected = prev.number + 1,
                        "invalid response, headers are not ascending"
                    );
                    return false;
                }
                if cur.parent_hash != prev.hash() {
                    info!(
                        peer = %node_id_short(&self.node_id),
                        request = %request,
                        number = cur.number,
                        got = %cur.parent_hash,
                        expected = %prev.hash(),
                        "invalid response, broken parent link"
                    );
                    return false;
                }
            }
        }

        true
    }

    // -----------------------------------------------------------------------
    // Failure handling
    // -----------------------------------------------------------------------

    /// Drop a misbehaving peer: discard its queue contributions and
    /// disconnect. Reserved headers are reclaimed by `on_shutdown`.
    async fn drop_connection(&self) {
        info!(peer = %node_id_short(&self.node_id), "peer is a bad one, dropping");

        self.queue.drop_headers(self.node_id).await;
        self.queue.drop_blocks(self.node_id).await;

        self.disconnect(DisconnectReason::UselessPeer).await;
    }

    async fn disconnect(&self, reason: DisconnectReason) {
        if !self.transport.disconnect(reason).await {
            debug!(peer = %node_id_short(&self.node_id), "handler already detached");
        }
    }

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    pub fn log_sync_stats(&self) {
        match self.sync_state {
            SyncState::BlockRetrieving => info!(
                peer = %node_id_short(&self.node_id),
                version = %self.version,
                state = ?self.sync_state,
                blocks = self.stats.blocks_count(),
                "sync status"
            ),
            SyncState::HashRetrieving => info!(
                peer = %node_id_short(&self.node_id),
                version = %self.version,
                state = ?self.sync_state,
                headers = self.stats.headers_count(),
                "sync status"
            ),
            _ => info!(
                peer = %node_id_short(&self.node_id),
                version = %self.version,
                state = ?self.sync_state,
                "sync status"
            ),
        }
    }
}

impl<C, Q, T, L, R> ProtocolHandler for EthPeerHandler<C, Q, T, L, R>
where
    C: ChainSource,
    Q: DownloadQueue,
    T: PeerTransport,
    L: SyncListener,
    R: TxRelay,
{
    fn version(&self) -> EthVersion {
        EthPeerHandler::version(self)
    }

    async fn activate(&mut self) {
        EthPeerHandler::activate(self).await
    }

    async fn process_message(&mut self, msg: EthMessage) {
        EthPeerHandler::process_message(self, msg).await
    }

    async fn change_state(&mut self, state: SyncState) {
        EthPeerHandler::change_state(self, state).await
    }

    async fn recover_gap(&mut self, block: BlockIdentifier) {
        EthPeerHandler::recover_gap(self, block).await
    }

    async fn on_shutdown(&mut self) {
        EthPeerHandler::on_shutdown(self).await
    }

    fn on_sync_done(&mut self, done: bool) {
        EthPeerHandler::on_sync_done(self, done)
    }

    fn enable_transactions(&mut self) {
        EthPeerHandler::enable_transactions(self)
    }

    fn disable_transactions(&mut self) {
        EthPeerHandler::disable_transactions(self)
    }

    fn is_hash_retrieving(&self) -> bool {
        EthPeerHandler::is_hash_retrieving(self)
    }

    fn is_hash_retrieving_done(&self) -> bool {
        EthPeerHandler::is_hash_retrieving_done(self)
    }

    fn is_idle(&self) -> bool {
        EthPeerHandler::is_idle(self)
    }

    fn has_status_passed(&self) -> bool {
        EthPeerHandler::has_status_passed(self)
    }

    fn has_status_succeeded(&self) -> bool {
        EthPeerHandler::has_status_succeeded(self)
    }

    fn best_known_block(&self) -> Option<BlockIdentifier> {
        EthPeerHandler::best_known_block(self)
    }

    fn stats(&self) -> &SyncStats {
        EthPeerHandler::stats(self)
    }

    fn log_sync_stats(&self) {
        EthPeerHandler::log_sync_stats(self)
    }
}
