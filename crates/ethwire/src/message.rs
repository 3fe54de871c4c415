use alloy_primitives::{B256, U256};

use chain::{Block, BlockBody, BlockHeader, BlockIdentifier, BlockRef};

pub const STATUS_MSG_ID: u8 = 0x00;
pub const NEW_BLOCK_HASHES_MSG_ID: u8 = 0x01;
pub const TRANSACTIONS_MSG_ID: u8 = 0x02;
pub const GET_BLOCK_HEADERS_MSG_ID: u8 = 0x03;
pub const BLOCK_HEADERS_MSG_ID: u8 = 0x04;
pub const GET_BLOCK_BODIES_MSG_ID: u8 = 0x05;
pub const BLOCK_BODIES_MSG_ID: u8 = 0x06;
pub const NEW_BLOCK_MSG_ID: u8 = 0x07;

/// Protocol handshake record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub protocol_version: u8,
    pub network_id: u64,
    pub total_difficulty: U256,
    pub best_hash: B256,
    pub genesis_hash: B256,
}

/// Announcement of blocks the peer considers new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlockHashesMessage {
    pub identifiers: Vec<BlockIdentifier>,
}

/// Pending transactions, carried as raw RLP payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionsMessage {
    pub transactions: Vec<Vec<u8>>,
}

/// Request for a run of headers starting at a number or a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockHeadersMessage {
    pub start: BlockRef,
    pub max_headers: u64,
    pub skip: u64,
    pub reverse: bool,
}

impl GetBlockHeadersMessage {
    pub fn by_number(number: u64, max_headers: u64) -> Self {
        Self {
            start: BlockRef::Number(number),
            max_headers,
            skip: 0,
            reverse: false,
        }
    }

    pub fn by_hash(hash: B256, max_headers: u64, skip: u64, reverse: bool) -> Self {
        Self {
            start: BlockRef::Hash(hash),
            max_headers,
            skip,
            reverse,
        }
    }

    pub fn start_number(&self) -> Option<u64> {
        match self.start {
            BlockRef::Number(n) => Some(n),
            BlockRef::Hash(_) => None,
        }
    }

    pub fn start_hash(&self) -> Option<B256> {
        match self.start {
            BlockRef::Number(_) => None,
            BlockRef::Hash(h) => Some(h),
        }
    }
}

impl std::fmt::Display for GetBlockHeadersMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GetBlockHeaders(start={}, max={}, skip={}, reverse={})",
            self.start, self.max_headers, self.skip, self.reverse
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeadersMessage {
    pub headers: Vec<BlockHeader>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockBodiesMessage {
    pub hashes: Vec<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBodiesMessage {
    pub bodies: Vec<BlockBody>,
}

/// A freshly mined block together with the total difficulty the sender
/// claims for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlockMessage {
    pub block: Block,
    pub total_difficulty: U256,
}

/// Any message of the eth sub-protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthMessage {
    Status(StatusMessage),
    NewBlockHashes(NewBlockHashesMessage),
    Transactions(TransactionsMessage),
    GetBlockHeaders(GetBlockHeadersMessage),
    BlockHeaders(BlockHeadersMessage),
    GetBlockBodies(GetBlockBodiesMessage),
    BlockBodies(BlockBodiesMessage),
    NewBlock(NewBlockMessage),
}

impl EthMessage {
    /// Wire command id of this message.
    pub fn code(&self) -> u8 {
        match self {
            EthMessage::Status(_) => STATUS_MSG_ID,
            EthMessage::NewBlockHashes(_) => NEW_BLOCK_HASHES_MSG_ID,
            EthMessage::Transactions(_) => TRANSACTIONS_MSG_ID,
            EthMessage::GetBlockHeaders(_) => GET_BLOCK_HEADERS_MSG_ID,
            EthMessage::BlockHeaders(_) => BLOCK_HEADERS_MSG_ID,
            EthMessage::GetBlockBodies(_) => GET_BLOCK_BODIES_MSG_ID,
            EthMessage::BlockBodies(_) => BLOCK_BODIES_MSG_ID,
            EthMessage::NewBlock(_) => NEW_BLOCK_MSG_ID,
        }
    }

    /// Command name, for logging.
    pub fn command(&self) -> &'static str {
        match self {
            EthMessage::Status(_) => "STATUS",
            EthMessage::NewBlockHashes(_) => "NEW_BLOCK_HASHES",
            EthMessage::Transactions(_) => "TRANSACTIONS",
            EthMessage::GetBlockHeaders(_) => "GET_BLOCK_HEADERS",
            EthMessage::BlockHeaders(_) => "BLOCK_HEADERS",
            EthMessage::GetBlockBodies(_) => "GET_BLOCK_BODIES",
            EthMessage::BlockBodies(_) => "BLOCK_BODIES",
            EthMessage::NewBlock(_) => "NEW_BLOCK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_are_wire_ids() {
        let msg = EthMessage::GetBlockHeaders(GetBlockHeadersMessage::by_number(1, 10));
        assert_eq!(msg.code(), 0x03);
        assert_eq!(msg.command(), "GET_BLOCK_HEADERS");

        let msg = EthMessage::BlockBodies(BlockBodiesMessage { bodies: vec![] });
        assert_eq!(msg.code(), 0x06);
    }

    #[test]
    fn headers_request_start_accessors() {
        let by_number = GetBlockHeadersMessage::by_number(42, 10);
        assert_eq!(by_number.start_number(), Some(42));
        assert_eq!(by_number.start_hash(), None);
        assert!(!by_number.reverse);

        let hash = B256::from([7u8; 32]);
        let by_hash = GetBlockHeadersMessage::by_hash(hash, 192, 0, true);
        assert_eq!(by_hash.start_number(), None);
        assert_eq!(by_hash.start_hash(), Some(hash));
        assert!(by_hash.reverse);
    }
}
