use alloy_primitives::{Address, B256, U256};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// 8-byte PoW nonce.
pub type BlockNonce = [u8; 8];

/// 256-byte logs bloom filter.
pub type Bloom = [u8; 256];

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub uncle_hash: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: B256,
    pub nonce: BlockNonce,
}

impl BlockHeader {
    /// Compute the hash of this header (keccak256 of RLP encoding).
    pub fn hash(&self) -> B256 {
        B256::from_slice(&Keccak256::digest(self.rlp_encode()))
    }

    /// RLP-encode the header. Field order follows the Ethereum header layout.
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut fields: Vec<Vec<u8>> = Vec::with_capacity(15);

        fields.push(rlp_encode_b256(&self.parent_hash));
        fields.push(rlp_encode_b256(&self.uncle_hash));
        fields.push(rlp_encode_address(&self.coinbase));
        fields.push(rlp_encode_b256(&self.state_root));
        fields.push(rlp_encode_b256(&self.transactions_root));
        fields.push(rlp_encode_b256(&self.receipts_root));
        fields.push(rlp_encode_bytes(&self.logs_bloom));
        fields.push(rlp_encode_u256(&self.difficulty));
        fields.push(rlp_encode_u64(self.number));
        fields.push(rlp_encode_u64(self.gas_limit));
        fields.push(rlp_encode_u64(self.gas_used));
        fields.push(rlp_encode_u64(self.timestamp));
        fields.push(rlp_encode_bytes(&self.extra_data));
        fields.push(rlp_encode_b256(&self.mix_hash));
        fields.push(rlp_encode_bytes(&self.nonce));

        rlp_encode_list_from_encoded(&fields)
    }

    /// (number, hash) identifier of this header.
    pub fn identifier(&self) -> BlockIdentifier {
        BlockIdentifier::new(self.hash(), self.number)
    }
}

/// Reference to a block by number or by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Hash(B256),
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockRef::Number(n) => write!(f, "#{}", n),
            BlockRef::Hash(h) => write!(f, "{}", h),
        }
    }
}

/// Number and hash of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIdentifier {
    pub hash: B256,
    pub number: u64,
}

impl BlockIdentifier {
    pub fn new(hash: B256, number: u64) -> Self {
        Self { hash, number }
    }
}

impl std::fmt::Display for BlockIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// Block body: transactions are carried as raw RLP payloads, uncles as
/// full headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockBody {
    pub transactions: Vec<Vec<u8>>,
    pub uncles: Vec<BlockHeader>,
}

impl BlockBody {
    /// A body with no transactions and no uncles.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockAssemblyError {
    #[error("transactions root mismatch: header {expected}, body {got}")]
    TransactionsRoot { expected: B256, got: B256 },
    #[error("uncle hash mismatch: header {expected}, body {got}")]
    UncleHash { expected: B256, got: B256 },
}

/// A complete block. Constructed only through [`Block::from_parts`], which
/// checks the body against the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    header: BlockHeader,
    body: BlockBody,
}

impl Block {
    /// Merge a header with a body, verifying that the body's transaction
    /// trie root and uncle-list hash match the header commitments.
    pub fn from_parts(header: BlockHeader, body: BlockBody) -> Result<Self, BlockAssemblyError> {
        let tx_root = crate::trie::ordered_trie_root(&body.transactions);
        if tx_root != header.transactions_root {
            return Err(BlockAssemblyError::TransactionsRoot {
                expected: header.transactions_root,
                got: tx_root,
            });
        }

        let uncle_hash = uncles_hash(&body.uncles);
        if uncle_hash != header.uncle_hash {
            return Err(BlockAssemblyError::UncleHash {
                expected: header.uncle_hash,
                got: uncle_hash,
            });
        }

        Ok(Self { header, body })
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn body(&self) -> &BlockBody {
        &self.body
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }

    pub fn difficulty(&self) -> U256 {
        self.header.difficulty
    }

    pub fn identifier(&self) -> BlockIdentifier {
        self.header.identifier()
    }

    pub fn into_parts(self) -> (BlockHeader, BlockBody) {
        (self.header, self.body)
    }
}

/// keccak256 of the RLP-encoded uncle header list.
pub fn uncles_hash(uncles: &[BlockHeader]) -> B256 {
    let encoded: Vec<Vec<u8>> = uncles.iter().map(|u| u.rlp_encode()).collect();
    B256::from_slice(&Keccak256::digest(rlp_encode_list_from_encoded(&encoded)))
}

/// The uncle hash of a block with no uncles (keccak256 of [0xc0]).
pub fn empty_uncle_hash() -> B256 {
    B256::from_slice(&Keccak256::digest([0xc0]))
}

// ============================================================================
// RLP encoding helpers
// ============================================================================

/// RLP-encode a byte string.
pub fn rlp_encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return data.to_vec();
    }
    let mut out = rlp_length_prefix(data.len(), 0x80);
    out.extend_from_slice(data);
    out
}

fn rlp_encode_b256(h: &B256) -> Vec<u8> {
    rlp_encode_bytes(h.as_slice())
}

fn rlp_encode_address(a: &Address) -> Vec<u8> {
    rlp_encode_bytes(a.as_slice())
}

/// RLP-encode a u64 as a minimal big-endian integer.
pub fn rlp_encode_u64(v: u64) -> Vec<u8> {
    rlp_encode_bytes(&minimal_be_bytes_u64(v))
}

/// RLP-encode a U256 as a minimal big-endian integer.
pub fn rlp_encode_u256(v: &U256) -> Vec<u8> {
    let bytes = v.to_be_bytes::<32>();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(32);
    rlp_encode_bytes(&bytes[start..])
}

/// Wrap already-encoded items into an RLP list.
pub fn rlp_encode_list_from_encoded(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(|i| i.len()).sum();
    let mut out = rlp_length_prefix(payload_len, 0xc0);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn rlp_length_prefix(len: usize, offset: u8) -> Vec<u8> {
    if len < 56 {
        vec![offset + len as u8]
    } else {
        let len_bytes = minimal_be_bytes_u64(len as u64);
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out
    }
}

fn minimal_be_bytes_u64(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(8);
    bytes[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header(number: u64, parent_hash: B256) -> BlockHeader {
        BlockHeader {
            parent_hash,
            uncle_hash: empty_uncle_hash(),
            coinbase: Address::ZERO,
            state_root: B256::ZERO,
            transactions_root: crate::trie::empty_trie_hash(),
            receipts_root: B256::ZERO,
            logs_bloom: [0u8; 256],
            difficulty: U256::from(131_072u64),
            number,
            gas_limit: 5_000_000,
            gas_used: 0,
            timestamp: 1_600_000_000 + number * 14,
            extra_data: vec![],
            mix_hash: B256::ZERO,
            nonce: [0u8; 8],
        }
    }

    #[test]
    fn header_hash_is_stable() {
        let h = test_header(7, B256::from([1u8; 32]));
        assert_eq!(h.hash(), h.hash());
        assert_ne!(h.hash(), B256::ZERO);
    }

    #[test]
    fn header_hash_depends_on_fields() {
        let a = test_header(7, B256::from([1u8; 32]));
        let mut b = a.clone();
        b.number = 8;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn empty_uncle_hash_matches_rlp_of_empty_list() {
        assert_eq!(uncles_hash(&[]), empty_uncle_hash());
    }

    #[test]
    fn merge_accepts_matching_body() {
        let header = test_header(1, B256::ZERO);
        let block = Block::from_parts(header.clone(), BlockBody::empty()).unwrap();
        assert_eq!(block.hash(), header.hash());
        assert_eq!(block.number(), 1);
    }

    #[test]
    fn merge_rejects_wrong_transactions_root() {
        let header = test_header(1, B256::ZERO);
        let body = BlockBody {
            transactions: vec![vec![0x01, 0x02]],
            uncles: vec![],
        };
        let err = Block::from_parts(header, body).unwrap_err();
        assert!(matches!(err, BlockAssemblyError::TransactionsRoot { .. }));
    }

    #[test]
    fn merge_rejects_wrong_uncle_hash() {
        let header = test_header(1, B256::ZERO);
        let body = BlockBody {
            transactions: vec![],
            uncles: vec![test_header(0, B256::ZERO)],
        };
        let err = Block::from_parts(header, body).unwrap_err();
        assert!(matches!(err, BlockAssemblyError::UncleHash { .. }));
    }

    #[test]
    fn rlp_single_low_byte_is_itself() {
        assert_eq!(rlp_encode_bytes(&[0x7f]), vec![0x7f]);
        assert_eq!(rlp_encode_bytes(&[0x80]), vec![0x81, 0x80]);
    }

    #[test]
    fn rlp_u64_minimal() {
        assert_eq!(rlp_encode_u64(0), vec![0x80]);
        assert_eq!(rlp_encode_u64(1), vec![0x01]);
        assert_eq!(rlp_encode_u64(1024), vec![0x82, 0x04, 0x00]);
    }
}
