use std::collections::HashMap;

use alloy_primitives::{B256, U256};

use crate::types::{Block, BlockBody, BlockHeader, BlockIdentifier, BlockRef};

/// In-memory chain store.
///
/// Keeps headers, bodies and total difficulties by hash plus the canonical
/// number index, and answers the lookups the protocol handler needs: best
/// block, genesis, existence checks and header/body walks for serving
/// peer queries.
pub struct ChainStore {
    genesis_hash: B256,
    headers: HashMap<B256, BlockHeader>,
    bodies: HashMap<B256, BlockBody>,
    total_difficulty: HashMap<B256, U256>,
    canonical: HashMap<u64, B256>,
    best: BlockIdentifier,
}

impl ChainStore {
    /// Create a store seeded with the genesis block.
    pub fn new(genesis: BlockHeader, genesis_td: U256) -> Self {
        let hash = genesis.hash();
        let number = genesis.number;
        let mut store = Self {
            genesis_hash: hash,
            headers: HashMap::new(),
            bodies: HashMap::new(),
            total_difficulty: HashMap::new(),
            canonical: HashMap::new(),
            best: BlockIdentifier::new(hash, number),
        };
        store.headers.insert(hash, genesis);
        store.bodies.insert(hash, BlockBody::empty());
        store.total_difficulty.insert(hash, genesis_td);
        store.canonical.insert(number, hash);
        store
    }

    /// Insert a block on the canonical chain. The best block advances when
    /// the new block's number is higher.
    pub fn insert(&mut self, block: Block) {
        let hash = block.hash();
        let number = block.number();
        let parent_td = self
            .total_difficulty
            .get(&block.parent_hash())
            .copied()
            .unwrap_or(U256::ZERO);
        let (header, body) = block.into_parts();
        let td = parent_td + header.difficulty;

        self.headers.insert(hash, header);
        self.bodies.insert(hash, body);
        self.total_difficulty.insert(hash, td);
        self.canonical.insert(number, hash);
        if number > self.best.number {
            self.best = BlockIdentifier::new(hash, number);
        }
    }

    pub fn genesis_hash(&self) -> B256 {
        self.genesis_hash
    }

    pub fn best_block(&self) -> BlockIdentifier {
        self.best
    }

    pub fn best_total_difficulty(&self) -> U256 {
        self.total_difficulty
            .get(&self.best.hash)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.headers.contains_key(hash)
    }

    pub fn header_by_hash(&self, hash: &B256) -> Option<&BlockHeader> {
        self.headers.get(hash)
    }

    pub fn header_by_number(&self, number: u64) -> Option<&BlockHeader> {
        self.canonical.get(&number).and_then(|h| self.headers.get(h))
    }

    pub fn total_difficulty_of(&self, hash: &B256) -> Option<U256> {
        self.total_difficulty.get(hash).copied()
    }

    /// Walk canonical headers starting from `start`, stepping `skip + 1`
    /// numbers per header, up to `max` headers, descending when `reverse`.
    ///
    /// A hash start that is not known yields an empty list.
    pub fn headers_starting_from(
        &self,
        start: &BlockRef,
        skip: u64,
        max: u64,
        reverse: bool,
    ) -> Vec<BlockHeader> {
        let start_number = match start {
            BlockRef::Number(n) => *n,
            BlockRef::Hash(h) => match self.headers.get(h) {
                Some(header) => header.number,
                None => return Vec::new(),
            },
        };

        let step = skip + 1;
        let mut headers = Vec::new();
        let mut number = start_number;
        for _ in 0..max {
            match self.header_by_number(number) {
                Some(header) => headers.push(header.clone()),
                None => break,
            }
            if reverse {
                match number.checked_sub(step) {
                    Some(n) => number = n,
                    None => break,
                }
            } else {
                number += step;
            }
        }
        headers
    }

    /// Bodies for the given hashes; unknown hashes are skipped.
    pub fn bodies_by_hashes(&self, hashes: &[B256]) -> Vec<BlockBody> {
        hashes
            .iter()
            .filter_map(|h| self.bodies.get(h).cloned())
            .collect()
    }
}
