use alloy_primitives::B256;
use sha3::{Digest, Keccak256};

use crate::types::{rlp_encode_bytes, rlp_encode_list_from_encoded, rlp_encode_u64};

/// Compute the ordered trie root over a list of RLP-encoded items.
///
/// This is the commitment Ethereum uses for `transactions_root` and
/// `receipts_root`: a Merkle-Patricia trie keyed by the RLP encoding of
/// each item's index.
pub fn ordered_trie_root(items: &[Vec<u8>]) -> B256 {
    if items.is_empty() {
        return empty_trie_hash();
    }

    let mut pairs: Vec<(Vec<u8>, &[u8])> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (to_nibbles(&rlp_encode_u64(i as u64)), item.as_slice()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    // The root node is always hashed, even when its encoding is short.
    B256::from_slice(&Keccak256::digest(encode_node(&pairs)))
}

/// The root of an empty trie: keccak256(RLP("")) = keccak256([0x80]).
pub fn empty_trie_hash() -> B256 {
    B256::from_slice(&Keccak256::digest([0x80]))
}

/// Encode the node covering `pairs` (sorted, non-empty, distinct keys)
/// and return its full RLP encoding.
fn encode_node(pairs: &[(Vec<u8>, &[u8])]) -> Vec<u8> {
    if pairs.len() == 1 {
        let (key, value) = &pairs[0];
        return rlp_encode_list_from_encoded(&[
            rlp_encode_bytes(&hex_prefix(key, true)),
            rlp_encode_bytes(value),
        ]);
    }

    let prefix_len = common_prefix_len(pairs);
    if prefix_len > 0 {
        let stripped: Vec<(Vec<u8>, &[u8])> = pairs
            .iter()
            .map(|(k, v)| (k[prefix_len..].to_vec(), *v))
            .collect();
        let child = encode_node(&stripped);
        return rlp_encode_list_from_encoded(&[
            rlp_encode_bytes(&hex_prefix(&pairs[0].0[..prefix_len], false)),
            node_ref(&child),
        ]);
    }

    // Branch node: 16 child slots plus a value slot.
    let mut payload = Vec::new();
    let mut idx = 0;
    let mut branch_value: &[u8] = &[];
    // A pair with an exhausted key becomes the branch value. RLP index
    // keys are prefix-free, so this only guards malformed input.
    if pairs[0].0.is_empty() {
        branch_value = pairs[0].1;
        idx = 1;
    }
    for nibble in 0u8..16 {
        let start = idx;
        while idx < pairs.len() && pairs[idx].0[0] == nibble {
            idx += 1;
        }
        if start == idx {
            payload.push(0x80);
            continue;
        }
        let children: Vec<(Vec<u8>, &[u8])> = pairs[start..idx]
            .iter()
            .map(|(k, v)| (k[1..].to_vec(), *v))
            .collect();
        payload.extend_from_slice(&node_ref(&encode_node(&children)));
    }
    if branch_value.is_empty() {
        payload.push(0x80);
    } else {
        payload.extend_from_slice(&rlp_encode_bytes(branch_value));
    }

    rlp_encode_list_from_encoded(&[payload])
}

/// Reference a child node: inline when shorter than 32 bytes, otherwise
/// the keccak256 hash as an RLP byte string.
fn node_ref(encoded: &[u8]) -> Vec<u8> {
    if encoded.len() < 32 {
        encoded.to_vec()
    } else {
        rlp_encode_bytes(&Keccak256::digest(encoded))
    }
}

fn common_prefix_len(pairs: &[(Vec<u8>, &[u8])]) -> usize {
    let first = &pairs[0].0;
    let mut len = first.len();
    for (key, _) in &pairs[1..] {
        let shared = first
            .iter()
            .zip(key.iter())
            .take_while(|(a, b)| a == b)
            .count();
        len = len.min(shared);
        if len == 0 {
            break;
        }
    }
    len
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for &b in key {
        nibbles.push(b >> 4);
        nibbles.push(b & 0x0f);
    }
    nibbles
}

/// Hex-prefix encoding of a nibble path (terminator flag for leaves).
fn hex_prefix(nibbles: &[u8], leaf: bool) -> Vec<u8> {
    let term = if leaf { 2u8 } else { 0u8 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    if nibbles.len() % 2 == 1 {
        out.push(((term | 1) << 4) | nibbles[0]);
        for pair in nibbles[1..].chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
    } else {
        out.push(term << 4);
        for pair in nibbles.chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
    }
    out
}
