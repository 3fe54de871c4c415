//! Typed records for the eth wire protocol: the message set exchanged with
//! a peer, command ids, protocol versions and disconnect reasons. Encoding
//! and decoding live with the transport, not here.

pub mod message;
pub mod reason;

pub use message::{
    BlockBodiesMessage, BlockHeadersMessage, EthMessage, GetBlockBodiesMessage,
    GetBlockHeadersMessage, NewBlockHashesMessage, NewBlockMessage, StatusMessage,
    TransactionsMessage,
};
pub use reason::DisconnectReason;

/// Supported versions of the eth sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthVersion {
    V62,
}

impl EthVersion {
    /// Version code carried in the STATUS message.
    pub fn code(&self) -> u8 {
        match self {
            EthVersion::V62 => 62,
        }
    }
}

impl std::fmt::Display for EthVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EthVersion::V62 => write!(f, "eth/62"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_code() {
        assert_eq!(EthVersion::V62.code(), 62);
        assert_eq!(EthVersion::V62.to_string(), "eth/62");
    }
}
