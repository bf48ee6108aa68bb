//! Capabilities the surrounding host injects into the engine.

use alloy_primitives::{Address, B256, U256};

use crate::error::EngineError;
use crate::header::Header;

/// MIME tag handed to the signer capability for header seals.
pub const MIME_TYPE_XDPOS: &str = "application/x-xdpos-header";

/// Read access to the canonical chain.
pub trait ChainReader: Send + Sync {
    fn header_by_number(&self, number: u64) -> Option<Header>;
    fn header_by_hash(&self, hash: B256, number: u64) -> Option<Header>;
    /// Lookup by hash alone, for query surfaces keyed by hash.
    fn find_header(&self, hash: B256) -> Option<Header>;
    fn current_header(&self) -> Header;
}

/// Balance mutation on the host's state.
pub trait StateBackend {
    fn add_balance(&mut self, address: Address, amount: U256, reason: &str);
}

/// Signing capability over an unlocked account.
pub trait HeaderSigner: Send + Sync {
    fn sign(&self, account: Address, mime: &str, payload: &[u8])
        -> Result<[u8; 65], EngineError>;
}
