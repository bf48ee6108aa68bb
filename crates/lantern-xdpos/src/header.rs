//! The execution block header as the engine interprets it.
//!
//! Most fields are opaque and only enter hash computations. The engine
//! reads `number`, `time`, `coinbase`, `nonce`, `difficulty`, `mix_digest`,
//! `uncle_hash`, and the three-part `extra` layout: 32 bytes of vanity, a
//! signer list on checkpoint blocks only, and a 65-byte secp256k1 seal.

use alloy_primitives::{b256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

use crate::error::EngineError;

/// Fixed number of extra-data prefix bytes reserved for signer vanity.
pub const EXTRA_VANITY: usize = 32;
/// Fixed number of extra-data suffix bytes reserved for the signer seal.
pub const EXTRA_SEAL: usize = 65;

/// Nonce of a vote to authorize a candidate.
pub const NONCE_AUTH: B64 = B64::new([0xFF; 8]);
/// Nonce of a vote to drop a signer; also the only nonce allowed on
/// checkpoint blocks.
pub const NONCE_DROP: B64 = B64::new([0x00; 8]);

/// Difficulty of a block sealed by the in-turn signer.
pub const DIFF_INTURN: U256 = U256::from_limbs([2, 0, 0, 0]);
/// Difficulty of a block sealed out of turn.
pub const DIFF_NOTURN: U256 = U256::from_limbs([1, 0, 0, 0]);

/// keccak256(rlp([])): the uncle hash of a block with no uncles.
pub const EMPTY_UNCLE_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

pub fn keccak256(data: &[u8]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    B256::from(out)
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Header {
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
    pub time: u64,
    pub extra: Bytes,
    pub mix_digest: B256,
    pub nonce: B64,
}

impl Header {
    /// Hash of the full RLP encoding, seal included.
    pub fn hash(&self) -> B256 {
        let mut out = Vec::new();
        self.encode(&mut out);
        keccak256(&out)
    }

    /// RLP encoding with the 65 seal bytes stripped from `extra`; the
    /// payload handed to the signer capability.
    pub fn seal_payload(&self) -> Result<Vec<u8>, EngineError> {
        if self.extra.len() < EXTRA_SEAL {
            return Err(EngineError::MissingSignature);
        }
        let mut sealless = self.clone();
        sealless.extra = Bytes::copy_from_slice(&self.extra[..self.extra.len() - EXTRA_SEAL]);
        let mut out = Vec::new();
        sealless.encode(&mut out);
        Ok(out)
    }

    /// Hash the seal covers.
    pub fn sig_hash(&self) -> Result<B256, EngineError> {
        Ok(keccak256(&self.seal_payload()?))
    }

    /// The trailing 65 seal bytes of `extra`.
    pub fn seal(&self) -> Result<&[u8], EngineError> {
        if self.extra.len() < EXTRA_VANITY {
            return Err(EngineError::MissingVanity);
        }
        if self.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(EngineError::MissingSignature);
        }
        Ok(&self.extra[self.extra.len() - EXTRA_SEAL..])
    }

    /// The signer-list region between vanity and seal.
    pub fn signer_bytes(&self) -> Result<&[u8], EngineError> {
        self.seal()?;
        Ok(&self.extra[EXTRA_VANITY..self.extra.len() - EXTRA_SEAL])
    }

    /// Parse the checkpoint signer list embedded in `extra`.
    pub fn checkpoint_signers(&self) -> Result<Vec<Address>, EngineError> {
        let bytes = self.signer_bytes()?;
        if bytes.is_empty() || bytes.len() % Address::len_bytes() != 0 {
            return Err(EngineError::InvalidCheckpointSigners);
        }
        Ok(bytes
            .chunks(Address::len_bytes())
            .map(Address::from_slice)
            .collect())
    }

    /// Round-trip helper for tests and storage.
    pub fn decode_rlp(mut bytes: &[u8]) -> Result<Self, EngineError> {
        Header::decode(&mut bytes).map_err(|e| EngineError::Signature(e.to_string()))
    }
}

/// Recover the sealing address from a header's seal.
pub fn recover_creator(header: &Header) -> Result<Address, EngineError> {
    let seal = header.seal()?;
    let message = header.sig_hash()?;

    let signature = Signature::from_slice(&seal[..64])
        .map_err(|e| EngineError::Signature(e.to_string()))?;
    let recovery_id =
        RecoveryId::from_byte(seal[64]).ok_or_else(|| {
            EngineError::Signature(format!("bad recovery id {}", seal[64]))
        })?;
    let key = VerifyingKey::recover_from_prehash(message.as_slice(), &signature, recovery_id)
        .map_err(|e| EngineError::Signature(e.to_string()))?;

    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    Ok(Address::from_slice(&hash[12..]))
}

/// Bounded cache over seal recoveries, shared by verification, snapshot
/// folding, and the reward path.
pub struct SigCache {
    cache: RwLock<LruCache<B256, Address>>,
}

impl SigCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero"),
            )),
        }
    }

    pub fn recover(&self, header: &Header) -> Result<Address, EngineError> {
        let hash = header.hash();
        if let Some(creator) = self.cache.write().get(&hash) {
            return Ok(*creator);
        }
        let creator = recover_creator(header)?;
        self.cache.write().put(hash, creator);
        Ok(creator)
    }
}
