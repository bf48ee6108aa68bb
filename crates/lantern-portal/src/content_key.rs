//! Typed content keys for the beacon network.
//!
//! A canonical key is one type-tag byte followed by the SSZ encoding of the
//! key fields: little-endian for scalars, raw bytes for hashes. The content
//! id is the SHA256 of the canonical key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const BOOTSTRAP_KEY_PREFIX: u8 = 0x10;
pub const UPDATE_RANGE_KEY_PREFIX: u8 = 0x11;
pub const FINALITY_UPDATE_KEY_PREFIX: u8 = 0x12;
pub const OPTIMISTIC_UPDATE_KEY_PREFIX: u8 = 0x13;
pub const HISTORICAL_SUMMARIES_KEY_PREFIX: u8 = 0x14;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentKeyError {
    #[error("unknown content key tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("content key for tag 0x{tag:02x}: expected {expected} bytes, got {got}")]
    Length { tag: u8, expected: usize, got: usize },
    #[error("empty content key")]
    Empty,
    #[error("bad hex: {0}")]
    Hex(String),
}

/// The five content kinds the beacon network serves.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeaconContentKey {
    /// Trust anchor at a checkpoint, keyed by the header's hash tree root.
    Bootstrap { block_hash: [u8; 32] },
    /// A contiguous run of per-period updates.
    UpdateRange { start_period: u64, count: u64 },
    /// The latest finality update, keyed by its finalized slot.
    FinalityUpdate { finalized_slot: u64 },
    /// The latest optimistic update, keyed by its attested slot.
    OptimisticUpdate { optimistic_slot: u64 },
    /// Historical summaries with proof, keyed by epoch.
    HistoricalSummaries { epoch: u64 },
}

impl BeaconContentKey {
    /// The canonical wire form: tag byte plus SSZ-encoded fields.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Bootstrap { block_hash } => {
                let mut out = Vec::with_capacity(33);
                out.push(BOOTSTRAP_KEY_PREFIX);
                out.extend_from_slice(block_hash);
                out
            }
            Self::UpdateRange { start_period, count } => {
                let mut out = Vec::with_capacity(17);
                out.push(UPDATE_RANGE_KEY_PREFIX);
                out.extend_from_slice(&start_period.to_le_bytes());
                out.extend_from_slice(&count.to_le_bytes());
                out
            }
            Self::FinalityUpdate { finalized_slot } => {
                let mut out = Vec::with_capacity(9);
                out.push(FINALITY_UPDATE_KEY_PREFIX);
                out.extend_from_slice(&finalized_slot.to_le_bytes());
                out
            }
            Self::OptimisticUpdate { optimistic_slot } => {
                let mut out = Vec::with_capacity(9);
                out.push(OPTIMISTIC_UPDATE_KEY_PREFIX);
                out.extend_from_slice(&optimistic_slot.to_le_bytes());
                out
            }
            Self::HistoricalSummaries { epoch } => {
                let mut out = Vec::with_capacity(9);
                out.push(HISTORICAL_SUMMARIES_KEY_PREFIX);
                out.extend_from_slice(&epoch.to_le_bytes());
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentKeyError> {
        let (&tag, body) = bytes.split_first().ok_or(ContentKeyError::Empty)?;
        let expect = |n: usize| {
            if body.len() == n {
                Ok(())
            } else {
                Err(ContentKeyError::Length {
                    tag,
                    expected: n,
                    got: body.len(),
                })
            }
        };
        match tag {
            BOOTSTRAP_KEY_PREFIX => {
                expect(32)?;
                let mut block_hash = [0u8; 32];
                block_hash.copy_from_slice(body);
                Ok(Self::Bootstrap { block_hash })
            }
            UPDATE_RANGE_KEY_PREFIX => {
                expect(16)?;
                Ok(Self::UpdateRange {
                    start_period: u64::from_le_bytes(body[..8].try_into().unwrap()),
                    count: u64::from_le_bytes(body[8..].try_into().unwrap()),
                })
            }
            FINALITY_UPDATE_KEY_PREFIX => {
                expect(8)?;
                Ok(Self::FinalityUpdate {
                    finalized_slot: u64::from_le_bytes(body.try_into().unwrap()),
                })
            }
            OPTIMISTIC_UPDATE_KEY_PREFIX => {
                expect(8)?;
                Ok(Self::OptimisticUpdate {
                    optimistic_slot: u64::from_le_bytes(body.try_into().unwrap()),
                })
            }
            HISTORICAL_SUMMARIES_KEY_PREFIX => {
                expect(8)?;
                Ok(Self::HistoricalSummaries {
                    epoch: u64::from_le_bytes(body.try_into().unwrap()),
                })
            }
            other => Err(ContentKeyError::UnknownTag(other)),
        }
    }

    /// SHA256 of the canonical key, the address content lives under.
    pub fn content_id(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.encode());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.encode()))
    }

    pub fn from_hex(s: &str) -> Result<Self, ContentKeyError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| ContentKeyError::Hex(e.to_string()))?;
        Self::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_keys() -> Vec<BeaconContentKey> {
        vec![
            BeaconContentKey::Bootstrap {
                block_hash: [0xAB; 32],
            },
            BeaconContentKey::UpdateRange {
                start_period: 800,
                count: 4,
            },
            BeaconContentKey::FinalityUpdate {
                finalized_slot: 7_000_000,
            },
            BeaconContentKey::OptimisticUpdate {
                optimistic_slot: 7_000_032,
            },
            BeaconContentKey::HistoricalSummaries { epoch: 250_000 },
        ]
    }

    #[test]
    fn test_key_round_trip() {
        for key in all_keys() {
            let bytes = key.encode();
            assert_eq!(BeaconContentKey::decode(&bytes).unwrap(), key);
            assert_eq!(BeaconContentKey::from_hex(&key.to_hex()).unwrap(), key);
        }
    }

    #[test]
    fn test_key_layouts() {
        let keys = all_keys();
        assert_eq!(keys[0].encode().len(), 33);
        assert_eq!(keys[1].encode().len(), 17);
        assert_eq!(keys[2].encode().len(), 9);

        // scalars are little-endian
        let bytes = keys[1].encode();
        assert_eq!(bytes[0], UPDATE_RANGE_KEY_PREFIX);
        assert_eq!(u64::from_le_bytes(bytes[1..9].try_into().unwrap()), 800);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert_eq!(
            BeaconContentKey::decode(&[0x99, 0, 0]),
            Err(ContentKeyError::UnknownTag(0x99))
        );
        assert_eq!(BeaconContentKey::decode(&[]), Err(ContentKeyError::Empty));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(matches!(
            BeaconContentKey::decode(&[BOOTSTRAP_KEY_PREFIX, 1, 2, 3]),
            Err(ContentKeyError::Length { tag: 0x10, expected: 32, got: 3 })
        ));
    }

    #[test]
    fn test_content_ids_are_distinct() {
        let ids: Vec<_> = all_keys().iter().map(|k| k.content_id()).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
