use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of validators in the Ethereum beacon chain sync committee.
pub const SYNC_COMMITTEE_SIZE: usize = 512;

/// Number of bytes in a BLS12-381 public key (compressed).
pub const BLS_PUBKEY_LEN: usize = 48;

/// Number of bytes in a BLS12-381 signature (compressed).
pub const BLS_SIGNATURE_LEN: usize = 96;

/// Slots per sync committee period (256 epochs * 32 slots/epoch = 8192).
pub const SLOTS_PER_SYNC_COMMITTEE_PERIOD: u64 = 8192;

/// Epochs per sync committee period.
pub const EPOCHS_PER_SYNC_COMMITTEE_PERIOD: u64 = 256;

/// Slots per epoch.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Seconds per slot on mainnet.
pub const SECONDS_PER_SLOT: u64 = 12;

/// Domain type for sync committee signatures.
pub const DOMAIN_SYNC_COMMITTEE: [u8; 4] = [0x07, 0x00, 0x00, 0x00];

/// Default participation threshold: 2/3 of the 512-member committee.
pub const MIN_SYNC_COMMITTEE_PARTICIPANTS: usize = 342;

/// Depth of the Merkle branch proving either sync committee inside the state.
pub const SYNC_COMMITTEE_PROOF_DEPTH: usize = 5;

/// Field index of the current sync committee within the beacon state.
pub const CURRENT_SYNC_COMMITTEE_INDEX: u64 = 22;

/// Field index of the next sync committee within the beacon state.
pub const NEXT_SYNC_COMMITTEE_INDEX: u64 = 23;

/// Depth of the Merkle branch proving the finalized checkpoint.
pub const FINALIZED_ROOT_PROOF_DEPTH: usize = 6;

/// Field index of the finalized checkpoint root within the beacon state.
pub const FINALIZED_ROOT_INDEX: u64 = 41;

/// Depth of the Merkle branch proving the historical summaries list.
pub const HISTORICAL_SUMMARIES_PROOF_DEPTH: usize = 5;

/// Field index of the historical summaries list within the beacon state.
pub const HISTORICAL_SUMMARIES_INDEX: u64 = 27;

/// SSZ list limit for the historical summaries accumulator.
pub const HISTORICAL_SUMMARIES_LIMIT: u64 = 1 << 24;

/// Maximum number of updates served in a single range request.
pub const MAX_REQUEST_LIGHT_CLIENT_UPDATES: u64 = 128;

pub fn slot_to_period(slot: u64) -> u64 {
    slot / SLOTS_PER_SYNC_COMMITTEE_PERIOD
}

pub fn slot_to_epoch(slot: u64) -> u64 {
    slot / SLOTS_PER_EPOCH
}

/// A BLS12-381 public key (48 bytes, compressed G1 point).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsPublicKey(pub [u8; BLS_PUBKEY_LEN]);

impl Default for BlsPublicKey {
    fn default() -> Self {
        Self([0u8; BLS_PUBKEY_LEN])
    }
}

impl Serialize for BlsPublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl BlsPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != BLS_PUBKEY_LEN {
            return Err("invalid BLS public key length");
        }
        let mut arr = [0u8; BLS_PUBKEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// A BLS12-381 signature (96 bytes, compressed G2 point).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsSignature(pub [u8; BLS_SIGNATURE_LEN]);

impl Default for BlsSignature {
    fn default() -> Self {
        Self([0u8; BLS_SIGNATURE_LEN])
    }
}

impl Serialize for BlsSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl BlsSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != BLS_SIGNATURE_LEN {
            return Err("invalid BLS signature length");
        }
        let mut arr = [0u8; BLS_SIGNATURE_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// A beacon chain block header.
/// This is the minimal header — enough to follow the chain without full blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    /// Slot number of this block.
    pub slot: u64,
    /// Index of the validator who proposed this block.
    pub proposer_index: u64,
    /// Root hash of the parent beacon block.
    pub parent_root: [u8; 32],
    /// Root hash of the beacon state after processing this block.
    pub state_root: [u8; 32],
    /// Root hash of the block body.
    pub body_root: [u8; 32],
}

/// Light-client view of a beacon header. Wraps the beacon header so the
/// container layout matches the wire format shared by every update variant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientHeader {
    pub beacon: BeaconBlockHeader,
}

impl LightClientHeader {
    /// A zeroed header on the wire means "field not present".
    pub fn is_empty(&self) -> bool {
        self.beacon == BeaconBlockHeader::default()
    }
}

/// The sync committee — 512 validators that sign off on the chain head.
/// Rotates every 256 epochs (~27 hours).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommittee {
    /// 512 BLS public keys of committee members.
    pub pubkeys: Vec<BlsPublicKey>,
    /// Aggregated public key of the whole committee.
    pub aggregate_pubkey: BlsPublicKey,
}

impl Default for SyncCommittee {
    fn default() -> Self {
        Self {
            pubkeys: vec![BlsPublicKey::default(); SYNC_COMMITTEE_SIZE],
            aggregate_pubkey: BlsPublicKey::default(),
        }
    }
}

impl SyncCommittee {
    /// Validate the sync committee has the correct number of members.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pubkeys.len() != SYNC_COMMITTEE_SIZE {
            return Err("sync committee must have exactly 512 members");
        }
        Ok(())
    }

    /// A zeroed committee on the wire means "field not present".
    pub fn is_empty(&self) -> bool {
        self.aggregate_pubkey == BlsPublicKey::default()
            && self.pubkeys.iter().all(|pk| *pk == BlsPublicKey::default())
    }
}

/// The aggregate BLS signature from the sync committee, with the bitvector
/// indicating which of the 512 members signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAggregate {
    /// SSZ bitvector, little-endian bit order, 64 bytes for 512 members.
    pub sync_committee_bits: Vec<u8>,
    /// The aggregated BLS signature from all participating members.
    pub sync_committee_signature: BlsSignature,
}

impl Default for SyncAggregate {
    fn default() -> Self {
        Self {
            sync_committee_bits: vec![0u8; SYNC_COMMITTEE_SIZE / 8],
            sync_committee_signature: BlsSignature::default(),
        }
    }
}

impl SyncAggregate {
    /// Count how many sync committee members participated.
    pub fn num_participants(&self) -> usize {
        self.sync_committee_bits
            .view_bits::<Lsb0>()
            .count_ones()
    }

    /// Check if a specific committee member (by index) participated.
    pub fn has_participant(&self, index: usize) -> bool {
        if index >= SYNC_COMMITTEE_SIZE {
            return false;
        }
        self.sync_committee_bits
            .view_bits::<Lsb0>()
            .get(index)
            .map(|b| *b)
            .unwrap_or(false)
    }

    /// Indices of all participating committee members.
    pub fn participant_indices(&self) -> Vec<usize> {
        self.sync_committee_bits
            .view_bits::<Lsb0>()
            .iter_ones()
            .filter(|&i| i < SYNC_COMMITTEE_SIZE)
            .collect()
    }
}

/// A light client bootstrap — the trust anchor binding a checkpoint header
/// to its current sync committee.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientBootstrap {
    /// The beacon header at the checkpoint.
    pub header: LightClientHeader,
    /// The sync committee active at the checkpoint.
    pub current_sync_committee: SyncCommittee,
    /// Merkle branch proving current_sync_committee against the header's state root.
    pub current_sync_committee_branch: [[u8; 32]; SYNC_COMMITTEE_PROOF_DEPTH],
}

/// A full light client update. Absent optional fields are zeroed on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientUpdate {
    /// The header the sync committee attested to.
    pub attested_header: LightClientHeader,
    /// The next sync committee (zeroed unless the update crosses a period).
    pub next_sync_committee: SyncCommittee,
    /// Merkle branch for next_sync_committee against the attested state root.
    pub next_sync_committee_branch: [[u8; 32]; SYNC_COMMITTEE_PROOF_DEPTH],
    /// The finalized header this update proves (zeroed when no finality).
    pub finalized_header: LightClientHeader,
    /// Merkle branch for finalized_header against the attested state root.
    pub finality_branch: [[u8; 32]; FINALIZED_ROOT_PROOF_DEPTH],
    /// Aggregate signature over the attested header.
    pub sync_aggregate: SyncAggregate,
    /// The slot the signature was produced at.
    pub signature_slot: u64,
}

/// A finality update — attested plus finalized header, no committee rotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientFinalityUpdate {
    pub attested_header: LightClientHeader,
    pub finalized_header: LightClientHeader,
    pub finality_branch: [[u8; 32]; FINALIZED_ROOT_PROOF_DEPTH],
    pub sync_aggregate: SyncAggregate,
    pub signature_slot: u64,
}

/// An optimistic update — an attested head with sufficient participation,
/// no finality proof.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientOptimisticUpdate {
    pub attested_header: LightClientHeader,
    pub sync_aggregate: SyncAggregate,
    pub signature_slot: u64,
}

/// One entry of the historical summaries accumulator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalSummary {
    pub block_summary_root: [u8; 32],
    pub state_summary_root: [u8; 32],
}

/// The historical summaries list with its Merkle proof against a beacon
/// state root, keyed by epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalSummariesWithProof {
    pub epoch: u64,
    pub historical_summaries: Vec<HistoricalSummary>,
    pub proof: [[u8; 32]; HISTORICAL_SUMMARIES_PROOF_DEPTH],
}

/// The fields shared by every update variant, used by the verification path.
/// Derived from a full, finality, or optimistic update.
#[derive(Clone, Debug)]
pub struct GenericUpdate {
    pub attested_header: LightClientHeader,
    pub sync_aggregate: SyncAggregate,
    pub signature_slot: u64,
    pub next_sync_committee: Option<SyncCommittee>,
    pub next_sync_committee_branch: Option<[[u8; 32]; SYNC_COMMITTEE_PROOF_DEPTH]>,
    pub finalized_header: Option<LightClientHeader>,
    pub finality_branch: Option<[[u8; 32]; FINALIZED_ROOT_PROOF_DEPTH]>,
}

impl From<&LightClientUpdate> for GenericUpdate {
    fn from(update: &LightClientUpdate) -> Self {
        Self {
            attested_header: update.attested_header.clone(),
            sync_aggregate: update.sync_aggregate.clone(),
            signature_slot: update.signature_slot,
            next_sync_committee: (!update.next_sync_committee.is_empty())
                .then(|| update.next_sync_committee.clone()),
            next_sync_committee_branch: (!update.next_sync_committee.is_empty())
                .then_some(update.next_sync_committee_branch),
            finalized_header: (!update.finalized_header.is_empty())
                .then(|| update.finalized_header.clone()),
            finality_branch: (!update.finalized_header.is_empty())
                .then_some(update.finality_branch),
        }
    }
}

impl From<&LightClientFinalityUpdate> for GenericUpdate {
    fn from(update: &LightClientFinalityUpdate) -> Self {
        Self {
            attested_header: update.attested_header.clone(),
            sync_aggregate: update.sync_aggregate.clone(),
            signature_slot: update.signature_slot,
            next_sync_committee: None,
            next_sync_committee_branch: None,
            finalized_header: (!update.finalized_header.is_empty())
                .then(|| update.finalized_header.clone()),
            finality_branch: (!update.finalized_header.is_empty())
                .then_some(update.finality_branch),
        }
    }
}

impl From<&LightClientOptimisticUpdate> for GenericUpdate {
    fn from(update: &LightClientOptimisticUpdate) -> Self {
        Self {
            attested_header: update.attested_header.clone(),
            sync_aggregate: update.sync_aggregate.clone(),
            signature_slot: update.signature_slot,
            next_sync_committee: None,
            next_sync_committee_branch: None,
            finalized_header: None,
            finality_branch: None,
        }
    }
}
