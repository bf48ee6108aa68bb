//! Fork digests and the schedule mapping them to beacon hard forks.
//!
//! Every content value on the wire is fork-tagged: the first four bytes are
//! the digest of the fork the body was produced under. An unknown digest is
//! a fatal decode error, never a silent fallback.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{slot_to_epoch, SLOTS_PER_EPOCH};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForkError {
    #[error("unknown fork digest 0x{}", hex::encode(.0))]
    UnknownForkDigest([u8; 4]),
}

/// The beacon hard forks this client understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Fork {
    Bellatrix,
    Capella,
    Deneb,
}

/// One activation entry of the fork schedule.
#[derive(Clone, Copy, Debug)]
struct ForkEntry {
    fork: Fork,
    version: [u8; 4],
    activation_epoch: u64,
    digest: [u8; 4],
}

/// The fork schedule of one beacon network: activation epochs, versions,
/// and the digests derived from them and the genesis validators root.
#[derive(Clone, Debug)]
pub struct ForkSchedule {
    genesis_validators_root: [u8; 32],
    genesis_time: u64,
    entries: Vec<ForkEntry>,
}

impl ForkSchedule {
    /// Mainnet activation epochs and versions.
    pub fn mainnet() -> Self {
        let genesis_validators_root = [
            0x4b, 0x36, 0x3d, 0xb9, 0x4e, 0x28, 0x61, 0x20, 0xd7, 0x6e, 0xb9, 0x05, 0x34, 0x0f,
            0xdd, 0x4e, 0x54, 0xbf, 0xe9, 0xf0, 0x6b, 0xf3, 0x3f, 0xf6, 0xcf, 0x5a, 0xd2, 0x7f,
            0x51, 0x1b, 0xfe, 0x95,
        ];
        Self::new(
            genesis_validators_root,
            1_606_824_023,
            &[
                (Fork::Bellatrix, [0x02, 0x00, 0x00, 0x00], 144_896),
                (Fork::Capella, [0x03, 0x00, 0x00, 0x00], 194_048),
                (Fork::Deneb, [0x04, 0x00, 0x00, 0x00], 269_568),
            ],
        )
    }

    /// Build a schedule from explicit versions and activation epochs.
    /// Entries must be given in activation order.
    pub fn new(
        genesis_validators_root: [u8; 32],
        genesis_time: u64,
        forks: &[(Fork, [u8; 4], u64)],
    ) -> Self {
        let entries = forks
            .iter()
            .map(|&(fork, version, activation_epoch)| ForkEntry {
                fork,
                version,
                activation_epoch,
                digest: compute_fork_digest(&version, &genesis_validators_root),
            })
            .collect();
        Self {
            genesis_validators_root,
            genesis_time,
            entries,
        }
    }

    pub fn genesis_validators_root(&self) -> [u8; 32] {
        self.genesis_validators_root
    }

    pub fn genesis_time(&self) -> u64 {
        self.genesis_time
    }

    /// Resolve a wire digest to its fork. Unknown digests are fatal.
    pub fn fork_by_digest(&self, digest: [u8; 4]) -> Result<Fork, ForkError> {
        self.entries
            .iter()
            .find(|e| e.digest == digest)
            .map(|e| e.fork)
            .ok_or(ForkError::UnknownForkDigest(digest))
    }

    /// The digest stamped on content produced under `fork`.
    pub fn digest(&self, fork: Fork) -> [u8; 4] {
        self.entry(fork).digest
    }

    /// The version used for signing-domain computation under `fork`.
    pub fn version(&self, fork: Fork) -> [u8; 4] {
        self.entry(fork).version
    }

    /// The fork active at a given slot.
    pub fn fork_at_slot(&self, slot: u64) -> Fork {
        let epoch = slot_to_epoch(slot);
        self.entries
            .iter()
            .rev()
            .find(|e| epoch >= e.activation_epoch)
            .map(|e| e.fork)
            .unwrap_or(self.entries[0].fork)
    }

    /// Wall-clock slot for a unix timestamp.
    pub fn slot_at_time(&self, now_unix: u64) -> u64 {
        now_unix.saturating_sub(self.genesis_time) / crate::types::SECONDS_PER_SLOT
    }

    /// Unix timestamp at which a slot starts.
    pub fn slot_start_time(&self, slot: u64) -> u64 {
        self.genesis_time + slot * crate::types::SECONDS_PER_SLOT
    }

    /// The first slot of the epoch containing `slot`.
    pub fn epoch_start_slot(slot: u64) -> u64 {
        slot_to_epoch(slot) * SLOTS_PER_EPOCH
    }

    fn entry(&self, fork: Fork) -> &ForkEntry {
        self.entries
            .iter()
            .find(|e| e.fork == fork)
            .expect("every Fork variant is present in the schedule")
    }
}

/// fork_data_root = hash_tree_root(ForkData { current_version, genesis_validators_root })
pub fn compute_fork_data_root(
    current_version: &[u8; 4],
    genesis_validators_root: &[u8; 32],
) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..4].copy_from_slice(current_version);
    data[32..].copy_from_slice(genesis_validators_root);
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// First four bytes of the fork data root.
pub fn compute_fork_digest(
    current_version: &[u8; 4],
    genesis_validators_root: &[u8; 32],
) -> [u8; 4] {
    let root = compute_fork_data_root(current_version, genesis_validators_root);
    let mut digest = [0u8; 4];
    digest.copy_from_slice(&root[..4]);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_round_trips_through_schedule() {
        let schedule = ForkSchedule::mainnet();
        for fork in [Fork::Bellatrix, Fork::Capella, Fork::Deneb] {
            let digest = schedule.digest(fork);
            assert_eq!(schedule.fork_by_digest(digest), Ok(fork));
        }
    }

    #[test]
    fn test_unknown_digest_is_fatal() {
        let schedule = ForkSchedule::mainnet();
        let err = schedule.fork_by_digest([0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert_eq!(err, ForkError::UnknownForkDigest([0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_fork_at_slot_follows_activation_order() {
        let schedule = ForkSchedule::mainnet();
        assert_eq!(schedule.fork_at_slot(0), Fork::Bellatrix);
        assert_eq!(schedule.fork_at_slot(144_896 * 32), Fork::Bellatrix);
        assert_eq!(schedule.fork_at_slot(194_048 * 32), Fork::Capella);
        assert_eq!(schedule.fork_at_slot(269_568 * 32), Fork::Deneb);
        assert_eq!(schedule.fork_at_slot(u64::MAX / 64), Fork::Deneb);
    }

    #[test]
    fn test_digests_are_distinct_per_version() {
        let schedule = ForkSchedule::mainnet();
        let digests: Vec<_> = [Fork::Bellatrix, Fork::Capella, Fork::Deneb]
            .iter()
            .map(|&f| schedule.digest(f))
            .collect();
        assert_ne!(digests[0], digests[1]);
        assert_ne!(digests[1], digests[2]);
    }

    #[test]
    fn test_slot_clock() {
        let schedule = ForkSchedule::mainnet();
        let genesis = schedule.genesis_time();
        assert_eq!(schedule.slot_at_time(genesis), 0);
        assert_eq!(schedule.slot_at_time(genesis + 12), 1);
        assert_eq!(schedule.slot_at_time(genesis + 25), 2);
        assert_eq!(schedule.slot_start_time(2), genesis + 24);
    }
}
