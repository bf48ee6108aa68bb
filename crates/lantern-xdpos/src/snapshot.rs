//! The authorization snapshot: who may sign, who signed recently, and the
//! pending votes that reshape the signer set.
//!
//! A snapshot is keyed by `(number, hash)` and advances by folding
//! contiguous headers. At an epoch checkpoint it is sealed: votes and
//! tallies clear and the signer set is replaced by the list embedded in
//! the checkpoint header's extra-data.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::XdposConfig;
use crate::error::EngineError;
use crate::header::{Header, SigCache, NONCE_AUTH, NONCE_DROP};
use crate::hooks::MasternodeSource;

/// A single pending vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Authorized signer that cast this vote.
    pub signer: Address,
    /// Block the vote was cast in, for expiry bookkeeping.
    pub block: u64,
    /// Account being voted on.
    pub address: Address,
    /// Whether to authorize or deauthorize the account.
    pub authorize: bool,
}

/// Running vote count for one candidate, one direction at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub authorize: bool,
    pub votes: u64,
}

/// Keyed blob namespace the engine persists snapshots into.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, key: &[u8], value: Vec<u8>);
}

/// In-memory store, used by tests and hosts without persistence.
#[derive(Default)]
pub struct MemorySnapshotStore(RwLock<HashMap<Vec<u8>, Vec<u8>>>);

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.read().get(key).cloned()
    }

    fn put(&self, key: &[u8], value: Vec<u8>) {
        self.0.write().insert(key.to_vec(), value);
    }
}

const STORE_PREFIX: &[u8] = b"xdpos-";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Block number this snapshot is valid for.
    pub number: u64,
    /// Hash of the block this snapshot is valid for.
    pub hash: B256,
    /// Authorized signers at this moment.
    pub signers: BTreeSet<Address>,
    /// Recent sealers, by block number, kept for the seal-guard window.
    pub recents: BTreeMap<u64, Address>,
    /// Pending votes, in casting order.
    pub votes: Vec<Vote>,
    /// Current vote counts per candidate.
    pub tally: BTreeMap<Address, Tally>,
}

impl Snapshot {
    pub fn new(number: u64, hash: B256, signers: impl IntoIterator<Item = Address>) -> Self {
        Self {
            number,
            hash,
            signers: signers.into_iter().collect(),
            recents: BTreeMap::new(),
            votes: Vec::new(),
            tally: BTreeMap::new(),
        }
    }

    pub fn load(store: &dyn SnapshotStore, hash: B256) -> Option<Snapshot> {
        let mut key = STORE_PREFIX.to_vec();
        key.extend_from_slice(hash.as_slice());
        let blob = store.get(&key)?;
        serde_json::from_slice(&blob).ok()
    }

    pub fn store(&self, store: &dyn SnapshotStore) -> Result<(), EngineError> {
        let mut key = STORE_PREFIX.to_vec();
        key.extend_from_slice(self.hash.as_slice());
        let blob = serde_json::to_vec(self).map_err(|e| EngineError::Storage(e.to_string()))?;
        store.put(&key, blob);
        Ok(())
    }

    /// Signers in address order; the order used for inturn rotation and
    /// checkpoint extra-data.
    pub fn signers_sorted(&self) -> Vec<Address> {
        self.signers.iter().copied().collect()
    }

    /// A signer is inturn at `number` iff it sits at `number % len` in
    /// address order.
    pub fn inturn(&self, number: u64, signer: Address) -> bool {
        let signers = self.signers_sorted();
        if signers.is_empty() {
            return false;
        }
        let offset = (number % signers.len() as u64) as usize;
        signers[offset] == signer
    }

    /// Width of the recent-signer window: a signer may seal once per
    /// `floor(len/2) + 1` consecutive blocks.
    pub fn seal_window(&self) -> u64 {
        self.signers.len() as u64 / 2 + 1
    }

    /// Whether `signer` sealed within the guard window before `number`.
    pub fn recently_signed(&self, number: u64, signer: Address) -> bool {
        let limit = self.seal_window();
        self.recents
            .iter()
            .any(|(&seen, &recent)| recent == signer && seen + limit > number)
    }

    /// A vote is meaningful only if it would change the signer set.
    pub fn valid_vote(&self, address: Address, authorize: bool) -> bool {
        self.signers.contains(&address) != authorize
    }

    /// Count a vote into the tally. Returns false for votes that cannot
    /// apply to the current signer set.
    fn cast(&mut self, address: Address, authorize: bool) -> bool {
        if !self.valid_vote(address, authorize) {
            return false;
        }
        self.tally
            .entry(address)
            .and_modify(|t| t.votes += 1)
            .or_insert(Tally { authorize, votes: 1 });
        true
    }

    /// Remove a previously counted vote from the tally.
    fn uncast(&mut self, address: Address, authorize: bool) -> bool {
        match self.tally.get_mut(&address) {
            Some(tally) if tally.authorize == authorize => {
                if tally.votes > 1 {
                    tally.votes -= 1;
                } else {
                    self.tally.remove(&address);
                }
                true
            }
            _ => false,
        }
    }

    /// Fold a run of contiguous headers on top of this snapshot.
    pub fn apply(
        &self,
        headers: &[Header],
        config: &XdposConfig,
        sigcache: &SigCache,
        masternodes: Option<&Arc<dyn MasternodeSource>>,
    ) -> Result<Snapshot, EngineError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1 {
                return Err(EngineError::InvalidVotingChain);
            }
        }
        if headers[0].number != self.number + 1 {
            return Err(EngineError::InvalidVotingChain);
        }

        let mut snap = self.clone();
        for header in headers {
            let number = header.number;

            // Checkpoint blocks seal the snapshot: pending state clears
            // and the signer set is read back from the header.
            if config.is_checkpoint(number) {
                snap.votes.clear();
                snap.tally.clear();
                snap.signers = header.checkpoint_signers()?.into_iter().collect();
                snap.number = number;
                snap.hash = header.hash();
                continue;
            }

            // Resolve the creator and check authorization.
            let creator = sigcache.recover(header)?;
            let authorized = match masternodes {
                Some(source) => source.masternodes(number).contains(&creator),
                None => snap.signers.contains(&creator),
            };
            if !authorized {
                return Err(EngineError::Unauthorized(creator));
            }

            // Slide the recent-signer window, then enforce it.
            let limit = snap.seal_window();
            if number >= limit {
                snap.recents.remove(&(number - limit));
            }
            if snap.recents.values().any(|&recent| recent == creator) {
                return Err(EngineError::Unauthorized(creator));
            }
            snap.recents.insert(number, creator);

            // A non-zero coinbase is a vote.
            if header.coinbase != Address::ZERO {
                let authorize = match header.nonce {
                    n if n == NONCE_AUTH => true,
                    n if n == NONCE_DROP => false,
                    _ => return Err(EngineError::InvalidVote),
                };

                if let Some(previous) = snap
                    .votes
                    .iter()
                    .position(|v| v.signer == creator && v.address == header.coinbase)
                {
                    // The same pending vote again is a duplicate; the
                    // opposite direction supersedes the old vote.
                    if snap.votes[previous].authorize == authorize {
                        return Err(EngineError::InvalidVote);
                    }
                    let old = snap.votes.remove(previous);
                    snap.uncast(old.address, old.authorize);
                }

                if !snap.cast(header.coinbase, authorize) {
                    return Err(EngineError::InvalidVote);
                }
                snap.votes.push(Vote {
                    signer: creator,
                    block: number,
                    address: header.coinbase,
                    authorize,
                });

                // Apply the vote once it holds a majority.
                let passed = snap
                    .tally
                    .get(&header.coinbase)
                    .map_or(false, |t| t.votes > snap.signers.len() as u64 / 2);
                if passed {
                    snap.apply_vote(header.coinbase, authorize, number);
                }
            }

            snap.number = number;
            snap.hash = header.hash();
        }

        debug!(number = snap.number, signers = snap.signers.len(), "snapshot advanced");
        Ok(snap)
    }

    /// Mutate the signer set after a majority vote and clean up every
    /// piece of pending state the change invalidates.
    fn apply_vote(&mut self, candidate: Address, authorize: bool, number: u64) {
        if authorize {
            self.signers.insert(candidate);
        } else {
            self.signers.remove(&candidate);

            // The window shrank; drop the entry that fell out of it.
            let limit = self.seal_window();
            if number >= limit {
                self.recents.remove(&(number - limit));
            }

            // Votes cast by the removed signer no longer count.
            let mut i = 0;
            while i < self.votes.len() {
                if self.votes[i].signer == candidate {
                    let vote = self.votes.remove(i);
                    self.uncast(vote.address, vote.authorize);
                } else {
                    i += 1;
                }
            }
        }

        // Votes about the candidate are settled either way.
        self.votes.retain(|v| v.address != candidate);
        self.tally.remove(&candidate);
    }
}
