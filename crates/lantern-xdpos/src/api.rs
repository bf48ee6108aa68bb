//! Query surface over the engine: snapshots, signer sets, and the voting
//! controls, shaped for the RPC layer.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256};

use crate::chain::ChainReader;
use crate::engine::XdPoS;
use crate::error::EngineError;
use crate::header::Header;
use crate::snapshot::Snapshot;

pub struct XdposApi {
    engine: Arc<XdPoS>,
    chain: Arc<dyn ChainReader>,
}

impl XdposApi {
    pub fn new(engine: Arc<XdPoS>, chain: Arc<dyn ChainReader>) -> Self {
        Self { engine, chain }
    }

    fn header_at(&self, number: Option<u64>) -> Result<Header, EngineError> {
        match number {
            None => Ok(self.chain.current_header()),
            Some(number) => self
                .chain
                .header_by_number(number)
                .ok_or(EngineError::UnknownBlock),
        }
    }

    /// Snapshot at a block number, default tip.
    pub fn get_snapshot(&self, number: Option<u64>) -> Result<Snapshot, EngineError> {
        let header = self.header_at(number)?;
        self.engine
            .snapshot(&*self.chain, header.number, header.hash(), &[])
    }

    /// Snapshot at a specific block hash.
    pub fn get_snapshot_at_hash(&self, hash: B256) -> Result<Snapshot, EngineError> {
        let header = self
            .chain
            .find_header(hash)
            .ok_or(EngineError::UnknownBlock)?;
        self.engine
            .snapshot(&*self.chain, header.number, header.hash(), &[])
    }

    /// Authorized signers at a block number, in address order.
    pub fn get_signers(&self, number: Option<u64>) -> Result<Vec<Address>, EngineError> {
        Ok(self.get_snapshot(number)?.signers_sorted())
    }

    /// Authorized signers at a block hash.
    pub fn get_signers_at_hash(&self, hash: B256) -> Result<Vec<Address>, EngineError> {
        Ok(self.get_snapshot_at_hash(hash)?.signers_sorted())
    }

    /// The masternode set in force at a block: the external source when
    /// one is injected, else the snapshot's signers.
    pub fn get_masternodes(&self, number: Option<u64>) -> Result<Vec<Address>, EngineError> {
        let header = self.header_at(number)?;
        if let Some(source) = &self.engine.hooks().masternodes {
            return Ok(source.masternodes(header.number));
        }
        self.get_signers(number)
    }

    /// Current vote tallies: candidate, direction, count.
    pub fn get_candidates(
        &self,
        number: Option<u64>,
    ) -> Result<Vec<(Address, bool, u64)>, EngineError> {
        let snap = self.get_snapshot(number)?;
        Ok(snap
            .tally
            .iter()
            .map(|(address, tally)| (*address, tally.authorize, tally.votes))
            .collect())
    }

    /// Pending local proposals.
    pub fn proposals(&self) -> HashMap<Address, bool> {
        self.engine.proposals()
    }

    /// Queue a vote for the next sealed blocks.
    pub fn propose(&self, address: Address, authorize: bool) {
        self.engine.propose(address, authorize);
    }

    /// Drop a queued vote.
    pub fn discard(&self, address: Address) {
        self.engine.discard(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{build_header, genesis_with_signers, sorted_keys, MockChain};
    use crate::config::XdposConfig;
    use crate::header::tests::address_of;
    use crate::hooks::EngineHooks;
    use crate::snapshot::MemorySnapshotStore;

    fn harness() -> (XdposApi, Vec<Address>, B256) {
        let keys = sorted_keys(&[1, 2, 3]);
        let addrs: Vec<Address> = keys.iter().map(address_of).collect();
        let config = XdposConfig::default();
        let chain = Arc::new(MockChain::new());
        let genesis = genesis_with_signers(&addrs);
        chain.insert(genesis.clone());
        let mut parent = genesis;
        for i in 1..=3u64 {
            let sealer = &keys[(i % keys.len() as u64) as usize];
            let header = build_header(&parent, sealer, &addrs, config.epoch, config.period, true);
            chain.insert(header.clone());
            parent = header;
        }
        let tip_hash = parent.hash();
        let engine = Arc::new(XdPoS::new(
            config,
            Arc::new(MemorySnapshotStore::default()),
            EngineHooks::default(),
        ));
        (XdposApi::new(engine, chain), addrs, tip_hash)
    }

    #[test]
    fn test_snapshot_queries() {
        let (api, addrs, tip_hash) = harness();

        let tip = api.get_snapshot(None).unwrap();
        assert_eq!(tip.number, 3);
        assert_eq!(api.get_signers(None).unwrap(), addrs);
        assert_eq!(api.get_signers_at_hash(tip_hash).unwrap(), addrs);
        assert_eq!(api.get_masternodes(Some(2)).unwrap(), addrs);

        assert!(matches!(
            api.get_snapshot(Some(99)),
            Err(EngineError::UnknownBlock)
        ));
        assert!(matches!(
            api.get_snapshot_at_hash(B256::repeat_byte(9)),
            Err(EngineError::UnknownBlock)
        ));
    }

    #[test]
    fn test_proposal_round_trip() {
        let (api, _, _) = harness();
        let candidate = Address::repeat_byte(0xD);

        api.propose(candidate, true);
        assert_eq!(api.proposals().get(&candidate), Some(&true));

        api.discard(candidate);
        assert!(api.proposals().is_empty());
    }

    #[test]
    fn test_candidates_reflect_tally() {
        let (api, _, _) = harness();
        // no votes were sealed into this chain
        assert!(api.get_candidates(None).unwrap().is_empty());
    }
}
