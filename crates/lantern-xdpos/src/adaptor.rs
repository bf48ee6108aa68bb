//! The pluggable engine surface and the version-switching adaptor.
//!
//! The host talks to `ConsensusEngine`; the adaptor holds two engine
//! instances and selects per call on the block number. The default
//! configuration keeps v1 active at every height; v2 is wired and becomes
//! reachable only when a switch block is configured.

use std::sync::{mpsc, Arc};

use alloy_primitives::{Address, B256, U256};

use crate::chain::{ChainReader, StateBackend};
use crate::engine::{AbortHandle, XdPoS};
use crate::error::EngineError;
use crate::header::Header;
use crate::snapshot::Snapshot;

/// The capability a blockchain host drives per block:
/// prepare, seal, finalize, verify.
pub trait ConsensusEngine: Send + Sync {
    fn author(&self, header: &Header) -> Result<Address, EngineError>;

    fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), EngineError>;

    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> (AbortHandle, mpsc::Receiver<Result<(), EngineError>>);

    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), EngineError>;

    fn seal(
        &self,
        chain: &dyn ChainReader,
        header: Header,
        has_transactions: bool,
        results: mpsc::Sender<Header>,
        stop: mpsc::Receiver<()>,
    ) -> Result<(), EngineError>;

    fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        state: &mut dyn StateBackend,
    ) -> Result<(), EngineError>;

    fn calc_difficulty(
        &self,
        chain: &dyn ChainReader,
        parent: &Header,
        signer: Address,
    ) -> Result<U256, EngineError>;

    fn snapshot(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        hash: B256,
    ) -> Result<Snapshot, EngineError>;
}

impl ConsensusEngine for Arc<XdPoS> {
    fn author(&self, header: &Header) -> Result<Address, EngineError> {
        XdPoS::author(self, header)
    }

    fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), EngineError> {
        XdPoS::verify_header(self, chain, header, parents)
    }

    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> (AbortHandle, mpsc::Receiver<Result<(), EngineError>>) {
        XdPoS::verify_headers(self, chain, headers)
    }

    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), EngineError> {
        XdPoS::prepare(self, chain, header)
    }

    fn seal(
        &self,
        chain: &dyn ChainReader,
        header: Header,
        has_transactions: bool,
        results: mpsc::Sender<Header>,
        stop: mpsc::Receiver<()>,
    ) -> Result<(), EngineError> {
        XdPoS::seal(self, chain, header, has_transactions, results, stop)
    }

    fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        state: &mut dyn StateBackend,
    ) -> Result<(), EngineError> {
        XdPoS::finalize(self, chain, header, state)
    }

    fn calc_difficulty(
        &self,
        chain: &dyn ChainReader,
        parent: &Header,
        signer: Address,
    ) -> Result<U256, EngineError> {
        XdPoS::calc_difficulty(self, chain, parent, signer)
    }

    fn snapshot(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        hash: B256,
    ) -> Result<Snapshot, EngineError> {
        XdPoS::snapshot(self, chain, number, hash, &[])
    }
}

/// Two engine generations behind one surface, selected per block number.
pub struct VersionedEngine {
    v1: Arc<XdPoS>,
    v2: Arc<XdPoS>,
    switch_block: Option<u64>,
}

impl VersionedEngine {
    pub fn new(v1: Arc<XdPoS>, v2: Arc<XdPoS>) -> Self {
        let switch_block = v1.config().switch_block;
        Self { v1, v2, switch_block }
    }

    /// Which generation handles `number`.
    pub fn version_at(&self, number: u64) -> u32 {
        match self.switch_block {
            Some(switch) if number >= switch => 2,
            _ => 1,
        }
    }

    fn engine_for(&self, number: u64) -> &Arc<XdPoS> {
        if self.version_at(number) == 2 {
            &self.v2
        } else {
            &self.v1
        }
    }

    pub fn v1(&self) -> &Arc<XdPoS> {
        &self.v1
    }

    pub fn v2(&self) -> &Arc<XdPoS> {
        &self.v2
    }
}

impl ConsensusEngine for VersionedEngine {
    fn author(&self, header: &Header) -> Result<Address, EngineError> {
        self.engine_for(header.number).author(header)
    }

    fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), EngineError> {
        self.engine_for(header.number)
            .verify_header(chain, header, parents)
    }

    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> (AbortHandle, mpsc::Receiver<Result<(), EngineError>>) {
        // a batch is routed by its first header; mixed batches only occur
        // around the switch and fall back to per-header dispatch there
        let number = headers.first().map(|h| h.number).unwrap_or(0);
        self.engine_for(number).verify_headers(chain, headers)
    }

    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), EngineError> {
        self.engine_for(header.number).prepare(chain, header)
    }

    fn seal(
        &self,
        chain: &dyn ChainReader,
        header: Header,
        has_transactions: bool,
        results: mpsc::Sender<Header>,
        stop: mpsc::Receiver<()>,
    ) -> Result<(), EngineError> {
        self.engine_for(header.number)
            .seal(chain, header, has_transactions, results, stop)
    }

    fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        state: &mut dyn StateBackend,
    ) -> Result<(), EngineError> {
        self.engine_for(header.number).finalize(chain, header, state)
    }

    fn calc_difficulty(
        &self,
        chain: &dyn ChainReader,
        parent: &Header,
        signer: Address,
    ) -> Result<U256, EngineError> {
        self.engine_for(parent.number + 1)
            .calc_difficulty(chain, parent, signer)
    }

    fn snapshot(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        hash: B256,
    ) -> Result<Snapshot, EngineError> {
        self.engine_for(number).snapshot(chain, number, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::XdposConfig;
    use crate::hooks::EngineHooks;
    use crate::snapshot::MemorySnapshotStore;

    fn engine(config: XdposConfig) -> Arc<XdPoS> {
        Arc::new(XdPoS::new(
            config,
            Arc::new(MemorySnapshotStore::default()),
            EngineHooks::default(),
        ))
    }

    #[test]
    fn test_default_config_never_reaches_v2() {
        let config = XdposConfig::default();
        let adaptor = VersionedEngine::new(engine(config.clone()), engine(config));
        assert_eq!(adaptor.version_at(0), 1);
        assert_eq!(adaptor.version_at(u64::MAX), 1);
    }

    #[test]
    fn test_configured_switch_reaches_v2() {
        let config = XdposConfig {
            switch_block: Some(1800),
            ..Default::default()
        };
        let adaptor = VersionedEngine::new(engine(config.clone()), engine(config));
        assert_eq!(adaptor.version_at(1799), 1);
        assert_eq!(adaptor.version_at(1800), 2);
        assert_eq!(adaptor.version_at(u64::MAX), 2);
    }
}
