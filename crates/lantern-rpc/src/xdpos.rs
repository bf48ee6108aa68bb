//! The `xdpos_*` namespace.

use alloy_primitives::{Address, B256};
use serde_json::{json, Value};

use lantern_xdpos::XdposApi;

use crate::error::RpcError;

pub struct XdposRpc {
    api: XdposApi,
}

impl XdposRpc {
    pub fn new(api: XdposApi) -> Self {
        Self { api }
    }

    fn parse_hash(hash_hex: &str) -> Result<B256, RpcError> {
        hash_hex
            .parse::<B256>()
            .map_err(|e| RpcError::invalid_params(format!("bad block hash: {e}")))
    }

    fn parse_address(address_hex: &str) -> Result<Address, RpcError> {
        address_hex
            .parse::<Address>()
            .map_err(|e| RpcError::invalid_params(format!("bad address: {e}")))
    }

    pub fn get_snapshot(&self, number: Option<u64>) -> Result<Value, RpcError> {
        let snapshot = self.api.get_snapshot(number)?;
        Ok(json!(snapshot))
    }

    pub fn get_snapshot_at_hash(&self, hash_hex: &str) -> Result<Value, RpcError> {
        let snapshot = self.api.get_snapshot_at_hash(Self::parse_hash(hash_hex)?)?;
        Ok(json!(snapshot))
    }

    pub fn get_signers(&self, number: Option<u64>) -> Result<Value, RpcError> {
        Ok(json!(self.api.get_signers(number)?))
    }

    pub fn get_signers_at_hash(&self, hash_hex: &str) -> Result<Value, RpcError> {
        Ok(json!(self.api.get_signers_at_hash(Self::parse_hash(hash_hex)?)?))
    }

    pub fn get_masternodes(&self, number: Option<u64>) -> Result<Value, RpcError> {
        Ok(json!(self.api.get_masternodes(number)?))
    }

    pub fn get_candidates(&self, number: Option<u64>) -> Result<Value, RpcError> {
        let candidates: Vec<Value> = self
            .api
            .get_candidates(number)?
            .into_iter()
            .map(|(address, authorize, votes)| {
                json!({
                    "address": address,
                    "authorize": authorize,
                    "votes": votes,
                })
            })
            .collect();
        Ok(json!(candidates))
    }

    pub fn proposals(&self) -> Result<Value, RpcError> {
        Ok(json!(self.api.proposals()))
    }

    pub fn propose(&self, address_hex: &str, authorize: bool) -> Result<Value, RpcError> {
        self.api.propose(Self::parse_address(address_hex)?, authorize);
        Ok(json!(true))
    }

    pub fn discard(&self, address_hex: &str) -> Result<Value, RpcError> {
        self.api.discard(Self::parse_address(address_hex)?);
        Ok(json!(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_xdpos::chain::ChainReader;
    use lantern_xdpos::header::{Header, EXTRA_SEAL, EXTRA_VANITY};
    use lantern_xdpos::hooks::EngineHooks;
    use lantern_xdpos::snapshot::MemorySnapshotStore;
    use lantern_xdpos::{XdPoS, XdposConfig};
    use std::sync::Arc;

    /// One-genesis chain; deep history is exercised in the engine crate.
    struct GenesisChain {
        genesis: Header,
    }

    impl GenesisChain {
        fn new(signers: &[Address]) -> Self {
            let mut extra = vec![0u8; EXTRA_VANITY];
            for signer in signers {
                extra.extend_from_slice(signer.as_slice());
            }
            extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
            let genesis = Header {
                extra: extra.into(),
                ..Default::default()
            };
            Self { genesis }
        }
    }

    impl ChainReader for GenesisChain {
        fn header_by_number(&self, number: u64) -> Option<Header> {
            (number == 0).then(|| self.genesis.clone())
        }

        fn header_by_hash(&self, hash: B256, number: u64) -> Option<Header> {
            (number == 0 && hash == self.genesis.hash()).then(|| self.genesis.clone())
        }

        fn find_header(&self, hash: B256) -> Option<Header> {
            (hash == self.genesis.hash()).then(|| self.genesis.clone())
        }

        fn current_header(&self) -> Header {
            self.genesis.clone()
        }
    }

    fn rpc() -> (XdposRpc, Vec<Address>) {
        let signers = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
        let chain = Arc::new(GenesisChain::new(&signers));
        let engine = Arc::new(XdPoS::new(
            XdposConfig::default(),
            Arc::new(MemorySnapshotStore::default()),
            EngineHooks::default(),
        ));
        (XdposRpc::new(XdposApi::new(engine, chain)), signers)
    }

    #[test]
    fn test_get_signers_json_shape() {
        let (rpc, signers) = rpc();
        let value = rpc.get_signers(None).unwrap();
        let list = value.as_array().unwrap();
        assert_eq!(list.len(), signers.len());
        assert!(list[0].as_str().unwrap().starts_with("0x"));
    }

    #[test]
    fn test_get_snapshot_json_shape() {
        let (rpc, _) = rpc();
        let value = rpc.get_snapshot(None).unwrap();
        assert_eq!(value["number"], 0);
        assert!(value["signers"].is_array());
    }

    #[test]
    fn test_propose_and_discard() {
        let (rpc, _) = rpc();
        let candidate = "0xdddddddddddddddddddddddddddddddddddddddd";
        rpc.propose(candidate, true).unwrap();
        let proposals = rpc.proposals().unwrap();
        assert_eq!(proposals.as_object().unwrap().len(), 1);
        rpc.discard(candidate).unwrap();
        assert!(rpc.proposals().unwrap().as_object().unwrap().is_empty());

        let err = rpc.propose("nonsense", true).unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[test]
    fn test_unknown_block_maps_to_stable_code() {
        let (rpc, _) = rpc();
        let err = rpc.get_snapshot(Some(12)).unwrap_err();
        assert_eq!(err.code, -32001);
    }
}
