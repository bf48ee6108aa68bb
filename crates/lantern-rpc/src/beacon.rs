//! The `beacon_*` namespace: content queries over the network adapter
//! plus overlay management delegated to the routing layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use lantern_portal::{BeaconContentKey, BeaconNetwork};

use crate::error::RpcError;

/// Overlay management surface. Routing internals are out of scope here;
/// the handle implementing this lives with the overlay.
#[async_trait]
pub trait OverlayAdmin: Send + Sync {
    async fn ping(&self, enr: &str) -> Option<Value>;
    async fn find_nodes(&self, enr: &str, distances: Vec<u16>) -> Vec<String>;
    async fn find_content(&self, enr: &str, key: &[u8]) -> Option<Vec<u8>>;
    async fn offer(&self, enr: &str, items: Vec<(Vec<u8>, Vec<u8>)>) -> usize;
    async fn recursive_find_nodes(&self, node_id: &str) -> Vec<String>;
    fn routing_table_info(&self) -> Value;
    fn add_enr(&self, enr: &str) -> bool;
    fn get_enr(&self, node_id: &str) -> Option<String>;
    fn delete_enr(&self, node_id: &str) -> bool;
    fn lookup_enr(&self, node_id: &str) -> Option<String>;
}

pub struct BeaconRpc {
    network: Arc<BeaconNetwork>,
    admin: Arc<dyn OverlayAdmin>,
}

impl BeaconRpc {
    pub fn new(network: Arc<BeaconNetwork>, admin: Arc<dyn OverlayAdmin>) -> Self {
        Self { network, admin }
    }

    fn parse_key(key_hex: &str) -> Result<BeaconContentKey, RpcError> {
        BeaconContentKey::from_hex(key_hex)
            .map_err(|e| RpcError::invalid_params(format!("bad content key: {e}")))
    }

    fn parse_value(value_hex: &str) -> Result<Vec<u8>, RpcError> {
        let stripped = value_hex.strip_prefix("0x").unwrap_or(value_hex);
        hex::decode(stripped).map_err(|e| RpcError::invalid_params(format!("bad hex value: {e}")))
    }

    // --- content methods ---

    pub async fn get_content(&self, key_hex: &str) -> Result<Value, RpcError> {
        let key = Self::parse_key(key_hex)?;
        let content = self.network.get_content(&key).await?;
        Ok(json!({ "content": format!("0x{}", hex::encode(content)) }))
    }

    pub async fn trace_get_content(&self, key_hex: &str) -> Result<Value, RpcError> {
        let key = Self::parse_key(key_hex)?;
        let (content, source) = self.network.trace_get_content(&key).await?;
        Ok(json!({
            "content": format!("0x{}", hex::encode(content)),
            "utilizedTarget": source.map(|node| format!("0x{}", hex::encode(node))),
        }))
    }

    pub fn local_content(&self, key_hex: &str) -> Result<Value, RpcError> {
        let key = Self::parse_key(key_hex)?;
        let content = self
            .network
            .storage()
            .get(&key)
            .map_err(lantern_portal::ContentError::from)?;
        Ok(json!({ "content": format!("0x{}", hex::encode(content)) }))
    }

    pub async fn store(&self, key_hex: &str, value_hex: &str) -> Result<Value, RpcError> {
        let key = Self::parse_key(key_hex)?;
        let value = Self::parse_value(value_hex)?;
        self.network.validate(&key, &value).await?;
        self.network
            .storage()
            .store(&key, &value)
            .map_err(lantern_portal::ContentError::from)?;
        Ok(json!(true))
    }

    pub async fn gossip(&self, key_hex: &str, value_hex: &str) -> Result<Value, RpcError> {
        let key = Self::parse_key(key_hex)?;
        let value = Self::parse_value(value_hex)?;
        self.network.validate(&key, &value).await?;
        let accepted = self.network.overlay().gossip(None, vec![(key, value)]).await;
        Ok(json!(accepted))
    }

    // --- overlay management ---

    pub async fn ping(&self, enr: &str) -> Result<Value, RpcError> {
        self.admin
            .ping(enr)
            .await
            .ok_or_else(|| RpcError::invalid_params("peer did not answer"))
    }

    pub async fn find_nodes(&self, enr: &str, distances: Vec<u16>) -> Result<Value, RpcError> {
        Ok(json!(self.admin.find_nodes(enr, distances).await))
    }

    pub async fn find_content(&self, enr: &str, key_hex: &str) -> Result<Value, RpcError> {
        let key = Self::parse_key(key_hex)?;
        let content = self
            .admin
            .find_content(enr, &key.encode())
            .await
            .ok_or_else(|| RpcError::from(lantern_portal::ContentError::NotFound))?;
        Ok(json!({ "content": format!("0x{}", hex::encode(content)) }))
    }

    pub async fn offer(&self, enr: &str, items: Vec<(String, String)>) -> Result<Value, RpcError> {
        let mut decoded = Vec::with_capacity(items.len());
        for (key_hex, value_hex) in items {
            let key = Self::parse_key(&key_hex)?;
            decoded.push((key.encode(), Self::parse_value(&value_hex)?));
        }
        Ok(json!(self.admin.offer(enr, decoded).await))
    }

    pub async fn recursive_find_nodes(&self, node_id: &str) -> Result<Value, RpcError> {
        Ok(json!(self.admin.recursive_find_nodes(node_id).await))
    }

    pub fn routing_table_info(&self) -> Result<Value, RpcError> {
        Ok(self.admin.routing_table_info())
    }

    pub fn add_enr(&self, enr: &str) -> Result<Value, RpcError> {
        Ok(json!(self.admin.add_enr(enr)))
    }

    pub fn get_enr(&self, node_id: &str) -> Result<Value, RpcError> {
        Ok(json!(self.admin.get_enr(node_id)))
    }

    pub fn delete_enr(&self, node_id: &str) -> Result<Value, RpcError> {
        Ok(json!(self.admin.delete_enr(node_id)))
    }

    pub fn lookup_enr(&self, node_id: &str) -> Result<Value, RpcError> {
        Ok(json!(self.admin.lookup_enr(node_id)))
    }
}
