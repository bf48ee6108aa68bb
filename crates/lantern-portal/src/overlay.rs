//! The overlay routing capability the beacon network is built on.
//!
//! Peer discovery, k-bucket routing, and transfer streams are someone
//! else's problem; this crate consumes them through `PortalProtocol`. The
//! in-memory implementation exists for wiring tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::content_key::BeaconContentKey;

/// Overlay node identifier.
pub type NodeId = [u8; 32];

/// Content pushed to us by a peer (an accepted offer).
#[derive(Clone, Debug)]
pub struct IncomingContent {
    pub source: NodeId,
    pub key: BeaconContentKey,
    pub value: Vec<u8>,
}

/// The slice of the overlay protocol the beacon network consumes.
#[async_trait]
pub trait PortalProtocol: Send + Sync {
    fn local_node_id(&self) -> NodeId;

    /// Fetch content this node already holds under the overlay store.
    async fn get(&self, key: &BeaconContentKey, content_id: [u8; 32]) -> Option<Vec<u8>>;

    /// Hand content to the overlay store.
    async fn put(&self, key: &BeaconContentKey, content_id: [u8; 32], value: Vec<u8>);

    /// Iterative lookup across the network. Returns the first
    /// syntactically valid response and the node that served it.
    async fn content_lookup(
        &self,
        key: &BeaconContentKey,
        content_id: [u8; 32],
    ) -> Option<(Vec<u8>, NodeId)>;

    /// Offer key/value pairs to interested neighbors, excluding the seed
    /// node the content arrived from. Returns how many peers accepted.
    async fn gossip(
        &self,
        seed: Option<NodeId>,
        items: Vec<(BeaconContentKey, Vec<u8>)>,
    ) -> usize;

    /// Stream of contents pushed to us by peers.
    fn subscribe_incoming(&self) -> mpsc::Receiver<IncomingContent>;
}

/// Deterministic overlay for tests: a shared map plus a recorded gossip
/// log. `content_lookup` serves from the map as if a remote peer answered.
pub struct InMemoryOverlay {
    node_id: NodeId,
    remote: Mutex<HashMap<[u8; 32], Vec<u8>>>,
    local: Mutex<HashMap<[u8; 32], Vec<u8>>>,
    gossiped: Mutex<Vec<(Option<NodeId>, BeaconContentKey)>>,
    incoming_tx: Mutex<Option<mpsc::Sender<IncomingContent>>>,
}

impl InMemoryOverlay {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            remote: Mutex::new(HashMap::new()),
            local: Mutex::new(HashMap::new()),
            gossiped: Mutex::new(Vec::new()),
            incoming_tx: Mutex::new(None),
        }
    }

    /// Seed content that a lookup will "find on the network".
    pub fn seed_remote(&self, key: &BeaconContentKey, value: Vec<u8>) {
        self.remote.lock().insert(key.content_id(), value);
    }

    /// Push content at this node as if a peer offered it.
    pub async fn push_incoming(&self, source: NodeId, key: BeaconContentKey, value: Vec<u8>) {
        let tx = self.incoming_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(IncomingContent { source, key, value }).await;
        }
    }

    pub fn gossip_log(&self) -> Vec<(Option<NodeId>, BeaconContentKey)> {
        self.gossiped.lock().clone()
    }
}

#[async_trait]
impl PortalProtocol for InMemoryOverlay {
    fn local_node_id(&self) -> NodeId {
        self.node_id
    }

    async fn get(&self, _key: &BeaconContentKey, content_id: [u8; 32]) -> Option<Vec<u8>> {
        self.local.lock().get(&content_id).cloned()
    }

    async fn put(&self, _key: &BeaconContentKey, content_id: [u8; 32], value: Vec<u8>) {
        self.local.lock().insert(content_id, value);
    }

    async fn content_lookup(
        &self,
        _key: &BeaconContentKey,
        content_id: [u8; 32],
    ) -> Option<(Vec<u8>, NodeId)> {
        let value = self.remote.lock().get(&content_id).cloned()?;
        Some((value, [0xEE; 32]))
    }

    async fn gossip(
        &self,
        seed: Option<NodeId>,
        items: Vec<(BeaconContentKey, Vec<u8>)>,
    ) -> usize {
        let count = items.len();
        let mut log = self.gossiped.lock();
        for (key, _) in items {
            log.push((seed, key));
        }
        count
    }

    fn subscribe_incoming(&self) -> mpsc::Receiver<IncomingContent> {
        let (tx, rx) = mpsc::channel(64);
        *self.incoming_tx.lock() = Some(tx);
        rx
    }
}
