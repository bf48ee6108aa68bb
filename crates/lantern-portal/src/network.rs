//! The beacon network adapter: lookup-or-fetch reads, validation on
//! receive, and gossip fan-out.
//!
//! Every byte that crosses the overlay boundary is validated here before
//! it can reach storage or a peer. Validation failures drop the content
//! and log the offender; the loop itself never tears down.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lantern_beacon::codec::{
    decode_forked_bootstrap, decode_forked_finality_update, decode_forked_optimistic_update,
    decode_forked_summaries, decode_update_range, DecodeError,
};
use lantern_beacon::fork::ForkSchedule;
use lantern_beacon::verify::verify_summaries_proof;

use crate::content_key::BeaconContentKey;
use crate::overlay::{NodeId, PortalProtocol};
use crate::storage::{BeaconStorage, StorageError};

/// Read access to the consensus layer, used where validation needs a
/// trusted beacon state root.
#[async_trait]
pub trait ConsensusApi: Send + Sync {
    async fn finalized_state_root(&self) -> Option<[u8; 32]>;
}

/// A consensus API that knows nothing. Summaries validation defers.
pub struct NoConsensusApi;

#[async_trait]
impl ConsensusApi for NoConsensusApi {
    async fn finalized_state_root(&self) -> Option<[u8; 32]> {
        None
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("historical summaries proof does not verify against the trusted state root")]
    InvalidProof,
    #[error("no trusted state root available; content deferred")]
    Deferred,
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content not found")]
    NotFound,
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ContentError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ContentError::NotFound,
            other => ContentError::Storage(other),
        }
    }
}

/// Counters over the validation loop, reported through the API surface.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContentStats {
    pub received: u64,
    pub valid: u64,
    pub invalid: u64,
    pub deferred: u64,
    pub gossiped: u64,
}

pub struct BeaconNetwork {
    schedule: ForkSchedule,
    storage: Arc<BeaconStorage>,
    overlay: Arc<dyn PortalProtocol>,
    consensus: Arc<dyn ConsensusApi>,
    stats: Mutex<ContentStats>,
}

impl BeaconNetwork {
    pub fn new(
        schedule: ForkSchedule,
        storage: Arc<BeaconStorage>,
        overlay: Arc<dyn PortalProtocol>,
        consensus: Arc<dyn ConsensusApi>,
    ) -> Self {
        Self {
            schedule,
            storage,
            overlay,
            consensus,
            stats: Mutex::new(ContentStats::default()),
        }
    }

    pub fn storage(&self) -> &Arc<BeaconStorage> {
        &self.storage
    }

    pub fn overlay(&self) -> &Arc<dyn PortalProtocol> {
        &self.overlay
    }

    pub fn stats(&self) -> ContentStats {
        self.stats.lock().clone()
    }

    /// Local-first read: storage, then an overlay lookup whose result is
    /// validated and stored before it is returned.
    pub async fn get_content(&self, key: &BeaconContentKey) -> Result<Vec<u8>, ContentError> {
        match self.storage.get(key) {
            Ok(value) => return Ok(value),
            Err(StorageError::NotFound) => {}
            Err(other) => return Err(other.into()),
        }

        let content_id = key.content_id();
        let (value, source) = self
            .overlay
            .content_lookup(key, content_id)
            .await
            .ok_or(ContentError::NotFound)?;

        match self.validate(key, &value).await {
            Ok(()) => {
                self.storage.store(key, &value)?;
                Ok(value)
            }
            Err(ValidationError::Deferred) => {
                debug!(key = %key.to_hex(), "lookup result deferred, serving without storing");
                Ok(value)
            }
            Err(err) => {
                warn!(
                    key = %key.to_hex(),
                    source = %hex::encode(source),
                    %err,
                    "lookup returned invalid content"
                );
                Err(ContentError::NotFound)
            }
        }
    }

    /// Same as [`get_content`], but also reports which node served the
    /// bytes when the overlay was consulted.
    pub async fn trace_get_content(
        &self,
        key: &BeaconContentKey,
    ) -> Result<(Vec<u8>, Option<NodeId>), ContentError> {
        if let Ok(value) = self.storage.get(key) {
            return Ok((value, None));
        }
        let content_id = key.content_id();
        let (value, source) = self
            .overlay
            .content_lookup(key, content_id)
            .await
            .ok_or(ContentError::NotFound)?;
        match self.validate(key, &value).await {
            Ok(()) => {
                self.storage.store(key, &value)?;
                Ok((value, Some(source)))
            }
            Err(ValidationError::Deferred) => Ok((value, Some(source))),
            Err(_) => Err(ContentError::NotFound),
        }
    }

    /// Validate a content value against its key, per type.
    pub async fn validate(
        &self,
        key: &BeaconContentKey,
        value: &[u8],
    ) -> Result<(), ValidationError> {
        match key {
            BeaconContentKey::Bootstrap { .. } => {
                decode_forked_bootstrap(&self.schedule, value)?;
                Ok(())
            }
            BeaconContentKey::UpdateRange { .. } => {
                decode_update_range(&self.schedule, value)?;
                Ok(())
            }
            BeaconContentKey::FinalityUpdate { .. } => {
                decode_forked_finality_update(&self.schedule, value)?;
                Ok(())
            }
            BeaconContentKey::OptimisticUpdate { .. } => {
                decode_forked_optimistic_update(&self.schedule, value)?;
                Ok(())
            }
            BeaconContentKey::HistoricalSummaries { .. } => {
                let (_, summaries) = decode_forked_summaries(&self.schedule, value)?;
                let root = self
                    .consensus
                    .finalized_state_root()
                    .await
                    .ok_or(ValidationError::Deferred)?;
                if !verify_summaries_proof(&summaries, &root) {
                    return Err(ValidationError::InvalidProof);
                }
                Ok(())
            }
        }
    }

    /// Run the validation loop over contents pushed by peers: decode,
    /// store, then gossip onward seeded by the originating node.
    pub fn spawn_validation_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let mut incoming = self.overlay.subscribe_incoming();
        tokio::spawn(async move {
            loop {
                let content = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    content = incoming.recv() => match content {
                        Some(content) => content,
                        None => break,
                    },
                };

                self.stats.lock().received += 1;
                match self.validate(&content.key, &content.value).await {
                    Ok(()) => {
                        if let Err(err) = self.storage.store(&content.key, &content.value) {
                            warn!(key = %content.key.to_hex(), %err, "store failed");
                            continue;
                        }
                        self.stats.lock().valid += 1;
                        let accepted = self
                            .overlay
                            .gossip(
                                Some(content.source),
                                vec![(content.key.clone(), content.value.clone())],
                            )
                            .await;
                        self.stats.lock().gossiped += accepted as u64;
                        debug!(key = %content.key.to_hex(), accepted, "content accepted");
                    }
                    Err(ValidationError::Deferred) => {
                        self.stats.lock().deferred += 1;
                        debug!(key = %content.key.to_hex(), "content deferred");
                    }
                    Err(err) => {
                        self.stats.lock().invalid += 1;
                        warn!(
                            key = %content.key.to_hex(),
                            source = %hex::encode(content.source),
                            %err,
                            "dropping invalid content"
                        );
                    }
                }
            }
            info!("validation loop stopped");
        })
    }
}
