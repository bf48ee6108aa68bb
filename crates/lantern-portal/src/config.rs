//! The beacon participant's configuration, as the host loads it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use lantern_beacon::LightClientConfig;

use crate::storage::StorageConfig;

/// Everything the beacon side is configured with. Split into the storage
/// and light-client views the components consume.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Content storage capacity, in megabytes.
    pub storage_capacity_mb: u64,
    /// Local overlay node id.
    pub node_id: [u8; 32],
    /// On-disk database path; in-memory when unset.
    pub db_path: Option<PathBuf>,
    /// Consensus-layer endpoint the host builds its [`crate::ConsensusApi`]
    /// from; `None` leaves summaries validation deferred.
    pub consensus_api: Option<String>,
    /// Checkpoint root used when the caller supplies none.
    pub default_checkpoint: [u8; 32],
    /// Maximum tolerated bootstrap age, in seconds.
    pub max_checkpoint_age: u64,
    /// Reject too-old checkpoints instead of warning.
    pub strict_checkpoint_age: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        let light_client = LightClientConfig::default();
        Self {
            storage_capacity_mb: 100,
            node_id: [0u8; 32],
            db_path: None,
            consensus_api: None,
            default_checkpoint: light_client.default_checkpoint,
            max_checkpoint_age: light_client.max_checkpoint_age,
            strict_checkpoint_age: light_client.strict_checkpoint_age,
        }
    }
}

impl PortalConfig {
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            storage_capacity_mb: self.storage_capacity_mb,
            node_id: self.node_id,
            db_path: self.db_path.clone(),
        }
    }

    pub fn light_client_config(&self) -> LightClientConfig {
        LightClientConfig {
            default_checkpoint: self.default_checkpoint,
            max_checkpoint_age: self.max_checkpoint_age,
            strict_checkpoint_age: self.strict_checkpoint_age,
            ..LightClientConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views_carry_the_shared_fields() {
        let config = PortalConfig {
            storage_capacity_mb: 7,
            node_id: [9; 32],
            max_checkpoint_age: 60,
            strict_checkpoint_age: true,
            ..Default::default()
        };
        assert_eq!(config.storage_config().storage_capacity_mb, 7);
        assert_eq!(config.storage_config().node_id, [9; 32]);
        assert_eq!(config.light_client_config().max_checkpoint_age, 60);
        assert!(config.light_client_config().strict_checkpoint_age);
    }
}
