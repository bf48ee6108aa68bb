use serde::{Deserialize, Serialize};

use crate::types::MIN_SYNC_COMMITTEE_PARTICIPANTS;

/// Light-client policy knobs, threaded through construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LightClientConfig {
    /// Checkpoint root used when the caller supplies none.
    pub default_checkpoint: [u8; 32],
    /// Maximum tolerated age of the bootstrap checkpoint, in seconds.
    pub max_checkpoint_age: u64,
    /// Reject too-old checkpoints outright instead of warning.
    pub strict_checkpoint_age: bool,
    /// Minimum sync-committee participation for any update.
    pub min_sync_committee_participants: usize,
}

impl Default for LightClientConfig {
    fn default() -> Self {
        Self {
            default_checkpoint: [0u8; 32],
            // two weeks, one full sync-committee handoff plus slack
            max_checkpoint_age: 1_209_600,
            strict_checkpoint_age: false,
            min_sync_committee_participants: MIN_SYNC_COMMITTEE_PARTICIPANTS,
        }
    }
}
