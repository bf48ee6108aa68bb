//! Optional capabilities injected at engine construction.
//!
//! Each hook is a polymorphic handle the host may or may not provide;
//! absence means the engine skips that step (or falls back to its
//! built-in computation where one exists).

use std::sync::Arc;

use alloy_primitives::Address;

use crate::chain::{ChainReader, StateBackend};
use crate::error::EngineError;
use crate::header::Header;

/// Overrides the built-in penalty computation at epoch checkpoints.
pub trait PenaltyHook: Send + Sync {
    /// Masternodes penalized for the epoch ending at `checkpoint_number`.
    fn penalties(
        &self,
        chain: &dyn ChainReader,
        checkpoint_number: u64,
        masternodes: &[Address],
    ) -> Result<Vec<Address>, EngineError>;
}

/// Overrides the built-in reward distribution at reward checkpoints.
pub trait RewardHook: Send + Sync {
    fn apply_rewards(
        &self,
        chain: &dyn ChainReader,
        state: &mut dyn StateBackend,
        header: &Header,
    ) -> Result<(), EngineError>;
}

/// External masternode source; when present, seal authorization consults
/// it instead of the snapshot's signer set.
pub trait MasternodeSource: Send + Sync {
    fn masternodes(&self, number: u64) -> Vec<Address>;
}

/// Extra checkpoint validation of the signer list, run after the penalty
/// comparison.
pub trait MasternodeVerifier: Send + Sync {
    fn verify_masternodes(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        signers: &[Address],
    ) -> Result<(), EngineError>;
}

/// The capability bundle handed to the engine. Every handle is optional.
#[derive(Clone, Default)]
pub struct EngineHooks {
    pub penalty: Option<Arc<dyn PenaltyHook>>,
    pub reward: Option<Arc<dyn RewardHook>>,
    pub masternodes: Option<Arc<dyn MasternodeSource>>,
    pub verify_mns: Option<Arc<dyn MasternodeVerifier>>,
}
