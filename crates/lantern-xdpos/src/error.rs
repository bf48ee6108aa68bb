use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Everything the engine can reject a block or a seal attempt for.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown block")]
    UnknownBlock,

    #[error("beneficiary set on checkpoint block")]
    InvalidCheckpointBeneficiary,

    #[error("vote nonce is neither auth nor drop")]
    InvalidVote,

    #[error("vote nonce set on checkpoint block")]
    InvalidCheckpointVote,

    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,

    #[error("extra-data 65 byte signature suffix missing")]
    MissingSignature,

    #[error("non-checkpoint block contains extra signer list")]
    ExtraSigners,

    #[error("invalid signer list on checkpoint block")]
    InvalidCheckpointSigners,

    #[error("non-zero mix digest")]
    InvalidMixDigest,

    #[error("non empty uncle hash")]
    InvalidUncleHash,

    #[error("invalid difficulty: expected {expected}, got {got}")]
    InvalidDifficulty { expected: U256, got: U256 },

    #[error("timestamp older than parent plus period")]
    InvalidTimestamp,

    #[error("out-of-range or non-contiguous voting chain")]
    InvalidVotingChain,

    #[error("unauthorized signer {0}")]
    Unauthorized(Address),

    #[error("double validation failed")]
    FailedDoubleValidation,

    #[error("waiting for transactions")]
    WaitTransactions,

    #[error("invalid checkpoint validators")]
    InvalidCheckpointValidators,

    #[error("unknown ancestor")]
    UnknownAncestor,

    #[error("block in the future")]
    FutureBlock,

    #[error("signed recently, must wait for others")]
    SignedRecently,

    #[error("signature recovery failed: {0}")]
    Signature(String),

    #[error("snapshot storage failed: {0}")]
    Storage(String),
}
