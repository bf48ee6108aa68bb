//! Stable numeric codes for every error kind the two cores surface.

use serde::Serialize;
use thiserror::Error;

use lantern_beacon::VerifyError;
use lantern_portal::network::ValidationError;
use lantern_portal::ContentError;
use lantern_xdpos::EngineError;

/// The error shape RPC callers see: a stable code and a human message.
#[derive(Clone, Debug, Error, Serialize, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }
}

/// Consensus-engine kinds: -32000 block.
pub fn engine_error_code(err: &EngineError) -> i64 {
    match err {
        EngineError::UnknownBlock => -32001,
        EngineError::InvalidCheckpointBeneficiary => -32002,
        EngineError::InvalidVote => -32003,
        EngineError::InvalidCheckpointVote => -32004,
        EngineError::MissingVanity => -32005,
        EngineError::MissingSignature => -32006,
        EngineError::ExtraSigners => -32007,
        EngineError::InvalidCheckpointSigners => -32008,
        EngineError::InvalidMixDigest => -32009,
        EngineError::InvalidUncleHash => -32010,
        EngineError::InvalidDifficulty { .. } => -32011,
        EngineError::InvalidTimestamp => -32012,
        EngineError::InvalidVotingChain => -32013,
        EngineError::Unauthorized(_) => -32014,
        EngineError::FailedDoubleValidation => -32015,
        EngineError::WaitTransactions => -32016,
        EngineError::InvalidCheckpointValidators => -32017,
        EngineError::UnknownAncestor => -32018,
        EngineError::FutureBlock => -32019,
        EngineError::SignedRecently => -32020,
        EngineError::Signature(_) => -32021,
        EngineError::Storage(_) => -32022,
    }
}

/// Beacon kinds: -32100 block.
pub fn verify_error_code(err: &VerifyError) -> i64 {
    match err {
        VerifyError::InvalidFinalityProof => -32101,
        VerifyError::InvalidNextSyncCommitteeProof => -32102,
        VerifyError::InvalidCurrentSyncCommitteeProof => -32103,
        VerifyError::InsufficientParticipants { .. } => -32104,
        VerifyError::InvalidSignature => -32105,
        VerifyError::CheckpointTooOld { .. } => -32106,
        VerifyError::InvalidBootstrapHeader => -32107,
        VerifyError::UnexpectedPeriod { .. } => -32108,
        VerifyError::InvalidPublicKey { .. } => -32109,
        VerifyError::Bls(_) => -32110,
    }
}

pub const CONTENT_NOT_FOUND_CODE: i64 = -32120;
pub const DECODE_ERROR_CODE: i64 = -32121;
pub const UNKNOWN_FORK_DIGEST_CODE: i64 = -32122;
pub const INVALID_CONTENT_CODE: i64 = -32123;
pub const CONTENT_DEFERRED_CODE: i64 = -32124;
pub const STORAGE_ERROR_CODE: i64 = -32125;

impl From<EngineError> for RpcError {
    fn from(err: EngineError) -> Self {
        RpcError::new(engine_error_code(&err), err.to_string())
    }
}

impl From<VerifyError> for RpcError {
    fn from(err: VerifyError) -> Self {
        RpcError::new(verify_error_code(&err), err.to_string())
    }
}

impl From<ContentError> for RpcError {
    fn from(err: ContentError) -> Self {
        match &err {
            ContentError::NotFound => RpcError::new(CONTENT_NOT_FOUND_CODE, err.to_string()),
            ContentError::Storage(_) => RpcError::new(STORAGE_ERROR_CODE, err.to_string()),
        }
    }
}

impl From<ValidationError> for RpcError {
    fn from(err: ValidationError) -> Self {
        let code = match &err {
            ValidationError::Decode(inner) => match inner {
                lantern_beacon::codec::DecodeError::UnknownForkDigest(_) => {
                    UNKNOWN_FORK_DIGEST_CODE
                }
                _ => DECODE_ERROR_CODE,
            },
            ValidationError::InvalidProof => INVALID_CONTENT_CODE,
            ValidationError::Deferred => CONTENT_DEFERRED_CODE,
        };
        RpcError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_codes_are_distinct_and_stable() {
        let errors = [
            EngineError::UnknownBlock,
            EngineError::InvalidVote,
            EngineError::FutureBlock,
            EngineError::WaitTransactions,
        ];
        let codes: Vec<i64> = errors.iter().map(engine_error_code).collect();
        assert_eq!(codes, vec![-32001, -32003, -32019, -32016]);
    }

    #[test]
    fn test_verify_codes_are_distinct() {
        let a = verify_error_code(&VerifyError::InvalidFinalityProof);
        let b = verify_error_code(&VerifyError::InvalidSignature);
        assert_ne!(a, b);
        assert_eq!(a, -32101);
    }

    #[test]
    fn test_rpc_error_carries_message() {
        let err: RpcError = EngineError::UnknownBlock.into();
        assert_eq!(err.code, -32001);
        assert_eq!(err.message, "unknown block");
    }
}
