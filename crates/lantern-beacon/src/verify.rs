//! Cryptographic verification for light-client artifacts.
//!
//! Everything trust-bearing funnels through here: SSZ hash-tree-roots,
//! Merkle branch checks against beacon state roots, signing domains, and
//! the aggregate BLS verification that anchors the whole client.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::fork::{compute_fork_data_root, ForkSchedule};
use crate::types::*;

/// Verification failures, each naming the proof that failed.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("insufficient sync committee participants: {got} (need at least {required})")]
    InsufficientParticipants { got: usize, required: usize },

    #[error("aggregate BLS signature does not verify")]
    InvalidSignature,

    #[error("finality branch does not verify against the attested state root")]
    InvalidFinalityProof,

    #[error("next sync committee branch does not verify against the attested state root")]
    InvalidNextSyncCommitteeProof,

    #[error("current sync committee branch does not verify against the bootstrap state root")]
    InvalidCurrentSyncCommitteeProof,

    #[error("checkpoint is {age}s old, older than the configured maximum {max}s")]
    CheckpointTooOld { age: u64, max: u64 },

    #[error("bootstrap header does not match the requested checkpoint root")]
    InvalidBootstrapHeader,

    #[error("update signature period {update} is not current ({store}) or next")]
    UnexpectedPeriod { update: u64, store: u64 },

    #[error("invalid BLS public key at committee index {index}")]
    InvalidPublicKey { index: usize },

    #[error("BLS error: {0}")]
    Bls(String),
}

// --- SSZ hashing ---

fn sha256_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn sha256_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(a);
    data[32..].copy_from_slice(b);
    sha256_hash(&data)
}

/// Encode a u64 as a 32-byte SSZ leaf (little-endian, zero-padded).
fn uint64_to_leaf(value: u64) -> [u8; 32] {
    let mut leaf = [0u8; 32];
    leaf[..8].copy_from_slice(&value.to_le_bytes());
    leaf
}

/// Merkleize a power-of-two-padded leaf layer bottom-up.
fn merkleize(leaves: &[[u8; 32]]) -> [u8; 32] {
    let mut width = leaves.len().next_power_of_two().max(1);
    let zero = [0u8; 32];
    let mut layer: Vec<[u8; 32]> = Vec::with_capacity(width);
    layer.extend_from_slice(leaves);
    layer.resize(width, zero);
    while width > 1 {
        width /= 2;
        for i in 0..width {
            let (left, right) = (layer[2 * i], layer[2 * i + 1]);
            layer[i] = sha256_pair(&left, &right);
        }
        layer.truncate(width);
    }
    layer[0]
}

/// Roots of all-zero subtrees, indexed by height.
fn zero_hashes(height: usize) -> Vec<[u8; 32]> {
    let mut hashes = vec![[0u8; 32]];
    for i in 0..height {
        let prev = hashes[i];
        hashes.push(sha256_pair(&prev, &prev));
    }
    hashes
}

/// Merkleize a leaf list into a virtual tree of the given depth, padding
/// with zero subtrees, without materializing the padded layers.
fn merkleize_with_depth(leaves: &[[u8; 32]], depth: usize) -> [u8; 32] {
    let zeros = zero_hashes(depth);
    fn subtree(leaves: &[[u8; 32]], depth: usize, zeros: &[[u8; 32]]) -> [u8; 32] {
        if leaves.is_empty() {
            return zeros[depth];
        }
        if depth == 0 {
            return leaves[0];
        }
        let split = (1usize << (depth - 1)).min(leaves.len());
        let left = subtree(&leaves[..split], depth - 1, zeros);
        let right = subtree(&leaves[split..], depth - 1, zeros);
        sha256_pair(&left, &right)
    }
    subtree(leaves, depth, &zeros)
}

/// hash_tree_root of a beacon block header (5-field container).
pub fn hash_tree_root_header(header: &BeaconBlockHeader) -> [u8; 32] {
    merkleize(&[
        uint64_to_leaf(header.slot),
        uint64_to_leaf(header.proposer_index),
        header.parent_root,
        header.state_root,
        header.body_root,
    ])
}

/// hash_tree_root of a 48-byte BLS public key (Vector[uint8, 48]).
fn hash_tree_root_pubkey(pk: &BlsPublicKey) -> [u8; 32] {
    let mut chunks = [[0u8; 32]; 2];
    chunks[0].copy_from_slice(&pk.0[..32]);
    chunks[1][..16].copy_from_slice(&pk.0[32..]);
    sha256_pair(&chunks[0], &chunks[1])
}

/// hash_tree_root of a sync committee (pubkeys vector + aggregate key).
pub fn hash_tree_root_committee(committee: &SyncCommittee) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = committee.pubkeys.iter().map(hash_tree_root_pubkey).collect();
    let pubkeys_root = merkleize(&leaves);
    let aggregate_root = hash_tree_root_pubkey(&committee.aggregate_pubkey);
    sha256_pair(&pubkeys_root, &aggregate_root)
}

/// hash_tree_root of the historical summaries list
/// (List[HistoricalSummary, 2^24], length mixed in).
pub fn hash_tree_root_summaries(summaries: &[HistoricalSummary]) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = summaries
        .iter()
        .map(|s| sha256_pair(&s.block_summary_root, &s.state_summary_root))
        .collect();
    let depth = HISTORICAL_SUMMARIES_LIMIT.trailing_zeros() as usize;
    let root = merkleize_with_depth(&leaves, depth);
    sha256_pair(&root, &uint64_to_leaf(summaries.len() as u64))
}

// --- Merkle branches ---

/// Fold a leaf up a Merkle branch. `index` is the field index within the
/// subtree of the given depth.
pub fn merkle_root_from_branch(
    leaf: &[u8; 32],
    branch: &[[u8; 32]],
    index: u64,
) -> [u8; 32] {
    let mut current = *leaf;
    for (i, node) in branch.iter().enumerate() {
        if (index >> i) & 1 == 1 {
            current = sha256_pair(node, &current);
        } else {
            current = sha256_pair(&current, node);
        }
    }
    current
}

/// Verify a Merkle branch (SSZ proof) against an expected root.
pub fn verify_merkle_branch(
    leaf: &[u8; 32],
    branch: &[[u8; 32]],
    depth: usize,
    index: u64,
    root: &[u8; 32],
) -> bool {
    if branch.len() != depth {
        return false;
    }
    merkle_root_from_branch(leaf, branch, index) == *root
}

// --- Signing domains ---

/// domain = domain_type ++ fork_data_root[..28]
pub fn compute_domain(
    domain_type: &[u8; 4],
    fork_version: &[u8; 4],
    genesis_validators_root: &[u8; 32],
) -> [u8; 32] {
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(domain_type);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

/// signing_root = hash_tree_root(SigningData { object_root, domain })
pub fn compute_signing_root(object_root: &[u8; 32], domain: &[u8; 32]) -> [u8; 32] {
    sha256_pair(object_root, domain)
}

/// The signing domain in force at a signature slot. The fork of the slot
/// *before* the signature slot selects the version, so signatures produced
/// in the first slot of a fork still verify under the previous domain.
pub fn sync_committee_domain(schedule: &ForkSchedule, signature_slot: u64) -> [u8; 32] {
    let fork = schedule.fork_at_slot(signature_slot.saturating_sub(1));
    compute_domain(
        &DOMAIN_SYNC_COMMITTEE,
        &schedule.version(fork),
        &schedule.genesis_validators_root(),
    )
}

// --- BLS ---

/// Verify an aggregate BLS12-381 signature over `message`.
fn verify_aggregate_signature(
    pubkeys: &[(usize, &BlsPublicKey)],
    message: &[u8; 32],
    signature: &BlsSignature,
) -> Result<(), VerifyError> {
    use blst::min_pk::{AggregatePublicKey, PublicKey, Signature};
    use blst::BLST_ERROR;

    let sig = Signature::from_bytes(&signature.0)
        .map_err(|e| VerifyError::Bls(format!("bad signature encoding: {:?}", e)))?;

    let pks: Vec<PublicKey> = pubkeys
        .iter()
        .map(|(index, pk)| {
            PublicKey::from_bytes(&pk.0).map_err(|_| VerifyError::InvalidPublicKey {
                index: *index,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pk_refs: Vec<&PublicKey> = pks.iter().collect();
    let agg = AggregatePublicKey::aggregate(&pk_refs, false)
        .map_err(|e| VerifyError::Bls(format!("aggregation failed: {:?}", e)))?;
    let agg_pk = agg.to_public_key();

    let dst = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";
    if sig.verify(true, message, dst, &[], &agg_pk, true) != BLST_ERROR::BLST_SUCCESS {
        return Err(VerifyError::InvalidSignature);
    }
    Ok(())
}

/// Committees available to a verification pass, as held by the store.
pub struct VerifyContext<'a> {
    pub schedule: &'a ForkSchedule,
    pub current_sync_committee: &'a SyncCommittee,
    pub next_sync_committee: Option<&'a SyncCommittee>,
    /// Sync-committee period of the store's finalized head.
    pub store_period: u64,
    /// Minimum participating members for an update to be considered.
    pub min_participants: usize,
}

/// Verify a generic update end to end. Check order: committee proof,
/// finality proof, participation, signature.
pub fn verify_generic_update(
    ctx: &VerifyContext<'_>,
    update: &GenericUpdate,
) -> Result<(), VerifyError> {
    // 1. Next-sync-committee branch, when the update carries a rotation.
    if let (Some(next), Some(branch)) = (
        update.next_sync_committee.as_ref(),
        update.next_sync_committee_branch.as_ref(),
    ) {
        let leaf = hash_tree_root_committee(next);
        if !verify_merkle_branch(
            &leaf,
            branch,
            SYNC_COMMITTEE_PROOF_DEPTH,
            NEXT_SYNC_COMMITTEE_INDEX,
            &update.attested_header.beacon.state_root,
        ) {
            return Err(VerifyError::InvalidNextSyncCommitteeProof);
        }
    }

    // 2. Finality branch, when the update proves a finalized header.
    if let (Some(finalized), Some(branch)) =
        (update.finalized_header.as_ref(), update.finality_branch.as_ref())
    {
        let leaf = hash_tree_root_header(&finalized.beacon);
        if !verify_merkle_branch(
            &leaf,
            branch,
            FINALIZED_ROOT_PROOF_DEPTH,
            FINALIZED_ROOT_INDEX,
            &update.attested_header.beacon.state_root,
        ) {
            return Err(VerifyError::InvalidFinalityProof);
        }
    }

    // 3. Participation threshold.
    let participants = update.sync_aggregate.num_participants();
    if participants < ctx.min_participants {
        return Err(VerifyError::InsufficientParticipants {
            got: participants,
            required: ctx.min_participants,
        });
    }

    // 4. Aggregate signature under the committee of the signature period.
    let update_period = slot_to_period(update.signature_slot);
    let committee = if update_period == ctx.store_period {
        ctx.current_sync_committee
    } else if update_period == ctx.store_period + 1 {
        ctx.next_sync_committee
            .ok_or(VerifyError::UnexpectedPeriod {
                update: update_period,
                store: ctx.store_period,
            })?
    } else {
        return Err(VerifyError::UnexpectedPeriod {
            update: update_period,
            store: ctx.store_period,
        });
    };

    let indices = update.sync_aggregate.participant_indices();
    let pubkeys: Vec<(usize, &BlsPublicKey)> = indices
        .iter()
        .map(|&i| (i, &committee.pubkeys[i]))
        .collect();

    let object_root = hash_tree_root_header(&update.attested_header.beacon);
    let domain = sync_committee_domain(ctx.schedule, update.signature_slot);
    let signing_root = compute_signing_root(&object_root, &domain);

    verify_aggregate_signature(
        &pubkeys,
        &signing_root,
        &update.sync_aggregate.sync_committee_signature,
    )
}

/// Verify the current-sync-committee proof of a bootstrap.
pub fn verify_bootstrap_committee_proof(
    bootstrap: &LightClientBootstrap,
) -> Result<(), VerifyError> {
    let leaf = hash_tree_root_committee(&bootstrap.current_sync_committee);
    if !verify_merkle_branch(
        &leaf,
        &bootstrap.current_sync_committee_branch,
        SYNC_COMMITTEE_PROOF_DEPTH,
        CURRENT_SYNC_COMMITTEE_INDEX,
        &bootstrap.header.beacon.state_root,
    ) {
        return Err(VerifyError::InvalidCurrentSyncCommitteeProof);
    }
    Ok(())
}

/// Verify the Merkle proof of a historical-summaries artifact against a
/// trusted beacon state root.
pub fn verify_summaries_proof(
    summaries: &HistoricalSummariesWithProof,
    trusted_state_root: &[u8; 32],
) -> bool {
    let leaf = hash_tree_root_summaries(&summaries.historical_summaries);
    verify_merkle_branch(
        &leaf,
        &summaries.proof,
        HISTORICAL_SUMMARIES_PROOF_DEPTH,
        HISTORICAL_SUMMARIES_INDEX,
        trusted_state_root,
    )
}
