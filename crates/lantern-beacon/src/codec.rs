//! SSZ wire codec for the light-client containers.
//!
//! Scalars are little-endian, hashes are fixed 32-byte arrays, and the only
//! variable-size field in the whole vocabulary (the historical summaries
//! list) uses a single 4-byte offset. Decoding is strict: every length is
//! checked and trailing bytes are an error.

use thiserror::Error;

use crate::fork::{Fork, ForkSchedule};
use crate::types::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{context}: expected {expected} bytes, got {got}")]
    Length {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("unknown fork digest 0x{}", hex::encode(.0))]
    UnknownForkDigest([u8; 4]),
    #[error("list of {got} entries exceeds limit {limit}")]
    ListTooLong { limit: usize, got: usize },
    #[error("bad offset: expected {expected}, got {got}")]
    BadOffset { expected: usize, got: usize },
}

impl From<crate::fork::ForkError> for DecodeError {
    fn from(err: crate::fork::ForkError) -> Self {
        match err {
            crate::fork::ForkError::UnknownForkDigest(d) => DecodeError::UnknownForkDigest(d),
        }
    }
}

pub const BEACON_HEADER_SSZ_LEN: usize = 112;
pub const SYNC_COMMITTEE_SSZ_LEN: usize = SYNC_COMMITTEE_SIZE * BLS_PUBKEY_LEN + BLS_PUBKEY_LEN;
pub const SYNC_AGGREGATE_SSZ_LEN: usize = SYNC_COMMITTEE_SIZE / 8 + BLS_SIGNATURE_LEN;
pub const BOOTSTRAP_SSZ_LEN: usize =
    BEACON_HEADER_SSZ_LEN + SYNC_COMMITTEE_SSZ_LEN + 32 * SYNC_COMMITTEE_PROOF_DEPTH;
pub const UPDATE_SSZ_LEN: usize = BEACON_HEADER_SSZ_LEN
    + SYNC_COMMITTEE_SSZ_LEN
    + 32 * SYNC_COMMITTEE_PROOF_DEPTH
    + BEACON_HEADER_SSZ_LEN
    + 32 * FINALIZED_ROOT_PROOF_DEPTH
    + SYNC_AGGREGATE_SSZ_LEN
    + 8;
pub const FINALITY_UPDATE_SSZ_LEN: usize = BEACON_HEADER_SSZ_LEN
    + BEACON_HEADER_SSZ_LEN
    + 32 * FINALIZED_ROOT_PROOF_DEPTH
    + SYNC_AGGREGATE_SSZ_LEN
    + 8;
pub const OPTIMISTIC_UPDATE_SSZ_LEN: usize =
    BEACON_HEADER_SSZ_LEN + SYNC_AGGREGATE_SSZ_LEN + 8;
pub const FORKED_UPDATE_SSZ_LEN: usize = 4 + UPDATE_SSZ_LEN;
const SUMMARY_SSZ_LEN: usize = 64;
const SUMMARIES_FIXED_LEN: usize = 8 + 4 + 32 * HISTORICAL_SUMMARIES_PROOF_DEPTH;

/// Strict cursor over an SSZ buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::Length {
                context,
                expected: self.pos + n,
                got: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u64(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        let bytes = self.take(8, context)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    fn u32(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.take(4, context)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(arr))
    }

    fn bytes32(&mut self, context: &'static str) -> Result<[u8; 32], DecodeError> {
        let bytes = self.take(32, context)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(arr)
    }

    fn branch<const N: usize>(
        &mut self,
        context: &'static str,
    ) -> Result<[[u8; 32]; N], DecodeError> {
        let mut out = [[0u8; 32]; N];
        for node in out.iter_mut() {
            *node = self.bytes32(context)?;
        }
        Ok(out)
    }

    fn finish(&self, context: &'static str) -> Result<(), DecodeError> {
        if self.pos != self.buf.len() {
            return Err(DecodeError::Length {
                context,
                expected: self.pos,
                got: self.buf.len(),
            });
        }
        Ok(())
    }
}

// --- Beacon header ---

pub fn encode_header(header: &BeaconBlockHeader, out: &mut Vec<u8>) {
    out.extend_from_slice(&header.slot.to_le_bytes());
    out.extend_from_slice(&header.proposer_index.to_le_bytes());
    out.extend_from_slice(&header.parent_root);
    out.extend_from_slice(&header.state_root);
    out.extend_from_slice(&header.body_root);
}

fn read_header(r: &mut Reader<'_>) -> Result<BeaconBlockHeader, DecodeError> {
    Ok(BeaconBlockHeader {
        slot: r.u64("header.slot")?,
        proposer_index: r.u64("header.proposer_index")?,
        parent_root: r.bytes32("header.parent_root")?,
        state_root: r.bytes32("header.state_root")?,
        body_root: r.bytes32("header.body_root")?,
    })
}

fn read_light_header(r: &mut Reader<'_>) -> Result<LightClientHeader, DecodeError> {
    Ok(LightClientHeader {
        beacon: read_header(r)?,
    })
}

// --- Sync committee / aggregate ---

pub fn encode_committee(committee: &SyncCommittee, out: &mut Vec<u8>) {
    for pk in &committee.pubkeys {
        out.extend_from_slice(&pk.0);
    }
    out.extend_from_slice(&committee.aggregate_pubkey.0);
}

fn read_committee(r: &mut Reader<'_>) -> Result<SyncCommittee, DecodeError> {
    let mut pubkeys = Vec::with_capacity(SYNC_COMMITTEE_SIZE);
    for _ in 0..SYNC_COMMITTEE_SIZE {
        let bytes = r.take(BLS_PUBKEY_LEN, "committee.pubkey")?;
        let mut arr = [0u8; BLS_PUBKEY_LEN];
        arr.copy_from_slice(bytes);
        pubkeys.push(BlsPublicKey(arr));
    }
    let agg = r.take(BLS_PUBKEY_LEN, "committee.aggregate_pubkey")?;
    let mut arr = [0u8; BLS_PUBKEY_LEN];
    arr.copy_from_slice(agg);
    Ok(SyncCommittee {
        pubkeys,
        aggregate_pubkey: BlsPublicKey(arr),
    })
}

pub fn encode_aggregate(aggregate: &SyncAggregate, out: &mut Vec<u8>) {
    out.extend_from_slice(&aggregate.sync_committee_bits);
    out.extend_from_slice(&aggregate.sync_committee_signature.0);
}

fn read_aggregate(r: &mut Reader<'_>) -> Result<SyncAggregate, DecodeError> {
    let bits = r.take(SYNC_COMMITTEE_SIZE / 8, "aggregate.bits")?.to_vec();
    let sig = r.take(BLS_SIGNATURE_LEN, "aggregate.signature")?;
    let mut arr = [0u8; BLS_SIGNATURE_LEN];
    arr.copy_from_slice(sig);
    Ok(SyncAggregate {
        sync_committee_bits: bits,
        sync_committee_signature: BlsSignature(arr),
    })
}

// --- Content bodies ---

pub fn encode_bootstrap(bootstrap: &LightClientBootstrap) -> Vec<u8> {
    let mut out = Vec::with_capacity(BOOTSTRAP_SSZ_LEN);
    encode_header(&bootstrap.header.beacon, &mut out);
    encode_committee(&bootstrap.current_sync_committee, &mut out);
    for node in &bootstrap.current_sync_committee_branch {
        out.extend_from_slice(node);
    }
    out
}

pub fn decode_bootstrap(bytes: &[u8]) -> Result<LightClientBootstrap, DecodeError> {
    let mut r = Reader::new(bytes);
    let bootstrap = LightClientBootstrap {
        header: read_light_header(&mut r)?,
        current_sync_committee: read_committee(&mut r)?,
        current_sync_committee_branch: r.branch("bootstrap.branch")?,
    };
    r.finish("bootstrap")?;
    Ok(bootstrap)
}

pub fn encode_update(update: &LightClientUpdate) -> Vec<u8> {
    let mut out = Vec::with_capacity(UPDATE_SSZ_LEN);
    encode_header(&update.attested_header.beacon, &mut out);
    encode_committee(&update.next_sync_committee, &mut out);
    for node in &update.next_sync_committee_branch {
        out.extend_from_slice(node);
    }
    encode_header(&update.finalized_header.beacon, &mut out);
    for node in &update.finality_branch {
        out.extend_from_slice(node);
    }
    encode_aggregate(&update.sync_aggregate, &mut out);
    out.extend_from_slice(&update.signature_slot.to_le_bytes());
    out
}

pub fn decode_update(bytes: &[u8]) -> Result<LightClientUpdate, DecodeError> {
    let mut r = Reader::new(bytes);
    let update = LightClientUpdate {
        attested_header: read_light_header(&mut r)?,
        next_sync_committee: read_committee(&mut r)?,
        next_sync_committee_branch: r.branch("update.next_branch")?,
        finalized_header: read_light_header(&mut r)?,
        finality_branch: r.branch("update.finality_branch")?,
        sync_aggregate: read_aggregate(&mut r)?,
        signature_slot: r.u64("update.signature_slot")?,
    };
    r.finish("update")?;
    Ok(update)
}

pub fn encode_finality_update(update: &LightClientFinalityUpdate) -> Vec<u8> {
    let mut out = Vec::with_capacity(FINALITY_UPDATE_SSZ_LEN);
    encode_header(&update.attested_header.beacon, &mut out);
    encode_header(&update.finalized_header.beacon, &mut out);
    for node in &update.finality_branch {
        out.extend_from_slice(node);
    }
    encode_aggregate(&update.sync_aggregate, &mut out);
    out.extend_from_slice(&update.signature_slot.to_le_bytes());
    out
}

pub fn decode_finality_update(bytes: &[u8]) -> Result<LightClientFinalityUpdate, DecodeError> {
    let mut r = Reader::new(bytes);
    let update = LightClientFinalityUpdate {
        attested_header: read_light_header(&mut r)?,
        finalized_header: read_light_header(&mut r)?,
        finality_branch: r.branch("finality_update.branch")?,
        sync_aggregate: read_aggregate(&mut r)?,
        signature_slot: r.u64("finality_update.signature_slot")?,
    };
    r.finish("finality_update")?;
    Ok(update)
}

pub fn encode_optimistic_update(update: &LightClientOptimisticUpdate) -> Vec<u8> {
    let mut out = Vec::with_capacity(OPTIMISTIC_UPDATE_SSZ_LEN);
    encode_header(&update.attested_header.beacon, &mut out);
    encode_aggregate(&update.sync_aggregate, &mut out);
    out.extend_from_slice(&update.signature_slot.to_le_bytes());
    out
}

pub fn decode_optimistic_update(
    bytes: &[u8],
) -> Result<LightClientOptimisticUpdate, DecodeError> {
    let mut r = Reader::new(bytes);
    let update = LightClientOptimisticUpdate {
        attested_header: read_light_header(&mut r)?,
        sync_aggregate: read_aggregate(&mut r)?,
        signature_slot: r.u64("optimistic_update.signature_slot")?,
    };
    r.finish("optimistic_update")?;
    Ok(update)
}

pub fn encode_summaries(summaries: &HistoricalSummariesWithProof) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        SUMMARIES_FIXED_LEN + summaries.historical_summaries.len() * SUMMARY_SSZ_LEN,
    );
    out.extend_from_slice(&summaries.epoch.to_le_bytes());
    out.extend_from_slice(&(SUMMARIES_FIXED_LEN as u32).to_le_bytes());
    for node in &summaries.proof {
        out.extend_from_slice(node);
    }
    for summary in &summaries.historical_summaries {
        out.extend_from_slice(&summary.block_summary_root);
        out.extend_from_slice(&summary.state_summary_root);
    }
    out
}

pub fn decode_summaries(bytes: &[u8]) -> Result<HistoricalSummariesWithProof, DecodeError> {
    let mut r = Reader::new(bytes);
    let epoch = r.u64("summaries.epoch")?;
    let offset = r.u32("summaries.offset")? as usize;
    if offset != SUMMARIES_FIXED_LEN {
        return Err(DecodeError::BadOffset {
            expected: SUMMARIES_FIXED_LEN,
            got: offset,
        });
    }
    let proof = r.branch("summaries.proof")?;
    let tail = bytes.len() - r.pos;
    if tail % SUMMARY_SSZ_LEN != 0 {
        return Err(DecodeError::Length {
            context: "summaries.list",
            expected: tail - tail % SUMMARY_SSZ_LEN,
            got: tail,
        });
    }
    let count = tail / SUMMARY_SSZ_LEN;
    if count as u64 > HISTORICAL_SUMMARIES_LIMIT {
        return Err(DecodeError::ListTooLong {
            limit: HISTORICAL_SUMMARIES_LIMIT as usize,
            got: count,
        });
    }
    let mut historical_summaries = Vec::with_capacity(count);
    for _ in 0..count {
        historical_summaries.push(HistoricalSummary {
            block_summary_root: r.bytes32("summary.block_root")?,
            state_summary_root: r.bytes32("summary.state_root")?,
        });
    }
    r.finish("summaries")?;
    Ok(HistoricalSummariesWithProof {
        epoch,
        historical_summaries,
        proof,
    })
}

// --- Fork-tagged wrappers ---

fn tag(schedule: &ForkSchedule, fork: Fork, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&schedule.digest(fork));
    out.extend_from_slice(&body);
    out
}

fn split_tag<'a>(
    schedule: &ForkSchedule,
    bytes: &'a [u8],
) -> Result<(Fork, &'a [u8]), DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::Length {
            context: "fork digest",
            expected: 4,
            got: bytes.len(),
        });
    }
    let mut digest = [0u8; 4];
    digest.copy_from_slice(&bytes[..4]);
    let fork = schedule.fork_by_digest(digest)?;
    Ok((fork, &bytes[4..]))
}

pub fn encode_forked_bootstrap(
    schedule: &ForkSchedule,
    fork: Fork,
    bootstrap: &LightClientBootstrap,
) -> Vec<u8> {
    tag(schedule, fork, encode_bootstrap(bootstrap))
}

pub fn decode_forked_bootstrap(
    schedule: &ForkSchedule,
    bytes: &[u8],
) -> Result<(Fork, LightClientBootstrap), DecodeError> {
    let (fork, body) = split_tag(schedule, bytes)?;
    Ok((fork, decode_bootstrap(body)?))
}

pub fn encode_forked_update(
    schedule: &ForkSchedule,
    fork: Fork,
    update: &LightClientUpdate,
) -> Vec<u8> {
    tag(schedule, fork, encode_update(update))
}

pub fn decode_forked_update(
    schedule: &ForkSchedule,
    bytes: &[u8],
) -> Result<(Fork, LightClientUpdate), DecodeError> {
    let (fork, body) = split_tag(schedule, bytes)?;
    Ok((fork, decode_update(body)?))
}

pub fn encode_forked_finality_update(
    schedule: &ForkSchedule,
    fork: Fork,
    update: &LightClientFinalityUpdate,
) -> Vec<u8> {
    tag(schedule, fork, encode_finality_update(update))
}

pub fn decode_forked_finality_update(
    schedule: &ForkSchedule,
    bytes: &[u8],
) -> Result<(Fork, LightClientFinalityUpdate), DecodeError> {
    let (fork, body) = split_tag(schedule, bytes)?;
    Ok((fork, decode_finality_update(body)?))
}

pub fn encode_forked_optimistic_update(
    schedule: &ForkSchedule,
    fork: Fork,
    update: &LightClientOptimisticUpdate,
) -> Vec<u8> {
    tag(schedule, fork, encode_optimistic_update(update))
}

pub fn decode_forked_optimistic_update(
    schedule: &ForkSchedule,
    bytes: &[u8],
) -> Result<(Fork, LightClientOptimisticUpdate), DecodeError> {
    let (fork, body) = split_tag(schedule, bytes)?;
    Ok((fork, decode_optimistic_update(body)?))
}

pub fn encode_forked_summaries(
    schedule: &ForkSchedule,
    fork: Fork,
    summaries: &HistoricalSummariesWithProof,
) -> Vec<u8> {
    tag(schedule, fork, encode_summaries(summaries))
}

pub fn decode_forked_summaries(
    schedule: &ForkSchedule,
    bytes: &[u8],
) -> Result<(Fork, HistoricalSummariesWithProof), DecodeError> {
    let (fork, body) = split_tag(schedule, bytes)?;
    Ok((fork, decode_summaries(body)?))
}

/// An update-range body is the concatenation of at most 128 fork-tagged
/// full updates, each of fixed size.
pub fn encode_update_range(
    schedule: &ForkSchedule,
    updates: &[(Fork, LightClientUpdate)],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(updates.len() * FORKED_UPDATE_SSZ_LEN);
    for (fork, update) in updates {
        out.extend_from_slice(&encode_forked_update(schedule, *fork, update));
    }
    out
}

pub fn decode_update_range(
    schedule: &ForkSchedule,
    bytes: &[u8],
) -> Result<Vec<(Fork, LightClientUpdate)>, DecodeError> {
    if bytes.len() % FORKED_UPDATE_SSZ_LEN != 0 {
        return Err(DecodeError::Length {
            context: "update range",
            expected: bytes.len() - bytes.len() % FORKED_UPDATE_SSZ_LEN,
            got: bytes.len(),
        });
    }
    let count = bytes.len() / FORKED_UPDATE_SSZ_LEN;
    if count as u64 > MAX_REQUEST_LIGHT_CLIENT_UPDATES {
        return Err(DecodeError::ListTooLong {
            limit: MAX_REQUEST_LIGHT_CLIENT_UPDATES as usize,
            got: count,
        });
    }
    let mut updates = Vec::with_capacity(count);
    for chunk in bytes.chunks(FORKED_UPDATE_SSZ_LEN) {
        updates.push(decode_forked_update(schedule, chunk)?);
    }
    Ok(updates)
}
