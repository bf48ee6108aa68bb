//! The XDPoS engine: snapshot retrieval, the header verification cascade,
//! sealing, and epoch finalization.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256, U256};
use lru::LruCache;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, warn};

use crate::chain::{ChainReader, HeaderSigner, StateBackend, MIME_TYPE_XDPOS};
use crate::config::XdposConfig;
use crate::error::EngineError;
use crate::header::{
    Header, SigCache, DIFF_INTURN, DIFF_NOTURN, EMPTY_UNCLE_HASH, EXTRA_SEAL, EXTRA_VANITY,
    NONCE_AUTH, NONCE_DROP,
};
use crate::hooks::EngineHooks;
use crate::reward;
use crate::snapshot::{Snapshot, SnapshotStore};

/// Snapshots kept in memory.
const SNAPSHOT_CACHE_SIZE: usize = 128;
/// Recovered seals kept in memory.
const SIGNATURE_CACHE_SIZE: usize = 4096;
/// Verified header hashes kept in memory.
const VERIFIED_CACHE_SIZE: usize = 512;

/// Cancels an in-flight batch verification.
#[derive(Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }
}

pub struct XdPoS {
    config: XdposConfig,
    db: Arc<dyn SnapshotStore>,
    sigcache: Arc<SigCache>,
    hooks: EngineHooks,
    recents: RwLock<LruCache<B256, Snapshot>>,
    verified: RwLock<LruCache<B256, ()>>,
    signer: RwLock<Option<(Address, Arc<dyn HeaderSigner>)>>,
    proposals: RwLock<HashMap<Address, bool>>,
}

impl XdPoS {
    pub fn new(config: XdposConfig, db: Arc<dyn SnapshotStore>, hooks: EngineHooks) -> Self {
        Self {
            config,
            db,
            sigcache: Arc::new(SigCache::new(SIGNATURE_CACHE_SIZE)),
            hooks,
            recents: RwLock::new(LruCache::new(
                NonZeroUsize::new(SNAPSHOT_CACHE_SIZE).expect("cache size is non-zero"),
            )),
            verified: RwLock::new(LruCache::new(
                NonZeroUsize::new(VERIFIED_CACHE_SIZE).expect("cache size is non-zero"),
            )),
            signer: RwLock::new(None),
            proposals: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &XdposConfig {
        &self.config
    }

    pub fn sigcache(&self) -> &Arc<SigCache> {
        &self.sigcache
    }

    pub fn hooks(&self) -> &EngineHooks {
        &self.hooks
    }

    /// Authorize the engine to seal with the given account.
    pub fn set_signer(&self, account: Address, signer: Arc<dyn HeaderSigner>) {
        *self.signer.write() = Some((account, signer));
    }

    pub fn clear_signer(&self) {
        *self.signer.write() = None;
    }

    /// The address that sealed a header.
    pub fn author(&self, header: &Header) -> Result<Address, EngineError> {
        self.sigcache.recover(header)
    }

    // --- voting surface ---

    pub fn propose(&self, address: Address, authorize: bool) {
        self.proposals.write().insert(address, authorize);
    }

    pub fn discard(&self, address: Address) {
        self.proposals.write().remove(&address);
    }

    pub fn proposals(&self) -> HashMap<Address, bool> {
        self.proposals.read().clone()
    }

    // --- snapshots ---

    /// The authorization snapshot at `(number, hash)`, folding forward
    /// from the nearest cached, persisted, or genesis anchor. `parents`
    /// supplies batch-local ancestors not yet in the chain.
    pub fn snapshot(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        hash: B256,
        parents: &[Header],
    ) -> Result<Snapshot, EngineError> {
        let mut headers: Vec<Header> = Vec::new();
        let mut number = number;
        let mut hash = hash;
        let mut parents = parents;

        let anchor = loop {
            if let Some(snap) = self.recents.write().get(&hash).cloned() {
                break snap;
            }
            if self.config.is_snapshot_point(number) {
                if let Some(snap) = Snapshot::load(&*self.db, hash) {
                    debug!(number, "snapshot loaded from store");
                    break snap;
                }
            }
            if number == 0 {
                let genesis = chain.header_by_number(0).ok_or(EngineError::UnknownBlock)?;
                let signers = genesis.checkpoint_signers()?;
                let snap = Snapshot::new(0, genesis.hash(), signers);
                snap.store(&*self.db)?;
                debug!("genesis snapshot created");
                break snap;
            }

            let header = match parents.split_last() {
                Some((last, rest)) => {
                    if last.hash() != hash || last.number != number {
                        return Err(EngineError::UnknownAncestor);
                    }
                    parents = rest;
                    last.clone()
                }
                None => chain
                    .header_by_hash(hash, number)
                    .ok_or(EngineError::UnknownAncestor)?,
            };
            hash = header.parent_hash;
            number -= 1;
            headers.push(header);
        };

        headers.reverse();
        let applied = headers.len();
        let snap = anchor.apply(
            &headers,
            &self.config,
            &self.sigcache,
            self.hooks.masternodes.as_ref(),
        )?;
        self.recents.write().put(snap.hash, snap.clone());
        if applied > 0 && self.config.is_snapshot_point(snap.number) {
            snap.store(&*self.db)?;
            debug!(number = snap.number, "snapshot persisted");
        }
        Ok(snap)
    }

    // --- verification ---

    /// Verify a single header against its ancestry. Successful results
    /// are cached by hash.
    pub fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), EngineError> {
        let hash = header.hash();
        if self.verified.write().get(&hash).is_some() {
            return Ok(());
        }
        self.verify_header_inner(chain, header, parents)?;
        self.verified.write().put(hash, ());
        Ok(())
    }

    fn verify_header_inner(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), EngineError> {
        let number = header.number;
        if number == 0 {
            return Err(EngineError::UnknownBlock);
        }
        let is_checkpoint = self.config.is_checkpoint(number);

        if header.time > unix_now() + self.config.allowed_future_block_time {
            return Err(EngineError::FutureBlock);
        }

        // Nonce discipline: votes only, and no votes on checkpoints.
        if header.nonce != NONCE_AUTH && header.nonce != NONCE_DROP {
            return Err(EngineError::InvalidVote);
        }
        if is_checkpoint {
            if header.coinbase != Address::ZERO {
                return Err(EngineError::InvalidCheckpointBeneficiary);
            }
            if header.nonce != NONCE_DROP {
                return Err(EngineError::InvalidCheckpointVote);
            }
        }

        // Extra-data layout.
        if header.extra.len() < EXTRA_VANITY {
            return Err(EngineError::MissingVanity);
        }
        if header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(EngineError::MissingSignature);
        }
        let signer_bytes = header.extra.len() - EXTRA_VANITY - EXTRA_SEAL;
        if !is_checkpoint && signer_bytes != 0 {
            return Err(EngineError::ExtraSigners);
        }
        if is_checkpoint && (signer_bytes == 0 || signer_bytes % Address::len_bytes() != 0) {
            return Err(EngineError::InvalidCheckpointSigners);
        }

        if header.mix_digest != B256::ZERO {
            return Err(EngineError::InvalidMixDigest);
        }
        if header.uncle_hash != EMPTY_UNCLE_HASH {
            return Err(EngineError::InvalidUncleHash);
        }

        if header.difficulty != DIFF_INTURN && header.difficulty != DIFF_NOTURN {
            return Err(EngineError::InvalidDifficulty {
                expected: DIFF_INTURN,
                got: header.difficulty,
            });
        }

        // Cascading checks against the parent.
        let parent = match parents.last() {
            Some(parent) => parent.clone(),
            None => chain
                .header_by_hash(header.parent_hash, number - 1)
                .ok_or(EngineError::UnknownAncestor)?,
        };
        if parent.number + 1 != number || parent.hash() != header.parent_hash {
            return Err(EngineError::UnknownAncestor);
        }
        if parent.time + self.config.period > header.time {
            return Err(EngineError::InvalidTimestamp);
        }

        let snap = self.snapshot(chain, number - 1, header.parent_hash, parents)?;

        if is_checkpoint {
            self.verify_checkpoint_signers(chain, header, &snap)?;
        }
        self.verify_seal(header, &snap)
    }

    /// Checkpoint extra-data must list exactly the surviving masternodes:
    /// the snapshot's signers minus penalties in force. Penalty runs
    /// first, then the masternode verifier hook.
    fn verify_checkpoint_signers(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        snap: &Snapshot,
    ) -> Result<(), EngineError> {
        let listed = header.checkpoint_signers()?;
        let expected = self.checkpoint_signer_list(chain, snap, header.number)?;

        let listed_set: std::collections::BTreeSet<Address> = listed.iter().copied().collect();
        let expected_set: std::collections::BTreeSet<Address> =
            expected.iter().copied().collect();
        if listed_set != expected_set {
            return Err(EngineError::InvalidCheckpointSigners);
        }

        if let Some(verifier) = &self.hooks.verify_mns {
            verifier.verify_masternodes(chain, header, &listed)?;
        }
        Ok(())
    }

    /// The signer list a checkpoint at `number` should carry.
    fn checkpoint_signer_list(
        &self,
        chain: &dyn ChainReader,
        snap: &Snapshot,
        number: u64,
    ) -> Result<Vec<Address>, EngineError> {
        let masternodes = snap.signers_sorted();
        let penalized = match &self.hooks.penalty {
            Some(hook) => hook.penalties(chain, number, &masternodes)?,
            None => reward::penalties_with_carryover(chain, &self.config, &self.sigcache, number)?,
        };
        Ok(masternodes
            .into_iter()
            .filter(|mn| !penalized.contains(mn))
            .collect())
    }

    /// Seal checks: the creator must be authorized, outside the recent
    /// window, and carry the difficulty its turn dictates.
    fn verify_seal(&self, header: &Header, snap: &Snapshot) -> Result<(), EngineError> {
        let number = header.number;
        let creator = self.sigcache.recover(header)?;

        let authorized = match &self.hooks.masternodes {
            Some(source) => source.masternodes(number).contains(&creator),
            None => snap.signers.contains(&creator),
        };
        if !authorized {
            return Err(EngineError::Unauthorized(creator));
        }
        if !self.config.is_checkpoint(number) && snap.recently_signed(number, creator) {
            return Err(EngineError::Unauthorized(creator));
        }

        let expected = if snap.inturn(number, creator) {
            DIFF_INTURN
        } else {
            DIFF_NOTURN
        };
        if header.difficulty != expected {
            return Err(EngineError::InvalidDifficulty {
                expected,
                got: header.difficulty,
            });
        }
        Ok(())
    }

    /// Verify a batch. Results arrive on the returned channel in input
    /// order; the handle cancels outstanding work.
    pub fn verify_headers(
        self: &Arc<Self>,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> (AbortHandle, mpsc::Receiver<Result<(), EngineError>>) {
        let abort = AbortHandle::default();
        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(self);
        let handle = abort.clone();

        std::thread::spawn(move || {
            for (i, header) in headers.iter().enumerate() {
                if handle.is_aborted() {
                    debug!(verified = i, "batch verification aborted");
                    break;
                }
                let result = engine.verify_header(&*chain, header, &headers[..i]);
                if tx.send(result).is_err() {
                    break;
                }
            }
        });

        (abort, rx)
    }

    // --- block production ---

    /// Fill in the consensus fields of a header under construction.
    pub fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), EngineError> {
        let number = header.number;
        if number == 0 {
            return Err(EngineError::UnknownBlock);
        }

        header.coinbase = Address::ZERO;
        header.nonce = NONCE_DROP;

        let snap = self.snapshot(chain, number - 1, header.parent_hash, &[])?;

        // Off checkpoints, float one valid pending proposal, picked
        // uniformly at random.
        if !self.config.is_checkpoint(number) {
            let candidates: Vec<(Address, bool)> = self
                .proposals
                .read()
                .iter()
                .filter(|(address, &authorize)| snap.valid_vote(**address, authorize))
                .map(|(address, authorize)| (*address, *authorize))
                .collect();
            if !candidates.is_empty() {
                let (address, authorize) =
                    candidates[rand::thread_rng().gen_range(0..candidates.len())];
                header.coinbase = address;
                header.nonce = if authorize { NONCE_AUTH } else { NONCE_DROP };
            }
        }

        let signer = self.signer.read().as_ref().map(|(account, _)| *account);
        header.difficulty = match signer {
            Some(account) => {
                if snap.inturn(number, account) {
                    DIFF_INTURN
                } else {
                    DIFF_NOTURN
                }
            }
            None => DIFF_NOTURN,
        };

        // Vanity, checkpoint signer list, seal padding.
        let mut extra = header.extra.to_vec();
        extra.resize(EXTRA_VANITY, 0);
        if self.config.is_checkpoint(number) {
            for signer in self.checkpoint_signer_list(chain, &snap, number)? {
                extra.extend_from_slice(signer.as_slice());
            }
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.extra = extra.into();

        header.mix_digest = B256::ZERO;

        let parent = chain
            .header_by_hash(header.parent_hash, number - 1)
            .ok_or(EngineError::UnknownAncestor)?;
        header.time = (parent.time + self.config.period).max(unix_now());
        Ok(())
    }

    /// Expected difficulty for a child of `parent` sealed by `signer`.
    pub fn calc_difficulty(
        &self,
        chain: &dyn ChainReader,
        parent: &Header,
        signer: Address,
    ) -> Result<U256, EngineError> {
        let snap = self.snapshot(chain, parent.number, parent.hash(), &[])?;
        Ok(if snap.inturn(parent.number + 1, signer) {
            DIFF_INTURN
        } else {
            DIFF_NOTURN
        })
    }

    /// Attempt to seal a prepared header. The sealed header is emitted on
    /// `results` after the slot delay (plus wiggle when out of turn);
    /// `stop` cancels the wait. Transient conditions return quietly.
    pub fn seal(
        &self,
        chain: &dyn ChainReader,
        header: Header,
        has_transactions: bool,
        results: mpsc::Sender<Header>,
        stop: mpsc::Receiver<()>,
    ) -> Result<(), EngineError> {
        let number = header.number;
        if number == 0 {
            return Err(EngineError::UnknownBlock);
        }
        if self.config.period == 0 && !has_transactions {
            debug!("sealing paused, waiting for transactions");
            return Ok(());
        }

        let (account, signer_fn) = self
            .signer
            .read()
            .clone()
            .ok_or_else(|| EngineError::Signature("no signer configured".into()))?;

        let snap = self.snapshot(chain, number - 1, header.parent_hash, &[])?;
        if !snap.signers.contains(&account) {
            return Err(EngineError::Unauthorized(account));
        }
        if snap.recently_signed(number, account) {
            debug!(%account, "signed recently, waiting for others");
            return Ok(());
        }

        // Slot delay, plus wiggle when out of turn to give the inturn
        // signer priority.
        let mut delay_ms = header.time.saturating_sub(unix_now()) * 1000;
        if !snap.inturn(number, account) {
            let wiggle = snap.seal_window() * self.config.wiggle_time_millis;
            let jitter = rand::thread_rng().gen_range(0..wiggle.max(1));
            delay_ms += jitter;
            debug!(jitter, "out-of-turn sealing delayed");
        }

        let payload = header.seal_payload()?;
        let mut sealed = header;
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_millis(delay_ms);
            match stop.recv_timeout(Duration::from_millis(delay_ms)) {
                Ok(()) => {
                    debug!("sealing aborted by stop signal");
                    return;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    // nobody can stop us anymore; still honor the delay
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                }
            }

            let signature = match signer_fn.sign(account, MIME_TYPE_XDPOS, &payload) {
                Ok(signature) => signature,
                Err(err) => {
                    warn!(%err, "header signing failed");
                    return;
                }
            };
            let mut extra = sealed.extra.to_vec();
            let len = extra.len();
            extra[len - EXTRA_SEAL..].copy_from_slice(&signature);
            sealed.extra = extra.into();
            let _ = results.send(sealed);
        });
        Ok(())
    }

    /// Epoch finalization: credit rewards at reward checkpoints, through
    /// the hook when one is injected, else the built-in split.
    pub fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        state: &mut dyn StateBackend,
    ) -> Result<(), EngineError> {
        if !reward::is_reward_checkpoint(&self.config, header.number) {
            return Ok(());
        }
        if let Some(hook) = &self.hooks.reward {
            return hook.apply_rewards(chain, state, header);
        }
        let summary = reward::compute_rewards(chain, &self.config, &self.sigcache, header.number)?;
        reward::apply_rewards(&summary, &self.config, state);
        if let Some(folder) = &self.config.store_reward_folder {
            reward::persist_summary(folder, &summary)?;
        }
        Ok(())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{
        build_header, genesis_with_signers, sorted_keys, KeySigner, MemoryState, MockChain,
    };
    use crate::header::tests::address_of;
    use crate::hooks::PenaltyHook;
    use crate::snapshot::MemorySnapshotStore;
    use k256::ecdsa::SigningKey;

    fn engine_with(config: XdposConfig, hooks: EngineHooks) -> Arc<XdPoS> {
        Arc::new(XdPoS::new(
            config,
            Arc::new(MemorySnapshotStore::default()),
            hooks,
        ))
    }

    fn addresses(keys: &[SigningKey]) -> Vec<Address> {
        keys.iter().map(address_of).collect()
    }

    fn key_by_address<'a>(keys: &'a [SigningKey], address: Address) -> &'a SigningKey {
        keys.iter().find(|k| address_of(k) == address).unwrap()
    }

    /// Extend `chain` by one valid block sealed by the signer at sorted
    /// index `number % len` (inturn) or a chosen other one.
    fn grow(
        chain: &MockChain,
        parent: &Header,
        keys: &[SigningKey],
        config: &XdposConfig,
        by: Option<Address>,
    ) -> Header {
        let addrs = addresses(keys);
        let number = parent.number + 1;
        let inturn_addr = addrs[(number % addrs.len() as u64) as usize];
        let sealer = by.unwrap_or(inturn_addr);
        let header = build_header(
            parent,
            key_by_address(keys, sealer),
            &addrs,
            config.epoch,
            config.period,
            sealer == inturn_addr,
        );
        chain.insert(header.clone());
        header
    }

    fn seeded_chain(keys: &[SigningKey]) -> (MockChain, Header) {
        let chain = MockChain::new();
        let genesis = genesis_with_signers(&addresses(keys));
        chain.insert(genesis.clone());
        (chain, genesis)
    }

    #[test]
    fn test_inturn_difficulty_accepted_noturn_rejected() {
        let keys = sorted_keys(&[1, 2, 3]);
        let addrs = addresses(&keys);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        // inturn seal with difficulty 2 passes
        let block1 = grow(&chain, &genesis, &keys, &config, None);
        engine.verify_header(&chain, &block1, &[]).unwrap();

        // an out-of-turn signer claiming inturn difficulty fails
        let noturn = addrs[(2 % addrs.len()) as usize];
        let mut bad = build_header(
            &genesis,
            key_by_address(&keys, noturn),
            &addrs,
            config.epoch,
            config.period,
            true, // wrong: difficulty 2 while out of turn
        );
        bad.parent_hash = genesis.hash();
        crate::header::tests::sign_header(&mut bad, key_by_address(&keys, noturn));
        let err = engine.verify_header(&chain, &bad, &[]).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidDifficulty {
                expected: DIFF_NOTURN,
                got: DIFF_INTURN
            }
        );

        // the same signer with difficulty 1 passes
        let ok = grow(&chain, &genesis, &keys, &config, Some(noturn));
        engine.verify_header(&chain, &ok, &[]).unwrap();
    }

    #[test]
    fn test_recent_signer_rejected_at_engine_level() {
        let keys = sorted_keys(&[1, 2, 3, 4, 5]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let addrs = addresses(&keys);
        let a = addrs[0];
        let block1 = grow(&chain, &genesis, &keys, &config, Some(a));
        let block2 = grow(&chain, &block1, &keys, &config, Some(addrs[1]));
        engine.verify_header(&chain, &block1, &[]).unwrap();
        engine.verify_header(&chain, &block2, &[]).unwrap();

        // A again within the window
        let again = grow(&chain, &block2, &keys, &config, Some(a));
        let err = engine.verify_header(&chain, &again, &[]).unwrap_err();
        assert_eq!(err, EngineError::Unauthorized(a));
    }

    #[test]
    fn test_future_block_rejected() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let mut header = grow(&chain, &genesis, &keys, &config, None);
        header.time = unix_now() + config.allowed_future_block_time + 120;
        let inturn = addresses(&keys)[(1 % keys.len()) as usize];
        crate::header::tests::sign_header(&mut header, key_by_address(&keys, inturn));
        let err = engine.verify_header(&chain, &header, &[]).unwrap_err();
        assert_eq!(err, EngineError::FutureBlock);
    }

    #[test]
    fn test_extra_and_field_shape_errors() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);
        let good = grow(&chain, &genesis, &keys, &config, None);

        let mut short = good.clone();
        short.extra = vec![0u8; 10].into();
        assert_eq!(
            engine.verify_header(&chain, &short, &[]).unwrap_err(),
            EngineError::MissingVanity
        );

        let mut sealless = good.clone();
        sealless.extra = vec![0u8; EXTRA_VANITY + 10].into();
        assert_eq!(
            engine.verify_header(&chain, &sealless, &[]).unwrap_err(),
            EngineError::MissingSignature
        );

        let mut listed = good.clone();
        listed.extra = vec![0u8; EXTRA_VANITY + 20 + EXTRA_SEAL].into();
        assert_eq!(
            engine.verify_header(&chain, &listed, &[]).unwrap_err(),
            EngineError::ExtraSigners
        );

        let mut mixed = good.clone();
        mixed.mix_digest = B256::repeat_byte(1);
        assert_eq!(
            engine.verify_header(&chain, &mixed, &[]).unwrap_err(),
            EngineError::InvalidMixDigest
        );

        let mut uncled = good.clone();
        uncled.uncle_hash = B256::ZERO;
        assert_eq!(
            engine.verify_header(&chain, &uncled, &[]).unwrap_err(),
            EngineError::InvalidUncleHash
        );

        let mut timed = good;
        timed.time = genesis.time; // older than parent + period
        let inturn = addresses(&keys)[(1 % keys.len()) as usize];
        crate::header::tests::sign_header(&mut timed, key_by_address(&keys, inturn));
        assert_eq!(
            engine.verify_header(&chain, &timed, &[]).unwrap_err(),
            EngineError::InvalidTimestamp
        );
    }

    #[test]
    fn test_checkpoint_block_shape() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig {
            epoch: 2,
            ..Default::default()
        };
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);
        let block1 = grow(&chain, &genesis, &keys, &config, None);

        // block 2 is a checkpoint: beneficiary and auth nonce are banned
        let addrs = addresses(&keys);
        let inturn = addrs[(2 % addrs.len() as u64) as usize];
        let base = build_header(
            &block1,
            key_by_address(&keys, inturn),
            &addrs,
            config.epoch,
            config.period,
            true,
        );

        let mut beneficiary = base.clone();
        beneficiary.coinbase = Address::repeat_byte(9);
        crate::header::tests::sign_header(&mut beneficiary, key_by_address(&keys, inturn));
        assert_eq!(
            engine.verify_header(&chain, &beneficiary, &[]).unwrap_err(),
            EngineError::InvalidCheckpointBeneficiary
        );

        let mut voting = base.clone();
        voting.nonce = NONCE_AUTH;
        crate::header::tests::sign_header(&mut voting, key_by_address(&keys, inturn));
        assert_eq!(
            engine.verify_header(&chain, &voting, &[]).unwrap_err(),
            EngineError::InvalidCheckpointVote
        );
    }

    struct FixedPenalties(Vec<Address>);

    impl PenaltyHook for FixedPenalties {
        fn penalties(
            &self,
            _chain: &dyn ChainReader,
            _checkpoint_number: u64,
            _masternodes: &[Address],
        ) -> Result<Vec<Address>, EngineError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_checkpoint_signer_list_excludes_penalties() {
        // four signers, the penalty hook reports three of them silent;
        // the checkpoint extra must list only the survivor
        let keys = sorted_keys(&[1, 2, 3, 4]);
        let addrs = addresses(&keys);
        let config = XdposConfig {
            epoch: 4,
            ..Default::default()
        };
        let hooks = EngineHooks {
            penalty: Some(Arc::new(FixedPenalties(addrs[1..].to_vec()))),
            ..Default::default()
        };
        let engine = engine_with(config.clone(), hooks);
        let (chain, genesis) = seeded_chain(&keys);

        let block1 = grow(&chain, &genesis, &keys, &config, None);
        let block2 = grow(&chain, &block1, &keys, &config, None);
        let block3 = grow(&chain, &block2, &keys, &config, None);

        // checkpoint listing exactly the surviving signer passes
        let number = 4u64;
        let inturn = addrs[(number % addrs.len() as u64) as usize];
        let survivors = [addrs[0]];
        let good = build_header(
            &block3,
            key_by_address(&keys, inturn),
            &survivors,
            config.epoch,
            config.period,
            inturn == addrs[0],
        );
        chain.insert(good.clone());
        engine.verify_header(&chain, &good, &[]).unwrap();

        // listing a penalized signer fails
        let bad = build_header(
            &block3,
            key_by_address(&keys, inturn),
            &addrs[..2],
            config.epoch,
            config.period,
            inturn == addrs[0],
        );
        let err = engine.verify_header(&chain, &bad, &[]).unwrap_err();
        assert_eq!(err, EngineError::InvalidCheckpointSigners);
    }

    #[test]
    fn test_batch_verify_preserves_order() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let mut headers = Vec::new();
        let mut parent = genesis;
        for _ in 0..6 {
            let header = grow(&chain, &parent, &keys, &config, None);
            headers.push(header.clone());
            parent = header;
        }

        let (_, results) = engine.verify_headers(Arc::new(chain), headers.clone());
        let collected: Vec<_> = results.iter().collect();
        assert_eq!(collected.len(), headers.len());
        assert!(collected.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_batch_verify_abort_stops_early() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let mut headers = Vec::new();
        let mut parent = genesis;
        for _ in 0..64 {
            let header = grow(&chain, &parent, &keys, &config, None);
            headers.push(header.clone());
            parent = header;
        }

        let (abort, results) = engine.verify_headers(Arc::new(chain), headers.clone());
        abort.abort();
        let collected: Vec<_> = results.iter().collect();
        // the worker stops at the flag; everything delivered is in order
        assert!(collected.len() <= headers.len());
        assert!(collected.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_batch_verify_reports_per_header_errors() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let good = grow(&chain, &genesis, &keys, &config, None);
        let mut bad = grow(&chain, &good, &keys, &config, None);
        bad.mix_digest = B256::repeat_byte(3);

        let (_, results) = engine.verify_headers(Arc::new(chain), vec![good, bad]);
        let collected: Vec<_> = results.iter().collect();
        assert_eq!(collected.len(), 2);
        assert!(collected[0].is_ok());
        assert_eq!(
            collected[1].clone().unwrap_err(),
            EngineError::InvalidMixDigest
        );
    }

    #[test]
    fn test_prepare_floats_a_proposal() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let signer = KeySigner::new(1);
        engine.set_signer(address_of(&signer.key), Arc::new(KeySigner::new(1)));

        let candidate = Address::repeat_byte(0xD);
        engine.propose(candidate, true);
        // an already-authorized address is not a valid vote and is skipped
        engine.propose(addresses(&keys)[0], true);

        let mut header = Header {
            parent_hash: genesis.hash(),
            number: 1,
            ..Default::default()
        };
        engine.prepare(&chain, &mut header).unwrap();

        assert_eq!(header.coinbase, candidate);
        assert_eq!(header.nonce, NONCE_AUTH);
        assert_eq!(header.extra.len(), EXTRA_VANITY + EXTRA_SEAL);
        assert!(header.time >= genesis.time + config.period);
        // the configured signer seals block 1 out of turn or in turn
        assert!(header.difficulty == DIFF_INTURN || header.difficulty == DIFF_NOTURN);
    }

    #[test]
    fn test_seal_emits_recoverable_header() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        // find which seed key owns sorted index 1 (inturn at block 1)
        let inturn_addr = addresses(&keys)[1 % keys.len()];
        let seed = (1..=3u8)
            .find(|&s| address_of(&SigningKey::from_slice(&[s; 32]).unwrap()) == inturn_addr)
            .unwrap();
        let signer = KeySigner::new(seed);
        engine.set_signer(signer.address(), Arc::new(signer));

        let mut header = Header {
            parent_hash: genesis.hash(),
            number: 1,
            ..Default::default()
        };
        engine.prepare(&chain, &mut header).unwrap();
        header.time = unix_now().saturating_sub(1); // no slot delay

        let (tx, rx) = mpsc::channel();
        let (_stop_tx, stop_rx) = mpsc::channel::<()>();
        engine
            .seal(&chain, header, true, tx, stop_rx)
            .unwrap();

        let sealed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(engine.author(&sealed).unwrap(), inturn_addr);
        engine.verify_header(&chain, &sealed, &[]).unwrap();
    }

    #[test]
    fn test_seal_stop_signal_suppresses_emission() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let inturn_addr = addresses(&keys)[1 % keys.len()];
        let seed = (1..=3u8)
            .find(|&s| address_of(&SigningKey::from_slice(&[s; 32]).unwrap()) == inturn_addr)
            .unwrap();
        let signer = KeySigner::new(seed);
        engine.set_signer(signer.address(), Arc::new(signer));

        let mut header = Header {
            parent_hash: genesis.hash(),
            number: 1,
            ..Default::default()
        };
        engine.prepare(&chain, &mut header).unwrap();
        header.time = unix_now() + 2; // force a wait we can interrupt

        let (tx, rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        engine.seal(&chain, header, true, tx, stop_rx).unwrap();
        stop_tx.send(()).unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(3)).is_err());
    }

    #[test]
    fn test_seal_waits_for_transactions_quietly() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig {
            period: 0,
            ..Default::default()
        };
        let engine = engine_with(config, EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let header = Header {
            parent_hash: genesis.hash(),
            number: 1,
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel();
        let (_stop_tx, stop_rx) = mpsc::channel::<()>();
        // an empty block under a zero period is not an error, just silence
        engine.seal(&chain, header, false, tx, stop_rx).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_seal_unauthorized_signer_fails() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig::default();
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let outsider = KeySigner::new(9);
        let address = outsider.address();
        engine.set_signer(address, Arc::new(outsider));

        let mut header = Header {
            parent_hash: genesis.hash(),
            number: 1,
            ..Default::default()
        };
        engine.prepare(&chain, &mut header).unwrap();

        let (tx, rx) = mpsc::channel();
        let (_stop_tx, stop_rx) = mpsc::channel::<()>();
        let err = engine.seal(&chain, header, true, tx, stop_rx).unwrap_err();
        assert_eq!(err, EngineError::Unauthorized(address));
        drop(rx);
    }

    #[test]
    fn test_finalize_credits_rewards() {
        let keys = sorted_keys(&[1, 2]);
        let addrs = addresses(&keys);
        let config = XdposConfig {
            epoch: 4,
            reward_checkpoint: 4,
            epoch_reward: U256::from(1000u64),
            foundation_wallet: Address::repeat_byte(0xF0),
            ..Default::default()
        };
        let engine = engine_with(config.clone(), EngineHooks::default());
        let (chain, genesis) = seeded_chain(&keys);

        let mut parent = genesis;
        for _ in 1..4 {
            parent = grow(&chain, &parent, &keys, &config, None);
        }
        let checkpoint = grow(&chain, &parent, &keys, &config, None);

        let mut state = MemoryState::default();
        engine.finalize(&chain, &checkpoint, &mut state).unwrap();

        let total: U256 = state.balances.values().copied().sum();
        assert_eq!(total, U256::from(1000u64));
        assert_eq!(
            state.balances.get(&config.foundation_wallet).copied(),
            Some(U256::from(100u64))
        );
        // both signers sealed at least one block in the epoch
        assert!(state.balances.contains_key(&addrs[0]));
        assert!(state.balances.contains_key(&addrs[1]));
    }

    #[test]
    fn test_snapshot_persists_at_gap_points() {
        let keys = sorted_keys(&[1, 2, 3]);
        let config = XdposConfig {
            epoch: 4,
            gap: 2,
            ..Default::default()
        };
        let db = Arc::new(MemorySnapshotStore::default());
        let engine = Arc::new(XdPoS::new(config.clone(), db.clone(), EngineHooks::default()));
        let (chain, genesis) = seeded_chain(&keys);

        let block1 = grow(&chain, &genesis, &keys, &config, None);
        let block2 = grow(&chain, &block1, &keys, &config, None);
        engine.verify_header(&chain, &block2, &[]).unwrap();
        engine.snapshot(&chain, 2, block2.hash(), &[]).unwrap();

        // (2 + 2) % 4 == 0: the snapshot at block 2 is persisted
        assert!(Snapshot::load(&*db, block2.hash()).is_some());
        assert!(Snapshot::load(&*db, block1.hash()).is_none());

        // a fresh engine over the same store resumes from the blob
        let resumed = Arc::new(XdPoS::new(config, db.clone(), EngineHooks::default()));
        let snap = resumed.snapshot(&chain, 2, block2.hash(), &[]).unwrap();
        assert_eq!(snap.number, 2);
    }
}
