//! Epoch accounting: signature counts, misbehaviour penalties, and reward
//! distribution at checkpoints.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::{ChainReader, StateBackend};
use crate::config::XdposConfig;
use crate::error::EngineError;
use crate::header::{Header, SigCache};

/// Per-checkpoint reward breakdown, persisted as JSON when a reward
/// folder is configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSummary {
    pub block: u64,
    pub total_reward: U256,
    pub masternode_reward: U256,
    pub foundation_reward: U256,
    pub total_signs: u64,
    pub masternodes: HashMap<Address, U256>,
}

/// Count seals per creator over the open interval
/// `(epoch_start, epoch_end)`.
pub fn sign_counts(
    chain: &dyn ChainReader,
    sigcache: &SigCache,
    epoch_start: u64,
    epoch_end: u64,
) -> Result<HashMap<Address, u64>, EngineError> {
    let mut counts = HashMap::new();
    for number in epoch_start + 1..epoch_end {
        let header = chain
            .header_by_number(number)
            .ok_or(EngineError::UnknownBlock)?;
        let creator = sigcache.recover(&header)?;
        *counts.entry(creator).or_insert(0) += 1;
    }
    Ok(counts)
}

/// The masternode set of the epoch ending at `checkpoint_number`, read
/// from the epoch-start checkpoint header.
pub fn epoch_masternodes(
    chain: &dyn ChainReader,
    config: &XdposConfig,
    checkpoint_number: u64,
) -> Result<Vec<Address>, EngineError> {
    let epoch_start = checkpoint_number.saturating_sub(config.epoch);
    let header = chain
        .header_by_number(epoch_start)
        .ok_or(EngineError::UnknownBlock)?;
    header.checkpoint_signers()
}

/// Masternodes that signed fewer than the configured minimum over the
/// epoch ending at `checkpoint_number`.
pub fn penalties(
    chain: &dyn ChainReader,
    config: &XdposConfig,
    sigcache: &SigCache,
    checkpoint_number: u64,
) -> Result<Vec<Address>, EngineError> {
    let masternodes = epoch_masternodes(chain, config, checkpoint_number)?;
    let epoch_start = checkpoint_number.saturating_sub(config.epoch);
    let counts = sign_counts(chain, sigcache, epoch_start, checkpoint_number)?;

    let penalized: Vec<Address> = masternodes
        .into_iter()
        .filter(|mn| counts.get(mn).copied().unwrap_or(0) < config.minimum_miner_block_per_epoch)
        .collect();
    if !penalized.is_empty() {
        debug!(
            checkpoint = checkpoint_number,
            penalized = penalized.len(),
            "masternodes below the signing minimum"
        );
    }
    Ok(penalized)
}

/// Penalties in force at `checkpoint_number`: the current epoch's plus
/// those of up to `limit_penalty_epoch` prior epochs.
pub fn penalties_with_carryover(
    chain: &dyn ChainReader,
    config: &XdposConfig,
    sigcache: &SigCache,
    checkpoint_number: u64,
) -> Result<Vec<Address>, EngineError> {
    let mut all = Vec::new();
    for back in 0..=config.limit_penalty_epoch {
        let offset = back * config.epoch;
        if offset >= checkpoint_number {
            break;
        }
        for penalized in penalties(chain, config, sigcache, checkpoint_number - offset)? {
            if !all.contains(&penalized) {
                all.push(penalized);
            }
        }
    }
    Ok(all)
}

/// Split the checkpoint reward proportionally to signature counts.
pub fn compute_rewards(
    chain: &dyn ChainReader,
    config: &XdposConfig,
    sigcache: &SigCache,
    checkpoint_number: u64,
) -> Result<RewardSummary, EngineError> {
    let epoch_start = checkpoint_number.saturating_sub(config.reward_checkpoint);
    let counts = sign_counts(chain, sigcache, epoch_start, checkpoint_number)?;
    let total_signs: u64 = counts.values().sum();

    let total_reward = config.epoch_reward;
    let masternode_reward = total_reward * U256::from(config.reward_master_percent) / U256::from(100);
    let foundation_reward =
        total_reward * U256::from(config.reward_foundation_percent) / U256::from(100);

    let mut masternodes = HashMap::new();
    if total_signs > 0 {
        for (address, signs) in &counts {
            let share = masternode_reward * U256::from(*signs) / U256::from(total_signs);
            masternodes.insert(*address, share);
        }
    }

    Ok(RewardSummary {
        block: checkpoint_number,
        total_reward,
        masternode_reward,
        foundation_reward,
        total_signs,
        masternodes,
    })
}

/// Credit a computed summary through the host's state capability.
pub fn apply_rewards(
    summary: &RewardSummary,
    config: &XdposConfig,
    state: &mut dyn StateBackend,
) {
    for (address, amount) in &summary.masternodes {
        state.add_balance(*address, *amount, "masternode reward");
    }
    if summary.foundation_reward > U256::ZERO {
        state.add_balance(
            config.foundation_wallet,
            summary.foundation_reward,
            "foundation reward",
        );
    }
    info!(
        block = summary.block,
        masternodes = summary.masternodes.len(),
        "rewards credited"
    );
}

/// Write the summary as JSON, atomically: temp file in the same folder,
/// then rename over the final name.
pub fn persist_summary(folder: &Path, summary: &RewardSummary) -> Result<(), EngineError> {
    fs::create_dir_all(folder).map_err(|e| EngineError::Storage(e.to_string()))?;
    let final_path = folder.join(format!("reward-{}.json", summary.block));
    let tmp_path = folder.join(format!(".reward-{}.json.tmp", summary.block));
    let blob =
        serde_json::to_vec_pretty(summary).map_err(|e| EngineError::Storage(e.to_string()))?;
    fs::write(&tmp_path, blob).map_err(|e| EngineError::Storage(e.to_string()))?;
    fs::rename(&tmp_path, &final_path).map_err(|e| EngineError::Storage(e.to_string()))?;
    Ok(())
}

/// Helper the engine and tests share: does a reward checkpoint land here?
pub fn is_reward_checkpoint(config: &XdposConfig, number: u64) -> bool {
    number > 0 && number % config.reward_checkpoint == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{
        build_header, genesis_with_signers, sorted_keys, MemoryState, MockChain,
    };
    use crate::header::tests::address_of;

    fn config() -> XdposConfig {
        XdposConfig {
            epoch: 4,
            reward_checkpoint: 4,
            epoch_reward: U256::from(1000u64),
            foundation_wallet: Address::repeat_byte(0xF0),
            ..Default::default()
        }
    }

    /// Blocks 1..=3 all signed by the first key, like scenario four.
    fn lazy_chain(config: &XdposConfig) -> (MockChain, Vec<Address>) {
        let keys = sorted_keys(&[1, 2, 3, 4]);
        let addrs: Vec<Address> = keys.iter().map(address_of).collect();
        let chain = MockChain::new();
        let genesis = genesis_with_signers(&addrs);
        let mut parent = genesis.clone();
        chain.insert(genesis);
        for _ in 1..config.epoch {
            let header = build_header(&parent, &keys[0], &addrs, config.epoch, config.period, false);
            chain.insert(header.clone());
            parent = header;
        }
        (chain, addrs)
    }

    #[test]
    fn test_sign_counts_over_open_interval() {
        let config = config();
        let (chain, addrs) = lazy_chain(&config);
        let sigcache = SigCache::new(16);
        let counts = sign_counts(&chain, &sigcache, 0, 4).unwrap();
        assert_eq!(counts.get(&addrs[0]).copied(), Some(3));
        assert_eq!(counts.len(), 1);
    }

    #[test]
    fn test_penalties_flag_silent_masternodes() {
        let config = config();
        let (chain, addrs) = lazy_chain(&config);
        let sigcache = SigCache::new(16);
        let mut penalized = penalties(&chain, &config, &sigcache, 4).unwrap();
        penalized.sort();
        let mut expected = addrs[1..].to_vec();
        expected.sort();
        assert_eq!(penalized, expected);
    }

    #[test]
    fn test_penalty_carryover_is_bounded() {
        let config = config();
        let (chain, _) = lazy_chain(&config);
        let sigcache = SigCache::new(16);
        // only one epoch exists; carryover stops at the chain head
        let carried = penalties_with_carryover(&chain, &config, &sigcache, 4).unwrap();
        assert_eq!(carried.len(), 3);
    }

    #[test]
    fn test_reward_split() {
        let config = config();
        let (chain, addrs) = lazy_chain(&config);
        let sigcache = SigCache::new(16);
        let summary = compute_rewards(&chain, &config, &sigcache, 4).unwrap();

        assert_eq!(summary.total_signs, 3);
        assert_eq!(summary.masternode_reward, U256::from(900u64));
        assert_eq!(summary.foundation_reward, U256::from(100u64));
        // the only signer takes the whole masternode share
        assert_eq!(summary.masternodes.len(), 1);
        assert_eq!(
            summary.masternodes.get(&addrs[0]).copied(),
            Some(U256::from(900u64))
        );

        let mut state = MemoryState::default();
        apply_rewards(&summary, &config, &mut state);
        assert_eq!(state.balances.get(&addrs[0]).copied(), Some(U256::from(900u64)));
        assert_eq!(
            state.balances.get(&config.foundation_wallet).copied(),
            Some(U256::from(100u64))
        );
    }

    #[test]
    fn test_reward_split_proportional() {
        let config = config();
        let keys = sorted_keys(&[1, 2]);
        let addrs: Vec<Address> = keys.iter().map(address_of).collect();
        let chain = MockChain::new();
        let genesis = genesis_with_signers(&addrs);
        let mut parent = genesis.clone();
        chain.insert(genesis);
        // blocks 1 and 3 by the first signer, block 2 by the second
        for key in [&keys[0], &keys[1], &keys[0]] {
            let header = build_header(&parent, key, &addrs, config.epoch, config.period, false);
            chain.insert(header.clone());
            parent = header;
        }
        let sigcache = SigCache::new(16);
        let summary = compute_rewards(&chain, &config, &sigcache, 4).unwrap();
        assert_eq!(summary.total_signs, 3);
        assert_eq!(
            summary.masternodes.get(&addrs[0]).copied(),
            Some(U256::from(600u64))
        );
        assert_eq!(
            summary.masternodes.get(&addrs[1]).copied(),
            Some(U256::from(300u64))
        );
    }

    #[test]
    fn test_summary_persisted_atomically() {
        let config = config();
        let (chain, _) = lazy_chain(&config);
        let sigcache = SigCache::new(16);
        let summary = compute_rewards(&chain, &config, &sigcache, 4).unwrap();

        let dir = tempfile::tempdir().unwrap();
        persist_summary(dir.path(), &summary).unwrap();

        let blob = fs::read(dir.path().join("reward-4.json")).unwrap();
        let loaded: RewardSummary = serde_json::from_slice(&blob).unwrap();
        assert_eq!(loaded, summary);
        // no temp file left behind
        assert!(!dir.path().join(".reward-4.json.tmp").exists());
    }
}
