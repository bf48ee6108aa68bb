use std::path::PathBuf;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Engine parameters, fixed at construction. Fork activation lives here
/// too; there is no global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct XdposConfig {
    /// Blocks per epoch; the signer set may rotate at each boundary.
    pub epoch: u64,
    /// Minimum seconds between consecutive blocks.
    pub period: u64,
    /// Blocks before an epoch boundary at which next-epoch preparation
    /// happens; also the snapshot persistence cadence.
    pub gap: u64,
    /// Cadence of reward distribution, in blocks.
    pub reward_checkpoint: u64,
    /// Total reward minted per reward checkpoint.
    pub epoch_reward: U256,
    /// Receiver of the foundation share.
    pub foundation_wallet: Address,
    pub reward_master_percent: u64,
    pub reward_voter_percent: u64,
    pub reward_foundation_percent: u64,
    /// Masternodes signing fewer blocks than this per epoch are penalized.
    pub minimum_miner_block_per_epoch: u64,
    /// How many epochs a penalty stays in force.
    pub limit_penalty_epoch: u64,
    /// When set, a JSON summary of every reward checkpoint is written here.
    pub store_reward_folder: Option<PathBuf>,
    /// First block handled by the v2 engine; `None` keeps v1 at every
    /// height.
    pub switch_block: Option<u64>,
    /// Clock skew tolerance for future-dated headers, in seconds.
    pub allowed_future_block_time: u64,
    /// One wiggle unit of out-of-turn sealing delay, in milliseconds.
    pub wiggle_time_millis: u64,
}

impl Default for XdposConfig {
    fn default() -> Self {
        Self {
            epoch: 900,
            period: 2,
            gap: 450,
            reward_checkpoint: 900,
            epoch_reward: U256::from(250u64) * U256::from(10u64).pow(U256::from(18u64)),
            foundation_wallet: Address::ZERO,
            reward_master_percent: 90,
            reward_voter_percent: 0,
            reward_foundation_percent: 10,
            minimum_miner_block_per_epoch: 1,
            limit_penalty_epoch: 4,
            store_reward_folder: None,
            switch_block: None,
            allowed_future_block_time: 15,
            wiggle_time_millis: 500,
        }
    }
}

impl XdposConfig {
    pub fn is_checkpoint(&self, number: u64) -> bool {
        number % self.epoch == 0
    }

    /// Snapshots persist at every block with `(number + gap) % epoch == 0`.
    pub fn is_snapshot_point(&self, number: u64) -> bool {
        (number + self.gap) % self.epoch == 0
    }

    /// True when the v2 engine handles `number`.
    pub fn is_v2(&self, number: u64) -> bool {
        matches!(self.switch_block, Some(switch) if number >= switch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = XdposConfig::default();
        assert_eq!(config.epoch, 900);
        assert_eq!(config.period, 2);
        assert_eq!(config.gap, 450);
        assert_eq!(config.reward_checkpoint, config.epoch);
        assert_eq!(config.limit_penalty_epoch, 4);
        assert_eq!(config.minimum_miner_block_per_epoch, 1);
        assert_eq!(
            config.reward_master_percent + config.reward_foundation_percent,
            100
        );
    }

    #[test]
    fn test_checkpoint_and_snapshot_points() {
        let config = XdposConfig::default();
        assert!(config.is_checkpoint(0));
        assert!(config.is_checkpoint(900));
        assert!(!config.is_checkpoint(901));
        assert!(config.is_snapshot_point(450));
        assert!(config.is_snapshot_point(1350));
        assert!(!config.is_snapshot_point(900));
    }

    #[test]
    fn test_v2_switch() {
        let mut config = XdposConfig::default();
        assert!(!config.is_v2(u64::MAX));
        config.switch_block = Some(1800);
        assert!(!config.is_v2(1799));
        assert!(config.is_v2(1800));
    }
}
