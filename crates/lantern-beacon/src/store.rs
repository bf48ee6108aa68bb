//! The light-client store and its state machine.
//!
//! The store is created from a bootstrap matching a caller-supplied
//! checkpoint root and then mutated only by updates that passed
//! verification, applied in signature-slot order.

use tracing::warn;

use crate::config::LightClientConfig;
use crate::fork::ForkSchedule;
use crate::types::*;
use crate::verify::{
    hash_tree_root_header, verify_bootstrap_committee_proof, verify_generic_update,
    VerifyContext, VerifyError,
};

/// Verified light-client state: the finalized and optimistic heads, the
/// committees needed to verify the next updates, and participation
/// high-water marks for the previous and current periods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightClientStore {
    pub finalized_header: LightClientHeader,
    pub current_sync_committee: SyncCommittee,
    pub next_sync_committee: Option<SyncCommittee>,
    pub optimistic_header: LightClientHeader,
    pub previous_max_active_participants: u64,
    pub current_max_active_participants: u64,
}

impl LightClientStore {
    /// Build a store from a bootstrap anchored at `checkpoint_root`.
    ///
    /// The bootstrap header must hash to the checkpoint root, must not be
    /// older than the configured maximum (fatal only under
    /// `strict_checkpoint_age`), and must carry a valid current-committee
    /// proof.
    pub fn bootstrap(
        schedule: &ForkSchedule,
        config: &LightClientConfig,
        checkpoint_root: &[u8; 32],
        bootstrap: &LightClientBootstrap,
        now_unix: u64,
    ) -> Result<Self, VerifyError> {
        if hash_tree_root_header(&bootstrap.header.beacon) != *checkpoint_root {
            return Err(VerifyError::InvalidBootstrapHeader);
        }

        let checkpoint_time = schedule.slot_start_time(bootstrap.header.beacon.slot);
        let age = now_unix.saturating_sub(checkpoint_time);
        if age > config.max_checkpoint_age {
            if config.strict_checkpoint_age {
                return Err(VerifyError::CheckpointTooOld {
                    age,
                    max: config.max_checkpoint_age,
                });
            }
            warn!(age, max = config.max_checkpoint_age, "checkpoint is stale");
        }

        bootstrap
            .current_sync_committee
            .validate()
            .map_err(|e| VerifyError::Bls(e.to_string()))?;
        verify_bootstrap_committee_proof(bootstrap)?;

        Ok(Self {
            finalized_header: bootstrap.header.clone(),
            current_sync_committee: bootstrap.current_sync_committee.clone(),
            next_sync_committee: None,
            optimistic_header: bootstrap.header.clone(),
            previous_max_active_participants: 0,
            current_max_active_participants: 0,
        })
    }

    /// Period of the finalized head.
    pub fn finalized_period(&self) -> u64 {
        slot_to_period(self.finalized_header.beacon.slot)
    }

    /// Period of the optimistic head.
    pub fn optimistic_period(&self) -> u64 {
        slot_to_period(self.optimistic_header.beacon.slot)
    }

    /// The wall-clock period, from the schedule's slot clock.
    pub fn expected_current_period(schedule: &ForkSchedule, now_unix: u64) -> u64 {
        slot_to_period(schedule.slot_at_time(now_unix))
    }

    /// Verification context over the store's committees.
    pub fn verify_context<'a>(
        &'a self,
        schedule: &'a ForkSchedule,
        config: &LightClientConfig,
    ) -> VerifyContext<'a> {
        VerifyContext {
            schedule,
            current_sync_committee: &self.current_sync_committee,
            next_sync_committee: self.next_sync_committee.as_ref(),
            store_period: self.finalized_period(),
            min_participants: config.min_sync_committee_participants,
        }
    }

    /// Verify an update against the store, then apply it.
    pub fn verify_and_apply(
        &mut self,
        schedule: &ForkSchedule,
        config: &LightClientConfig,
        update: &GenericUpdate,
    ) -> Result<(), VerifyError> {
        verify_generic_update(&self.verify_context(schedule, config), update)?;
        self.apply(update);
        Ok(())
    }

    /// Apply a *verified* update. Idempotent: replaying an applied
    /// sequence leaves the store unchanged.
    pub fn apply(&mut self, update: &GenericUpdate) {
        let participants = update.sync_aggregate.num_participants() as u64;
        let store_period = self.finalized_period();
        let update_sig_period = slot_to_period(update.signature_slot);
        if update_sig_period == store_period + 1 {
            self.previous_max_active_participants = self.current_max_active_participants;
            self.current_max_active_participants = 0;
        }
        self.current_max_active_participants =
            self.current_max_active_participants.max(participants);

        // Optimistic head moves on every newer attested header.
        if update.attested_header.beacon.slot > self.optimistic_header.beacon.slot {
            self.optimistic_header = update.attested_header.clone();
        }

        // Finalized head moves only behind a finality proof; a period-
        // crossing update rotates the committees.
        if let Some(finalized) = &update.finalized_header {
            if finalized.beacon.slot > self.finalized_header.beacon.slot {
                let update_period = slot_to_period(finalized.beacon.slot);
                if update_period > store_period {
                    if let Some(next) = self.next_sync_committee.take() {
                        self.current_sync_committee = next;
                    }
                }
                self.finalized_header = finalized.clone();
            }
        }

        if self.next_sync_committee.is_none() {
            self.next_sync_committee = update.next_sync_committee.clone();
        }
    }

    /// Apply a batch of verified updates in signature-slot order.
    pub fn apply_sorted(&mut self, updates: &mut [GenericUpdate]) {
        updates.sort_by_key(|u| u.signature_slot);
        for update in updates.iter() {
            self.apply(update);
        }
    }

    /// True once the store has any verified participation this period.
    pub fn safety_threshold(&self) -> u64 {
        self.previous_max_active_participants
            .max(self.current_max_active_participants)
            / 2
    }
}
