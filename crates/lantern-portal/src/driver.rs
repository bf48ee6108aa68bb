//! Cooperative driver advancing the light-client store.
//!
//! Cadence is derived from slot time: a new optimistic update every slot,
//! a finality update at epoch boundaries, and a range backfill whenever
//! the store's period lags the wall clock. Every wait is cancellable.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lantern_beacon::codec::{
    decode_forked_bootstrap, decode_forked_finality_update, decode_forked_optimistic_update,
    decode_update_range,
};
use lantern_beacon::fork::ForkSchedule;
use lantern_beacon::store::LightClientStore;
use lantern_beacon::types::{
    slot_to_period, GenericUpdate, MAX_REQUEST_LIGHT_CLIENT_UPDATES, SECONDS_PER_SLOT,
    SLOTS_PER_EPOCH,
};
use lantern_beacon::LightClientConfig;

use crate::content_key::BeaconContentKey;
use crate::network::BeaconNetwork;

pub type SharedStore = Arc<RwLock<Option<LightClientStore>>>;

pub struct LightClientDriver {
    schedule: ForkSchedule,
    config: LightClientConfig,
    network: Arc<BeaconNetwork>,
    store: SharedStore,
}

impl LightClientDriver {
    pub fn new(
        schedule: ForkSchedule,
        config: LightClientConfig,
        network: Arc<BeaconNetwork>,
    ) -> Self {
        Self {
            schedule,
            config,
            network,
            store: Arc::new(RwLock::new(None)),
        }
    }

    /// The store handle shared with the query paths. Writers are
    /// serialized; readers always observe a consistent head tuple.
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Fetch the bootstrap for `checkpoint_root` and initialize the store.
    pub async fn bootstrap(&self, checkpoint_root: [u8; 32], now_unix: u64) -> Result<()> {
        let key = BeaconContentKey::Bootstrap {
            block_hash: checkpoint_root,
        };
        let bytes = self
            .network
            .get_content(&key)
            .await
            .context("fetching bootstrap")?;
        let (fork, bootstrap) = decode_forked_bootstrap(&self.schedule, &bytes)?;
        let store = LightClientStore::bootstrap(
            &self.schedule,
            &self.config,
            &checkpoint_root,
            &bootstrap,
            now_unix,
        )?;
        info!(
            slot = store.finalized_header.beacon.slot,
            ?fork,
            "light client bootstrapped"
        );
        *self.store.write() = Some(store);
        Ok(())
    }

    /// One driver pass: backfill lagging periods, refresh the optimistic
    /// head, and refresh finality at epoch boundaries.
    pub async fn sync_once(&self, now_unix: u64) -> Result<()> {
        let (finalized_period, finalized_slot, optimistic_slot) = {
            let guard = self.store.read();
            let store = guard.as_ref().ok_or_else(|| anyhow!("not bootstrapped"))?;
            (
                store.finalized_period(),
                store.finalized_header.beacon.slot,
                store.optimistic_header.beacon.slot,
            )
        };

        let current_slot = self.schedule.slot_at_time(now_unix);
        let expected_period = slot_to_period(current_slot);

        if finalized_period < expected_period {
            self.backfill(finalized_period, expected_period).await?;
        }

        self.fetch_optimistic(optimistic_slot).await;

        if current_slot % SLOTS_PER_EPOCH == 0 {
            self.fetch_finality(finalized_slot).await;
        }
        Ok(())
    }

    async fn backfill(&self, finalized_period: u64, expected_period: u64) -> Result<()> {
        let count = (expected_period - finalized_period + 1).min(MAX_REQUEST_LIGHT_CLIENT_UPDATES);
        let key = BeaconContentKey::UpdateRange {
            start_period: finalized_period,
            count,
        };
        let bytes = self
            .network
            .get_content(&key)
            .await
            .context("fetching update range")?;
        let updates = decode_update_range(&self.schedule, &bytes)?;
        let mut generic: Vec<GenericUpdate> =
            updates.iter().map(|(_, u)| GenericUpdate::from(u)).collect();
        generic.sort_by_key(|u| u.signature_slot);

        let mut guard = self.store.write();
        let store = guard.as_mut().ok_or_else(|| anyhow!("not bootstrapped"))?;
        for update in &generic {
            if let Err(err) = store.verify_and_apply(&self.schedule, &self.config, update) {
                warn!(signature_slot = update.signature_slot, %err, "range update rejected");
            }
        }
        info!(
            period = store.finalized_period(),
            slot = store.finalized_header.beacon.slot,
            "backfill finished"
        );
        Ok(())
    }

    async fn fetch_optimistic(&self, optimistic_slot: u64) {
        let key = BeaconContentKey::OptimisticUpdate {
            optimistic_slot: optimistic_slot + 1,
        };
        let bytes = match self.network.get_content(&key).await {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!("no newer optimistic update");
                return;
            }
        };
        let decoded = match decode_forked_optimistic_update(&self.schedule, &bytes) {
            Ok((_, update)) => update,
            Err(err) => {
                warn!(%err, "bad optimistic update");
                return;
            }
        };
        let update = GenericUpdate::from(&decoded);
        let mut guard = self.store.write();
        if let Some(store) = guard.as_mut() {
            if let Err(err) = store.verify_and_apply(&self.schedule, &self.config, &update) {
                warn!(%err, "optimistic update rejected");
            }
        }
    }

    async fn fetch_finality(&self, finalized_slot: u64) {
        let key = BeaconContentKey::FinalityUpdate {
            finalized_slot: finalized_slot + 1,
        };
        let bytes = match self.network.get_content(&key).await {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!("no newer finality update");
                return;
            }
        };
        let decoded = match decode_forked_finality_update(&self.schedule, &bytes) {
            Ok((_, update)) => update,
            Err(err) => {
                warn!(%err, "bad finality update");
                return;
            }
        };
        let update = GenericUpdate::from(&decoded);
        let mut guard = self.store.write();
        if let Some(store) = guard.as_mut() {
            if let Err(err) = store.verify_and_apply(&self.schedule, &self.config, &update) {
                warn!(%err, "finality update rejected");
            }
        }
    }

    /// Run the driver until shutdown, one pass per slot.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(SECONDS_PER_SLOT));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        let now = unix_now();
                        if let Err(err) = self.sync_once(now).await {
                            debug!(%err, "driver pass failed");
                        }
                    }
                }
            }
            info!("light client driver stopped");
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
