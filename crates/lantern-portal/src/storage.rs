//! Bounded persistence for the five beacon content types.
//!
//! Content-addressed rows (bootstraps, historical summaries) live in the
//! `beacon` table; per-period updates live in `lc_update` keyed by their
//! sync-committee period. Finality and optimistic updates are memory-only,
//! latest wins. Over capacity, the rows farthest from the local node id by
//! XOR distance are evicted first; ties fall to the oldest write.

use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use lantern_beacon::codec::{
    decode_forked_finality_update, decode_forked_optimistic_update, decode_update_range,
    DecodeError, FORKED_UPDATE_SSZ_LEN,
};
use lantern_beacon::fork::ForkSchedule;
use lantern_beacon::types::{
    LightClientUpdate, MAX_REQUEST_LIGHT_CLIENT_UPDATES, SYNC_COMMITTEE_SIZE,
};

use crate::content_key::BeaconContentKey;
use crate::distance::{xor_distance, Distance};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("content not found")]
    NotFound,
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Storage sizing and identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Capacity of the content-addressed table, in megabytes.
    pub storage_capacity_mb: u64,
    /// Local node id; eviction distance is measured from here.
    pub node_id: [u8; 32],
    /// On-disk database path; in-memory when unset.
    pub db_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_capacity_mb: 100,
            node_id: [0u8; 32],
            db_path: None,
        }
    }
}

/// Score of a stored period update. Participation counts, doubled when the
/// update also advances finality with a supermajority; range queries serve
/// the best-scored update per period.
pub fn update_score(update: &LightClientUpdate) -> u64 {
    let participants = update.sync_aggregate.num_participants() as u64;
    let supermajority = participants * 3 >= SYNC_COMMITTEE_SIZE as u64 * 2;
    if !update.finalized_header.is_empty() && supermajority {
        participants * 2
    } else {
        participants
    }
}

pub struct BeaconStorage {
    conn: Mutex<Connection>,
    schedule: ForkSchedule,
    node_id: [u8; 32],
    capacity_bytes: u64,
    /// (finalized_slot, raw value), latest wins.
    finality: RwLock<Option<(u64, Vec<u8>)>>,
    /// (attested_slot, raw value), latest wins.
    optimistic: RwLock<Option<(u64, Vec<u8>)>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS beacon (
    content_id BLOB PRIMARY KEY,
    content_key BLOB NOT NULL,
    content_value BLOB NOT NULL,
    content_size INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS beacon_content_size_idx ON beacon (content_size);
CREATE TABLE IF NOT EXISTS lc_update (
    period INTEGER PRIMARY KEY,
    value BLOB NOT NULL,
    score INTEGER NOT NULL,
    update_size INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS lc_update_update_size_idx ON lc_update (update_size);
";

impl BeaconStorage {
    pub fn new(config: StorageConfig, schedule: ForkSchedule) -> Result<Self, StorageError> {
        Self::with_capacity_bytes(
            config.node_id,
            config.storage_capacity_mb * 1024 * 1024,
            config.db_path,
            schedule,
        )
    }

    pub fn with_capacity_bytes(
        node_id: [u8; 32],
        capacity_bytes: u64,
        db_path: Option<PathBuf>,
        schedule: ForkSchedule,
    ) -> Result<Self, StorageError> {
        let conn = match db_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            schedule,
            node_id,
            capacity_bytes,
            finality: RwLock::new(None),
            optimistic: RwLock::new(None),
        })
    }

    /// Store a validated content value under its key. Never fails for
    /// being full; eviction runs synchronously after the write.
    pub fn store(&self, key: &BeaconContentKey, value: &[u8]) -> Result<(), StorageError> {
        match key {
            BeaconContentKey::Bootstrap { .. } | BeaconContentKey::HistoricalSummaries { .. } => {
                let conn = self.conn.lock();
                conn.execute(
                    "INSERT OR REPLACE INTO beacon \
                     (content_id, content_key, content_value, content_size) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        key.content_id().to_vec(),
                        key.encode(),
                        value,
                        value.len() as i64
                    ],
                )?;
                self.prune(&conn)?;
                Ok(())
            }
            BeaconContentKey::UpdateRange { start_period, .. } => {
                let updates = decode_update_range(&self.schedule, value)?;
                let conn = self.conn.lock();
                for (i, chunk) in value.chunks(FORKED_UPDATE_SSZ_LEN).enumerate() {
                    let period = start_period + i as u64;
                    let score = update_score(&updates[i].1);
                    conn.execute(
                        "INSERT INTO lc_update (period, value, score, update_size) \
                         VALUES (?1, ?2, ?3, ?4) \
                         ON CONFLICT(period) DO UPDATE SET \
                             value = excluded.value, \
                             score = excluded.score, \
                             update_size = excluded.update_size \
                         WHERE excluded.score > lc_update.score",
                        params![period as i64, chunk, score as i64, chunk.len() as i64],
                    )?;
                }
                Ok(())
            }
            BeaconContentKey::FinalityUpdate { .. } => {
                let (_, update) = decode_forked_finality_update(&self.schedule, value)?;
                let slot = update.finalized_header.beacon.slot;
                let mut latest = self.finality.write();
                if latest.as_ref().map_or(true, |(stored, _)| slot > *stored) {
                    *latest = Some((slot, value.to_vec()));
                }
                Ok(())
            }
            BeaconContentKey::OptimisticUpdate { .. } => {
                let (_, update) = decode_forked_optimistic_update(&self.schedule, value)?;
                let slot = update.attested_header.beacon.slot;
                let mut latest = self.optimistic.write();
                if latest.as_ref().map_or(true, |(stored, _)| slot > *stored) {
                    *latest = Some((slot, value.to_vec()));
                }
                Ok(())
            }
        }
    }

    /// Exact-bytes lookup. A range request with any period missing inside
    /// the span is not found as a whole.
    pub fn get(&self, key: &BeaconContentKey) -> Result<Vec<u8>, StorageError> {
        match key {
            BeaconContentKey::Bootstrap { .. } | BeaconContentKey::HistoricalSummaries { .. } => {
                let conn = self.conn.lock();
                conn.query_row(
                    "SELECT content_value FROM beacon WHERE content_id = ?1",
                    params![key.content_id().to_vec()],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?
                .ok_or(StorageError::NotFound)
            }
            BeaconContentKey::UpdateRange { start_period, count } => {
                if *count == 0 || *count > MAX_REQUEST_LIGHT_CLIENT_UPDATES {
                    return Err(StorageError::NotFound);
                }
                let conn = self.conn.lock();
                let mut stmt = conn.prepare(
                    "SELECT period, value FROM lc_update \
                     WHERE period >= ?1 AND period < ?2 ORDER BY period",
                )?;
                let rows = stmt
                    .query_map(
                        params![*start_period as i64, (*start_period + *count) as i64],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                if rows.len() as u64 != *count {
                    return Err(StorageError::NotFound);
                }
                let mut out = Vec::with_capacity(rows.len() * FORKED_UPDATE_SSZ_LEN);
                for (_, value) in rows {
                    out.extend_from_slice(&value);
                }
                Ok(out)
            }
            BeaconContentKey::FinalityUpdate { finalized_slot } => self
                .finality
                .read()
                .as_ref()
                .filter(|(stored, _)| *stored >= *finalized_slot)
                .map(|(_, value)| value.clone())
                .ok_or(StorageError::NotFound),
            BeaconContentKey::OptimisticUpdate { optimistic_slot } => self
                .optimistic
                .read()
                .as_ref()
                .filter(|(stored, _)| *stored >= *optimistic_slot)
                .map(|(_, value)| value.clone())
                .ok_or(StorageError::NotFound),
        }
    }

    /// Total bytes in the content-addressed table.
    pub fn content_bytes(&self) -> Result<u64, StorageError> {
        let conn = self.conn.lock();
        let total: i64 =
            conn.query_row("SELECT COALESCE(SUM(content_size), 0) FROM beacon", [], |r| {
                r.get(0)
            })?;
        Ok(total as u64)
    }

    /// Highest period present in the update table, if any.
    pub fn newest_period(&self) -> Result<Option<u64>, StorageError> {
        let conn = self.conn.lock();
        let period: Option<i64> =
            conn.query_row("SELECT MAX(period) FROM lc_update", [], |r| r.get(0))?;
        Ok(period.map(|p| p as u64))
    }

    /// Evict content-addressed rows until the table fits the capacity,
    /// farthest XOR distance first, oldest write first on ties.
    fn prune(&self, conn: &Connection) -> Result<(), StorageError> {
        loop {
            let total: i64 =
                conn.query_row("SELECT COALESCE(SUM(content_size), 0) FROM beacon", [], |r| {
                    r.get(0)
                })?;
            if total as u64 <= self.capacity_bytes {
                return Ok(());
            }

            let mut stmt = conn.prepare("SELECT rowid, content_id FROM beacon")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut victim: Option<(Distance, i64, Vec<u8>)> = None;
            for (rowid, id_bytes) in rows {
                let mut id = [0u8; 32];
                id.copy_from_slice(&id_bytes);
                let distance = xor_distance(&self.node_id, &id);
                let farther = match &victim {
                    None => true,
                    Some((best, best_rowid, _)) => {
                        distance > *best || (distance == *best && rowid < *best_rowid)
                    }
                };
                if farther {
                    victim = Some((distance, rowid, id_bytes));
                }
            }

            match victim {
                Some((distance, _, id)) => {
                    debug!(distance = distance.log2(), "evicting content row");
                    conn.execute("DELETE FROM beacon WHERE content_id = ?1", params![id])?;
                }
                None => return Ok(()),
            }
        }
    }
}
