//! Connection registry: one record per robot identity for the life of the
//! process.
//!
//! The map itself sits behind an `RwLock` and is only write-locked to insert
//! a new robot. Each record has its own `Mutex`, so workers for different
//! robots never contend and a record is never observed half-updated. No
//! lock is held across socket I/O: downlink sends only enqueue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use fleet_protocol::RobotIdentity;

use crate::record::{RobotRecord, RobotView};

pub type SharedRecord = Arc<Mutex<RobotRecord>>;

/// Registry of every robot that has ever contacted the coordinator.
///
/// Records are never evicted: a silent robot is demoted to `Unknown` and
/// its record is reused when it reconnects. Iteration order is by address,
/// which makes candidate selection reproducible.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    records: RwLock<BTreeMap<RobotIdentity, SharedRecord>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the record for `identity`, creating an `Unknown` one on first
    /// contact.
    pub async fn get_or_create(&self, identity: RobotIdentity) -> SharedRecord {
        if let Some(record) = self.records.read().await.get(&identity) {
            return Arc::clone(record);
        }

        let mut records = self.records.write().await;
        let record = records.entry(identity).or_insert_with(|| {
            tracing::info!(robot = %identity, "Tracking new robot");
            Arc::new(Mutex::new(RobotRecord::new(identity, Instant::now())))
        });
        Arc::clone(record)
    }

    pub async fn get(&self, identity: RobotIdentity) -> Option<SharedRecord> {
        self.records.read().await.get(&identity).cloned()
    }

    /// Run `f` against the record for `identity` while holding its lock.
    pub async fn update<R>(
        &self,
        identity: RobotIdentity,
        f: impl FnOnce(&mut RobotRecord) -> R,
    ) -> R {
        let record = self.get_or_create(identity).await;
        let mut guard = record.lock().await;
        f(&mut guard)
    }

    /// Handles to every record, in registry order.
    pub async fn records(&self) -> Vec<(RobotIdentity, SharedRecord)> {
        self.records
            .read()
            .await
            .iter()
            .map(|(id, rec)| (*id, Arc::clone(rec)))
            .collect()
    }

    /// Point-in-time copy of every record, in registry order.
    ///
    /// Each record is copied under its own lock; the copy as a whole is not
    /// a single atomic cut across robots.
    pub async fn snapshot(&self) -> Vec<RobotView> {
        let mut views = Vec::new();
        for (_, record) in self.records().await {
            views.push(record.lock().await.view());
        }
        views
    }

    pub async fn identities(&self) -> Vec<RobotIdentity> {
        self.records.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
