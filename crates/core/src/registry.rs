//! Registry of in-flight liquidation tasks.
//!
//! The Monitor spawns one task per bite. The registry owns those tasks so
//! they can be reaped while the loop runs and drained at shutdown, and keeps
//! a record per cup that any caller can read without touching the tasks.

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use bitebot_chain::CupId;

use crate::position::LiquidationStatus;

/// What is known about a bite started by the Monitor.
#[derive(Debug, Clone)]
pub struct LiquidationRecord {
    pub id: CupId,
    pub status: LiquidationStatus,
    pub tx: Option<B256>,
    /// Last error reported for this bite, if any
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Owns liquidation tasks and their records.
#[derive(Default)]
pub struct LiquidationRegistry {
    records: DashMap<CupId, LiquidationRecord>,
    tasks: Mutex<JoinSet<CupId>>,
}

impl LiquidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the liquidation task for `id`.
    ///
    /// Returns false without spawning if a record for `id` already exists.
    pub fn spawn<F>(&self, id: CupId, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let now = Utc::now();
        match self.records.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(LiquidationRecord {
                    id,
                    status: LiquidationStatus::NotStarted,
                    tx: None,
                    error: None,
                    started_at: now,
                    updated_at: now,
                });
            }
        }

        self.tasks.lock().spawn(async move {
            task.await;
            id
        });
        true
    }

    /// Advance the status of a record.
    pub fn update(&self, id: CupId, status: LiquidationStatus, tx: Option<B256>) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.status = status;
            if tx.is_some() {
                record.tx = tx;
            }
            record.updated_at = Utc::now();
        }
    }

    /// Mark a bite as failed.
    pub fn fail(&self, id: CupId, reason: impl Into<String>) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.status = LiquidationStatus::Failed;
            record.error = Some(reason.into());
            record.updated_at = Utc::now();
        }
    }

    /// Attach an error without changing the status.
    pub fn note(&self, id: CupId, reason: impl Into<String>) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.error = Some(reason.into());
            record.updated_at = Utc::now();
        }
    }

    pub fn get(&self, id: CupId) -> Option<LiquidationRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// All records, ordered by id.
    pub fn records(&self) -> Vec<LiquidationRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Tasks spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Collect tasks that have already completed.
    pub fn reap(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let mut reaped = 0;
        while let Some(result) = tasks.try_join_next() {
            log_join(result);
            reaped += 1;
        }
        reaped
    }

    /// Wait for every spawned task.
    ///
    /// With a `grace` period, tasks still running when it elapses are
    /// aborted. Returns the number of aborted tasks.
    pub async fn drain(&self, grace: Option<Duration>) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return 0;
        }
        debug!(in_flight = tasks.len(), "Draining liquidation tasks");

        let join_all = async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        };

        match grace {
            None => {
                join_all.await;
                0
            }
            Some(grace) => {
                if tokio::time::timeout(grace, join_all).await.is_ok() {
                    return 0;
                }
                let aborted = tasks.len();
                warn!(aborted = aborted, "Shutdown grace period elapsed, aborting liquidation tasks");
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                aborted
            }
        }
    }
}

fn log_join(result: Result<CupId, tokio::task::JoinError>) {
    match result {
        Ok(id) => debug!(cup = %id, "Liquidation task finished"),
        Err(e) if e.is_cancelled() => debug!("Liquidation task aborted"),
        Err(e) => error!(error = %e, "Liquidation task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::id;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_spawn_once_per_cup() {
        let registry = LiquidationRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            registry.spawn(id(4), async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(registry.drain(None).await, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(registry.records().len(), 1);
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_record_updates() {
        let registry = LiquidationRegistry::new();
        registry.spawn(id(1), async {});
        registry.spawn(id(2), async {});

        registry.update(id(1), LiquidationStatus::Submitted, Some(B256::repeat_byte(1)));
        registry.update(id(1), LiquidationStatus::Mined, None);
        registry.fail(id(2), "reverted");

        let one = registry.get(id(1)).unwrap();
        assert_eq!(one.status, LiquidationStatus::Mined);
        assert_eq!(one.tx, Some(B256::repeat_byte(1)));
        assert!(one.updated_at >= one.started_at);

        let two = registry.get(id(2)).unwrap();
        assert_eq!(two.status, LiquidationStatus::Failed);
        assert_eq!(two.error.as_deref(), Some("reverted"));

        registry.note(id(1), "late confirmation");
        assert_eq!(registry.get(id(1)).unwrap().status, LiquidationStatus::Mined);

        registry.drain(None).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_with_grace_aborts_stragglers() {
        let registry = LiquidationRegistry::new();
        registry.spawn(id(1), async {});
        registry.spawn(id(2), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let aborted = registry.drain(Some(Duration::from_secs(5))).await;
        assert_eq!(aborted, 1);
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_reap_collects_finished() {
        let registry = LiquidationRegistry::new();
        registry.spawn(id(1), async {});
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(registry.reap(), 1);
        assert_eq!(registry.in_flight(), 0);
    }
}
