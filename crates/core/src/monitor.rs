//! Continuous safety polling of the safe population.
//!
//! Each iteration re-checks every monitored cup concurrently. A cup that
//! turns unsafe is moved to processing before its bite is spawned, so later
//! iterations never see it again; it is retired once the bite is final. A
//! cup whose safety can no longer be read is evicted. The loop ends once
//! every cup has been retired, or when cancelled.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use bitebot_chain::{ChainError, ChainService, CupId};

use crate::config::MonitorConfig;
use crate::liquidator::{attach_observers, FailureStage};
use crate::position::{LiquidationStatus, Position, SafetyStatus};
use crate::registry::{LiquidationRecord, LiquidationRegistry};
use crate::working_set::{Removed, RemovalReason, WorkingSets};

/// Why the monitor loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Every monitored cup was liquidated or evicted
    Exhausted,
    /// Shutdown was requested
    Cancelled,
}

/// Counters accumulated over a monitor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub iterations: u64,
    pub checks: u64,
    pub bites: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub exit: MonitorExit,
    pub stats: MonitorStats,
    /// Retired cups in id order
    pub removed: Vec<Removed>,
    /// Bites started by the monitor
    pub liquidations: Vec<LiquidationRecord>,
    pub elapsed: Duration,
}

impl MonitorReport {
    pub fn liquidated(&self) -> Vec<CupId> {
        self.removed
            .iter()
            .filter(|r| matches!(r.reason, RemovalReason::Liquidated { .. }))
            .map(|r| r.position.id)
            .collect()
    }
}

/// Watches safe cups and bites the ones that become unsafe.
///
/// Each run owns a fresh [`LiquidationRegistry`], so one `Monitor` can be run
/// again over a new population.
pub struct Monitor {
    chain: Arc<dyn ChainService>,
    poll_interval: Duration,
    max_concurrent: usize,
    confirmations: u64,
    shutdown_grace: Duration,
}

impl Monitor {
    pub fn new(chain: Arc<dyn ChainService>, config: &MonitorConfig, confirmations: u64) -> Self {
        Self {
            chain,
            poll_interval: config.poll_interval(),
            max_concurrent: config.max_concurrent.max(1),
            confirmations,
            shutdown_grace: config.shutdown_grace(),
        }
    }

    /// Monitor `positions` until exhausted or cancelled.
    pub async fn run(&self, positions: Vec<Position>, cancel: CancellationToken) -> MonitorReport {
        self.run_with(Arc::new(WorkingSets::new(positions)), cancel)
            .await
    }

    /// Same as [`Monitor::run`] over caller-owned working sets.
    #[instrument(skip_all, fields(total = sets.total()))]
    pub async fn run_with(&self, sets: Arc<WorkingSets>, cancel: CancellationToken) -> MonitorReport {
        let start = Instant::now();
        let mut stats = MonitorStats::default();
        let registry = Arc::new(LiquidationRegistry::new());

        info!(
            poll_interval_ms = self.poll_interval.as_millis(),
            "Monitoring {} safe CDPs",
            sets.total()
        );

        let exit = loop {
            registry.reap();

            if sets.is_exhausted() {
                break MonitorExit::Exhausted;
            }
            if cancel.is_cancelled() {
                break MonitorExit::Cancelled;
            }

            stats.iterations += 1;
            let active = sets.active();

            if !active.is_empty() {
                let results = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break MonitorExit::Cancelled,
                    results = self.check_all(active) => results,
                };
                stats.checks += results.len() as u64;

                for (position, result) in results {
                    self.handle_answer(&sets, &registry, position, result, &cancel, &mut stats);
                }
            }

            if sets.is_exhausted() {
                continue;
            }

            let snapshot = sets.snapshot();
            debug!(
                iteration = stats.iterations,
                monitored = snapshot.monitored.len(),
                processing = snapshot.processing.len(),
                removed = snapshot.removed.len(),
                "Monitor iteration complete"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break MonitorExit::Cancelled,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        match exit {
            MonitorExit::Exhausted => {
                info!("No more safe CDPs");
                registry.drain(None).await;
            }
            MonitorExit::Cancelled => {
                info!(
                    in_flight = registry.in_flight(),
                    grace_secs = self.shutdown_grace.as_secs(),
                    "Monitor cancelled, draining in-flight bites"
                );
                registry.drain(Some(self.shutdown_grace)).await;
            }
        }

        let report = MonitorReport {
            exit,
            stats,
            removed: sets.removed(),
            liquidations: registry.records(),
            elapsed: start.elapsed(),
        };

        info!(
            exit = ?report.exit,
            iterations = report.stats.iterations,
            bites = report.stats.bites,
            evictions = report.stats.evictions,
            liquidated = report.liquidated().len(),
            elapsed_ms = report.elapsed.as_millis(),
            "Monitor stopped"
        );

        report
    }

    async fn check_all(&self, positions: Vec<Position>) -> Vec<(Position, Result<bool, ChainError>)> {
        stream::iter(positions)
            .map(|position| async move {
                let result = self.chain.is_safe(&position.cup).await;
                (position, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }

    fn handle_answer(
        &self,
        sets: &Arc<WorkingSets>,
        registry: &Arc<LiquidationRegistry>,
        position: Position,
        result: Result<bool, ChainError>,
        cancel: &CancellationToken,
        stats: &mut MonitorStats,
    ) {
        let id = position.id;
        match result {
            Ok(true) => sets.record_safety(id, SafetyStatus::Safe),
            Ok(false) => {
                // Claim before spawning: the id leaves the monitored set now
                if sets.begin_processing(id).is_none() {
                    return;
                }
                info!(cup = %id, transition = "monitored_to_processing", "CDP is unsafe, biting");
                stats.bites += 1;

                let task = liquidate(
                    self.chain.clone(),
                    registry.clone(),
                    sets.clone(),
                    id,
                    self.confirmations,
                    cancel.child_token(),
                );
                if !registry.spawn(id, task) {
                    // The claim above succeeded, so the id must not stay in processing
                    warn!(
                        cup = %id,
                        transition = "processing_to_removed",
                        "Bite already recorded for this CDP, retiring it"
                    );
                    sets.finish(
                        id,
                        LiquidationStatus::Failed,
                        RemovalReason::BiteFailed {
                            stage: FailureStage::Submission,
                            reason: "bite already recorded for this cup".to_string(),
                        },
                    );
                }
            }
            Err(e) => {
                warn!(
                    cup = %id,
                    error = %e,
                    error_kind = e.kind(),
                    transition = "monitored_to_removed",
                    "Safety check failed, no longer monitoring CDP"
                );
                if sets.evict(
                    id,
                    RemovalReason::Unavailable {
                        reason: e.to_string(),
                    },
                ) {
                    stats.evictions += 1;
                }
            }
        }
    }
}

/// Drive one bite from submission to the confirmation depth.
///
/// The position leaves processing as soon as the bite is final; the
/// confirmation wait afterwards only affects the record.
async fn liquidate(
    chain: Arc<dyn ChainService>,
    registry: Arc<LiquidationRegistry>,
    sets: Arc<WorkingSets>,
    id: CupId,
    confirmations: u64,
    cancel: CancellationToken,
) {
    let fail = |stage: FailureStage, e: ChainError| {
        warn!(
            cup = %id,
            stage = stage.as_str(),
            error = %e,
            transition = "processing_to_removed",
            "Bite failed"
        );
        registry.fail(id, e.to_string());
        sets.finish(
            id,
            LiquidationStatus::Failed,
            RemovalReason::BiteFailed {
                stage,
                reason: e.to_string(),
            },
        );
    };

    let mut handle = match cancellable(&cancel, chain.bite(id)).await {
        Ok(handle) => handle,
        Err(e) => return fail(FailureStage::Submission, e),
    };
    attach_observers(&mut handle);
    let tx = handle.hash();
    registry.update(id, LiquidationStatus::Submitted, Some(tx));
    sets.set_status(id, LiquidationStatus::Submitted);

    if let Err(e) = cancellable(&cancel, handle.wait_mined()).await {
        return fail(FailureStage::Mining, e);
    }
    registry.update(id, LiquidationStatus::Mined, None);
    sets.set_status(id, LiquidationStatus::Mined);

    if let Err(e) = cancellable(&cancel, handle.wait_finalized()).await {
        return fail(FailureStage::Finalization, e);
    }
    registry.update(id, LiquidationStatus::Finalized, None);
    sets.finish(id, LiquidationStatus::Finalized, RemovalReason::Liquidated { tx });
    debug!(cup = %id, tx = %tx, transition = "processing_to_removed", "CDP retired");

    match cancellable(&cancel, handle.confirm(confirmations)).await {
        Ok(block) => {
            registry.update(id, LiquidationStatus::ConfirmedNBlocks, None);
            info!(
                cup = %id,
                tx = %tx,
                block = block,
                "Bite has {} block confirmations",
                confirmations
            );
        }
        Err(e) => {
            warn!(cup = %id, tx = %tx, error = %e, "Bite final but not confirmed");
            registry.note(id, e.to_string());
        }
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ChainError>>,
) -> Result<T, ChainError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChainError::Cancelled),
        result = fut => result,
    }
}
