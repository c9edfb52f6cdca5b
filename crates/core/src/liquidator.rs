//! One-shot batch liquidation of undercollateralized cups.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use bitebot_chain::{ChainError, ChainService, CupId, TransactionHandle};

use crate::position::Position;

/// Step at which a bite in a batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Submission,
    Mining,
    Finalization,
    Confirmation,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Mining => "mining",
            Self::Finalization => "finalization",
            Self::Confirmation => "confirmation",
        }
    }
}

/// A single failed bite.
#[derive(Debug, Clone)]
pub struct BiteFailure {
    pub id: CupId,
    pub stage: FailureStage,
    pub error: ChainError,
}

/// Aggregate result of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Cups a bite was attempted for
    pub attempted: usize,
    /// Bites broadcast successfully
    pub submitted: usize,
    /// Bites mined with a successful receipt
    pub mined: usize,
    /// Bites that reached the confirmation depth
    pub confirmed: usize,
    pub failures: Vec<BiteFailure>,
}

impl BatchReport {
    /// Every attempted bite reached the confirmation depth.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.confirmed == self.attempted
    }

    pub fn failed_ids(&self) -> Vec<u64> {
        self.failures.iter().map(|f| f.id.get()).collect()
    }
}

/// Submits bites for a batch and tracks them to the confirmation depth.
pub struct Liquidator {
    chain: Arc<dyn ChainService>,
    confirmations: u64,
    max_concurrent: usize,
}

impl Liquidator {
    pub fn new(chain: Arc<dyn ChainService>, confirmations: u64, max_concurrent: usize) -> Self {
        Self {
            chain,
            confirmations,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Bite every position in the batch.
    ///
    /// Confirmations are only requested once every bite has mined; a batch
    /// with any submission or mining failure is reported as a partial failure
    /// without waiting further.
    #[instrument(skip_all, fields(count = positions.len()))]
    pub async fn bite_batch(&self, positions: &[Position]) -> BatchReport {
        let mut report = BatchReport {
            attempted: positions.len(),
            ..Default::default()
        };

        if positions.is_empty() {
            info!("No cups to bite");
            return report;
        }

        let start = Instant::now();

        // Submit
        let submissions: Vec<_> = stream::iter(positions.iter().map(|p| p.id))
            .map(|id| async move { (id, self.chain.bite(id).await) })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut handles: Vec<TransactionHandle> = Vec::with_capacity(submissions.len());
        for (id, result) in submissions {
            match result {
                Ok(mut handle) => {
                    attach_observers(&mut handle);
                    handles.push(handle);
                }
                Err(e) => {
                    warn!(cup = %id, error = %e, transition = "bite_rejected", "Bite submission failed");
                    report.failures.push(BiteFailure {
                        id,
                        stage: FailureStage::Submission,
                        error: e,
                    });
                }
            }
        }
        report.submitted = handles.len();

        // Wait for every bite to mine
        let mined = join_all(handles.iter_mut().map(|handle| async move {
            let id = handle.cup();
            (id, handle.wait_mined().await)
        }))
        .await;

        for (id, result) in mined {
            match result {
                Ok(_) => report.mined += 1,
                Err(e) => {
                    warn!(cup = %id, error = %e, transition = "bite_failed", "Bite did not mine");
                    report.failures.push(BiteFailure {
                        id,
                        stage: FailureStage::Mining,
                        error: e,
                    });
                }
            }
        }

        if !report.failures.is_empty() {
            error!(
                attempted = report.attempted,
                mined = report.mined,
                failed = ?report.failed_ids(),
                "Bite batch partially failed, skipping confirmations"
            );
            return report;
        }

        info!(count = report.mined, "All bite transactions have been mined");

        // Confirm
        let confirmations = self.confirmations;
        let confirmed = join_all(handles.iter_mut().map(|handle| async move {
            let id = handle.cup();
            (id, handle.confirm(confirmations).await)
        }))
        .await;

        for (id, result) in confirmed {
            match result {
                Ok(block) => {
                    info!(cup = %id, block = block, transition = "bite_confirmed", "Bite confirmed");
                    report.confirmed += 1;
                }
                Err(e) => {
                    warn!(cup = %id, error = %e, transition = "confirmation_failed", "Bite not confirmed");
                    report.failures.push(BiteFailure {
                        id,
                        stage: FailureStage::Confirmation,
                        error: e,
                    });
                }
            }
        }

        if report.is_success() {
            info!(
                count = report.confirmed,
                confirmations = self.confirmations,
                elapsed_ms = start.elapsed().as_millis(),
                "All bite transactions have {} block confirmations",
                self.confirmations
            );
        } else {
            error!(
                confirmed = report.confirmed,
                failed = ?report.failed_ids(),
                "Bite batch partially failed during confirmation"
            );
        }

        report
    }
}

/// Log lifecycle transitions of a bite.
pub(crate) fn attach_observers(handle: &mut TransactionHandle) {
    handle
        .on_submitted(|e| info!(cup = %e.cup, tx = %e.tx, transition = "submitted", "Bite pending"))
        .on_mined(|e| info!(cup = %e.cup, tx = %e.tx, block = ?e.block, transition = "mined", "Bite mined"))
        .on_finalized(|e| {
            info!(cup = %e.cup, tx = %e.tx, block = ?e.block, transition = "finalized", "Bite finalized")
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{position, BitePlan, MockChain};

    #[tokio::test]
    async fn test_empty_batch_is_success() {
        let chain = MockChain::new(&[]).into_arc();
        let liquidator = Liquidator::new(chain.clone(), 3, 4);

        let report = liquidator.bite_batch(&[]).await;
        assert!(report.is_success());
        assert_eq!(report.attempted, 0);
        assert!(chain.bites().is_empty());
    }

    #[tokio::test]
    async fn test_all_confirm() {
        let chain = MockChain::new(&[2, 3, 4]).into_arc();
        let liquidator = Liquidator::new(chain.clone(), 3, 2);

        let report = liquidator
            .bite_batch(&[position(2), position(3), position(4)])
            .await;

        assert!(report.is_success());
        assert_eq!(report.submitted, 3);
        assert_eq!(report.mined, 3);
        assert_eq!(report.confirmed, 3);
        assert_eq!(chain.bites().len(), 3);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_is_partial_failure() {
        let chain = MockChain::new(&[3])
            .plan(3, BitePlan::ConfirmationTimeout)
            .into_arc();
        let liquidator = Liquidator::new(chain, 3, 4);

        let report = liquidator.bite_batch(&[position(3)]).await;

        assert!(!report.is_success());
        assert_eq!(report.mined, 1);
        assert_eq!(report.confirmed, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Confirmation);
        assert!(matches!(
            report.failures[0].error,
            ChainError::ConfirmationTimeout { blocks: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_mining_failure_skips_confirmations() {
        let chain = MockChain::new(&[1, 2])
            .plan(2, BitePlan::Revert)
            .into_arc();
        let liquidator = Liquidator::new(chain, 3, 4);

        let report = liquidator.bite_batch(&[position(1), position(2)]).await;

        assert!(!report.is_success());
        assert_eq!(report.mined, 1);
        assert_eq!(report.confirmed, 0);
        assert_eq!(report.failed_ids(), vec![2]);
        assert_eq!(report.failures[0].stage, FailureStage::Mining);
    }

    #[tokio::test]
    async fn test_rejected_submission_is_contained() {
        let chain = MockChain::new(&[1, 2])
            .plan(1, BitePlan::RejectSubmission)
            .into_arc();
        let liquidator = Liquidator::new(chain.clone(), 3, 4);

        let report = liquidator.bite_batch(&[position(1), position(2)]).await;

        assert!(!report.is_success());
        assert_eq!(report.submitted, 1);
        assert_eq!(report.mined, 1);
        assert_eq!(report.confirmed, 0);
        assert_eq!(report.failures[0].stage, FailureStage::Submission);
        assert_eq!(chain.bites().len(), 2);
    }
}
