//! Safe/unsafe partitioning of discovered cups.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use bitebot_chain::{ChainService, CupId};

use crate::error::PipelineError;
use crate::position::{Position, SafetyStatus};

/// Outcome of a classification pass.
///
/// `safe` and `undercollateralized` are disjoint; together with
/// `unavailable` they cover every input position exactly once.
#[derive(Debug, Default, Clone)]
pub struct Classification {
    pub safe: Vec<Position>,
    pub undercollateralized: Vec<Position>,
    /// Cups whose safety could not be determined
    pub unavailable: Vec<CupId>,
}

/// Evaluates the safety predicate for a batch of positions.
pub struct Classifier {
    chain: Arc<dyn ChainService>,
    max_concurrent: usize,
}

impl Classifier {
    pub fn new(chain: Arc<dyn ChainService>, max_concurrent: usize) -> Self {
        Self {
            chain,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Query safety for every position concurrently and partition them.
    ///
    /// Fails only when the chain service itself is unreachable.
    #[instrument(skip_all, fields(count = positions.len()))]
    pub async fn classify(&self, positions: Vec<Position>) -> Result<Classification, PipelineError> {
        let mut results = stream::iter(positions)
            .map(|position| async move {
                let result = self.chain.is_safe(&position.cup).await;
                (position, result)
            })
            .buffer_unordered(self.max_concurrent);

        let mut classification = Classification::default();
        while let Some((position, result)) = results.next().await {
            match result {
                Ok(true) => classification
                    .safe
                    .push(position.with_safety(SafetyStatus::Safe)),
                Ok(false) => classification
                    .undercollateralized
                    .push(position.with_safety(SafetyStatus::Unsafe)),
                Err(e) if e.is_fatal() => {
                    error!(cup = %position.id, error = %e, "Classification aborted");
                    return Err(PipelineError::Connection(e));
                }
                Err(e) => {
                    debug!(
                        cup = %position.id,
                        error = %e,
                        error_kind = e.kind(),
                        transition = "classification_skipped",
                        "Cup is not available"
                    );
                    classification.unavailable.push(position.id);
                }
            }
        }

        classification.safe.sort_by_key(|p| p.id);
        classification.undercollateralized.sort_by_key(|p| p.id);
        classification.unavailable.sort();

        info!(
            safe = classification.safe.len(),
            unsafe_count = classification.undercollateralized.len(),
            unavailable = classification.unavailable.len(),
            "Classification complete"
        );

        Ok(classification)
    }
}
