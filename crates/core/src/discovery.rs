//! Cup discovery over an id range.
//!
//! The id space is sparse: most ids in a range may never have been opened,
//! so `NotFound` is an expected answer and never fails the scan.

use futures::stream::{self, StreamExt};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use bitebot_chain::{ChainService, CupId};

use crate::error::PipelineError;
use crate::position::Position;

/// Inclusive id range to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    first: CupId,
    last: CupId,
}

impl ScanRange {
    /// Validate `[first, last]`: ids start at 1 and the range is non-empty.
    pub fn new(first: u64, last: u64) -> Result<Self, PipelineError> {
        let invalid = || PipelineError::InvalidRange { first, last };
        let first_id = CupId::new(first).ok_or_else(invalid)?;
        let last_id = CupId::new(last).ok_or_else(invalid)?;
        if first > last {
            return Err(invalid());
        }
        Ok(Self {
            first: first_id,
            last: last_id,
        })
    }

    /// Resolve optional command-line bounds: no bounds scans
    /// `[default_first, default_last]`, a lone first id scans `span` ids past it.
    pub fn from_args(
        first: Option<u64>,
        last: Option<u64>,
        default_first: u64,
        default_last: u64,
        span: u64,
    ) -> Result<Self, PipelineError> {
        match (first, last) {
            (None, None) => Self::new(default_first, default_last),
            (Some(first), None) => Self::new(first, first.saturating_add(span)),
            (None, Some(last)) => Self::new(default_first, last),
            (Some(first), Some(last)) => Self::new(first, last),
        }
    }

    pub fn first(&self) -> CupId {
        self.first
    }

    pub fn last(&self) -> CupId {
        self.last
    }

    pub fn len(&self) -> u64 {
        self.last.get() - self.first.get() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn ids(&self) -> impl Iterator<Item = CupId> {
        let range: RangeInclusive<u64> = self.first.get()..=self.last.get();
        range.filter_map(CupId::new)
    }
}

/// Finds the cups that exist in a range.
pub struct Discovery {
    chain: Arc<dyn ChainService>,
    max_concurrent: usize,
}

impl Discovery {
    pub fn new(chain: Arc<dyn ChainService>, max_concurrent: usize) -> Self {
        Self {
            chain,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Query every id in `range` and return the cups that exist, sorted by id.
    ///
    /// Per-id failures are logged and skipped. A fatal error (the service
    /// itself is gone) aborts the scan.
    #[instrument(skip(self), fields(first = %range.first(), last = %range.last()))]
    pub async fn discover(&self, range: ScanRange) -> Result<Vec<Position>, PipelineError> {
        let start = Instant::now();

        let mut results = stream::iter(range.ids())
            .map(|id| async move { (id, self.chain.get_position(id).await) })
            .buffer_unordered(self.max_concurrent);

        let mut positions = Vec::new();
        let mut missing = 0usize;
        let mut failed = 0usize;

        while let Some((id, result)) = results.next().await {
            match result {
                Ok(cup) => positions.push(Position::new(cup)),
                Err(e) if e.is_not_found() => {
                    debug!(cup = %id, "Cup does not exist");
                    missing += 1;
                }
                Err(e) if e.is_fatal() => {
                    error!(cup = %id, error = %e, error_kind = e.kind(), "Discovery aborted");
                    return Err(PipelineError::Connection(e));
                }
                Err(e) => {
                    warn!(
                        cup = %id,
                        error = %e,
                        error_kind = e.kind(),
                        transition = "discovery_skipped",
                        "Failed to fetch cup"
                    );
                    failed += 1;
                }
            }
        }

        positions.sort_by_key(|p| p.id);

        info!(
            scanned = range.len(),
            found = positions.len(),
            missing = missing,
            failed = failed,
            elapsed_ms = start.elapsed().as_millis(),
            "Discovery complete"
        );

        Ok(positions)
    }
}
