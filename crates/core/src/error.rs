//! Pipeline-level failures.
//!
//! Per-cup failures never surface here; they are logged and contained by the
//! component that hit them. A lost connection is not per-cup and aborts the run.

use thiserror::Error;

use bitebot_chain::ChainError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid scan range [{first}, {last}]: ids start at 1 and first must not exceed last")]
    InvalidRange { first: u64, last: u64 },

    #[error("could not authenticate with the chain service")]
    Authentication(#[source] ChainError),

    #[error("lost connection to the chain service")]
    Connection(#[source] ChainError),
}
