//! Failure taxonomy for Chain Service calls.

use alloy::primitives::B256;
use thiserror::Error;

use crate::types::CupId;

/// Errors surfaced by a [`ChainService`](crate::ChainService) or a
/// [`TransactionHandle`](crate::TransactionHandle).
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// The cup id has never been opened.
    #[error("cup {0} does not exist")]
    NotFound(CupId),

    /// The safety predicate could not be evaluated.
    #[error("cup {id} is not available: {reason}")]
    Unavailable { id: CupId, reason: String },

    /// The bite transaction could not be signed or broadcast.
    #[error("failed to submit bite for cup {id}: {reason}")]
    Submission { id: CupId, reason: String },

    /// The bite transaction was mined with a failed status.
    #[error("bite transaction {tx} reverted")]
    Reverted { tx: B256 },

    /// Tracking a transaction through mining/finalization failed.
    #[error("lost track of transaction {tx}: {reason}")]
    Tracking { tx: B256, reason: String },

    /// The requested confirmation depth was not reached in time.
    #[error("transaction {tx} did not reach {blocks} confirmations in time")]
    ConfirmationTimeout { tx: B256, blocks: u64 },

    /// Signer or account setup failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The RPC endpoint could not be reached or answered garbage.
    #[error("chain connection error: {0}")]
    Connection(String),

    /// The wait was abandoned because the bot is shutting down.
    #[error("operation cancelled")]
    Cancelled,
}

impl ChainError {
    /// `NotFound` is the expected answer for gaps in the id space.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Process-wide failures that should abort the pipeline instead of being
    /// contained to a single cup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Connection(_))
    }

    /// Short label used as the `error_kind` field in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unavailable { .. } => "unavailable",
            Self::Submission { .. } => "submission",
            Self::Reverted { .. } => "reverted",
            Self::Tracking { .. } => "tracking",
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::Authentication(_) => "authentication",
            Self::Connection(_) => "connection",
            Self::Cancelled => "cancelled",
        }
    }
}
