//! Position data structures for tracking cups through the pipeline.

use serde::{Deserialize, Serialize};

use bitebot_chain::{Cup, CupId, TxStage};

/// Last-known answer of the safety predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafetyStatus {
    /// Not queried yet
    Unknown,
    /// Collateralization above the liquidation threshold
    Safe,
    /// Collateralization below the liquidation threshold
    Unsafe,
}

impl SafetyStatus {
    pub fn from_is_safe(is_safe: bool) -> Self {
        if is_safe {
            Self::Safe
        } else {
            Self::Unsafe
        }
    }
}

/// Progress of a bite for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiquidationStatus {
    NotStarted,
    Submitted,
    Mined,
    Finalized,
    /// Confirmation depth past finality reached
    ConfirmedNBlocks,
    Failed,
}

impl LiquidationStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConfirmedNBlocks | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Submitted => "submitted",
            Self::Mined => "mined",
            Self::Finalized => "finalized",
            Self::ConfirmedNBlocks => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl From<TxStage> for LiquidationStatus {
    fn from(stage: TxStage) -> Self {
        match stage {
            TxStage::Submitted => Self::Submitted,
            TxStage::Mined => Self::Mined,
            TxStage::Finalized => Self::Finalized,
        }
    }
}

/// A discovered cup and what the bot knows about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub id: CupId,
    /// Chain-side representation handed back to the Chain Service
    pub cup: Cup,
    pub safety: SafetyStatus,
    pub liquidation: LiquidationStatus,
}

impl Position {
    /// Wrap a freshly fetched cup.
    pub fn new(cup: Cup) -> Self {
        Self {
            id: cup.id,
            cup,
            safety: SafetyStatus::Unknown,
            liquidation: LiquidationStatus::NotStarted,
        }
    }

    /// Copy of this position with an updated safety answer.
    pub fn with_safety(mut self, safety: SafetyStatus) -> Self {
        self.safety = safety;
        self
    }
}

/// Collect ids for logging.
pub fn ids(positions: &[Position]) -> Vec<u64> {
    positions.iter().map(|p| p.id.get()).collect()
}
