//! Monitored / processing / removed bookkeeping for the Monitor.
//!
//! Every position lives in exactly one of the three sets. Moves only go
//! forward (`monitored → processing → removed` or `monitored → removed`) and
//! each one happens under a single lock acquisition, so no observer ever sees
//! an id in two sets or in none.

use alloy::primitives::B256;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

use bitebot_chain::CupId;

use crate::liquidator::FailureStage;
use crate::position::{LiquidationStatus, Position, SafetyStatus};

/// Why a position left the monitored population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// Bite reached finality
    Liquidated { tx: B256 },
    /// Safety query failed; the position is no longer watched
    Unavailable { reason: String },
    /// Bite failed before finality
    BiteFailed { stage: FailureStage, reason: String },
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Liquidated { .. } => "liquidated",
            Self::Unavailable { .. } => "unavailable",
            Self::BiteFailed { .. } => "bite_failed",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Liquidated { tx } => write!(f, "liquidated in {tx}"),
            Self::Unavailable { reason } => write!(f, "unavailable: {reason}"),
            Self::BiteFailed { stage, reason } => {
                write!(f, "bite failed during {}: {reason}", stage.as_str())
            }
        }
    }
}

/// A position that left the monitored population, and why.
#[derive(Debug, Clone)]
pub struct Removed {
    pub position: Position,
    pub reason: RemovalReason,
}

#[derive(Default)]
struct Sets {
    monitored: BTreeMap<CupId, Position>,
    processing: BTreeMap<CupId, Position>,
    removed: BTreeMap<CupId, Removed>,
}

/// Point-in-time copy of the three sets' ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSetSnapshot {
    pub monitored: Vec<CupId>,
    pub processing: Vec<CupId>,
    pub removed: Vec<CupId>,
}

impl WorkingSetSnapshot {
    pub fn total(&self) -> usize {
        self.monitored.len() + self.processing.len() + self.removed.len()
    }
}

/// The Monitor's three working sets behind one lock.
pub struct WorkingSets {
    sets: Mutex<Sets>,
    total: usize,
}

impl WorkingSets {
    /// Start monitoring `positions`. Duplicate ids collapse to one entry.
    pub fn new(positions: Vec<Position>) -> Self {
        let monitored: BTreeMap<CupId, Position> =
            positions.into_iter().map(|p| (p.id, p)).collect();
        let total = monitored.len();
        Self {
            sets: Mutex::new(Sets {
                monitored,
                ..Default::default()
            }),
            total,
        }
    }

    /// Number of distinct positions handed in at construction.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Positions currently watched.
    pub fn active(&self) -> Vec<Position> {
        self.sets.lock().monitored.values().cloned().collect()
    }

    /// Store the latest safety answer for a monitored position.
    pub fn record_safety(&self, id: CupId, safety: SafetyStatus) {
        if let Some(position) = self.sets.lock().monitored.get_mut(&id) {
            position.safety = safety;
        }
    }

    /// Move a monitored position into processing.
    ///
    /// Returns `None` if the id is not monitored; a position can therefore be
    /// claimed for a bite at most once.
    pub fn begin_processing(&self, id: CupId) -> Option<Position> {
        let mut sets = self.sets.lock();
        let mut position = sets.monitored.remove(&id)?;
        position.safety = SafetyStatus::Unsafe;
        sets.processing.insert(id, position.clone());
        Some(position)
    }

    /// Update the liquidation status of a position being processed.
    pub fn set_status(&self, id: CupId, status: LiquidationStatus) {
        if let Some(position) = self.sets.lock().processing.get_mut(&id) {
            position.liquidation = status;
        }
    }

    /// Drop a monitored position without biting it. Returns false if the id
    /// was not monitored.
    pub fn evict(&self, id: CupId, reason: RemovalReason) -> bool {
        let mut sets = self.sets.lock();
        match sets.monitored.remove(&id) {
            Some(position) => {
                sets.removed.insert(id, Removed { position, reason });
                true
            }
            None => false,
        }
    }

    /// Retire a position that was being processed. Returns false if the id
    /// was not in processing.
    pub fn finish(&self, id: CupId, status: LiquidationStatus, reason: RemovalReason) -> bool {
        let mut sets = self.sets.lock();
        match sets.processing.remove(&id) {
            Some(mut position) => {
                position.liquidation = status;
                sets.removed.insert(id, Removed { position, reason });
                true
            }
            None => false,
        }
    }

    /// Every position has been removed.
    pub fn is_exhausted(&self) -> bool {
        self.sets.lock().removed.len() == self.total
    }

    pub fn snapshot(&self) -> WorkingSetSnapshot {
        let sets = self.sets.lock();
        WorkingSetSnapshot {
            monitored: sets.monitored.keys().copied().collect(),
            processing: sets.processing.keys().copied().collect(),
            removed: sets.removed.keys().copied().collect(),
        }
    }

    /// Removed positions in id order.
    pub fn removed(&self) -> Vec<Removed> {
        self.sets.lock().removed.values().cloned().collect()
    }
}

impl fmt::Debug for WorkingSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sets = self.sets.lock();
        f.debug_struct("WorkingSets")
            .field("monitored", &sets.monitored.len())
            .field("processing", &sets.processing.len())
            .field("removed", &sets.removed.len())
            .finish()
    }
}
