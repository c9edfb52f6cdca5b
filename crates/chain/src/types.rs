//! Cup identifiers and on-chain cup data.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cup in the Tub contract.
///
/// Ids are positive integers; on-chain they are keyed by the id encoded as a
/// big-endian `bytes32` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CupId(u64);

impl CupId {
    /// Create a cup id. Returns `None` for zero, which the Tub never assigns.
    pub fn new(id: u64) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Encode as the `bytes32` key used by `Tub.cups`, `Tub.safe` and `Tub.bite`.
    pub fn to_bytes32(self) -> B256 {
        B256::from(U256::from(self.0))
    }
}

impl fmt::Display for CupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// On-chain state of a cup as returned by `Tub.cups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cup {
    /// Cup identifier
    pub id: CupId,
    /// Owner of the cup
    pub lad: Address,
    /// Locked collateral (PETH, 18 decimals)
    pub ink: U256,
    /// Outstanding debt (DAI, 18 decimals)
    pub art: U256,
    /// Outstanding debt including accrued governance fee
    pub ire: U256,
}

impl Cup {
    /// A cup with a zero owner was never opened (or has been shut).
    pub fn exists(&self) -> bool {
        self.lad != Address::ZERO
    }

    /// Whether the cup carries any debt.
    pub fn has_debt(&self) -> bool {
        !self.art.is_zero()
    }
}
