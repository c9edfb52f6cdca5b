//! The Chain Service boundary consumed by the bot core.

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::error::ChainError;
use crate::transaction::TransactionHandle;
use crate::types::{Cup, CupId};

/// Everything the liquidation pipeline needs from the chain.
///
/// Implementations are shared read-only across components
/// (`Arc<dyn ChainService>`), so every method takes `&self`.
#[async_trait]
pub trait ChainService: Send + Sync {
    /// Verify the signing account and the connection. Returns the account
    /// address that will submit bites.
    async fn authenticate(&self) -> Result<Address, ChainError>;

    /// Fetch a cup. Fails with [`ChainError::NotFound`] for unopened ids.
    async fn get_position(&self, id: CupId) -> Result<Cup, ChainError>;

    /// Evaluate the Tub's safety predicate. Fails with
    /// [`ChainError::Unavailable`] when the answer cannot be obtained.
    async fn is_safe(&self, cup: &Cup) -> Result<bool, ChainError>;

    /// Broadcast a bite for `id` using the configured fixed gas limit.
    async fn bite(&self, id: CupId) -> Result<TransactionHandle, ChainError>;
}
