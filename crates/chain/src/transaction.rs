//! In-flight bite transactions and their lifecycle notifications.
//!
//! A [`TransactionHandle`] is returned by
//! [`ChainService::bite`](crate::ChainService::bite) once the transaction has
//! been broadcast. It advances through `Submitted → Mined → Finalized` and can
//! additionally wait for N confirmation blocks past finality.
//!
//! Listeners registered for a stage the handle has already reached fire
//! immediately, so callers never miss a transition regardless of when they
//! attach.

use alloy::primitives::B256;
use async_trait::async_trait;
use std::fmt;

use crate::error::ChainError;
use crate::types::CupId;

/// Lifecycle stage of a bite transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxStage {
    /// Broadcast to the network
    Submitted,
    /// Included in a block with a successful receipt
    Mined,
    /// Included in a block the chain considers final
    Finalized,
}

impl TxStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Mined => "mined",
            Self::Finalized => "finalized",
        }
    }
}

/// Notification delivered to lifecycle listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxEvent {
    pub cup: CupId,
    pub tx: B256,
    pub stage: TxStage,
    /// Block at which the stage was reached (unknown for `Submitted`)
    pub block: Option<u64>,
}

/// Chain-specific tracking of a broadcast transaction.
///
/// Implementations are polled through a [`TransactionHandle`]; they do not
/// need to cache results, the handle does.
#[async_trait]
pub trait BiteTransaction: Send + Sync {
    /// Transaction hash.
    fn hash(&self) -> B256;

    /// Resolve with the inclusion block once the transaction is mined.
    /// Fails with [`ChainError::Reverted`] for a failed receipt.
    async fn mined(&self) -> Result<u64, ChainError>;

    /// Resolve with the block at which the mined transaction became final.
    async fn finalized(&self, mined_block: u64) -> Result<u64, ChainError>;

    /// Resolve with the head block once `blocks` blocks have been built on
    /// top of `finalized_block`.
    async fn confirm(&self, finalized_block: u64, blocks: u64) -> Result<u64, ChainError>;
}

type Listener = Box<dyn Fn(&TxEvent) + Send + Sync>;

/// Owned reference to an in-flight bite transaction.
pub struct TransactionHandle {
    cup: CupId,
    inner: Box<dyn BiteTransaction>,
    stage: TxStage,
    mined_block: Option<u64>,
    finalized_block: Option<u64>,
    listeners: Vec<(TxStage, Listener)>,
}

impl TransactionHandle {
    /// Wrap a freshly broadcast transaction.
    pub fn new(cup: CupId, inner: Box<dyn BiteTransaction>) -> Self {
        Self {
            cup,
            inner,
            stage: TxStage::Submitted,
            mined_block: None,
            finalized_block: None,
            listeners: Vec::new(),
        }
    }

    pub fn cup(&self) -> CupId {
        self.cup
    }

    pub fn hash(&self) -> B256 {
        self.inner.hash()
    }

    /// Latest stage reached.
    pub fn stage(&self) -> TxStage {
        self.stage
    }

    pub fn mined_block(&self) -> Option<u64> {
        self.mined_block
    }

    pub fn finalized_block(&self) -> Option<u64> {
        self.finalized_block
    }

    /// Register a listener for the `Submitted` stage.
    pub fn on_submitted(&mut self, f: impl Fn(&TxEvent) + Send + Sync + 'static) -> &mut Self {
        self.listen(TxStage::Submitted, Box::new(f))
    }

    /// Register a listener for the `Mined` stage.
    pub fn on_mined(&mut self, f: impl Fn(&TxEvent) + Send + Sync + 'static) -> &mut Self {
        self.listen(TxStage::Mined, Box::new(f))
    }

    /// Register a listener for the `Finalized` stage.
    pub fn on_finalized(&mut self, f: impl Fn(&TxEvent) + Send + Sync + 'static) -> &mut Self {
        self.listen(TxStage::Finalized, Box::new(f))
    }

    fn listen(&mut self, stage: TxStage, listener: Listener) -> &mut Self {
        if self.stage >= stage {
            listener(&self.event(stage));
        }
        self.listeners.push((stage, listener));
        self
    }

    fn event(&self, stage: TxStage) -> TxEvent {
        let block = match stage {
            TxStage::Submitted => None,
            TxStage::Mined => self.mined_block,
            TxStage::Finalized => self.finalized_block,
        };
        TxEvent {
            cup: self.cup,
            tx: self.inner.hash(),
            stage,
            block,
        }
    }

    fn advance(&mut self, stage: TxStage) {
        if stage <= self.stage {
            return;
        }
        self.stage = stage;
        let event = self.event(stage);
        for (_, listener) in self.listeners.iter().filter(|(s, _)| *s == stage) {
            listener(&event);
        }
    }

    /// Wait until the transaction is mined. Returns the inclusion block.
    pub async fn wait_mined(&mut self) -> Result<u64, ChainError> {
        if let Some(block) = self.mined_block {
            return Ok(block);
        }
        let block = self.inner.mined().await?;
        self.mined_block = Some(block);
        self.advance(TxStage::Mined);
        Ok(block)
    }

    /// Wait until the transaction is final. Returns the finality block.
    pub async fn wait_finalized(&mut self) -> Result<u64, ChainError> {
        if let Some(block) = self.finalized_block {
            return Ok(block);
        }
        let mined = self.wait_mined().await?;
        let block = self.inner.finalized(mined).await?;
        self.finalized_block = Some(block);
        self.advance(TxStage::Finalized);
        Ok(block)
    }

    /// Wait for `blocks` additional blocks after finality. Returns the head
    /// block observed when the depth was reached.
    pub async fn confirm(&mut self, blocks: u64) -> Result<u64, ChainError> {
        let finalized = self.wait_finalized().await?;
        self.inner.confirm(finalized, blocks).await
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("cup", &self.cup)
            .field("tx", &self.inner.hash())
            .field("stage", &self.stage)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct InstantTx {
        fail_mining: bool,
    }

    #[async_trait]
    impl BiteTransaction for InstantTx {
        fn hash(&self) -> B256 {
            B256::repeat_byte(0xab)
        }

        async fn mined(&self) -> Result<u64, ChainError> {
            if self.fail_mining {
                Err(ChainError::Reverted { tx: self.hash() })
            } else {
                Ok(100)
            }
        }

        async fn finalized(&self, mined_block: u64) -> Result<u64, ChainError> {
            Ok(mined_block + 1)
        }

        async fn confirm(&self, finalized_block: u64, blocks: u64) -> Result<u64, ChainError> {
            Ok(finalized_block + blocks)
        }
    }

    fn handle(fail_mining: bool) -> TransactionHandle {
        TransactionHandle::new(CupId::new(9).unwrap(), Box::new(InstantTx { fail_mining }))
    }

    #[tokio::test]
    async fn test_stages_fire_in_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut h = handle(false);
        let s = seen.clone();
        h.on_submitted(move |e| s.lock().push((e.stage, e.block)));
        let s = seen.clone();
        h.on_mined(move |e| s.lock().push((e.stage, e.block)));
        let s = seen.clone();
        h.on_finalized(move |e| s.lock().push((e.stage, e.block)));

        assert_eq!(h.confirm(3).await.unwrap(), 104);
        assert_eq!(h.stage(), TxStage::Finalized);
        assert_eq!(
            *seen.lock(),
            vec![
                (TxStage::Submitted, None),
                (TxStage::Mined, Some(100)),
                (TxStage::Finalized, Some(101)),
            ]
        );
    }

    #[tokio::test]
    async fn test_late_listener_fires_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut h = handle(false);
        h.wait_mined().await.unwrap();

        let c = count.clone();
        h.on_mined(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Already mined: waiting again must not re-notify
        h.wait_mined().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revert_stops_at_submitted() {
        let mut h = handle(true);
        let err = h.wait_finalized().await.unwrap_err();
        assert!(matches!(err, ChainError::Reverted { .. }));
        assert_eq!(h.stage(), TxStage::Submitted);
        assert_eq!(h.mined_block(), None);
    }
}
