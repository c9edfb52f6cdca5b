//! Read access to the node: blocks, receipts, code.

use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionReceipt;
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

/// Provider manager for the node the bot talks to.
#[derive(Debug, Clone)]
pub struct ProviderManager {
    /// HTTP URL for reads and receipt polling
    rpc_url: String,
    /// Interval between polls while waiting for receipts and blocks
    poll_interval: Duration,
}

impl ProviderManager {
    /// Create a provider manager and verify the endpoint answers.
    pub async fn new(rpc_url: &str, poll_interval: Duration) -> Result<Self> {
        info!(rpc = rpc_url, "Initializing provider manager");

        let manager = Self {
            rpc_url: rpc_url.to_string(),
            poll_interval,
        };

        let block = manager.block_number().await?;
        info!(block = block, "Provider connection verified");

        Ok(manager)
    }

    /// Get the RPC URL.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Get current block number.
    pub async fn block_number(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let block = provider.get_block_number().await?;
        Ok(block)
    }

    /// Get chain ID.
    pub async fn chain_id(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let chain_id = provider.get_chain_id().await?;
        Ok(chain_id)
    }

    /// Get deployed bytecode at an address (empty for EOAs).
    pub async fn code_at(&self, address: Address) -> Result<Bytes> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let code = provider.get_code_at(address).await?;
        Ok(code)
    }

    /// Fetch a receipt, `None` while the transaction is still pending.
    pub async fn receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let receipt = provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt)
    }

    /// Poll until the receipt for `tx_hash` is available or `timeout` elapses.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<TransactionReceipt>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.receipt(tx_hash).await? {
                return Ok(Some(receipt));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll until the head reaches `target` or `timeout` elapses.
    /// Returns the head observed at that point.
    pub async fn wait_for_block(&self, target: u64, timeout: Duration) -> Result<Option<u64>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let head = self.block_number().await?;
            if head >= target {
                return Ok(Some(head));
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(head = head, target = target, "Gave up waiting for block");
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
