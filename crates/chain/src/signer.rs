//! Signing and broadcasting of bite transactions.
//!
//! Nonces are reserved from a local cache and every transaction carries the
//! same fixed gas limit, so a send costs one gas price lookup and the
//! broadcast itself.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Locally cached account nonce.
///
/// Bites are broadcast concurrently, so each send reserves the next nonce
/// without a round trip. The chain value is re-read after a failed broadcast.
pub struct NonceManager {
    next: AtomicU64,
    /// Nonce reported by the node at the last sync
    synced: AtomicU64,
}

impl NonceManager {
    pub fn new(chain_nonce: u64) -> Self {
        Self {
            next: AtomicU64::new(chain_nonce),
            synced: AtomicU64::new(chain_nonce),
        }
    }

    /// Reserve a nonce for a new transaction.
    #[inline]
    pub fn reserve(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Nonce the next reservation will get.
    #[inline]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn synced(&self) -> u64 {
        self.synced.load(Ordering::SeqCst)
    }

    /// Reservations handed out since the last sync.
    pub fn outstanding(&self) -> u64 {
        self.peek().saturating_sub(self.synced())
    }

    /// Record the chain nonce; never moves the cache backwards.
    pub fn observe(&self, chain_nonce: u64) {
        self.next.fetch_max(chain_nonce, Ordering::SeqCst);
        self.synced.store(chain_nonce, Ordering::SeqCst);
    }

    /// Hand back `nonce` if it is still the latest reservation.
    ///
    /// Returns false when later reservations exist; the caller must resync
    /// from the chain instead.
    pub fn release(&self, nonce: u64) -> bool {
        self.next
            .compare_exchange(nonce + 1, nonce, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Adopt the chain nonce unconditionally, dropping unused reservations.
    pub fn rewind(&self, chain_nonce: u64) {
        self.next.store(chain_nonce, Ordering::SeqCst);
        self.synced.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Signs and broadcasts bite transactions with a fixed gas ceiling.
pub struct TransactionSender {
    rpc_url: String,
    wallet: EthereumWallet,
    pub address: Address,
    chain_id: u64,
    nonces: NonceManager,
    /// Gas limit applied to every transaction
    gas_limit: u64,
}

impl TransactionSender {
    /// Create a sender from a hex private key (with or without `0x`).
    pub async fn new(private_key: &str, rpc_url: &str, chain_id: u64, gas_limit: u64) -> Result<Self> {
        let key_str = private_key.trim().trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str.parse()?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let initial_nonce = provider.get_transaction_count(address).await?;

        info!(
            address = %address,
            chain_id = chain_id,
            initial_nonce = initial_nonce,
            gas_limit = gas_limit,
            "Transaction sender initialized"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet,
            address,
            chain_id,
            nonces: NonceManager::new(initial_nonce),
            gas_limit,
        })
    }

    /// Broadcast a transaction and return its hash without waiting for the
    /// receipt. Mining is tracked separately by the caller.
    pub async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<B256> {
        let start = Instant::now();

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.parse()?);

        let gas_price = provider.get_gas_price().await?;

        // Reserve last: nothing fallible sits between here and the broadcast
        let nonce = self.nonces.reserve();

        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata)
            .with_value(U256::ZERO)
            .with_nonce(nonce)
            .with_gas_limit(self.gas_limit)
            .with_gas_price(gas_price)
            .with_chain_id(self.chain_id);

        debug!(
            to = %to,
            nonce = nonce,
            gas_limit = self.gas_limit,
            gas_price_gwei = gas_price / 1_000_000_000,
            "Sending transaction"
        );

        match provider.send_transaction(tx).await {
            Ok(pending) => {
                let tx_hash = *pending.tx_hash();
                info!(
                    tx_hash = %tx_hash,
                    nonce = nonce,
                    submit_ms = start.elapsed().as_millis(),
                    "Transaction broadcast"
                );
                Ok(tx_hash)
            }
            Err(e) => {
                if self.nonces.release(nonce) {
                    warn!(nonce = nonce, error = %e, "Broadcast failed, nonce released");
                } else {
                    warn!(nonce = nonce, error = %e, "Broadcast failed, syncing nonce");
                    self.sync_nonce().await;
                }
                Err(e.into())
            }
        }
    }

    /// Re-read the account nonce from the node after a failed broadcast,
    /// dropping reservations the node never saw.
    async fn sync_nonce(&self) {
        match self.chain_nonce().await {
            Ok(chain_nonce) => {
                let dropped = self.nonces.outstanding();
                self.nonces.rewind(chain_nonce);
                debug!(nonce = chain_nonce, dropped = dropped, "Nonce synced from chain");
            }
            Err(e) => {
                warn!(error = %e, "Failed to sync nonce from chain");
            }
        }
    }

    /// Catch up with transactions sent from the account elsewhere. Never
    /// moves the cached nonce backwards.
    pub async fn refresh_nonce(&self) -> Result<()> {
        let chain_nonce = self.chain_nonce().await?;
        self.nonces.observe(chain_nonce);
        Ok(())
    }

    async fn chain_nonce(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        Ok(provider.get_transaction_count(self.address).await?)
    }

    /// Nonce the next broadcast will use.
    pub fn next_nonce(&self) -> u64 {
        self.nonces.peek()
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Balance of the signing account, for gas.
    pub async fn get_balance(&self) -> Result<U256> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let balance = provider.get_balance(self.address).await?;
        Ok(balance)
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("gas_limit", &self.gas_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservations_are_sequential() {
        let nonces = NonceManager::new(10);

        assert_eq!(nonces.reserve(), 10);
        assert_eq!(nonces.reserve(), 11);
        assert_eq!(nonces.peek(), 12);
        assert_eq!(nonces.outstanding(), 2);
    }

    #[test]
    fn test_observe_only_moves_forward() {
        let nonces = NonceManager::new(3);
        nonces.reserve();
        nonces.reserve();

        nonces.observe(4);
        assert_eq!(nonces.peek(), 5);
        assert_eq!(nonces.synced(), 4);

        nonces.observe(9);
        assert_eq!(nonces.peek(), 9);
        assert_eq!(nonces.outstanding(), 0);
    }

    #[test]
    fn test_release_returns_unbroadcast_nonce() {
        let nonces = NonceManager::new(7);

        let failed = nonces.reserve();
        assert!(nonces.release(failed));
        assert_eq!(nonces.reserve(), 7);
    }

    #[test]
    fn test_release_refuses_with_later_reservations() {
        let nonces = NonceManager::new(7);

        let failed = nonces.reserve();
        let _in_flight = nonces.reserve();
        assert!(!nonces.release(failed));
        assert_eq!(nonces.peek(), 9);

        // Resync from the chain closes the gap
        nonces.rewind(7);
        assert_eq!(nonces.reserve(), 7);
    }

    #[test]
    fn test_rewind_drops_reservations() {
        let nonces = NonceManager::new(20);
        for _ in 0..3 {
            nonces.reserve();
        }

        nonces.rewind(21);
        assert_eq!(nonces.reserve(), 21);
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_sender_creation() {
        // Well-known development key (DO NOT USE IN PRODUCTION)
        let private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let sender = TransactionSender::new(
            private_key,
            "https://ethereum-rpc.publicnode.com",
            1,
            4_000_000,
        )
        .await
        .unwrap();

        assert_eq!(
            format!("{:?}", sender.address).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(sender.gas_limit(), 4_000_000);
    }
}
