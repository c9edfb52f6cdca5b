//! Chain Service backed by the single-collateral Dai `Tub` contract.

use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::ProviderBuilder;
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy::transports::http::reqwest::Url;
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::ChainError;
use crate::provider::ProviderManager;
use crate::service::ChainService;
use crate::signer::TransactionSender;
use crate::transaction::{BiteTransaction, TransactionHandle};
use crate::types::{Cup, CupId};

sol! {
    /// Subset of the Sai Tub interface used by the bot
    #[sol(rpc)]
    interface ISaiTub {
        function cups(bytes32 cup) external view returns (address lad, uint256 ink, uint256 art, uint256 ire);
        function safe(bytes32 cup) external returns (bool);
        function bite(bytes32 cup) external;
    }
}

/// Timing knobs for tracking bite transactions.
#[derive(Debug, Clone)]
pub struct TubSettings {
    /// Blocks past inclusion after which a transaction counts as final
    pub finality_depth: u64,
    /// Upper bound for waiting on a receipt
    pub receipt_timeout: Duration,
    /// Upper bound for reaching finality or the confirmation depth
    pub confirmation_timeout: Duration,
    /// Chain id the signer must be connected to
    pub expected_chain_id: Option<u64>,
}

impl Default for TubSettings {
    fn default() -> Self {
        Self {
            finality_depth: 1,
            receipt_timeout: Duration::from_secs(300),
            confirmation_timeout: Duration::from_secs(600),
            expected_chain_id: None,
        }
    }
}

/// [`ChainService`] talking to a deployed Tub over JSON-RPC.
pub struct SaiTub {
    address: Address,
    provider: Arc<ProviderManager>,
    sender: Arc<TransactionSender>,
    settings: TubSettings,
}

impl SaiTub {
    pub fn new(
        address: Address,
        provider: Arc<ProviderManager>,
        sender: Arc<TransactionSender>,
        settings: TubSettings,
    ) -> Self {
        Self {
            address,
            provider,
            sender,
            settings,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn contract_provider(&self) -> Result<impl alloy::providers::Provider, ChainError> {
        let url: Url = self
            .provider
            .rpc_url()
            .parse()
            .map_err(|e| ChainError::Connection(format!("invalid RPC URL: {e}")))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    async fn read_cup(&self, id: CupId) -> Result<Cup, ChainError> {
        let provider = self.contract_provider()?;
        let tub = ISaiTub::new(self.address, &provider);
        let raw = tub
            .cups(id.to_bytes32())
            .call()
            .await
            .map_err(|e| classify_call_error(id, e))?;
        Ok(Cup {
            id,
            lad: raw.lad,
            ink: raw.ink,
            art: raw.art,
            ire: raw.ire,
        })
    }

    async fn read_safe(&self, id: CupId) -> Result<bool, ChainError> {
        let provider = self.contract_provider()?;
        let tub = ISaiTub::new(self.address, &provider);
        let safe = tub
            .safe(id.to_bytes32())
            .call()
            .await
            .map_err(|e| classify_call_error(id, e))?;
        Ok(safe._0)
    }
}

/// Transport failures mean the node is unreachable; anything the node
/// answered (reverts, undecodable data) is specific to the cup.
fn classify_call_error(id: CupId, e: alloy::contract::Error) -> ChainError {
    match e {
        alloy::contract::Error::TransportError(RpcError::Transport(kind)) => {
            ChainError::Connection(kind.to_string())
        }
        other => ChainError::Unavailable {
            id,
            reason: other.to_string(),
        },
    }
}

/// Same split for errors coming out of the signer.
fn classify_send_error(id: CupId, e: anyhow::Error) -> ChainError {
    match e.downcast_ref::<TransportError>() {
        Some(RpcError::Transport(kind)) => ChainError::Connection(kind.to_string()),
        _ => ChainError::Submission {
            id,
            reason: e.to_string(),
        },
    }
}

/// Calldata for `Tub.bite(cup)`.
pub fn encode_bite(id: CupId) -> Bytes {
    ISaiTub::biteCall { cup: id.to_bytes32() }.abi_encode().into()
}

#[async_trait]
impl ChainService for SaiTub {
    async fn authenticate(&self) -> Result<Address, ChainError> {
        let chain_id = self
            .provider
            .chain_id()
            .await
            .map_err(|e| ChainError::Connection(e.to_string()))?;

        if let Some(expected) = self.settings.expected_chain_id {
            if expected != chain_id {
                return Err(ChainError::Authentication(format!(
                    "connected to chain {chain_id}, expected {expected}"
                )));
            }
        }
        if self.sender.chain_id() != chain_id {
            return Err(ChainError::Authentication(format!(
                "signer configured for chain {}, node reports {chain_id}",
                self.sender.chain_id()
            )));
        }

        let code = self
            .provider
            .code_at(self.address)
            .await
            .map_err(|e| ChainError::Connection(e.to_string()))?;
        if code.is_empty() {
            return Err(ChainError::Authentication(format!(
                "no contract deployed at tub address {}",
                self.address
            )));
        }

        let balance = self
            .sender
            .get_balance()
            .await
            .map_err(|e| ChainError::Connection(e.to_string()))?;
        if balance.is_zero() {
            warn!(account = %self.sender.address, "Signing account has no balance for gas");
        }

        self.sender
            .refresh_nonce()
            .await
            .map_err(|e| ChainError::Connection(e.to_string()))?;

        info!(
            account = %self.sender.address,
            tub = %self.address,
            chain_id = chain_id,
            balance = %balance,
            nonce = self.sender.next_nonce(),
            "Authenticated"
        );
        Ok(self.sender.address)
    }

    async fn get_position(&self, id: CupId) -> Result<Cup, ChainError> {
        let cup = self.read_cup(id).await?;
        if !cup.exists() {
            return Err(ChainError::NotFound(id));
        }
        Ok(cup)
    }

    async fn is_safe(&self, cup: &Cup) -> Result<bool, ChainError> {
        self.read_safe(cup.id).await
    }

    #[instrument(skip(self), fields(cup = %id))]
    async fn bite(&self, id: CupId) -> Result<TransactionHandle, ChainError> {
        let tx = self
            .sender
            .send_transaction(self.address, encode_bite(id))
            .await
            .map_err(|e| classify_send_error(id, e))?;

        debug!(tx = %tx, "Bite broadcast");

        let pending = PendingBite {
            tx,
            provider: self.provider.clone(),
            settings: self.settings.clone(),
        };
        Ok(TransactionHandle::new(id, Box::new(pending)))
    }
}

/// Receipt- and head-polling tracker for a broadcast bite.
struct PendingBite {
    tx: B256,
    provider: Arc<ProviderManager>,
    settings: TubSettings,
}

impl PendingBite {
    fn tracking_error(&self, e: anyhow::Error) -> ChainError {
        ChainError::Tracking {
            tx: self.tx,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl BiteTransaction for PendingBite {
    fn hash(&self) -> B256 {
        self.tx
    }

    async fn mined(&self) -> Result<u64, ChainError> {
        let receipt = self
            .provider
            .wait_for_receipt(self.tx, self.settings.receipt_timeout)
            .await
            .map_err(|e| self.tracking_error(e))?
            .ok_or_else(|| ChainError::Tracking {
                tx: self.tx,
                reason: format!("no receipt after {:?}", self.settings.receipt_timeout),
            })?;

        if !receipt.status() {
            return Err(ChainError::Reverted { tx: self.tx });
        }

        receipt.block_number.ok_or_else(|| ChainError::Tracking {
            tx: self.tx,
            reason: "receipt without block number".to_string(),
        })
    }

    async fn finalized(&self, mined_block: u64) -> Result<u64, ChainError> {
        let target = mined_block + self.settings.finality_depth;
        self.provider
            .wait_for_block(target, self.settings.confirmation_timeout)
            .await
            .map_err(|e| self.tracking_error(e))?
            .ok_or_else(|| ChainError::Tracking {
                tx: self.tx,
                reason: format!("block {target} not reached"),
            })?;

        // A reorg may have dropped the transaction while we waited
        match self.provider.receipt(self.tx).await {
            Ok(Some(receipt)) if receipt.status() => Ok(target),
            Ok(Some(_)) => Err(ChainError::Reverted { tx: self.tx }),
            Ok(None) => Err(ChainError::Tracking {
                tx: self.tx,
                reason: "receipt disappeared before finality".to_string(),
            }),
            Err(e) => Err(self.tracking_error(e)),
        }
    }

    async fn confirm(&self, finalized_block: u64, blocks: u64) -> Result<u64, ChainError> {
        let target = finalized_block + blocks;
        self.provider
            .wait_for_block(target, self.settings.confirmation_timeout)
            .await
            .map_err(|e| self.tracking_error(e))?
            .ok_or(ChainError::ConfirmationTimeout {
                tx: self.tx,
                blocks,
            })
    }
}
