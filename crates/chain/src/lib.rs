//! Chain interaction layer for the bite bot.
//!
//! This crate provides:
//! - The `ChainService` boundary consumed by the bot core
//! - Failure taxonomy for chain calls
//! - Transaction handles with lifecycle notifications and confirmation waits
//! - An Alloy-backed implementation against the Sai `Tub` contract
//! - Transaction signing with a cached nonce and fixed gas ceiling

mod error;
mod provider;
mod service;
mod signer;
mod transaction;
mod tub;
mod types;

pub use error::ChainError;
pub use provider::ProviderManager;
pub use service::ChainService;
pub use signer::{NonceManager, TransactionSender};
pub use transaction::{BiteTransaction, TransactionHandle, TxEvent, TxStage};
pub use tub::{encode_bite, SaiTub, TubSettings};
pub use types::{Cup, CupId};
