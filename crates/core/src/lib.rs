//! Bite bot core logic.
//!
//! This crate provides the liquidation pipeline on top of a
//! [`ChainService`](bitebot_chain::ChainService):
//! - Discovery of existing cups over an id range
//! - Safe/unsafe classification
//! - One-shot batch liquidation of undercollateralized cups
//! - Continuous monitoring of the safe population with per-cup bite tasks
//! - Configuration profiles and environment expansion

mod classifier;
pub mod config;
mod discovery;
mod error;
mod liquidator;
mod monitor;
mod pipeline;
mod position;
mod registry;
mod working_set;

#[cfg(test)]
mod testing;

pub use classifier::{Classification, Classifier};
pub use config::{
    expand_env, load_config, resolve_chain, BotConfig, ChainConfig, ClassifierConfig,
    DiscoveryConfig, LiquidationConfig, MonitorConfig, ResolvedChain,
};
pub use discovery::{Discovery, ScanRange};
pub use error::PipelineError;
pub use liquidator::{BatchReport, BiteFailure, FailureStage, Liquidator};
pub use monitor::{Monitor, MonitorExit, MonitorReport, MonitorStats};
pub use pipeline::{BiteBot, RunMode, RunSummary};
pub use position::{ids, LiquidationStatus, Position, SafetyStatus};
pub use registry::{LiquidationRecord, LiquidationRegistry};
pub use working_set::{Removed, RemovalReason, WorkingSetSnapshot, WorkingSets};
