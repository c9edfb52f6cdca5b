//! Configuration system for the bite bot.
//!
//! This module provides:
//! - Bot runtime configuration (profiles, concurrency caps, timing)
//! - File loading with `${VAR}` environment expansion
//! - Resolution of chain settings into connection-ready values

mod bot;
mod loader;

pub use bot::{
    BotConfig, ChainConfig, ClassifierConfig, DiscoveryConfig, LiquidationConfig, MonitorConfig,
};
pub use loader::{expand_env, load_config, resolve_chain, ResolvedChain};
