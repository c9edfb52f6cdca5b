//! Configuration management with profile support.
//!
//! Provides centralized configuration for all bot parameters with
//! support for different profiles (testing, production).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Node and contract settings
    #[serde(default)]
    pub chain: ChainConfig,

    /// Id-range scanning
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Safe/unsafe partitioning
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Bite submission and confirmation
    #[serde(default)]
    pub liquidation: LiquidationConfig,

    /// Continuous monitoring of safe cups
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Node, contract and transaction-tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint (supports `${VAR}` expansion)
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Tub contract address (supports `${VAR}` expansion)
    #[serde(default = "default_tub_address")]
    pub tub_address: String,

    /// Chain id the node must report; unchecked when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    /// Environment variable holding the signing key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,

    /// Blocks past inclusion after which a bite counts as final
    #[serde(default = "default_finality_depth")]
    pub finality_depth: u64,

    /// Receipt/head polling interval (milliseconds)
    #[serde(default = "default_tx_poll_interval")]
    pub tx_poll_interval_ms: u64,

    /// Maximum wait for a receipt (seconds)
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,

    /// Maximum wait for finality or confirmations (seconds)
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

fn default_rpc_url() -> String {
    "${RPC_URL}".to_string()
}
fn default_tub_address() -> String {
    // Sai Tub on Ethereum mainnet
    "0x448a5065aeBB8E423F0896E6c5D525C040f59af3".to_string()
}
fn default_private_key_env() -> String {
    "PRIVATE_KEY".to_string()
}
fn default_finality_depth() -> u64 {
    1
}
fn default_tx_poll_interval() -> u64 {
    1000
}
fn default_receipt_timeout() -> u64 {
    300
}
fn default_confirmation_timeout() -> u64 {
    600
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            tub_address: default_tub_address(),
            chain_id: None,
            private_key_env: default_private_key_env(),
            finality_depth: default_finality_depth(),
            tx_poll_interval_ms: default_tx_poll_interval(),
            receipt_timeout_secs: default_receipt_timeout(),
            confirmation_timeout_secs: default_confirmation_timeout(),
        }
    }
}

impl ChainConfig {
    pub fn tx_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tx_poll_interval_ms)
    }
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Id-range scanning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// First id scanned when no range is given
    #[serde(default = "default_first_id")]
    pub default_first: u64,

    /// Last id scanned when no range is given
    #[serde(default = "default_last_id")]
    pub default_last: u64,

    /// Range width used when only the first id is given
    #[serde(default = "default_scan_span")]
    pub scan_span: u64,

    /// Maximum concurrent existence queries
    #[serde(default = "default_query_concurrency")]
    pub max_concurrent: usize,
}

fn default_first_id() -> u64 {
    1
}
fn default_last_id() -> u64 {
    100
}
fn default_scan_span() -> u64 {
    100
}
fn default_query_concurrency() -> usize {
    32
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_first: default_first_id(),
            default_last: default_last_id(),
            scan_span: default_scan_span(),
            max_concurrent: default_query_concurrency(),
        }
    }
}

/// Safe/unsafe partitioning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Maximum concurrent safety queries
    #[serde(default = "default_query_concurrency")]
    pub max_concurrent: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_query_concurrency(),
        }
    }
}

/// Bite submission parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Gas limit applied to every bite (no estimation)
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Blocks to wait past finality before a bite counts as settled
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// Maximum concurrent bite submissions in a batch
    #[serde(default = "default_submit_concurrency")]
    pub max_concurrent: usize,
}

fn default_gas_limit() -> u64 {
    4_000_000
}
fn default_confirmations() -> u64 {
    3
}
fn default_submit_concurrency() -> usize {
    8
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            gas_limit: default_gas_limit(),
            confirmations: default_confirmations(),
            max_concurrent: default_submit_concurrency(),
        }
    }
}

/// Monitoring loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between polling iterations (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum concurrent safety queries per iteration
    #[serde(default = "default_query_concurrency")]
    pub max_concurrent: usize,

    /// Time allowed for in-flight liquidations to wind down on shutdown (seconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_poll_interval() -> u64 {
    2000
}
fn default_shutdown_grace() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_concurrent: default_query_concurrency(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            chain: ChainConfig::default(),
            discovery: DiscoveryConfig::default(),
            classifier: ClassifierConfig::default(),
            liquidation: LiquidationConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl BotConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Create a testing profile for a test network with fast blocks.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            chain: ChainConfig {
                finality_depth: 0,
                tx_poll_interval_ms: 500,
                receipt_timeout_secs: 120,
                confirmation_timeout_secs: 240,
                ..Default::default()
            },
            discovery: DiscoveryConfig::default(),
            classifier: ClassifierConfig::default(),
            liquidation: LiquidationConfig {
                confirmations: 1,
                ..Default::default()
            },
            monitor: MonitorConfig {
                poll_interval_ms: 500,
                shutdown_grace_secs: 10,
                ..Default::default()
            },
        }
    }

    /// Create a production profile with conservative settings.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            chain: ChainConfig {
                chain_id: Some(1),
                finality_depth: 2,
                ..Default::default()
            },
            discovery: DiscoveryConfig {
                max_concurrent: 16, // Stay under public RPC rate limits
                ..Default::default()
            },
            classifier: ClassifierConfig { max_concurrent: 16 },
            liquidation: LiquidationConfig {
                confirmations: 3,
                max_concurrent: 4,
                ..Default::default()
            },
            monitor: MonitorConfig {
                poll_interval_ms: 4000,
                max_concurrent: 16,
                shutdown_grace_secs: 60,
            },
        }
    }

    /// Get profile from environment variable BOT_PROFILE, or default.
    /// Supported values: testing, production
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    /// Resolve a named profile; unknown names fall back to the default.
    pub fn from_profile(profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            rpc = %self.chain.rpc_url,
            tub = %self.chain.tub_address,
            chain_id = ?self.chain.chain_id,
            finality_depth = self.chain.finality_depth,
            "Chain settings"
        );
        tracing::info!(
            discovery_concurrency = self.discovery.max_concurrent,
            classifier_concurrency = self.classifier.max_concurrent,
            "Scan parameters"
        );
        tracing::info!(
            gas_limit = self.liquidation.gas_limit,
            confirmations = self.liquidation.confirmations,
            "Liquidation parameters"
        );
        tracing::info!(
            poll_interval_ms = self.monitor.poll_interval_ms,
            monitor_concurrency = self.monitor.max_concurrent,
            "Monitor parameters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.liquidation.gas_limit, 4_000_000);
        assert_eq!(config.liquidation.confirmations, 3);
        assert_eq!(config.discovery.default_first, 1);
        assert_eq!(config.discovery.default_last, 100);
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_profiles() {
        assert_eq!(BotConfig::from_profile("test").profile, "testing");
        assert_eq!(BotConfig::from_profile("PROD").profile, "production");
        assert_eq!(BotConfig::from_profile("unknown").profile, "default");
        assert_eq!(BotConfig::production().chain.chain_id, Some(1));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BotConfig::from_toml(
            r#"
            profile = "kovan"

            [chain]
            chain_id = 42

            [monitor]
            poll_interval_ms = 750
            "#,
        )
        .unwrap();

        assert_eq!(config.profile, "kovan");
        assert_eq!(config.chain.chain_id, Some(42));
        assert_eq!(config.chain.private_key_env, "PRIVATE_KEY");
        assert_eq!(config.monitor.poll_interval_ms, 750);
        assert_eq!(config.monitor.max_concurrent, 32);
        assert_eq!(config.liquidation.gas_limit, 4_000_000);
    }

    #[test]
    fn test_serialization() {
        let config = BotConfig::testing();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"testing\""));

        let parsed: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.profile, "testing");
        assert_eq!(parsed.monitor.poll_interval_ms, 500);
    }
}
