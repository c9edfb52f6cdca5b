//! Configuration loading and resolution.
//!
//! Resolves the bot configuration from (in order of precedence) an explicit
//! TOML file, the `BOT_CONFIG` environment variable, or the `BOT_PROFILE`
//! named profile, then expands `${VAR}` references in chain settings.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use tracing::info;

use super::BotConfig;

/// Chain settings with environment variables expanded and parsed.
#[derive(Clone)]
pub struct ResolvedChain {
    pub rpc_url: String,
    pub tub_address: Address,
    pub chain_id: Option<u64>,
    pub private_key: String,
}

impl std::fmt::Debug for ResolvedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedChain")
            .field("rpc_url", &self.rpc_url)
            .field("tub_address", &self.tub_address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

/// Load the bot configuration.
pub fn load_config(path: Option<&str>) -> Result<BotConfig> {
    let path = path
        .map(str::to_string)
        .or_else(|| std::env::var("BOT_CONFIG").ok());

    let mut config = match path {
        Some(path) => {
            info!(path = %path, "Loading configuration file");
            BotConfig::from_file(&path)
                .with_context(|| format!("Failed to load config file {path}"))?
        }
        None => BotConfig::from_env(),
    };

    config.chain.rpc_url = expand_env(&config.chain.rpc_url);
    config.chain.tub_address = expand_env(&config.chain.tub_address);
    Ok(config)
}

/// Resolve the chain section into connection-ready values.
pub fn resolve_chain(config: &BotConfig) -> Result<ResolvedChain> {
    let chain = &config.chain;

    if chain.rpc_url.contains("${") {
        anyhow::bail!("Unresolved RPC URL {}: set the referenced variable", chain.rpc_url);
    }

    let tub_address: Address = chain
        .tub_address
        .parse()
        .with_context(|| format!("Invalid tub address {}", chain.tub_address))?;

    let private_key = std::env::var(&chain.private_key_env)
        .with_context(|| format!("Missing env var: {}", chain.private_key_env))?;

    Ok(ResolvedChain {
        rpc_url: chain.rpc_url.clone(),
        tub_address,
        chain_id: chain.chain_id,
        private_key,
    })
}

/// Expand ${VAR_NAME} patterns with environment variable values.
/// Unset variables are left untouched.
pub fn expand_env(s: &str) -> String {
    let mut result = s.to_string();
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}
