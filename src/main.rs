//! Bite bot
//!
//! Liquidation keeper for the single-collateral Dai system.
//! - Discovers open CDPs in an id range
//! - Bites every undercollateralized CDP found at startup
//! - Monitors the safe CDPs and bites each one as soon as it turns unsafe

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bitebot_chain::{ProviderManager, SaiTub, TransactionSender, TubSettings};
use bitebot_core::{load_config, resolve_chain, BiteBot, MonitorExit, RunMode, ScanRange};

/// CLI arguments for bitebot.
#[derive(Parser, Debug)]
#[command(name = "bitebot")]
#[command(about = "Bite undercollateralized Sai CDPs")]
#[command(version)]
struct Args {
    /// First CDP id to scan
    first: Option<u64>,

    /// Last CDP id to scan (defaults to FIRST + scan span)
    last: Option<u64>,

    /// Skip the startup batch bite and only monitor safe CDPs
    #[arg(long)]
    monitor_only: bool,

    /// Config file path (overrides BOT_CONFIG and BOT_PROFILE)
    #[arg(short, long, env = "BOT_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Bite bot failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let fmt_layer = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bitebot_core=debug,bitebot_chain=debug")),
        )
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.log_config();

    let range = ScanRange::from_args(
        args.first,
        args.last,
        config.discovery.default_first,
        config.discovery.default_last,
        config.discovery.scan_span,
    )?;
    let mode = if args.monitor_only {
        RunMode::MonitorOnly
    } else {
        RunMode::Full
    };

    let chain = resolve_chain(&config)?;
    info!(
        rpc = %chain.rpc_url,
        tub = %chain.tub_address,
        first = %range.first(),
        last = %range.last(),
        mode = ?mode,
        "Starting bite bot"
    );

    // Provider manager
    let provider = Arc::new(
        ProviderManager::new(&chain.rpc_url, config.chain.tx_poll_interval())
            .await
            .context("Failed to connect to RPC endpoint")?,
    );

    let chain_id = match chain.chain_id {
        Some(id) => id,
        None => provider.chain_id().await.context("Failed to read chain id")?,
    };

    // Transaction sender
    let sender = Arc::new(
        TransactionSender::new(
            &chain.private_key,
            &chain.rpc_url,
            chain_id,
            config.liquidation.gas_limit,
        )
        .await
        .context("Failed to initialize transaction sender")?,
    );
    info!(address = %sender.address, chain_id = chain_id, "Transaction sender initialized");

    let tub = Arc::new(SaiTub::new(
        chain.tub_address,
        provider,
        sender,
        TubSettings {
            finality_depth: config.chain.finality_depth,
            receipt_timeout: config.chain.receipt_timeout(),
            confirmation_timeout: config.chain.confirmation_timeout(),
            expected_chain_id: chain.chain_id,
        },
    ));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
            cancel.cancel();
        }
    });

    let bot = BiteBot::new(tub, &config);
    let summary = bot.run(range, mode, cancel).await?;

    info!(
        discovered = summary.discovered.len(),
        safe = summary.safe.len(),
        unsafe_count = summary.undercollateralized.len(),
        unavailable = summary.unavailable.len(),
        batch_ok = ?summary.batch.as_ref().map(|b| b.is_success()),
        liquidated = summary.monitor.as_ref().map(|m| m.liquidated().len()).unwrap_or(0),
        "Run finished"
    );

    match summary.exit {
        MonitorExit::Exhausted => info!("All monitored CDPs handled"),
        MonitorExit::Cancelled => info!("Stopped on request"),
    }

    Ok(())
}

/// Print startup banner.
fn print_banner() {
    println!(r#"
    ╔╗ ┬┌┬┐┌─┐  ╔╗ ┌─┐┌┬┐
    ╠╩╗│ │ ├┤   ╠╩╗│ │ │
    ╚═╝┴ ┴ └─┘  ╚═╝└─┘ ┴
    CDP Liquidation Bot v0.1.0
    "#);
}
