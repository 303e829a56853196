/// Tradeflow - Main entry point
///
/// This file contains the main function and serves as the entry point
/// for the Tradeflow engine.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::signal;
use tracing::{error, info};

use tradeflow::{
    config::ConfigManager,
    greeting, init_logging, initialize_default_config, AppState, OperationKind, TradeIntent,
};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/tradeflow.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand)]
enum Commands {
    /// Generate default configuration
    Init,

    /// Load and validate the configuration
    Check,

    /// Run both schedulers until Ctrl-C
    Run,

    /// Dispatch one trade
    Swap {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        chain: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: Decimal,
        /// Destination chain for cross-chain swaps
        #[arg(long)]
        destination: Option<String>,
        /// swap | bridge | transfer
        #[arg(long, default_value = "swap")]
        operation: OperationKind,
        /// Recipient for transfers
        #[arg(long)]
        recipient: Option<String>,
        #[arg(long)]
        slippage_bps: Option<u32>,
        #[arg(long)]
        venue: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;
    println!("{}", greeting());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init => init_config(&cli.config).await?,
        Commands::Check => check_config(&cli.config).await?,
        Commands::Run => run_engine(&cli.config).await?,
        Commands::Swap {
            user_id,
            address,
            chain,
            from,
            to,
            amount,
            destination,
            operation,
            recipient,
            slippage_bps,
            venue,
        } => {
            let mut intent = TradeIntent::swap(user_id, address, chain, from, to, amount).with_venue(venue);
            intent.operation = operation;
            intent.destination_chain = destination;
            intent.recipient = recipient;
            intent.slippage_bps = slippage_bps;
            run_swap(&cli.config, intent).await?;
        }
    }

    Ok(())
}

/// Initialize configuration with defaults
async fn init_config(path: &str) -> Result<()> {
    info!("Writing default configuration to {}", path);
    let manager = ConfigManager::with_config(path, initialize_default_config());
    manager.save().await?;
    info!("Default configuration generated, edit it and run `tradeflow run`");
    Ok(())
}

async fn check_config(path: &str) -> Result<()> {
    let manager = ConfigManager::new(path);
    manager.load().await?;
    let config = manager.get_config().await;
    config.validate().context("Configuration is invalid")?;
    info!(
        "Configuration OK: {} chains, storage {}, cross-chain {}",
        config.chains.len(),
        config.storage.backend,
        if config.cross_chain.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn load_state(path: &str) -> Result<AppState> {
    let manager = Arc::new(ConfigManager::new(path));
    manager.load().await?;
    let mut state = AppState::new(manager);
    state.init().await?;
    Ok(state)
}

/// Run the schedulers
async fn run_engine(path: &str) -> Result<()> {
    let mut state = load_state(path).await?;
    state.start().await?;
    info!("Tradeflow started");

    wait_for_shutdown().await;

    state.stop().await?;
    Ok(())
}

async fn run_swap(path: &str, intent: TradeIntent) -> Result<()> {
    let state = load_state(path).await?;
    let engine = state.engine()?;
    match engine.swap(intent).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            error!("Trade failed ({}): {}", e.category(), e);
            Err(e.into())
        }
    }
}

/// Wait for Ctrl-C
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
