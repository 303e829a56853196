/// Configuration module for Tradeflow
///
/// This module defines the configuration structures used throughout the engine:
/// chains and their venues, the fee schedule, scheduler cadence, cross-chain polling
/// budget, key custody and storage.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use common::{ChainFamily, OperationKind};

use crate::error::{EngineError, EngineResult};

/// Main configuration structure for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Chain configurations keyed by logical chain name
    #[serde(default)]
    pub chains: BTreeMap<String, ChainConfig>,

    /// Fee schedule
    #[serde(default)]
    pub fees: FeeConfig,

    /// Scheduler cadence
    #[serde(default)]
    pub schedulers: SchedulerConfig,

    /// Cross-chain relayer settings
    #[serde(default)]
    pub cross_chain: CrossChainConfig,

    /// Key custody
    #[serde(default)]
    pub custody: CustodyConfig,

    /// Persistence backend
    #[serde(default)]
    pub storage: StorageConfig,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Instance name
    pub name: String,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Expose Prometheus metrics
    pub enable_metrics: bool,

    /// Metrics listener port
    pub metrics_port: u16,

    /// Default slippage in basis points
    pub default_slippage_bps: u32,

    /// Token metadata cache TTL in seconds
    pub token_cache_ttl_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: "Tradeflow".to_string(),
            log_level: "info".to_string(),
            enable_metrics: false,
            metrics_port: 9090,
            default_slippage_bps: 100,
            token_cache_ttl_secs: 3600,
        }
    }
}

/// Chain-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain ID
    pub chain_id: u64,

    /// Chain family
    pub family: ChainFamily,

    /// RPC endpoint
    pub rpc_url: String,

    /// Native token symbol
    pub native_symbol: String,

    /// Native token decimals
    pub native_decimals: u8,

    /// Use EIP-1559 fees when the node reports a base fee
    #[serde(default)]
    pub eip1559: bool,

    /// Additive buffer on the legacy gas price, in gwei
    #[serde(default = "default_legacy_buffer_gwei")]
    pub legacy_gas_buffer_gwei: u64,

    /// Wrapped native token (routers quote native through it)
    #[serde(default)]
    pub wrapped_native: Option<String>,

    /// Known tokens
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,

    /// Venues in preference order; the first one is the default
    #[serde(default)]
    pub venues: Vec<VenueConfig>,

    /// Is this chain active
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_legacy_buffer_gwei() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

/// Token entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
    #[serde(default)]
    pub name: Option<String>,
}

/// V2-style router entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub name: String,
    pub address: String,
}

/// Trading venue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VenueConfig {
    /// On-chain Uniswap-V2-style routers, tried in order
    V2Router { tag: String, routers: Vec<RouterConfig> },
    /// EVM aggregator REST API
    EvmAggregator {
        tag: String,
        base_url: String,
        #[serde(default)]
        api_key_env: Option<String>,
    },
    /// Solana aggregator REST API
    SolanaAggregator { tag: String, base_url: String },
}

impl VenueConfig {
    pub fn tag(&self) -> &str {
        match self {
            Self::V2Router { tag, .. } | Self::EvmAggregator { tag, .. } | Self::SolanaAggregator { tag, .. } => tag,
        }
    }

    /// Family the venue can serve
    pub fn family(&self) -> ChainFamily {
        match self {
            Self::V2Router { .. } | Self::EvmAggregator { .. } => ChainFamily::Evm,
            Self::SolanaAggregator { .. } => ChainFamily::Solana,
        }
    }
}

/// Fee schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Percentage rate per operation kind (0 <= rate < 100)
    pub rates: FeeRates,

    /// Treasury address per chain family; a missing entry disables extraction for that family
    #[serde(default)]
    pub treasury: BTreeMap<ChainFamily, String>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            rates: FeeRates::default(),
            treasury: BTreeMap::new(),
        }
    }
}

/// Percentage rates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeRates {
    pub swap: Decimal,
    pub bridge: Decimal,
    pub transfer: Decimal,
}

impl Default for FeeRates {
    fn default() -> Self {
        Self {
            swap: Decimal::new(3, 1),
            bridge: Decimal::new(3, 1),
            transfer: Decimal::ZERO,
        }
    }
}

impl FeeRates {
    pub fn rate(&self, kind: OperationKind) -> Decimal {
        match kind {
            OperationKind::Swap => self.swap,
            OperationKind::Bridge => self.bridge,
            OperationKind::Transfer => self.transfer,
        }
    }
}

/// Scheduler cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub dca_period_secs: u64,
    pub limit_order_period_secs: u64,
    /// Delay before an exhausted subscription is deleted
    pub dca_grace_secs: u64,
    /// Failed attempts allowed per DCA cycle before it is skipped
    pub max_cycle_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dca_period_secs: 60,
            limit_order_period_secs: 60,
            dca_grace_secs: 10,
            max_cycle_retries: 3,
        }
    }
}

/// Cross-chain relayer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainConfig {
    pub enabled: bool,
    pub relayer_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub poll_interval_ms: u64,
    pub max_duration_secs: u64,
    pub max_iterations: u32,
}

impl Default for CrossChainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            relayer_url: "https://api.1inch.dev/fusion-plus".to_string(),
            api_key_env: Some("TRADEFLOW_RELAYER_API_KEY".to_string()),
            poll_interval_ms: 1500,
            max_duration_secs: 1800,
            max_iterations: 1200,
        }
    }
}

/// Key custody
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// Env var holding the master secret
    pub master_key_env: String,
    /// JSON file with encrypted wallet credentials
    pub wallets_path: String,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            master_key_env: "TRADEFLOW_MASTER_KEY".to_string(),
            wallets_path: "config/wallets.json".to_string(),
        }
    }
}

/// Persistence backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// memory | redis
    pub backend: String,
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: None,
            key_prefix: "tradeflow".to_string(),
        }
    }
}

impl EngineConfig {
    /// Validate the configuration; any error here prevents the engine from starting
    pub fn validate(&self) -> EngineResult<()> {
        for kind in OperationKind::ALL {
            let rate = self.fees.rates.rate(kind);
            if rate < Decimal::ZERO || rate >= Decimal::ONE_HUNDRED {
                return Err(EngineError::FeeConfiguration(format!(
                    "{} fee rate {} must satisfy 0 <= rate < 100",
                    kind, rate
                )));
            }
        }
        for (family, treasury) in &self.fees.treasury {
            if treasury.trim().is_empty() {
                return Err(EngineError::FeeConfiguration(format!("empty treasury address for {}", family)));
            }
        }

        let mut ids = HashSet::new();
        for (name, chain) in &self.chains {
            if chain.rpc_url.trim().is_empty() {
                return Err(EngineError::Validation(format!("chain {} has no rpc_url", name)));
            }
            if !ids.insert(chain.chain_id) {
                return Err(EngineError::Validation(format!("duplicate chain id {}", chain.chain_id)));
            }
            let mut tags = HashSet::new();
            for venue in &chain.venues {
                if venue.family() != chain.family {
                    return Err(EngineError::Validation(format!(
                        "venue {} on {} serves {} chains",
                        venue.tag(),
                        name,
                        venue.family()
                    )));
                }
                if !tags.insert(venue.tag().to_string()) {
                    return Err(EngineError::Validation(format!("duplicate venue tag {} on {}", venue.tag(), name)));
                }
            }
        }

        if self.schedulers.dca_period_secs == 0 || self.schedulers.limit_order_period_secs == 0 {
            return Err(EngineError::Validation("scheduler periods must be positive".to_string()));
        }
        if self.cross_chain.poll_interval_ms == 0 || self.cross_chain.max_iterations == 0 {
            return Err(EngineError::Validation("cross-chain polling budget must be positive".to_string()));
        }
        match self.storage.backend.as_str() {
            "memory" => {}
            "redis" if self.storage.redis_url.is_some() => {}
            "redis" => return Err(EngineError::Validation("redis backend requires redis_url".to_string())),
            other => return Err(EngineError::Validation(format!("unknown storage backend {}", other))),
        }
        Ok(())
    }
}

/// Configuration manager for handling config loading/saving
pub struct ConfigManager {
    /// Current configuration
    config: RwLock<EngineConfig>,

    /// Configuration file path
    config_path: String,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new(config_path: &str) -> Self {
        Self {
            config: RwLock::new(EngineConfig::default()),
            config_path: config_path.to_string(),
        }
    }

    /// Create a manager holding an already built configuration
    pub fn with_config(config_path: &str, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            config_path: config_path.to_string(),
        })
    }

    /// Load configuration from file
    pub async fn load(&self) -> Result<()> {
        let path = Path::new(&self.config_path);

        if !path.exists() {
            info!("Configuration file not found, using default configuration");
            *self.config.write().await = initialize_default_config();
            return Ok(());
        }

        let config_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", self.config_path))?;

        let config: EngineConfig = serde_yaml::from_str(&config_content)
            .context("Failed to parse configuration file")?;

        *self.config.write().await = config;
        info!("Configuration loaded from {}", self.config_path);

        Ok(())
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config = self.config.read().await;
        let config_yaml = serde_yaml::to_string(&*config)
            .context("Failed to serialize configuration")?;

        let path = Path::new(&self.config_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }

        fs::write(path, config_yaml)
            .with_context(|| format!("Failed to write configuration to file: {}", self.config_path))?;

        info!("Configuration saved to {}", self.config_path);
        Ok(())
    }

    /// Get the current configuration
    pub async fn get_config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// Get a specific chain configuration
    pub async fn get_chain_config(&self, chain: &str) -> Result<ChainConfig> {
        let config = self.config.read().await;

        config.chains.get(chain)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Chain configuration not found for chain {}", chain))
    }
}

fn token(symbol: &str, address: &str, decimals: u8) -> TokenConfig {
    TokenConfig {
        symbol: symbol.to_string(),
        address: address.to_string(),
        decimals,
        name: None,
    }
}

fn router(name: &str, address: &str) -> RouterConfig {
    RouterConfig {
        name: name.to_string(),
        address: address.to_string(),
    }
}

fn aggregator(base_url: &str) -> VenueConfig {
    VenueConfig::EvmAggregator {
        tag: "aggregator".to_string(),
        base_url: base_url.to_string(),
        api_key_env: Some("TRADEFLOW_AGGREGATOR_API_KEY".to_string()),
    }
}

/// Create a default Ethereum chain configuration
pub fn default_ethereum_config() -> ChainConfig {
    ChainConfig {
        chain_id: 1,
        family: ChainFamily::Evm,
        rpc_url: "https://eth.llamarpc.com".to_string(),
        native_symbol: "ETH".to_string(),
        native_decimals: 18,
        eip1559: true,
        legacy_gas_buffer_gwei: 2,
        wrapped_native: Some("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string()),
        tokens: vec![
            token("WETH", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", 18),
            token("USDC", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
            token("USDT", "0xdAC17F958D2ee523a2206206994597C13D831ec7", 6),
        ],
        venues: vec![
            VenueConfig::V2Router {
                tag: "uniswap".to_string(),
                routers: vec![
                    router("UniswapV2", "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
                    router("Sushiswap", "0xd9e1cE17f2641f24aE83637ab66a2cca9C378B9F"),
                ],
            },
            aggregator("https://api.1inch.dev/swap/v6.0/1"),
        ],
        active: true,
    }
}

/// Create a default BSC chain configuration
pub fn default_bsc_config() -> ChainConfig {
    ChainConfig {
        chain_id: 56,
        family: ChainFamily::Evm,
        rpc_url: "https://bsc-dataseed.binance.org".to_string(),
        native_symbol: "BNB".to_string(),
        native_decimals: 18,
        eip1559: false,
        legacy_gas_buffer_gwei: 2,
        wrapped_native: Some("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c".to_string()),
        tokens: vec![
            token("WBNB", "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c", 18),
            token("USDT", "0x55d398326f99059fF775485246999027B3197955", 18),
            token("BUSD", "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56", 18),
        ],
        venues: vec![
            VenueConfig::V2Router {
                tag: "pancakeswap".to_string(),
                routers: vec![
                    router("PancakeSwapV2", "0x10ED43C718714eb63d5aA57B78B54704E256024E"),
                    router("BiSwap", "0x3a6d8cA21D1CF76F653A67577FA0D27453350dD8"),
                ],
            },
            aggregator("https://api.1inch.dev/swap/v6.0/56"),
        ],
        active: true,
    }
}

/// Create a default Base chain configuration
pub fn default_base_config() -> ChainConfig {
    ChainConfig {
        chain_id: 8453,
        family: ChainFamily::Evm,
        rpc_url: "https://mainnet.base.org".to_string(),
        native_symbol: "ETH".to_string(),
        native_decimals: 18,
        eip1559: true,
        legacy_gas_buffer_gwei: 2,
        wrapped_native: Some("0x4200000000000000000000000000000000000006".to_string()),
        tokens: vec![
            token("WETH", "0x4200000000000000000000000000000000000006", 18),
            token("USDC", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6),
        ],
        venues: vec![
            VenueConfig::V2Router {
                tag: "uniswap".to_string(),
                routers: vec![router("UniswapV2", "0x4752ba5DBc23f44D87826276BF6Fd6b1C372aD24")],
            },
            aggregator("https://api.1inch.dev/swap/v6.0/8453"),
        ],
        active: true,
    }
}

/// Create a default Arbitrum chain configuration
pub fn default_arbitrum_config() -> ChainConfig {
    ChainConfig {
        chain_id: 42161,
        family: ChainFamily::Evm,
        rpc_url: "https://arb1.arbitrum.io/rpc".to_string(),
        native_symbol: "ETH".to_string(),
        native_decimals: 18,
        eip1559: true,
        legacy_gas_buffer_gwei: 2,
        wrapped_native: Some("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1".to_string()),
        tokens: vec![
            token("WETH", "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1", 18),
            token("USDC", "0xaf88d065e77c8cC2239327C5EDb3A432268e5831", 6),
        ],
        venues: vec![
            VenueConfig::V2Router {
                tag: "sushiswap".to_string(),
                routers: vec![router("Sushiswap", "0x1b02dA8Cb0d097eB8D57A175b88c7D8b47997506")],
            },
            aggregator("https://api.1inch.dev/swap/v6.0/42161"),
        ],
        active: true,
    }
}

/// Create a default Solana chain configuration
pub fn default_solana_config() -> ChainConfig {
    ChainConfig {
        chain_id: 101,
        family: ChainFamily::Solana,
        rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
        native_symbol: "SOL".to_string(),
        native_decimals: 9,
        eip1559: false,
        legacy_gas_buffer_gwei: 0,
        wrapped_native: Some(common::NATIVE_SOLANA_MARKER.to_string()),
        tokens: vec![
            token("USDC", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", 6),
            token("USDT", "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", 6),
        ],
        venues: vec![VenueConfig::SolanaAggregator {
            tag: "jupiter".to_string(),
            base_url: "https://quote-api.jup.ag/v6".to_string(),
        }],
        active: true,
    }
}

/// Initialize default configuration with common chains
pub fn initialize_default_config() -> EngineConfig {
    let mut config = EngineConfig::default();

    config.chains.insert("ethereum".to_string(), default_ethereum_config());
    config.chains.insert("bsc".to_string(), default_bsc_config());
    config.chains.insert("base".to_string(), default_base_config());
    config.chains.insert("arbitrum".to_string(), default_arbitrum_config());
    config.chains.insert("solana".to_string(), default_solana_config());

    config
}
