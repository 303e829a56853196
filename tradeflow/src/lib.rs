//! Tradeflow Library
//!
//! Multi-chain trade execution and scheduling engine: one-shot swaps and
//! transfers, cross-chain swaps over a hashlock relayer, recurring DCA buys and
//! conditional limit orders, all paid from custodial wallets with a protocol fee
//! skimmed before execution.

pub mod types;
pub mod error;
pub mod config;
pub mod cache;
pub mod metric;
pub mod notifications;
pub mod chain_adapters;
pub mod tokens;
pub mod custody;
pub mod store;
pub mod tradelogic;
pub mod scheduler;
pub mod service;

// Re-export các kiểu dùng chung từ common
pub use common::{ChainDescriptor, ChainFamily, CrossChainStatus, OperationKind};

pub use crate::config::initialize_default_config;
pub use crate::error::{EngineError, EngineResult, ErrorCategory};
pub use crate::service::{DcaRequest, LimitOrderRequest, TradingEngine};
pub use crate::types::{TradeIntent, TradeResult};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ethers::providers::{Http, Provider};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cache::TokenMetadataCache;
use crate::chain_adapters::{ChainClient, ChainRegistry, EvmAdapter, HashlockRelayerClient, SolAdapter, TokenMetadata};
use crate::config::{ConfigManager, EngineConfig, VenueConfig};
use crate::custody::{AesGcmCustody, JsonWalletDirectory, KeyVault};
use crate::notifications::{spawn_event_logger, EventBus};
use crate::scheduler::{spawn_scheduler, DcaScheduler, LimitOrderScheduler, SchedulerPass, SystemClock};
use crate::store::{DcaStore, InMemoryStore, LimitOrderStore, RedisStore};
use crate::tokens::{ConfigTokenResolver, TokenResolver};
use crate::tradelogic::common::{FeeExtractor, FeeSchedule, WalletLocks};
use crate::tradelogic::cross_chain::{CrossChainOrchestrator, PollPolicy};
use crate::tradelogic::executors::{EvmAggregatorVenue, SolanaAggregatorVenue, V2RouterVenue};
use crate::tradelogic::{
    ExecutorContext, SwapExecutor, SwapExecutorRegistry, SwapVenue, TradeDispatcher, VenueQuotePriceSource, VenueSwapExecutor,
};

/// Application state containing the main components of the engine
///
/// Built once from configuration by `init`; `start` attaches the event logger
/// and spawns both schedulers, `stop` signals them and waits for the current
/// passes to finish.
pub struct AppState {
    /// Configuration manager
    pub config: Arc<ConfigManager>,

    /// Engine event bus
    pub events: EventBus,

    /// Facade used by the CLI and the API layer
    pub engine: Option<Arc<TradingEngine>>,

    /// Scheduler passes and their periods
    schedulers: Vec<(Arc<dyn SchedulerPass>, Duration)>,

    /// Shutdown signal shared by schedulers and the cross-chain poller
    shutdown_tx: watch::Sender<bool>,

    /// Event logger task
    event_logger: Option<JoinHandle<()>>,

    /// Scheduler tasks
    pub background_tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    /// Create a new application state with given configuration
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config: config_manager,
            events: EventBus::default(),
            engine: None,
            schedulers: Vec::new(),
            shutdown_tx,
            event_logger: None,
            background_tasks: Vec::new(),
        }
    }

    /// Build every component from the loaded configuration
    pub async fn init(&mut self) -> Result<()> {
        info!("Initializing Tradeflow engine");
        let config = self.config.get_config().await;
        config.validate().context("Invalid configuration")?;

        if config.general.enable_metrics {
            metric::init_metrics(config.general.metrics_port)?;
            debug!("Metrics initialized");
        }

        let cache = Arc::new(TokenMetadataCache::new(Duration::from_secs(config.general.token_cache_ttl_secs)));
        seed_token_cache(&cache, &config).await;

        let (registry, providers) = build_chain_registry(&config, cache)?;
        info!("{} chains registered: {}", registry.len(), registry.chain_names().join(", "));

        let resolver: Arc<dyn TokenResolver> = Arc::new(ConfigTokenResolver::new(&config).with_registry(registry.clone()));
        let fees = Arc::new(FeeExtractor::new(FeeSchedule::from_config(&config.fees)?));
        let custody = AesGcmCustody::from_env(&config.custody.master_key_env)?;
        let directory = JsonWalletDirectory::from_file(&config.custody.wallets_path)
            .with_context(|| format!("Failed to load wallets from {}", config.custody.wallets_path))?;
        let vault = KeyVault::new(Arc::new(directory), Arc::new(custody));
        let locks = Arc::new(WalletLocks::new());

        let context = ExecutorContext {
            resolver: resolver.clone(),
            fees: fees.clone(),
            vault: vault.clone(),
            locks: locks.clone(),
            default_slippage_bps: config.general.default_slippage_bps,
        };
        let executors = build_executors(&config, &registry, &providers, context)?;

        let mut dispatcher = TradeDispatcher::new(executors.clone(), self.events.clone());
        if config.cross_chain.enabled {
            let api_key = config.cross_chain.api_key_env.as_deref().and_then(|var| std::env::var(var).ok());
            let relayer = HashlockRelayerClient::new(&config.cross_chain.relayer_url, api_key)?;
            let orchestrator = CrossChainOrchestrator::new(
                Arc::new(relayer),
                registry.clone(),
                resolver.clone(),
                fees,
                vault,
                locks,
                PollPolicy::from(&config.cross_chain),
            )
            .with_shutdown(self.shutdown_tx.subscribe());
            dispatcher = dispatcher.with_cross_chain(Arc::new(orchestrator));
            info!("Cross-chain routing enabled via {}", config.cross_chain.relayer_url);
        }
        let dispatcher = Arc::new(dispatcher);

        let (dca_store, order_store) = build_stores(&config)?;
        let prices = Arc::new(VenueQuotePriceSource::new(executors));
        let clock = Arc::new(SystemClock);

        self.engine = Some(Arc::new(TradingEngine::new(
            dispatcher.clone(),
            resolver,
            prices.clone(),
            dca_store.clone(),
            order_store.clone(),
            self.events.clone(),
            clock.clone(),
        )));

        let dca = DcaScheduler::new(
            dca_store,
            dispatcher.clone(),
            self.events.clone(),
            clock.clone(),
            Duration::from_secs(config.schedulers.dca_grace_secs),
            config.schedulers.max_cycle_retries,
        );
        let limit_orders = LimitOrderScheduler::new(order_store, prices, dispatcher, self.events.clone(), clock);
        self.schedulers = vec![
            (Arc::new(dca) as Arc<dyn SchedulerPass>, Duration::from_secs(config.schedulers.dca_period_secs)),
            (Arc::new(limit_orders) as Arc<dyn SchedulerPass>, Duration::from_secs(config.schedulers.limit_order_period_secs)),
        ];

        info!("Tradeflow initialization complete");
        Ok(())
    }

    /// Engine facade, available after `init`
    pub fn engine(&self) -> Result<Arc<TradingEngine>> {
        self.engine.clone().ok_or_else(|| anyhow!("engine is not initialized"))
    }

    /// Attach the event logger and start both schedulers
    pub async fn start(&mut self) -> Result<()> {
        if self.engine.is_none() {
            return Err(anyhow!("init must run before start"));
        }
        info!("Starting Tradeflow services");
        self.event_logger = Some(spawn_event_logger(&self.events));
        for (pass, period) in &self.schedulers {
            let handle = spawn_scheduler(pass.clone(), *period, self.shutdown_tx.subscribe());
            self.background_tasks.push(handle);
        }
        info!("All services started");
        Ok(())
    }

    /// Signal shutdown and wait for running passes
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping Tradeflow");
        if self.shutdown_tx.send(true).is_err() {
            debug!("No task was listening for shutdown");
        }
        let handles: Vec<JoinHandle<()>> = self.background_tasks.drain(..).collect();
        match tokio::time::timeout(Duration::from_secs(30), join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Scheduler task failed: {}", e);
                    }
                }
            }
            Err(_) => warn!("Scheduler passes still running after 30s, leaving them"),
        }
        // the logger only ends when the bus closes
        if let Some(logger) = self.event_logger.take() {
            logger.abort();
        }
        info!("Tradeflow stopped");
        Ok(())
    }
}

async fn seed_token_cache(cache: &TokenMetadataCache, config: &EngineConfig) {
    for (chain, chain_config) in &config.chains {
        for token in &chain_config.tokens {
            let metadata = TokenMetadata {
                name: token.name.clone().unwrap_or_else(|| token.symbol.clone()),
                symbol: token.symbol.clone(),
                decimals: token.decimals,
            };
            cache.seed(chain, &token.address, metadata).await;
        }
    }
}

fn build_chain_registry(
    config: &EngineConfig,
    cache: Arc<TokenMetadataCache>,
) -> Result<(ChainRegistry, HashMap<String, Arc<Provider<Http>>>)> {
    let mut clients: Vec<Arc<dyn ChainClient>> = Vec::new();
    let mut providers = HashMap::new();
    for (name, chain_config) in &config.chains {
        if !chain_config.active {
            debug!("Chain {} is inactive, skipping", name);
            continue;
        }
        info!("Initializing adapter for chain: {} (ID: {})", name, chain_config.chain_id);
        match chain_config.family {
            ChainFamily::Evm => {
                let adapter = EvmAdapter::new(name, chain_config, cache.clone())?;
                providers.insert(name.clone(), adapter.provider());
                clients.push(Arc::new(adapter));
            }
            ChainFamily::Solana => clients.push(Arc::new(SolAdapter::new(name, chain_config, cache.clone())?)),
        }
    }
    Ok((ChainRegistry::new(clients)?, providers))
}

fn build_venue(
    chain: &str,
    venue: &VenueConfig,
    wrapped_native: Option<&str>,
    providers: &HashMap<String, Arc<Provider<Http>>>,
) -> Result<Arc<dyn SwapVenue>> {
    let venue: Arc<dyn SwapVenue> = match venue {
        VenueConfig::V2Router { tag, routers } => {
            let provider = providers
                .get(chain)
                .cloned()
                .ok_or_else(|| anyhow!("router venue {} needs an EVM provider on {}", tag, chain))?;
            let wrapped = wrapped_native.ok_or_else(|| anyhow!("router venue {} on {} needs wrapped_native", tag, chain))?;
            Arc::new(V2RouterVenue::new(tag, chain, provider, routers, wrapped)?)
        }
        VenueConfig::EvmAggregator { tag, base_url, api_key_env } => {
            let api_key = api_key_env.as_deref().and_then(|var| std::env::var(var).ok());
            if api_key_env.is_some() && api_key.is_none() {
                warn!("Aggregator {} on {} has no API key set", tag, chain);
            }
            Arc::new(EvmAggregatorVenue::new(tag, chain, base_url, api_key)?)
        }
        VenueConfig::SolanaAggregator { tag, base_url } => Arc::new(SolanaAggregatorVenue::new(tag, chain, base_url)?),
    };
    Ok(venue)
}

fn build_executors(
    config: &EngineConfig,
    registry: &ChainRegistry,
    providers: &HashMap<String, Arc<Provider<Http>>>,
    context: ExecutorContext,
) -> Result<SwapExecutorRegistry> {
    let mut executors: Vec<Arc<dyn SwapExecutor>> = Vec::new();
    for name in registry.chain_names() {
        let chain_config = config
            .chains
            .get(&name)
            .ok_or_else(|| anyhow!("chain {} has no configuration", name))?;
        if chain_config.venues.is_empty() {
            warn!("Chain {} has no venues, swaps disabled there", name);
            continue;
        }
        let venues = chain_config
            .venues
            .iter()
            .map(|venue| build_venue(&name, venue, chain_config.wrapped_native.as_deref(), providers))
            .collect::<Result<Vec<_>>>()?;
        let client = registry.get(&name)?;
        executors.push(Arc::new(VenueSwapExecutor::new(client, venues, context.clone())?));
    }
    Ok(SwapExecutorRegistry::new(executors)?)
}

fn build_stores(config: &EngineConfig) -> Result<(Arc<dyn DcaStore>, Arc<dyn LimitOrderStore>)> {
    match config.storage.backend.as_str() {
        "redis" => {
            let url = config
                .storage
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow!("redis backend requires redis_url"))?;
            let store = Arc::new(RedisStore::new(url, &config.storage.key_prefix)?);
            info!("Using redis storage with prefix {}", config.storage.key_prefix);
            let dca: Arc<dyn DcaStore> = store.clone();
            let orders: Arc<dyn LimitOrderStore> = store;
            Ok((dca, orders))
        }
        _ => {
            let store = Arc::new(InMemoryStore::new());
            warn!("Using in-memory storage, standing orders are lost on restart");
            let dca: Arc<dyn DcaStore> = store.clone();
            let orders: Arc<dyn LimitOrderStore> = store;
            Ok((dca, orders))
        }
    }
}

/// Initialize logging; `RUST_LOG` overrides the configured level
pub fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to set global default subscriber: {}", e))?;

    info!("Logging initialized at {} level", log_level);
    Ok(())
}

/// Version information
pub mod version {
    /// Current version from Cargo.toml
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Get a greeting message with version info
pub fn greeting() -> String {
    format!("Tradeflow v{} starting up", version::VERSION)
}
