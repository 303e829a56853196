//! Shared fakes for the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::signers::Signer;
use ethers::types::{Address, Bytes, H256, U256};
use mockall::mock;
use rust_decimal::Decimal;
use zeroize::Zeroizing;

use tradeflow::chain_adapters::evm_adapter::wallet_from_key;
use tradeflow::chain_adapters::{ChainClient, ChainSigner, FeeQuote, PreparedTx, SubmittedTx, TokenMetadata};
use tradeflow::config::{default_base_config, default_bsc_config, EngineConfig, FeeConfig};
use tradeflow::custody::{EncryptedKey, JsonWalletDirectory, KeyCustody, KeyVault, WalletCredential};
use tradeflow::tokens::ConfigTokenResolver;
use tradeflow::tradelogic::common::{FeeExtractor, FeeSchedule, WalletLocks};
use tradeflow::tradelogic::executors::ExecutorContext;
use tradeflow::tradelogic::traits::{
    BridgeVenue, CrossChainOrderState, CrossChainQuote, CrossChainQuoteRequest, PriceSource, RoutePlan, RouteRequest,
    SwapVenue, TradeDispatch,
};
use tradeflow::types::{TokenInfo, TradeIntent, TradeResult};
use tradeflow::{ChainDescriptor, ChainFamily, CrossChainStatus, EngineError, EngineResult};

pub const USER: &str = "user-1";
pub const TREASURY: &str = "0x00000000000000000000000000000000000000fe";
pub const ROUTER: &str = "0x00000000000000000000000000000000000000aa";
pub const BSC_USDT: &str = "0x55d398326f99059fF775485246999027B3197955";
pub const BSC_BUSD: &str = "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56";
pub const TEST_KEY: [u8; 32] = [0x11; 32];
pub const GAS_PRICE_WEI: u64 = 1_000_000_000;
pub const GAS_USED: u64 = 21_000;

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

pub fn ether(value: u64) -> U256 {
    U256::from(value) * U256::exp10(18)
}

/// Address of the wallet behind `TEST_KEY`
pub fn user_address() -> String {
    format!("{:?}", wallet_from_key(&TEST_KEY).unwrap().address())
}

pub fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.chains.insert("bsc".to_string(), default_bsc_config());
    config.chains.insert("base".to_string(), default_base_config());
    config
}

pub fn fee_config(swap_rate: &str) -> FeeConfig {
    let mut fees = FeeConfig::default();
    fees.rates.swap = dec(swap_rate);
    fees.rates.bridge = dec(swap_rate);
    fees.treasury.insert(ChainFamily::Evm, TREASURY.to_string());
    fees
}

mock! {
    pub Custody {}

    #[async_trait]
    impl KeyCustody for Custody {
        async fn decrypt(&self, encrypted: &EncryptedKey) -> EngineResult<Zeroizing<Vec<u8>>>;
    }
}

mock! {
    pub Dispatch {}

    #[async_trait]
    impl TradeDispatch for Dispatch {
        async fn dispatch(&self, intent: TradeIntent) -> EngineResult<TradeResult>;
    }
}

/// Vault holding the test wallet for `USER`
pub async fn test_vault() -> KeyVault {
    let directory = JsonWalletDirectory::new();
    directory
        .insert(WalletCredential {
            user_id: USER.to_string(),
            address: user_address(),
            encrypted_key: EncryptedKey {
                salt: "c2FsdA==".to_string(),
                nonce: "bm9uY2U=".to_string(),
                ciphertext: "a2V5".to_string(),
            },
        })
        .await;
    let mut custody = MockCustody::new();
    custody.expect_decrypt().returning(|_| Ok(Zeroizing::new(TEST_KEY.to_vec())));
    KeyVault::new(Arc::new(directory), Arc::new(custody))
}

pub async fn executor_context(swap_rate: &str) -> ExecutorContext {
    let config = engine_config();
    ExecutorContext {
        resolver: Arc::new(ConfigTokenResolver::new(&config)),
        fees: Arc::new(FeeExtractor::new(FeeSchedule::from_config(&fee_config(swap_rate)).unwrap())),
        vault: test_vault().await,
        locks: Arc::new(WalletLocks::new()),
        default_slippage_bps: 100,
    }
}

/// EVM chain with one wallet; every call is recorded in `log`
pub struct FakeChain {
    descriptor: ChainDescriptor,
    balances: Mutex<HashMap<String, U256>>,
    allowances: Mutex<HashMap<String, U256>>,
    /// Asset credited on the next `submit`
    swap_output: Mutex<Option<(String, U256)>>,
    pub log: Mutex<Vec<String>>,
}

impl FakeChain {
    pub fn new(name: &str, chain_id: u64, native_symbol: &str) -> Self {
        Self {
            descriptor: ChainDescriptor::new(name, chain_id, native_symbol, ChainFamily::Evm),
            balances: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            swap_output: Mutex::new(None),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn bsc() -> Self {
        Self::new("bsc", 56, "BNB")
    }

    fn key(asset: &str) -> String {
        asset.to_lowercase()
    }

    fn native_key(&self) -> String {
        Self::key(&self.descriptor.native_marker)
    }

    pub fn set_native(&self, amount: U256) {
        let key = self.native_key();
        self.balances.lock().unwrap().insert(key, amount);
    }

    pub fn set_token(&self, token: &str, amount: U256) {
        self.balances.lock().unwrap().insert(Self::key(token), amount);
    }

    pub fn balance(&self, asset: &str) -> U256 {
        self.balances.lock().unwrap().get(&Self::key(asset)).copied().unwrap_or_default()
    }

    pub fn native(&self) -> U256 {
        self.balance(&self.descriptor.native_marker)
    }

    pub fn credit_on_submit(&self, asset: &str, amount: U256) {
        *self.swap_output.lock().unwrap() = Some((Self::key(asset), amount));
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn adjust(&self, key: &str, delta_in: U256, delta_out: U256) {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(key.to_string()).or_default();
        *entry = entry.saturating_add(delta_in).saturating_sub(delta_out);
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    async fn native_balance(&self, _owner: &str) -> EngineResult<U256> {
        Ok(self.native())
    }

    async fn token_balance(&self, token: &str, _owner: &str) -> EngineResult<U256> {
        Ok(self.balance(token))
    }

    async fn fee_quote(&self) -> EngineResult<FeeQuote> {
        Ok(FeeQuote::Legacy { gas_price: U256::from(GAS_PRICE_WEI) })
    }

    fn signer_from_key(&self, key: &[u8]) -> EngineResult<ChainSigner> {
        Ok(ChainSigner::Evm(wallet_from_key(key)?))
    }

    async fn token_metadata(&self, token: &str) -> EngineResult<TokenMetadata> {
        Err(EngineError::TokenNotFound { chain: self.descriptor.name.clone(), symbol: token.to_string() })
    }

    async fn allowance(&self, token: &str, _owner: &str, spender: &str) -> EngineResult<U256> {
        let key = format!("{}:{}", Self::key(token), Self::key(spender));
        Ok(self.allowances.lock().unwrap().get(&key).copied().unwrap_or_default())
    }

    async fn approve(&self, _signer: &ChainSigner, token: &str, spender: &str, amount: U256) -> EngineResult<SubmittedTx> {
        let key = format!("{}:{}", Self::key(token), Self::key(spender));
        self.allowances.lock().unwrap().insert(key, amount);
        self.record(format!("approve:{}", amount));
        Ok(SubmittedTx { tx_ref: "0xapprove".to_string(), fee_paid: U256::zero() })
    }

    async fn estimate_gas(&self, _from: &str, _tx: &PreparedTx) -> EngineResult<U256> {
        Ok(U256::from(100_000u64))
    }

    async fn submit(&self, _signer: &ChainSigner, tx: PreparedTx, _gas_limit: U256, _fee: &FeeQuote) -> EngineResult<SubmittedTx> {
        let fee_paid = U256::from(GAS_USED) * U256::from(GAS_PRICE_WEI);
        let native = self.native_key();
        let value = match tx {
            PreparedTx::Evm { value, .. } => value,
            PreparedTx::Solana { .. } => U256::zero(),
        };
        self.adjust(&native, U256::zero(), fee_paid.saturating_add(value));
        if let Some((asset, amount)) = self.swap_output.lock().unwrap().take() {
            self.adjust(&asset, amount, U256::zero());
        }
        self.record("submit".to_string());
        Ok(SubmittedTx { tx_ref: "0xswap".to_string(), fee_paid })
    }

    async fn transfer(&self, _signer: &ChainSigner, asset: &TokenInfo, to: &str, amount: U256) -> EngineResult<SubmittedTx> {
        self.adjust(&Self::key(&asset.address), U256::zero(), amount);
        self.record(format!("transfer:{}:{}:{}", asset.symbol, to, amount));
        Ok(SubmittedTx { tx_ref: "0xtransfer".to_string(), fee_paid: U256::zero() })
    }
}

/// Venue quoting a fixed output per input unit
pub struct FakeVenue {
    /// Output units per whole input unit
    pub rate: U256,
}

#[async_trait]
impl SwapVenue for FakeVenue {
    fn tag(&self) -> &str {
        "fake"
    }

    async fn quote(&self, from: &TokenInfo, _to: &TokenInfo, amount_in: U256) -> EngineResult<U256> {
        Ok(amount_in * self.rate / U256::exp10(from.decimals as usize))
    }

    async fn build_swap(&self, request: &RouteRequest) -> EngineResult<RoutePlan> {
        let expected_out = self.quote(&request.from, &request.to, request.amount_in).await?;
        let value = if request.from.is_native { request.amount_in } else { U256::zero() };
        Ok(RoutePlan {
            route: "direct".to_string(),
            spender: Some(ROUTER.to_string()),
            tx: PreparedTx::Evm { to: Address::zero(), data: Bytes::default(), value },
            expected_out,
        })
    }
}

/// Price source returning a settable price
pub struct FakePrice {
    price: Mutex<Option<Decimal>>,
    pub calls: AtomicUsize,
}

impl FakePrice {
    pub fn new(price: Decimal) -> Self {
        Self { price: Mutex::new(Some(price)), calls: AtomicUsize::new(0) }
    }

    pub fn set(&self, price: Option<Decimal>) {
        *self.price.lock().unwrap() = price;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for FakePrice {
    async fn price(&self, chain: &str, _venue: Option<String>, base: &str, _quote: &str) -> EngineResult<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.price
            .lock()
            .unwrap()
            .ok_or_else(|| EngineError::Remote(format!("no price for {} on {}", base, chain)))
    }
}

/// Relayer that replays a scripted status sequence
pub struct FakeBridge {
    pub secrets_count: u32,
    /// Statuses returned in order; the last one repeats
    pub statuses: Mutex<Vec<CrossChainOrderState>>,
    pub placed_hashes: Mutex<Vec<H256>>,
    pub disclosed: Mutex<Vec<H256>>,
    pub status_calls: AtomicUsize,
    /// Quote endpoint answers with an error
    pub quote_down: AtomicBool,
}

impl FakeBridge {
    pub fn new(secrets_count: u32, statuses: Vec<CrossChainOrderState>) -> Self {
        Self {
            secrets_count,
            statuses: Mutex::new(statuses),
            placed_hashes: Mutex::new(Vec::new()),
            disclosed: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            quote_down: AtomicBool::new(false),
        }
    }

    pub fn state(status: CrossChainStatus) -> CrossChainOrderState {
        CrossChainOrderState { status, escrow_events: Vec::new() }
    }
}

#[async_trait]
impl BridgeVenue for FakeBridge {
    async fn quote(&self, request: &CrossChainQuoteRequest) -> EngineResult<CrossChainQuote> {
        if self.quote_down.load(Ordering::SeqCst) {
            return Err(EngineError::Remote("quote service unavailable".to_string()));
        }
        Ok(CrossChainQuote {
            quote_id: "quote-1".to_string(),
            src_amount: request.amount,
            dst_amount: U256::from(99_000_000u64),
            secrets_count: self.secrets_count,
            spender: Some(ROUTER.to_string()),
            raw: serde_json::Value::Null,
        })
    }

    async fn place_order(&self, _signer: &ChainSigner, _quote: &CrossChainQuote, _hash_lock: H256, secret_hashes: &[H256]) -> EngineResult<String> {
        *self.placed_hashes.lock().unwrap() = secret_hashes.to_vec();
        Ok("0xorder".to_string())
    }

    async fn ready_secret_indices(&self, _order_hash: &str) -> EngineResult<Vec<u32>> {
        Ok((0..self.secrets_count + 1).collect())
    }

    async fn submit_secret(&self, _order_hash: &str, secret: H256) -> EngineResult<()> {
        self.disclosed.lock().unwrap().push(secret);
        Ok(())
    }

    async fn order_status(&self, _order_hash: &str) -> EngineResult<CrossChainOrderState> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            Ok(statuses.remove(0))
        } else {
            Ok(statuses[0].clone())
        }
    }
}

pub fn ok_result(tx_ref: &str) -> TradeResult {
    TradeResult {
        trade_id: "t-1".to_string(),
        chain: "bsc".to_string(),
        destination_chain: None,
        tx_ref: tx_ref.to_string(),
        net_amount_in: dec("25"),
        fee_amount: Decimal::ZERO,
        amount_out: dec("0.1"),
    }
}
