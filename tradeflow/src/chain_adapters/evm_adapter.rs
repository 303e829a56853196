//! EVM Adapter
//!
//! Adapter cho việc tương tác với các EVM chains (Ethereum, BSC, Base, Arbitrum)
//! qua JSON-RPC bằng `ethers`.
//!
//! # Các chức năng chính
//!
//! - Truy vấn số dư native và ERC20
//! - Chọn cơ chế phí: EIP-1559 (maxFee = 2 × baseFee) hoặc legacy (gasPrice + buffer)
//! - Tạo signer từ private key đã giải mã
//! - Metadata token với cache cục bộ làm fallback
//! - Approve, estimate gas, ký và chờ xác nhận giao dịch

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, Eip1559TransactionRequest, TransactionRequest, U256, U64};
use ethers::utils::hex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use common::{ChainDescriptor, ChainFamily};

use crate::cache::TokenMetadataCache;
use crate::chain_adapters::{ChainClient, ChainSigner, FeeQuote, PreparedTx, SubmittedTx, TokenMetadata};
use crate::config::ChainConfig;
use crate::error::{EngineError, EngineResult};
use crate::tradelogic::common::gas::{pad_gas_limit, select_evm_fee};
use crate::types::TokenInfo;

abigen!(
    IErc20,
    r#"[
        function name() external view returns (string)
        function symbol() external view returns (string)
        function decimals() external view returns (uint8)
        function balanceOf(address owner) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

/// Parse a hex address
pub fn parse_address(value: &str) -> EngineResult<Address> {
    value
        .parse::<Address>()
        .map_err(|e| EngineError::Validation(format!("invalid EVM address {}: {}", value, e)))
}

/// Build a wallet from raw 32-byte key material or its hex text form
pub fn wallet_from_key(key: &[u8]) -> EngineResult<LocalWallet> {
    if key.len() == 32 {
        return LocalWallet::from_bytes(key)
            .map_err(|e| EngineError::Custody(format!("invalid EVM private key: {}", e)));
    }
    let text = std::str::from_utf8(key)
        .map_err(|_| EngineError::Custody("EVM private key is neither raw bytes nor hex".to_string()))?;
    let text = text.trim();
    let decoded = Zeroizing::new(
        hex::decode(text.strip_prefix("0x").unwrap_or(text))
            .map_err(|_| EngineError::Custody("EVM private key is not valid hex".to_string()))?,
    );
    LocalWallet::from_bytes(&decoded).map_err(|e| EngineError::Custody(format!("invalid EVM private key: {}", e)))
}

/// Adapter cho EVM chains
pub struct EvmAdapter {
    /// Mô tả chain
    descriptor: ChainDescriptor,
    /// JSON-RPC provider, an toàn khi dùng đồng thời
    provider: Arc<Provider<Http>>,
    /// Chain hỗ trợ EIP-1559
    eip1559: bool,
    /// Buffer cộng thêm vào gas price legacy (gwei)
    legacy_buffer_gwei: u64,
    /// Cache metadata token
    cache: Arc<TokenMetadataCache>,
}

impl EvmAdapter {
    /// Tạo adapter mới từ cấu hình chain
    ///
    /// # Arguments
    /// * `name` - Tên logic của chain (khóa trong registry)
    /// * `config` - Cấu hình chain
    /// * `cache` - Cache metadata token dùng chung
    ///
    /// # Errors
    /// * `Validation` nếu RPC URL không hợp lệ
    pub fn new(name: &str, config: &ChainConfig, cache: Arc<TokenMetadataCache>) -> EngineResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| EngineError::Validation(format!("invalid rpc url for {}: {}", name, e)))?
            .interval(Duration::from_millis(500));

        let descriptor = ChainDescriptor::new(name, config.chain_id, config.native_symbol.clone(), ChainFamily::Evm);

        info!("EVM adapter ready for {} (chain id {})", name, config.chain_id);
        Ok(Self {
            descriptor,
            provider: Arc::new(provider),
            eip1559: config.eip1559,
            legacy_buffer_gwei: config.legacy_gas_buffer_gwei,
            cache,
        })
    }

    /// Provider dùng chung cho các venue on-chain
    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    fn erc20(&self, token: &str) -> EngineResult<IErc20<Provider<Http>>> {
        Ok(IErc20::new(parse_address(token)?, self.provider.clone()))
    }

    fn chain(&self) -> &str {
        &self.descriptor.name
    }

    async fn fetch_metadata(&self, token: &str) -> EngineResult<TokenMetadata> {
        let contract = self.erc20(token)?;
        let name = contract.name().call().await.map_err(|e| EngineError::remote("erc20 name", e))?;
        let symbol = contract.symbol().call().await.map_err(|e| EngineError::remote("erc20 symbol", e))?;
        let decimals = contract.decimals().call().await.map_err(|e| EngineError::remote("erc20 decimals", e))?;
        Ok(TokenMetadata { name, symbol, decimals })
    }

    /// Estimate, pad and submit a transaction built by this adapter
    async fn send_prepared(&self, signer: &ChainSigner, tx: PreparedTx) -> EngineResult<SubmittedTx> {
        let from = signer.address();
        let estimate = self.estimate_gas(&from, &tx).await?;
        let fee = self.fee_quote().await?;
        self.submit(signer, tx, pad_gas_limit(estimate), &fee).await
    }

    fn evm_parts(tx: &PreparedTx) -> EngineResult<(Address, Bytes, U256)> {
        match tx {
            PreparedTx::Evm { to, data, value } => Ok((*to, data.clone(), *value)),
            PreparedTx::Solana { .. } => Err(EngineError::Validation("Solana transaction sent to an EVM chain".to_string())),
        }
    }
}

#[async_trait]
impl ChainClient for EvmAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    async fn native_balance(&self, owner: &str) -> EngineResult<U256> {
        self.provider
            .get_balance(parse_address(owner)?, None)
            .await
            .map_err(|e| EngineError::remote("eth_getBalance", e))
    }

    async fn token_balance(&self, token: &str, owner: &str) -> EngineResult<U256> {
        self.erc20(token)?
            .balance_of(parse_address(owner)?)
            .call()
            .await
            .map_err(|e| EngineError::remote("erc20 balanceOf", e))
    }

    /// Lấy tham số phí hiện tại
    ///
    /// # Errors
    /// * `FeeUnavailable` nếu không lấy được cả base fee lẫn gas price
    async fn fee_quote(&self) -> EngineResult<FeeQuote> {
        let base_fee = if self.eip1559 {
            match self.provider.get_block(BlockNumber::Latest).await {
                Ok(Some(block)) => block.base_fee_per_gas,
                Ok(None) => None,
                Err(e) => {
                    warn!("{}: failed to read latest block: {}", self.chain(), e);
                    None
                }
            }
        } else {
            None
        };

        let gas_price = if base_fee.map_or(false, |b| !b.is_zero()) {
            None
        } else {
            match self.provider.get_gas_price().await {
                Ok(price) => Some(price),
                Err(e) => {
                    warn!("{}: eth_gasPrice failed: {}", self.chain(), e);
                    None
                }
            }
        };

        select_evm_fee(self.chain(), self.eip1559, base_fee, gas_price, self.legacy_buffer_gwei)
    }

    fn signer_from_key(&self, key: &[u8]) -> EngineResult<ChainSigner> {
        let wallet = wallet_from_key(key)?.with_chain_id(self.descriptor.chain_id);
        Ok(ChainSigner::Evm(wallet))
    }

    async fn token_metadata(&self, token: &str) -> EngineResult<TokenMetadata> {
        if let Some(metadata) = self.cache.get_fresh(self.chain(), token).await {
            return Ok(metadata);
        }
        match self.fetch_metadata(token).await {
            Ok(metadata) => {
                self.cache.insert(self.chain(), token, metadata.clone()).await;
                Ok(metadata)
            }
            Err(e) => match self.cache.get_any(self.chain(), token).await {
                Some(metadata) => {
                    warn!("{}: metadata lookup for {} failed ({}), using cached entry", self.chain(), token, e);
                    Ok(metadata)
                }
                None => Err(e),
            },
        }
    }

    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> EngineResult<U256> {
        self.erc20(token)?
            .allowance(parse_address(owner)?, parse_address(spender)?)
            .call()
            .await
            .map_err(|e| EngineError::remote("erc20 allowance", e))
    }

    async fn approve(&self, signer: &ChainSigner, token: &str, spender: &str, amount: U256) -> EngineResult<SubmittedTx> {
        let data = self
            .erc20(token)?
            .approve(parse_address(spender)?, amount)
            .calldata()
            .ok_or_else(|| EngineError::Validation("failed to encode approve".to_string()))?;
        let tx = PreparedTx::Evm { to: parse_address(token)?, data, value: U256::zero() };
        debug!("{}: approving {} for {}", self.chain(), spender, token);
        self.send_prepared(signer, tx).await
    }

    async fn estimate_gas(&self, from: &str, tx: &PreparedTx) -> EngineResult<U256> {
        let (to, data, value) = Self::evm_parts(tx)?;
        let request: TypedTransaction = TransactionRequest::new()
            .from(parse_address(from)?)
            .to(to)
            .data(data)
            .value(value)
            .into();
        self.provider
            .estimate_gas(&request, None)
            .await
            .map_err(|e| EngineError::GasEstimationFailed(e.to_string()))
    }

    async fn submit(&self, signer: &ChainSigner, tx: PreparedTx, gas_limit: U256, fee: &FeeQuote) -> EngineResult<SubmittedTx> {
        let wallet = signer.as_evm()?.clone().with_chain_id(self.descriptor.chain_id);
        let (to, data, value) = Self::evm_parts(&tx)?;
        let chain_id = self.descriptor.chain_id;

        let request: TypedTransaction = match fee {
            FeeQuote::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas } => Eip1559TransactionRequest::new()
                .to(to)
                .data(data)
                .value(value)
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(chain_id)
                .into(),
            FeeQuote::Legacy { gas_price } => TransactionRequest::new()
                .to(to)
                .data(data)
                .value(value)
                .gas(gas_limit)
                .gas_price(*gas_price)
                .chain_id(chain_id)
                .into(),
            FeeQuote::Solana { .. } => {
                return Err(EngineError::Validation("Solana fee quote used on an EVM chain".to_string()))
            }
        };

        let client = SignerMiddleware::new(self.provider.as_ref().clone(), wallet);
        let pending = client
            .send_transaction(request, None)
            .await
            .map_err(|e| EngineError::remote("send transaction", e))?;
        let tx_hash = pending.tx_hash();
        debug!("{}: submitted {:?}", self.chain(), tx_hash);

        let receipt = pending
            .await
            .map_err(|e| EngineError::remote("await receipt", e))?
            .ok_or_else(|| EngineError::Remote(format!("transaction {:?} dropped from mempool", tx_hash)))?;

        if receipt.status != Some(U64::from(1)) {
            return Err(EngineError::Remote(format!("transaction {:?} reverted", tx_hash)));
        }

        let gas_used = receipt.gas_used.unwrap_or_default();
        let price = receipt.effective_gas_price.unwrap_or_else(|| fee.max_price_per_unit());
        info!("{}: confirmed {:?} (gas used {})", self.chain(), tx_hash, gas_used);
        Ok(SubmittedTx {
            tx_ref: format!("{:?}", tx_hash),
            fee_paid: gas_used.saturating_mul(price),
        })
    }

    async fn transfer(&self, signer: &ChainSigner, asset: &TokenInfo, to: &str, amount: U256) -> EngineResult<SubmittedTx> {
        let recipient = parse_address(to)?;
        let tx = if asset.is_native {
            PreparedTx::Evm { to: recipient, data: Bytes::default(), value: amount }
        } else {
            let data = self
                .erc20(&asset.address)?
                .transfer(recipient, amount)
                .calldata()
                .ok_or_else(|| EngineError::Validation("failed to encode transfer".to_string()))?;
            PreparedTx::Evm { to: parse_address(&asset.address)?, data, value: U256::zero() }
        };
        self.send_prepared(signer, tx).await
    }
}
