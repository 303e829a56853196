//! Module chain_adapters
//!
//! Module này chịu trách nhiệm kết nối với các blockchain khác nhau, bao gồm:
//! - EVM adapter: Ethereum, BSC, Base, Arbitrum qua JSON-RPC (ethers)
//! - Solana adapter: `solana_client` RPC, ký cục bộ bằng `solana_sdk`
//! - Bridge adapter: relayer REST cho swap xuyên chuỗi kiểu hashlock
//!
//! Mọi executor chỉ làm việc qua trait `ChainClient`; `ChainRegistry` được dựng một
//! lần lúc khởi động và không thay đổi sau đó.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{Keypair, Signer as _};
use solana_sdk::transaction::VersionedTransaction;

use common::{ChainDescriptor, ChainFamily};

use crate::error::{EngineError, EngineResult};
use crate::types::TokenInfo;

pub mod evm_adapter;
pub mod sol_adapter;
pub mod bridge_adapter;

pub use evm_adapter::EvmAdapter;
pub use sol_adapter::SolAdapter;
pub use bridge_adapter::HashlockRelayerClient;

/// Fee parameters appropriate to the chain family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeQuote {
    /// EIP-1559: maxFee = 2 × baseFee, priority = maxFee − 1
    Eip1559 { max_fee_per_gas: U256, max_priority_fee_per_gas: U256 },
    /// Legacy gas price with the configured additive buffer
    Legacy { gas_price: U256 },
    /// Solana base fee per signature plus priority fee per signature
    Solana { lamports_per_signature: u64, priority_lamports: u64 },
}

impl FeeQuote {
    /// Highest price paid per unit of `gas_limit`
    pub fn max_price_per_unit(&self) -> U256 {
        match self {
            Self::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
            Self::Legacy { gas_price } => *gas_price,
            Self::Solana { lamports_per_signature, priority_lamports } => {
                U256::from(*lamports_per_signature) + U256::from(*priority_lamports)
            }
        }
    }
}

/// Token metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Signer built from raw key material, lives only for one operation
pub enum ChainSigner {
    Evm(LocalWallet),
    Solana(Keypair),
}

impl ChainSigner {
    /// Address of the signer in the chain's canonical text form
    pub fn address(&self) -> String {
        match self {
            Self::Evm(wallet) => format!("{:?}", wallet.address()),
            Self::Solana(keypair) => keypair.pubkey().to_string(),
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Self::Evm(_) => ChainFamily::Evm,
            Self::Solana(_) => ChainFamily::Solana,
        }
    }

    pub fn as_evm(&self) -> EngineResult<&LocalWallet> {
        match self {
            Self::Evm(wallet) => Ok(wallet),
            Self::Solana(_) => Err(EngineError::Validation("an EVM signer is required".to_string())),
        }
    }

    pub fn as_solana(&self) -> EngineResult<&Keypair> {
        match self {
            Self::Solana(keypair) => Ok(keypair),
            Self::Evm(_) => Err(EngineError::Validation("a Solana signer is required".to_string())),
        }
    }
}

impl fmt::Debug for ChainSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainSigner({}, {})", self.family(), self.address())
    }
}

/// Unsigned transaction produced by a venue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedTx {
    Evm { to: Address, data: Bytes, value: U256 },
    /// Unsigned transaction, signature slots are filled at submission
    Solana { transaction: VersionedTransaction },
}

/// Confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub tx_ref: String,
    /// Native amount spent on fees
    pub fee_paid: U256,
}

/// Per-chain client: balances, fees, signing and submission
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Descriptor of the chain this client serves
    fn descriptor(&self) -> &ChainDescriptor;

    /// Native balance in smallest units
    async fn native_balance(&self, owner: &str) -> EngineResult<U256>;

    /// Fungible token balance in smallest units
    async fn token_balance(&self, token: &str, owner: &str) -> EngineResult<U256>;

    /// Balance of either the native asset or a token
    async fn balance_of(&self, asset: &TokenInfo, owner: &str) -> EngineResult<U256> {
        if asset.is_native {
            self.native_balance(owner).await
        } else {
            self.token_balance(&asset.address, owner).await
        }
    }

    /// Current fee parameters
    ///
    /// # Errors
    /// `FeeUnavailable` when neither fee scheme can be obtained
    async fn fee_quote(&self) -> EngineResult<FeeQuote>;

    /// Build a signer from decrypted key material
    fn signer_from_key(&self, key: &[u8]) -> EngineResult<ChainSigner>;

    /// Token metadata, served from the local cache when the node is unavailable
    async fn token_metadata(&self, token: &str) -> EngineResult<TokenMetadata>;

    /// Spending allowance granted by `owner` to `spender`
    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> EngineResult<U256>;

    /// Approve `spender` and wait for confirmation
    async fn approve(&self, signer: &ChainSigner, token: &str, spender: &str, amount: U256) -> EngineResult<SubmittedTx>;

    /// Raw gas (or compute/signature) estimate for a prepared transaction
    ///
    /// # Errors
    /// `GasEstimationFailed` when the node rejects the estimation call
    async fn estimate_gas(&self, from: &str, tx: &PreparedTx) -> EngineResult<U256>;

    /// Sign, broadcast and wait for confirmation
    async fn submit(&self, signer: &ChainSigner, tx: PreparedTx, gas_limit: U256, fee: &FeeQuote) -> EngineResult<SubmittedTx>;

    /// Transfer native asset or token to `to`, waiting for confirmation
    async fn transfer(&self, signer: &ChainSigner, asset: &TokenInfo, to: &str, amount: U256) -> EngineResult<SubmittedTx>;
}

/// Immutable registry of chain clients, keyed by chain name
#[derive(Clone, Default)]
pub struct ChainRegistry {
    clients: HashMap<String, Arc<dyn ChainClient>>,
}

impl ChainRegistry {
    /// Build the registry; duplicate chain names are rejected
    pub fn new(clients: Vec<Arc<dyn ChainClient>>) -> EngineResult<Self> {
        let mut map = HashMap::new();
        for client in clients {
            let name = client.descriptor().name.clone();
            if map.insert(name.clone(), client).is_some() {
                return Err(EngineError::Validation(format!("chain {} registered twice", name)));
            }
        }
        Ok(Self { clients: map })
    }

    pub fn get(&self, chain: &str) -> EngineResult<Arc<dyn ChainClient>> {
        self.clients
            .get(chain)
            .cloned()
            .ok_or_else(|| EngineError::ChainNotSupported(chain.to_string()))
    }

    pub fn descriptor(&self, chain: &str) -> EngineResult<ChainDescriptor> {
        Ok(self.get(chain)?.descriptor().clone())
    }

    pub fn chain_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
