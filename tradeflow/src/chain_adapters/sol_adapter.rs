//! Solana Adapter
//!
//! Adapter cho Solana qua `solana_client` (nonblocking `RpcClient`). Giao dịch
//! được dựng bằng `solana_sdk` và ký cục bộ, token SPL đi qua ATA của chủ ví.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::U256;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_client::rpc_request::RpcRequest;
use solana_client::rpc_response::RpcPrioritizationFee;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::signer::keypair::keypair_from_seed;
use solana_sdk::system_instruction;
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use common::{ChainDescriptor, ChainFamily};

use crate::cache::TokenMetadataCache;
use crate::chain_adapters::{ChainClient, ChainSigner, FeeQuote, PreparedTx, SubmittedTx, TokenMetadata};
use crate::config::ChainConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::TokenInfo;

/// Base fee per signature (lamports)
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Compute units assumed when converting the priority fee to lamports
const DEFAULT_COMPUTE_UNITS: u64 = 200_000;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

/// Parse a base58 account address
pub fn parse_pubkey(value: &str) -> EngineResult<Pubkey> {
    Pubkey::from_str(value.trim()).map_err(|e| EngineError::Validation(format!("invalid Solana address {}: {}", value, e)))
}

/// Keypair from a 32-byte seed, a 64-byte keypair, or the base58 text of either
pub fn keypair_from_key_material(key: &[u8]) -> EngineResult<Keypair> {
    match key.len() {
        32 => keypair_from_seed(key).map_err(|e| EngineError::Custody(format!("invalid Solana seed: {}", e))),
        64 => Keypair::from_bytes(key).map_err(|e| EngineError::Custody(format!("invalid Solana keypair: {}", e))),
        _ => {
            let text = std::str::from_utf8(key)
                .map_err(|_| EngineError::Custody("Solana key is neither raw bytes nor base58".to_string()))?;
            let decoded = Zeroizing::new(
                bs58::decode(text.trim())
                    .into_vec()
                    .map_err(|_| EngineError::Custody("Solana key is not valid base58".to_string()))?,
            );
            if decoded.len() != 32 && decoded.len() != 64 {
                return Err(EngineError::Custody(format!("Solana key has {} bytes", decoded.len())));
            }
            keypair_from_key_material(&decoded)
        }
    }
}

/// Sum `tokenAmount.amount` over the accounts returned by getTokenAccountsByOwner
fn sum_token_amounts(accounts: &[Value]) -> EngineResult<U256> {
    accounts.iter().try_fold(U256::zero(), |total, account| {
        let amount = account
            .pointer("/account/data/parsed/info/tokenAmount/amount")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Remote("token account without parsed amount".to_string()))?;
        let amount = U256::from_dec_str(amount).map_err(|e| EngineError::remote("token amount", e))?;
        Ok(total.saturating_add(amount))
    })
}

/// Median recent priority fee (micro-lamports per compute unit)
fn median_priority_fee(fees: &[RpcPrioritizationFee]) -> u64 {
    let mut values: Vec<u64> = fees.iter().map(|f| f.prioritization_fee).collect();
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    values[values.len() / 2]
}

/// Instructions moving `amount` of `asset` from `owner` to `recipient`.
/// SPL transfers create the recipient's ATA when it is missing.
pub fn transfer_instructions(
    owner: &Pubkey,
    recipient: &Pubkey,
    asset: &TokenInfo,
    amount: u64,
) -> EngineResult<Vec<solana_sdk::instruction::Instruction>> {
    if asset.is_native {
        return Ok(vec![system_instruction::transfer(owner, recipient, amount)]);
    }
    let mint = parse_pubkey(&asset.address)?;
    let source = get_associated_token_address(owner, &mint);
    let destination = get_associated_token_address(recipient, &mint);
    let transfer = spl_token::instruction::transfer_checked(
        &spl_token::id(),
        &source,
        &mint,
        &destination,
        owner,
        &[],
        amount,
        asset.decimals,
    )
    .map_err(|e| EngineError::Validation(format!("token transfer instruction: {}", e)))?;
    Ok(vec![
        create_associated_token_account_idempotent(owner, recipient, &mint, &spl_token::id()),
        transfer,
    ])
}

/// Adapter cho Solana
pub struct SolAdapter {
    descriptor: ChainDescriptor,
    rpc: RpcClient,
    cache: Arc<TokenMetadataCache>,
}

impl SolAdapter {
    /// Tạo adapter mới từ cấu hình chain
    pub fn new(name: &str, config: &ChainConfig, cache: Arc<TokenMetadataCache>) -> EngineResult<Self> {
        let rpc = RpcClient::new_with_timeout_and_commitment(config.rpc_url.clone(), RPC_TIMEOUT, CommitmentConfig::confirmed());
        info!("Solana adapter ready for {}", name);
        Ok(Self {
            descriptor: ChainDescriptor::new(name, config.chain_id, config.native_symbol.clone(), ChainFamily::Solana),
            rpc,
            cache,
        })
    }

    async fn fetch_decimals(&self, mint: &str) -> EngineResult<u8> {
        let supply = self
            .rpc
            .get_token_supply(&parse_pubkey(mint)?)
            .await
            .map_err(|e| EngineError::Remote(format!("{} is not a token mint: {}", mint, e)))?;
        Ok(supply.decimals)
    }

    fn chain(&self) -> &str {
        &self.descriptor.name
    }
}

fn to_u64(amount: U256) -> EngineResult<u64> {
    if amount > U256::from(u64::MAX) {
        return Err(EngineError::Validation(format!("amount {} exceeds u64", amount)));
    }
    Ok(amount.as_u64())
}

fn solana_tx(tx: PreparedTx) -> EngineResult<VersionedTransaction> {
    match tx {
        PreparedTx::Solana { transaction } => Ok(transaction),
        PreparedTx::Evm { .. } => Err(EngineError::Validation("EVM transaction sent to Solana".to_string())),
    }
}

#[async_trait]
impl ChainClient for SolAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    async fn native_balance(&self, owner: &str) -> EngineResult<U256> {
        let lamports = self.rpc.get_balance(&parse_pubkey(owner)?).await?;
        Ok(U256::from(lamports))
    }

    async fn token_balance(&self, token: &str, owner: &str) -> EngineResult<U256> {
        let accounts: WithContext<Vec<Value>> = self
            .rpc
            .send(
                RpcRequest::GetTokenAccountsByOwner,
                json!([owner, { "mint": token }, { "encoding": "jsonParsed", "commitment": "confirmed" }]),
            )
            .await?;
        sum_token_amounts(&accounts.value)
    }

    async fn fee_quote(&self) -> EngineResult<FeeQuote> {
        let micro_lamports_per_cu = match self.rpc.get_recent_prioritization_fees(&[]).await {
            Ok(fees) => median_priority_fee(&fees),
            Err(e) => {
                warn!("{}: priority fee lookup failed: {}", self.chain(), e);
                0
            }
        };
        Ok(FeeQuote::Solana {
            lamports_per_signature: LAMPORTS_PER_SIGNATURE,
            priority_lamports: micro_lamports_per_cu.saturating_mul(DEFAULT_COMPUTE_UNITS) / 1_000_000,
        })
    }

    fn signer_from_key(&self, key: &[u8]) -> EngineResult<ChainSigner> {
        Ok(ChainSigner::Solana(keypair_from_key_material(key)?))
    }

    async fn token_metadata(&self, token: &str) -> EngineResult<TokenMetadata> {
        if let Some(metadata) = self.cache.get_fresh(self.chain(), token).await {
            return Ok(metadata);
        }
        match self.fetch_decimals(token).await {
            Ok(decimals) => {
                let metadata = TokenMetadata { name: token.to_string(), symbol: token.to_string(), decimals };
                self.cache.insert(self.chain(), token, metadata.clone()).await;
                Ok(metadata)
            }
            Err(e) => match self.cache.get_any(self.chain(), token).await {
                Some(metadata) => {
                    warn!("{}: mint lookup for {} failed ({}), using cached entry", self.chain(), token, e);
                    Ok(metadata)
                }
                None => Err(e),
            },
        }
    }

    /// Solana swaps are signed by the owner directly, there is no allowance model
    async fn allowance(&self, _token: &str, _owner: &str, _spender: &str) -> EngineResult<U256> {
        Ok(U256::MAX)
    }

    async fn approve(&self, _signer: &ChainSigner, _token: &str, _spender: &str, _amount: U256) -> EngineResult<SubmittedTx> {
        Err(EngineError::Validation("token approvals do not exist on Solana".to_string()))
    }

    /// Simulates the transaction; the returned "gas" is the signature count
    async fn estimate_gas(&self, _from: &str, tx: &PreparedTx) -> EngineResult<U256> {
        let PreparedTx::Solana { transaction } = tx else {
            return Err(EngineError::Validation("EVM transaction sent to Solana".to_string()));
        };
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(CommitmentConfig::confirmed()),
            ..RpcSimulateTransactionConfig::default()
        };
        let simulation = self
            .rpc
            .simulate_transaction_with_config(transaction, config)
            .await
            .map_err(|e| EngineError::GasEstimationFailed(e.to_string()))?;
        if let Some(err) = simulation.value.err {
            return Err(EngineError::GasEstimationFailed(format!("simulation failed: {}", err)));
        }
        let signatures = transaction.message.header().num_required_signatures.max(1);
        Ok(U256::from(signatures))
    }

    async fn submit(&self, signer: &ChainSigner, tx: PreparedTx, gas_limit: U256, fee: &FeeQuote) -> EngineResult<SubmittedTx> {
        let unsigned = solana_tx(tx)?;
        let keypair = signer.as_solana()?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[keypair])
            .map_err(|e| EngineError::Validation(format!("cannot sign swap transaction: {}", e)))?;
        debug!("{}: submitting swap transaction", self.chain());
        let signature = self.rpc.send_and_confirm_transaction(&signed).await?;
        info!("{}: confirmed {}", self.chain(), signature);
        Ok(SubmittedTx {
            tx_ref: signature.to_string(),
            fee_paid: gas_limit.saturating_mul(fee.max_price_per_unit()),
        })
    }

    async fn transfer(&self, signer: &ChainSigner, asset: &TokenInfo, to: &str, amount: U256) -> EngineResult<SubmittedTx> {
        let keypair = signer.as_solana()?;
        let owner = keypair.pubkey();
        let recipient = parse_pubkey(to)?;
        let instructions = transfer_instructions(&owner, &recipient, asset, to_u64(amount)?)?;

        let blockhash = self.rpc.get_latest_blockhash().await?;
        let mut transaction = Transaction::new_unsigned(Message::new_with_blockhash(&instructions, Some(&owner), &blockhash));
        transaction
            .try_sign(&[keypair], blockhash)
            .map_err(|e| EngineError::Validation(format!("cannot sign transfer: {}", e)))?;
        let signature = self.rpc.send_and_confirm_transaction(&transaction).await?;
        info!("{}: transfer {} confirmed", self.chain(), signature);
        Ok(SubmittedTx { tx_ref: signature.to_string(), fee_paid: U256::from(LAMPORTS_PER_SIGNATURE) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn token(address: &str, is_native: bool) -> TokenInfo {
        TokenInfo {
            symbol: if is_native { "SOL".to_string() } else { "USDC".to_string() },
            address: address.to_string(),
            decimals: if is_native { 9 } else { 6 },
            is_native,
        }
    }

    #[test]
    fn test_sum_token_amounts() {
        let accounts = vec![
            json!({ "account": { "data": { "parsed": { "info": { "tokenAmount": { "amount": "1500000" } } } } } }),
            json!({ "account": { "data": { "parsed": { "info": { "tokenAmount": { "amount": "250" } } } } } }),
        ];
        assert_eq!(sum_token_amounts(&accounts).unwrap(), U256::from(1_500_250u64));
        assert_eq!(sum_token_amounts(&[]).unwrap(), U256::zero());
        assert!(sum_token_amounts(&[json!({ "account": {} })]).is_err());
    }

    #[test]
    fn test_median_priority_fee() {
        let fees = vec![
            RpcPrioritizationFee { slot: 1, prioritization_fee: 10 },
            RpcPrioritizationFee { slot: 2, prioritization_fee: 0 },
            RpcPrioritizationFee { slot: 3, prioritization_fee: 500 },
        ];
        assert_eq!(median_priority_fee(&fees), 10);
        assert_eq!(median_priority_fee(&[]), 0);
    }

    #[test]
    fn test_amount_must_fit_u64() {
        assert_eq!(to_u64(U256::from(42u64)).unwrap(), 42);
        assert!(to_u64(U256::from(u64::MAX) + U256::one()).is_err());
    }

    #[test]
    fn test_key_material_formats() {
        let seed = [11u8; 32];
        let from_seed = keypair_from_key_material(&seed).unwrap();
        let pair = from_seed.to_bytes();
        let from_pair = keypair_from_key_material(&pair).unwrap();
        let text = bs58::encode(&pair).into_string();
        let from_text = keypair_from_key_material(text.as_bytes()).unwrap();
        assert_eq!(from_seed.pubkey(), from_pair.pubkey());
        assert_eq!(from_seed.pubkey(), from_text.pubkey());
        assert!(keypair_from_key_material(b"short").is_err());
    }

    #[test]
    fn test_native_transfer_is_one_system_instruction() {
        let owner = keypair_from_key_material(&[1u8; 32]).unwrap().pubkey();
        let recipient = keypair_from_key_material(&[2u8; 32]).unwrap().pubkey();
        let instructions = transfer_instructions(&owner, &recipient, &token("So11111111111111111111111111111111111111112", true), 5_000).unwrap();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].program_id, solana_sdk::system_program::id());
    }

    #[test]
    fn test_token_transfer_targets_associated_accounts() {
        let owner = keypair_from_key_material(&[3u8; 32]).unwrap().pubkey();
        let recipient = keypair_from_key_material(&[4u8; 32]).unwrap().pubkey();
        let mint = parse_pubkey(USDC_MINT).unwrap();
        let instructions = transfer_instructions(&owner, &recipient, &token(USDC_MINT, false), 1_000_000).unwrap();

        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].program_id, spl_associated_token_account::id());
        assert_eq!(instructions[1].program_id, spl_token::id());
        let destination = get_associated_token_address(&recipient, &mint);
        assert!(!destination.is_on_curve());
        assert_eq!(instructions[1].accounts[0].pubkey, get_associated_token_address(&owner, &mint));
        assert_eq!(instructions[1].accounts[2].pubkey, destination);
    }

    #[test]
    fn test_invalid_address_is_validation_error() {
        assert!(matches!(parse_pubkey("not-base58-0OIl"), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_signer_from_seed() {
        let config = crate::config::default_solana_config();
        let adapter = SolAdapter::new("solana", &config, Arc::new(TokenMetadataCache::new(Duration::from_secs(60)))).unwrap();
        let signer = adapter.signer_from_key(&[5u8; 32]).unwrap();
        assert_eq!(signer.family(), ChainFamily::Solana);
        assert_eq!(signer.address(), keypair_from_key_material(&[5u8; 32]).unwrap().pubkey().to_string());
    }
}
