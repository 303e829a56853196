//! Single-chain swap executors
//!
//! `VenueSwapExecutor` runs the same pipeline for every venue on a chain:
//! resolve symbols, take the wallet lease, decrypt the key, skim the fee, check
//! balance, pick a route, approve if needed, estimate + pad gas, check the
//! worst-case fee, submit, and measure the realized output as a balance delta.
//! Venues (`SwapVenue`) only quote and build the unsigned transaction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::U256;
use rust_decimal::Decimal;
use tracing::{debug, info};

use common::OperationKind;

use crate::chain_adapters::{ChainClient, PreparedTx};
use crate::custody::KeyVault;
use crate::error::{EngineError, EngineResult};
use crate::tokens::TokenResolver;
use crate::tradelogic::common::{ensure_worst_case_covered, pad_gas_limit, FeeExtractor, WalletLocks};
use crate::tradelogic::traits::{RouteRequest, SwapExecutor, SwapOutcome, SwapRequest, SwapVenue, TransferRequest};
use crate::types::{amount_to_units, units_to_amount, TokenInfo};

pub mod dex_router;
pub mod evm_aggregator;
pub mod solana_aggregator;

pub use dex_router::V2RouterVenue;
pub use evm_aggregator::EvmAggregatorVenue;
pub use solana_aggregator::SolanaAggregatorVenue;

/// Basis-point denominator
pub const BPS: u32 = 10_000;

/// `expected × (1 − slippage)`, or the caller's floor when it is higher
pub fn min_amount_out(expected: U256, slippage_bps: u32, floor: U256) -> U256 {
    let slippage = slippage_bps.min(BPS);
    let tolerated = expected.saturating_mul(U256::from(BPS - slippage)) / U256::from(BPS);
    tolerated.max(floor)
}

/// Shared collaborators of every executor
#[derive(Clone)]
pub struct ExecutorContext {
    pub resolver: Arc<dyn TokenResolver>,
    pub fees: Arc<FeeExtractor>,
    pub vault: KeyVault,
    pub locks: Arc<WalletLocks>,
    pub default_slippage_bps: u32,
}

/// Executor for one chain over its configured venues
pub struct VenueSwapExecutor {
    client: Arc<dyn ChainClient>,
    /// Preference order; the first one is the default
    venues: Vec<Arc<dyn SwapVenue>>,
    context: ExecutorContext,
}

impl VenueSwapExecutor {
    pub fn new(client: Arc<dyn ChainClient>, venues: Vec<Arc<dyn SwapVenue>>, context: ExecutorContext) -> EngineResult<Self> {
        if venues.is_empty() {
            return Err(EngineError::Validation(format!(
                "chain {} has no venues",
                client.descriptor().name
            )));
        }
        Ok(Self { client, venues, context })
    }

    fn venue(&self, tag: Option<&str>) -> EngineResult<&Arc<dyn SwapVenue>> {
        match tag {
            None => self
                .venues
                .first()
                .ok_or_else(|| EngineError::Validation("no venue configured".to_string())),
            Some(tag) => self
                .venues
                .iter()
                .find(|v| v.tag().eq_ignore_ascii_case(tag))
                .ok_or_else(|| EngineError::Validation(format!("unknown venue {} on {}", tag, self.chain()))),
        }
    }

    async fn resolve(&self, symbol: &str) -> EngineResult<TokenInfo> {
        self.context.resolver.resolve(self.chain(), symbol).await
    }

    async fn ensure_balance(&self, asset: &TokenInfo, owner: &str, required: U256) -> EngineResult<()> {
        let available = self.client.balance_of(asset, owner).await?;
        if available < required {
            return Err(EngineError::InsufficientBalance {
                asset: asset.symbol.clone(),
                required: required.to_string(),
                available: available.to_string(),
            });
        }
        Ok(())
    }
}

fn validate_amount(amount: Decimal) -> EngineResult<()> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::Validation(format!("amount must be positive, got {}", amount)));
    }
    Ok(())
}

#[async_trait]
impl SwapExecutor for VenueSwapExecutor {
    fn chain(&self) -> &str {
        &self.client.descriptor().name
    }

    async fn execute_swap(&self, request: SwapRequest) -> EngineResult<SwapOutcome> {
        validate_amount(request.amount_in)?;
        let from = self.resolve(&request.from_symbol).await?;
        let to = self.resolve(&request.to_symbol).await?;
        if from.address.eq_ignore_ascii_case(&to.address) {
            return Err(EngineError::Validation(format!("cannot swap {} into itself", from.symbol)));
        }
        let venue = self.venue(request.venue.as_deref())?;
        let owner = request.user_address.as_str();
        let client = self.client.as_ref();

        let _lease = self.context.locks.acquire(self.chain(), owner).await;
        let gross = amount_to_units(request.amount_in, from.decimals)?;
        self.ensure_balance(&from, owner, gross).await?;

        let signer = self.context.vault.signer(client, &request.user_id, owner).await?;
        let split = self
            .context
            .fees
            .pay_fee(client, &signer, &from, gross, OperationKind::Swap)
            .await?;
        self.ensure_balance(&from, owner, split.net).await?;

        let floor = match request.min_amount_out {
            Some(min) => amount_to_units(min, to.decimals)?,
            None => U256::zero(),
        };
        let plan = venue
            .build_swap(&RouteRequest {
                from: from.clone(),
                to: to.clone(),
                amount_in: split.net,
                min_amount_out: floor,
                slippage_bps: request.slippage_bps.unwrap_or(self.context.default_slippage_bps),
                recipient: owner.to_string(),
            })
            .await?;
        debug!("{}: route {} for {} -> {}", self.chain(), plan.route, from.symbol, to.symbol);

        if !from.is_native {
            if let Some(spender) = &plan.spender {
                let allowance = client.allowance(&from.address, owner, spender).await?;
                if allowance < split.net {
                    info!("{}: approving {} {} for {}", self.chain(), split.net, from.symbol, spender);
                    client.approve(&signer, &from.address, spender, split.net).await?;
                }
            }
        }

        let value = match &plan.tx {
            PreparedTx::Evm { value, .. } => *value,
            PreparedTx::Solana { .. } => U256::zero(),
        };
        let gas_limit = pad_gas_limit(client.estimate_gas(owner, &plan.tx).await?);
        let fee = client.fee_quote().await?;
        let native_balance = client.native_balance(owner).await?;
        ensure_worst_case_covered(native_balance, value, gas_limit, &fee)?;

        let before = client.balance_of(&to, owner).await?;
        let submitted = client.submit(&signer, plan.tx, gas_limit, &fee).await?;
        let after = client.balance_of(&to, owner).await?;
        drop(signer);

        let mut delta = after.saturating_sub(before);
        if to.is_native {
            delta = delta.saturating_add(submitted.fee_paid);
        }

        info!(
            "{}: swapped {} {} -> {} {} via {} ({})",
            self.chain(),
            units_to_amount(split.net, from.decimals),
            from.symbol,
            units_to_amount(delta, to.decimals),
            to.symbol,
            venue.tag(),
            submitted.tx_ref
        );
        Ok(SwapOutcome {
            tx_ref: submitted.tx_ref,
            net_amount_in: units_to_amount(split.net, from.decimals),
            fee_amount: units_to_amount(split.fee, from.decimals),
            amount_out: units_to_amount(delta, to.decimals),
        })
    }

    async fn execute_transfer(&self, request: TransferRequest) -> EngineResult<SwapOutcome> {
        validate_amount(request.amount)?;
        if request.recipient.trim().is_empty() {
            return Err(EngineError::Validation("transfer requires a recipient".to_string()));
        }
        let asset = self.resolve(&request.symbol).await?;
        let owner = request.user_address.as_str();
        let client = self.client.as_ref();

        let _lease = self.context.locks.acquire(self.chain(), owner).await;
        let gross = amount_to_units(request.amount, asset.decimals)?;
        self.ensure_balance(&asset, owner, gross).await?;

        let signer = self.context.vault.signer(client, &request.user_id, owner).await?;
        let split = self
            .context
            .fees
            .pay_fee(client, &signer, &asset, gross, OperationKind::Transfer)
            .await?;
        let submitted = client.transfer(&signer, &asset, &request.recipient, split.net).await?;

        info!("{}: transferred {} {} to {} ({})", self.chain(), split.net, asset.symbol, request.recipient, submitted.tx_ref);
        Ok(SwapOutcome {
            tx_ref: submitted.tx_ref,
            net_amount_in: units_to_amount(split.net, asset.decimals),
            fee_amount: units_to_amount(split.fee, asset.decimals),
            amount_out: units_to_amount(split.net, asset.decimals),
        })
    }

    async fn quote(&self, from_symbol: &str, to_symbol: &str, amount_in: Decimal, venue: Option<String>) -> EngineResult<Decimal> {
        validate_amount(amount_in)?;
        let from = self.resolve(from_symbol).await?;
        let to = self.resolve(to_symbol).await?;
        let venue = self.venue(venue.as_deref())?;
        let out = venue.quote(&from, &to, amount_to_units(amount_in, from.decimals)?).await?;
        Ok(units_to_amount(out, to.decimals))
    }
}

/// Executors keyed by chain name
#[derive(Clone, Default)]
pub struct SwapExecutorRegistry {
    executors: HashMap<String, Arc<dyn SwapExecutor>>,
}

impl SwapExecutorRegistry {
    pub fn new(executors: Vec<Arc<dyn SwapExecutor>>) -> EngineResult<Self> {
        let mut map = HashMap::new();
        for executor in executors {
            let chain = executor.chain().to_string();
            if map.insert(chain.clone(), executor).is_some() {
                return Err(EngineError::Validation(format!("two executors registered for {}", chain)));
            }
        }
        Ok(Self { executors: map })
    }

    pub fn get(&self, chain: &str) -> EngineResult<Arc<dyn SwapExecutor>> {
        self.executors
            .get(chain)
            .cloned()
            .ok_or_else(|| EngineError::ChainNotSupported(chain.to_string()))
    }

    pub fn chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = self.executors.keys().cloned().collect();
        chains.sort();
        chains
    }
}
