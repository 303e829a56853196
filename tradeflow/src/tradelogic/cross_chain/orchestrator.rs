//! Cross-chain swap orchestrator
//!
//! `QUOTED -> PLACED -> polling (secret disclosure) -> terminal`. Polling is
//! bounded by an iteration count and a wall-clock budget; exhausting either
//! runs one refund check before giving up with `ProtocolTimeout`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use common::{ChainFamily, CrossChainStatus, OperationKind};

use crate::chain_adapters::ChainRegistry;
use crate::config::CrossChainConfig;
use crate::custody::KeyVault;
use crate::error::{EngineError, EngineResult};
use crate::metric;
use crate::tokens::TokenResolver;
use crate::tradelogic::common::{FeeExtractor, WalletLocks};
use crate::tradelogic::cross_chain::hashlock::SecretSet;
use crate::tradelogic::traits::{BridgeVenue, CrossChainOrderState, CrossChainQuoteRequest};
use crate::types::{amount_to_units, units_to_amount};

/// Polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_duration: Duration,
    pub max_iterations: u32,
}

impl From<&CrossChainConfig> for PollPolicy {
    fn from(config: &CrossChainConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_duration: Duration::from_secs(config.max_duration_secs),
            max_iterations: config.max_iterations,
        }
    }
}

/// Terminal result of one cross-chain order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrossChainOutcome {
    /// Destination withdrawal observed
    Executed { tx_ref: String },
    /// Relayer reports executed but no destination withdrawal event was found
    ExecutedWithoutProof,
    Expired,
    Refunded,
    Cancelled,
}

impl CrossChainOutcome {
    /// Outcome for a terminal status snapshot; `None` while the order is live
    pub fn from_state(state: &CrossChainOrderState) -> Option<Self> {
        match state.status {
            CrossChainStatus::Executed => Some(match state.destination_withdrawal() {
                Some(event) => Self::Executed { tx_ref: event.tx_hash.clone() },
                None => Self::ExecutedWithoutProof,
            }),
            CrossChainStatus::Expired => Some(Self::Expired),
            CrossChainStatus::Refunded => Some(Self::Refunded),
            CrossChainStatus::Cancelled => Some(Self::Cancelled),
            CrossChainStatus::Pending | CrossChainStatus::PartiallyFilled => None,
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed { .. } | Self::ExecutedWithoutProof)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed { .. } => "executed",
            Self::ExecutedWithoutProof => "executed-without-proof",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Cross-chain request, already validated by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct CrossChainRequest {
    pub user_id: String,
    pub user_address: String,
    pub src_chain: String,
    pub dst_chain: String,
    pub from_symbol: String,
    pub to_symbol: String,
    pub amount: Decimal,
}

/// Summary of a finished order
#[derive(Debug, Clone, PartialEq)]
pub struct CrossChainReport {
    pub order_hash: String,
    pub outcome: CrossChainOutcome,
    pub net_amount_in: Decimal,
    pub fee_amount: Decimal,
    /// Destination amount quoted by the relayer
    pub amount_out: Decimal,
    pub secrets_disclosed: u32,
    pub polls: u32,
}

pub struct CrossChainOrchestrator {
    bridge: Arc<dyn BridgeVenue>,
    chains: ChainRegistry,
    resolver: Arc<dyn TokenResolver>,
    fees: Arc<FeeExtractor>,
    vault: KeyVault,
    locks: Arc<WalletLocks>,
    policy: PollPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl CrossChainOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bridge: Arc<dyn BridgeVenue>,
        chains: ChainRegistry,
        resolver: Arc<dyn TokenResolver>,
        fees: Arc<FeeExtractor>,
        vault: KeyVault,
        locks: Arc<WalletLocks>,
        policy: PollPolicy,
    ) -> Self {
        Self { bridge, chains, resolver, fees, vault, locks, policy, shutdown: None }
    }

    /// Stop polling when `true` is sent on `shutdown`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    async fn wait(&self) {
        match self.shutdown.clone() {
            Some(mut rx) => {
                tokio::select! {
                    _ = sleep(self.policy.interval) => {}
                    changed = rx.changed() => {
                        if changed.is_err() {
                            sleep(self.policy.interval).await;
                        }
                    }
                }
            }
            None => sleep(self.policy.interval).await,
        }
    }

    /// Quote, place, disclose secrets and poll until a terminal status
    ///
    /// # Errors
    /// Quote failures abort before any on-chain action. `ProtocolTimeout` when the
    /// budget runs out and the refund check finds no terminal status.
    pub async fn execute(&self, request: CrossChainRequest) -> EngineResult<CrossChainReport> {
        let src = self.chains.get(&request.src_chain)?;
        let dst = self.chains.descriptor(&request.dst_chain)?;
        let src_chain = src.descriptor().clone();
        if src_chain.family != ChainFamily::Evm {
            return Err(EngineError::ChainNotSupported(format!(
                "{} as a cross-chain source",
                src_chain.name
            )));
        }

        let from = self.resolver.resolve(&src_chain.name, &request.from_symbol).await?;
        let to = self.resolver.resolve(&dst.name, &request.to_symbol).await?;
        let owner = request.user_address.as_str();

        let lease = self.locks.acquire(&src_chain.name, owner).await;
        let gross = amount_to_units(request.amount, from.decimals)?;
        let available = src.balance_of(&from, owner).await?;
        if available < gross {
            return Err(EngineError::InsufficientBalance {
                asset: from.symbol.clone(),
                required: gross.to_string(),
                available: available.to_string(),
            });
        }

        let planned = self.fees.preview(src_chain.family, gross, OperationKind::Bridge)?;
        let quote = self
            .bridge
            .quote(&CrossChainQuoteRequest {
                src_chain_id: src_chain.chain_id,
                dst_chain_id: dst.chain_id,
                src_token: from.address.clone(),
                dst_token: to.address.clone(),
                amount: planned.net,
                wallet_address: owner.to_string(),
            })
            .await?;
        info!(
            "Cross-chain quote {} -> {}: {} {} for {} {} ({} secrets)",
            src_chain.name, dst.name, planned.net, from.symbol, quote.dst_amount, to.symbol, quote.secrets_count
        );
        // before any fee is paid
        let secrets = SecretSet::generate(quote.secrets_count)?;

        let signer = self.vault.signer(src.as_ref(), &request.user_id, owner).await?;
        let split = self
            .fees
            .pay_fee(src.as_ref(), &signer, &from, gross, OperationKind::Bridge)
            .await?;

        if !from.is_native {
            if let Some(spender) = &quote.spender {
                let allowance = src.allowance(&from.address, owner, spender).await?;
                if allowance < split.net {
                    src.approve(&signer, &from.address, spender, split.net).await?;
                }
            }
        }

        let order_hash = self
            .bridge
            .place_order(&signer, &quote, secrets.hash_lock(), secrets.hashes())
            .await?;
        drop(signer);
        drop(lease);
        info!("Cross-chain order {} placed, polling", order_hash);

        let (outcome, disclosed, polls) = self.drive(&order_hash, &secrets).await?;
        Ok(CrossChainReport {
            order_hash,
            outcome,
            net_amount_in: units_to_amount(split.net, from.decimals),
            fee_amount: units_to_amount(split.fee, from.decimals),
            amount_out: units_to_amount(quote.dst_amount, to.decimals),
            secrets_disclosed: disclosed,
            polls,
        })
    }

    /// Poll loop; returns the outcome, disclosed secret count and poll count
    pub async fn drive(&self, order_hash: &str, secrets: &SecretSet) -> EngineResult<(CrossChainOutcome, u32, u32)> {
        let started = Instant::now();
        let secrets_count = secrets.len() as u32;
        let mut revealed: BTreeSet<u32> = BTreeSet::new();
        let mut polls = 0u32;

        loop {
            if polls >= self.policy.max_iterations || started.elapsed() >= self.policy.max_duration || self.shutting_down() {
                break;
            }
            polls += 1;
            metric::record_cross_chain_poll();

            match self.bridge.ready_secret_indices(order_hash).await {
                Ok(ready) => {
                    for index in ready {
                        if index >= secrets_count || revealed.contains(&index) || revealed.len() as u32 >= secrets_count {
                            continue;
                        }
                        let secret = match secrets.secret(index) {
                            Some(secret) => secret,
                            None => continue,
                        };
                        match self.bridge.submit_secret(order_hash, secret).await {
                            Ok(()) => {
                                revealed.insert(index);
                                metric::record_secret_disclosed();
                                debug!("Order {}: secret {} disclosed", order_hash, index);
                            }
                            Err(e) => warn!("Order {}: secret {} submission failed: {}", order_hash, index, e),
                        }
                    }
                }
                Err(e) => warn!("Order {}: ready-fills query failed: {}", order_hash, e),
            }

            match self.bridge.order_status(order_hash).await {
                Ok(state) => {
                    if let Some(outcome) = CrossChainOutcome::from_state(&state) {
                        if outcome == CrossChainOutcome::ExecutedWithoutProof {
                            warn!("Order {} executed without a destination withdrawal event", order_hash);
                        }
                        info!("Order {} finished as {} after {} polls", order_hash, outcome.as_str(), polls);
                        return Ok((outcome, revealed.len() as u32, polls));
                    }
                }
                Err(e) => warn!("Order {}: status query failed: {}", order_hash, e),
            }

            self.wait().await;
        }

        warn!("Order {} timed out after {} polls, running refund check", order_hash, polls);
        match self.bridge.order_status(order_hash).await {
            Ok(state) => {
                if let Some(outcome) = CrossChainOutcome::from_state(&state) {
                    return Ok((outcome, revealed.len() as u32, polls));
                }
            }
            Err(e) => warn!("Order {}: refund check failed: {}", order_hash, e),
        }
        Err(EngineError::ProtocolTimeout { order_hash: order_hash.to_string(), iterations: polls })
    }
}
