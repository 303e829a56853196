//! Common traits for trade execution
//!
//! This module defines the seams of the engine. Every component talks to its
//! collaborators through one of these traits, so each one can be swapped for a
//! fake in tests:
//! - SwapExecutor: single-chain swap/transfer capability, one per chain
//! - SwapVenue: route selection and transaction building for one venue
//! - TradeDispatch: routing of a trade intent (used by the schedulers)
//! - PriceSource: current price for limit-order evaluation
//! - BridgeVenue: hashlock relayer for cross-chain swaps

use async_trait::async_trait;
use ethers::types::{H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::CrossChainStatus;

use crate::chain_adapters::{ChainSigner, PreparedTx};
use crate::error::EngineResult;
use crate::types::{TokenInfo, TradeIntent, TradeResult};

/// Swap request handed to a single-chain executor
#[derive(Debug, Clone, PartialEq)]
pub struct SwapRequest {
    pub user_id: String,
    pub user_address: String,
    pub from_symbol: String,
    pub to_symbol: String,
    /// Gross amount in human units, before the fee skim
    pub amount_in: Decimal,
    pub min_amount_out: Option<Decimal>,
    pub slippage_bps: Option<u32>,
    pub venue: Option<String>,
}

/// Transfer request handed to a single-chain executor
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub user_id: String,
    pub user_address: String,
    pub symbol: String,
    pub amount: Decimal,
    pub recipient: String,
}

/// Result of a single-chain execution
#[derive(Debug, Clone, PartialEq)]
pub struct SwapOutcome {
    pub tx_ref: String,
    pub net_amount_in: Decimal,
    pub fee_amount: Decimal,
    /// Realized output from the destination balance delta
    pub amount_out: Decimal,
}

/// Single-chain execution capability
///
/// One implementation per chain, selected through the executor registry.
#[async_trait]
pub trait SwapExecutor: Send + Sync + 'static {
    /// Chain name this executor serves
    fn chain(&self) -> &str;

    /// Resolve, skim fee, check balances, route, submit, measure output
    async fn execute_swap(&self, request: SwapRequest) -> EngineResult<SwapOutcome>;

    /// Skim fee and transfer the rest to the recipient
    async fn execute_transfer(&self, request: TransferRequest) -> EngineResult<SwapOutcome>;

    /// Quote `amount_in` of `from_symbol` into `to_symbol` without executing
    async fn quote(&self, from_symbol: &str, to_symbol: &str, amount_in: Decimal, venue: Option<String>) -> EngineResult<Decimal>;
}

/// Route request for a venue
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub from: TokenInfo,
    pub to: TokenInfo,
    /// Net amount in smallest units
    pub amount_in: U256,
    pub min_amount_out: U256,
    pub slippage_bps: u32,
    /// Wallet that signs and receives
    pub recipient: String,
}

/// Route chosen by a venue, ready to sign
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    /// Human-readable route, e.g. the router that won
    pub route: String,
    /// Contract that must be approved to spend the input token
    pub spender: Option<String>,
    pub tx: PreparedTx,
    pub expected_out: U256,
}

/// One trading venue on one chain
#[async_trait]
pub trait SwapVenue: Send + Sync + 'static {
    /// Venue tag as used in subscriptions and orders
    fn tag(&self) -> &str;

    /// Output for `amount_in`, in smallest units
    ///
    /// # Errors
    /// `PoolNotFound` when the venue cannot quote the pair
    async fn quote(&self, from: &TokenInfo, to: &TokenInfo, amount_in: U256) -> EngineResult<U256>;

    /// Select a route and build the unsigned transaction
    async fn build_swap(&self, request: &RouteRequest) -> EngineResult<RoutePlan>;
}

/// Routing of a trade intent, the entry point used by schedulers
#[async_trait]
pub trait TradeDispatch: Send + Sync + 'static {
    async fn dispatch(&self, intent: TradeIntent) -> EngineResult<TradeResult>;
}

/// Price of one unit of `base` expressed in `quote`
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    async fn price(&self, chain: &str, venue: Option<String>, base: &str, quote: &str) -> EngineResult<Decimal>;
}

/// Quote request for a cross-chain swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainQuoteRequest {
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub src_token: String,
    pub dst_token: String,
    /// Net amount in source smallest units
    pub amount: U256,
    pub wallet_address: String,
}

/// Quote returned by the relayer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossChainQuote {
    pub quote_id: String,
    pub src_amount: U256,
    pub dst_amount: U256,
    /// Number of single-use secrets the order needs
    pub secrets_count: u32,
    /// Contract that must be approved on the source chain
    pub spender: Option<String>,
    /// Venue-specific payload carried from quote to placement
    pub raw: Value,
}

/// Escrow event reported for an order fill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEvent {
    /// e.g. "src_escrow_created", "withdrawn", "funds_rescued"
    pub action: String,
    /// "src" or "dst"
    pub side: String,
    pub tx_hash: String,
}

/// Order status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainOrderState {
    pub status: CrossChainStatus,
    pub escrow_events: Vec<EscrowEvent>,
}

impl CrossChainOrderState {
    /// Destination-side withdrawal, the proof that the taker released funds
    pub fn destination_withdrawal(&self) -> Option<&EscrowEvent> {
        self.escrow_events
            .iter()
            .find(|e| e.action.eq_ignore_ascii_case("withdrawn") && e.side.eq_ignore_ascii_case("dst"))
    }
}

/// Hashlock relayer used by the cross-chain orchestrator
#[async_trait]
pub trait BridgeVenue: Send + Sync + 'static {
    /// Price/route quote; no on-chain effect
    async fn quote(&self, request: &CrossChainQuoteRequest) -> EngineResult<CrossChainQuote>;

    /// Sign and submit the order committing to `hash_lock` and `secret_hashes`; returns the order hash
    async fn place_order(&self, signer: &ChainSigner, quote: &CrossChainQuote, hash_lock: H256, secret_hashes: &[H256]) -> EngineResult<String>;

    /// Secret indices whose escrows are deployed and safe to disclose
    async fn ready_secret_indices(&self, order_hash: &str) -> EngineResult<Vec<u32>>;

    /// Disclose one plaintext secret
    async fn submit_secret(&self, order_hash: &str, secret: H256) -> EngineResult<()>;

    /// Current order status with escrow events
    async fn order_status(&self, order_hash: &str) -> EngineResult<CrossChainOrderState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_withdrawal_lookup() {
        let state = CrossChainOrderState {
            status: CrossChainStatus::Executed,
            escrow_events: vec![
                EscrowEvent { action: "withdrawn".into(), side: "src".into(), tx_hash: "0xsrc".into() },
                EscrowEvent { action: "Withdrawn".into(), side: "DST".into(), tx_hash: "0xdst".into() },
            ],
        };
        assert_eq!(state.destination_withdrawal().map(|e| e.tx_hash.as_str()), Some("0xdst"));

        let no_proof = CrossChainOrderState { status: CrossChainStatus::Executed, escrow_events: vec![] };
        assert!(no_proof.destination_withdrawal().is_none());
    }
}
