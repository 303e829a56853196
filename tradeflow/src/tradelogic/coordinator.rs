//! Trade dispatcher
//!
//! Routes a `TradeIntent` to the executor registered for its chain, or to the
//! cross-chain orchestrator when source and destination differ. Validation runs
//! before any I/O; every outcome is published on the event bus.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use common::OperationKind;

use crate::error::{EngineError, EngineResult};
use crate::metric;
use crate::notifications::{EngineEvent, EventBus};
use crate::tradelogic::cross_chain::{CrossChainOrchestrator, CrossChainOutcome, CrossChainRequest};
use crate::tradelogic::executors::{SwapExecutorRegistry, BPS};
use crate::tradelogic::traits::{SwapRequest, TradeDispatch, TransferRequest};
use crate::types::{TradeIntent, TradeResult};

fn require(value: &str, field: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Shape checks, no I/O
pub fn validate_intent(intent: &TradeIntent) -> EngineResult<()> {
    require(&intent.user_id, "user_id")?;
    require(&intent.user_address, "user_address")?;
    require(&intent.chain, "chain")?;
    require(&intent.from_asset, "from_asset")?;
    if intent.amount <= Decimal::ZERO {
        return Err(EngineError::Validation(format!("amount must be positive, got {}", intent.amount)));
    }
    if let Some(slippage) = intent.slippage_bps {
        if slippage > BPS {
            return Err(EngineError::Validation(format!("slippage {} bps exceeds 100%", slippage)));
        }
    }
    match intent.operation {
        OperationKind::Transfer => {
            require(intent.recipient.as_deref().unwrap_or_default(), "recipient")?;
            if matches!(&intent.destination_chain, Some(dst) if dst != &intent.chain) {
                return Err(EngineError::Validation("transfers cannot cross chains".to_string()));
            }
        }
        OperationKind::Swap => require(&intent.to_asset, "to_asset")?,
        OperationKind::Bridge => {
            require(&intent.to_asset, "to_asset")?;
            if !intent.is_cross_chain() {
                return Err(EngineError::Validation("bridge requires a different destination chain".to_string()));
            }
        }
    }
    Ok(())
}

pub struct TradeDispatcher {
    executors: SwapExecutorRegistry,
    cross_chain: Option<Arc<CrossChainOrchestrator>>,
    events: EventBus,
}

impl TradeDispatcher {
    pub fn new(executors: SwapExecutorRegistry, events: EventBus) -> Self {
        Self { executors, cross_chain: None, events }
    }

    pub fn with_cross_chain(mut self, orchestrator: Arc<CrossChainOrchestrator>) -> Self {
        self.cross_chain = Some(orchestrator);
        self
    }

    async fn route(&self, trade_id: &str, intent: &TradeIntent) -> EngineResult<TradeResult> {
        validate_intent(intent)?;

        if intent.is_cross_chain() {
            let orchestrator = self
                .cross_chain
                .as_ref()
                .ok_or_else(|| EngineError::ChainNotSupported("cross-chain routing is disabled".to_string()))?;
            let dst = intent.destination_chain.clone().unwrap_or_default();
            let report = orchestrator
                .execute(CrossChainRequest {
                    user_id: intent.user_id.clone(),
                    user_address: intent.user_address.clone(),
                    src_chain: intent.chain.clone(),
                    dst_chain: dst.clone(),
                    from_symbol: intent.from_asset.clone(),
                    to_symbol: intent.to_asset.clone(),
                    amount: intent.amount,
                })
                .await?;
            let tx_ref = match report.outcome {
                CrossChainOutcome::Executed { tx_ref } => tx_ref,
                CrossChainOutcome::ExecutedWithoutProof => {
                    warn!("Trade {}: order {} executed without proof, empty tx ref", trade_id, report.order_hash);
                    String::new()
                }
                other => {
                    return Err(EngineError::CrossChainNotExecuted {
                        order_hash: report.order_hash,
                        status: other.as_str().to_string(),
                    })
                }
            };
            return Ok(TradeResult {
                trade_id: trade_id.to_string(),
                chain: intent.chain.clone(),
                destination_chain: Some(dst),
                tx_ref,
                net_amount_in: report.net_amount_in,
                fee_amount: report.fee_amount,
                amount_out: report.amount_out,
            });
        }

        let executor = self.executors.get(&intent.chain)?;
        let outcome = match intent.operation {
            OperationKind::Transfer => {
                executor
                    .execute_transfer(TransferRequest {
                        user_id: intent.user_id.clone(),
                        user_address: intent.user_address.clone(),
                        symbol: intent.from_asset.clone(),
                        amount: intent.amount,
                        recipient: intent.recipient.clone().unwrap_or_default(),
                    })
                    .await?
            }
            OperationKind::Swap | OperationKind::Bridge => {
                executor
                    .execute_swap(SwapRequest {
                        user_id: intent.user_id.clone(),
                        user_address: intent.user_address.clone(),
                        from_symbol: intent.from_asset.clone(),
                        to_symbol: intent.to_asset.clone(),
                        amount_in: intent.amount,
                        min_amount_out: intent.min_amount_out,
                        slippage_bps: intent.slippage_bps,
                        venue: intent.venue.clone(),
                    })
                    .await?
            }
        };
        Ok(TradeResult {
            trade_id: trade_id.to_string(),
            chain: intent.chain.clone(),
            destination_chain: None,
            tx_ref: outcome.tx_ref,
            net_amount_in: outcome.net_amount_in,
            fee_amount: outcome.fee_amount,
            amount_out: outcome.amount_out,
        })
    }
}

#[async_trait]
impl TradeDispatch for TradeDispatcher {
    async fn dispatch(&self, intent: TradeIntent) -> EngineResult<TradeResult> {
        let trade_id = Uuid::new_v4().to_string();
        let operation = if intent.is_cross_chain() { "cross_chain" } else { intent.operation.as_str() };

        match self.route(&trade_id, &intent).await {
            Ok(result) => {
                info!(
                    "Trade {} {} {} {} -> {} {} on {} ({})",
                    trade_id, operation, result.net_amount_in, intent.from_asset, result.amount_out, intent.to_asset, intent.chain, result.tx_ref
                );
                metric::record_trade(&intent.chain, operation, "completed");
                self.events.publish(EngineEvent::TradeCompleted {
                    trade_id: trade_id.clone(),
                    user_id: intent.user_id.clone(),
                    chain: intent.chain.clone(),
                    destination_chain: result.destination_chain.clone(),
                    from_asset: intent.from_asset.clone(),
                    to_asset: intent.to_asset.clone(),
                    amount_in: result.net_amount_in.to_string(),
                    fee_amount: result.fee_amount.to_string(),
                    amount_out: result.amount_out.to_string(),
                    tx_ref: result.tx_ref.clone(),
                });
                Ok(result)
            }
            Err(e) => {
                warn!("Trade {} {} on {} failed: {}", trade_id, operation, intent.chain, e);
                metric::record_trade(&intent.chain, operation, e.category().as_str());
                self.events.publish(EngineEvent::TradeFailed {
                    trade_id,
                    user_id: intent.user_id.clone(),
                    chain: intent.chain.clone(),
                    from_asset: intent.from_asset.clone(),
                    to_asset: intent.to_asset.clone(),
                    amount_in: intent.amount.to_string(),
                    category: e.category().to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent() -> TradeIntent {
        TradeIntent::swap("user-1", "0xabc", "bsc", "USDT", "BNB", Decimal::new(25, 0))
    }

    #[test]
    fn test_validation_rejects_missing_fields() {
        assert!(validate_intent(&intent()).is_ok());

        let mut missing_user = intent();
        missing_user.user_id = " ".to_string();
        assert!(matches!(validate_intent(&missing_user), Err(EngineError::Validation(_))));

        let mut zero = intent();
        zero.amount = Decimal::ZERO;
        assert!(matches!(validate_intent(&zero), Err(EngineError::Validation(_))));

        let mut transfer = intent();
        transfer.operation = OperationKind::Transfer;
        assert!(matches!(validate_intent(&transfer), Err(EngineError::Validation(_))));
        transfer.recipient = Some("0xdef".to_string());
        assert!(validate_intent(&transfer).is_ok());
    }

    #[test]
    fn test_bridge_needs_other_chain() {
        let mut bridge = intent();
        bridge.operation = OperationKind::Bridge;
        assert!(validate_intent(&bridge).is_err());
        assert!(validate_intent(&bridge.with_destination("base")).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_chain_emits_failure() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let dispatcher = TradeDispatcher::new(SwapExecutorRegistry::default(), events);

        let err = dispatcher.dispatch(intent()).await.unwrap_err();
        assert!(matches!(err, EngineError::ChainNotSupported(_)));
        match rx.recv().await.unwrap() {
            EngineEvent::TradeFailed { category, chain, .. } => {
                assert_eq!(category, "validation");
                assert_eq!(chain, "bsc");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cross_chain_without_orchestrator() {
        let dispatcher = TradeDispatcher::new(SwapExecutorRegistry::default(), EventBus::default());
        let err = dispatcher.dispatch(intent().with_destination("base")).await.unwrap_err();
        assert!(matches!(err, EngineError::ChainNotSupported(_)));
    }
}
