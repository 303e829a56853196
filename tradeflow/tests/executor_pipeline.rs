mod common;

use std::sync::Arc;

use ethers::types::U256;
use tradeflow::tradelogic::traits::{SwapExecutor, SwapRequest, SwapVenue, TransferRequest};
use tradeflow::notifications::{EngineEvent, EventBus};
use tradeflow::tradelogic::traits::TradeDispatch;
use tradeflow::tradelogic::{SwapExecutorRegistry, TradeDispatcher, VenueSwapExecutor};
use tradeflow::{ChainFamily, EngineError, OperationKind, TradeIntent};

use common::*;

fn swap_request(from: &str, to: &str, amount: &str) -> SwapRequest {
    SwapRequest {
        user_id: USER.to_string(),
        user_address: user_address(),
        from_symbol: from.to_string(),
        to_symbol: to.to_string(),
        amount_in: dec(amount),
        min_amount_out: None,
        slippage_bps: None,
        venue: None,
    }
}

async fn executor(chain: Arc<FakeChain>, swap_rate: &str) -> VenueSwapExecutor {
    // 0.003 BNB per USDT
    let venue: Arc<dyn SwapVenue> = Arc::new(FakeVenue { rate: U256::from(3u64) * U256::exp10(15) });
    VenueSwapExecutor::new(chain, vec![venue], executor_context(swap_rate).await).unwrap()
}

#[tokio::test]
async fn test_token_to_native_swap_skims_fee_then_swaps() {
    let chain = Arc::new(FakeChain::bsc());
    chain.set_native(ether(1));
    chain.set_token(BSC_USDT, ether(100));
    chain.credit_on_submit(ChainFamily::Evm.default_native_marker(), U256::from(299u64) * U256::exp10(15));
    let executor = executor(chain.clone(), "0.3").await;

    let outcome = executor.execute_swap(swap_request("USDT", "BNB", "100")).await.unwrap();

    assert_eq!(outcome.fee_amount, dec("0.3"));
    assert_eq!(outcome.net_amount_in, dec("99.7"));
    assert_eq!(outcome.amount_out, dec("0.299"));
    assert_eq!(outcome.tx_ref, "0xswap");

    let net = U256::from(997u64) * U256::exp10(17);
    let fee = U256::from(3u64) * U256::exp10(17);
    assert_eq!(
        chain.calls(),
        vec![
            format!("transfer:USDT:{}:{}", TREASURY, fee),
            format!("approve:{}", net),
            "submit".to_string(),
        ]
    );
    assert_eq!(chain.balance(BSC_USDT), net);
}

#[tokio::test]
async fn test_insufficient_native_balance_touches_nothing() {
    let chain = Arc::new(FakeChain::bsc());
    chain.set_native(ether(1));
    let executor = executor(chain.clone(), "0.3").await;

    let err = executor.execute_swap(swap_request("BNB", "USDT", "5")).await.unwrap_err();

    assert!(matches!(err, EngineError::InsufficientBalance { ref asset, .. } if asset == "BNB"));
    assert!(chain.calls().is_empty());
    assert_eq!(chain.native(), ether(1));
}

#[tokio::test]
async fn test_worst_case_gas_shortfall_never_submits() {
    let chain = Arc::new(FakeChain::bsc());
    chain.set_native(U256::from(1_000u64));
    chain.set_token(BSC_USDT, ether(100));
    let executor = executor(chain.clone(), "0.3").await;

    let err = executor.execute_swap(swap_request("USDT", "BNB", "100")).await.unwrap_err();

    assert!(matches!(err, EngineError::InsufficientBalanceForWorstCaseGas { .. }));
    assert!(!chain.calls().iter().any(|call| call == "submit"));
}

#[tokio::test]
async fn test_swap_into_same_asset_is_rejected() {
    let chain = Arc::new(FakeChain::bsc());
    chain.set_token(BSC_USDT, ether(100));
    let executor = executor(chain.clone(), "0.3").await;

    let err = executor.execute_swap(swap_request("USDT", BSC_USDT, "1")).await.unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn test_transfer_without_fee_rate_sends_full_amount() {
    let chain = Arc::new(FakeChain::bsc());
    chain.set_token(BSC_USDT, ether(10));
    let executor = executor(chain.clone(), "0.3").await;

    let outcome = executor
        .execute_transfer(TransferRequest {
            user_id: USER.to_string(),
            user_address: user_address(),
            symbol: "USDT".to_string(),
            amount: dec("4"),
            recipient: "0x00000000000000000000000000000000000000b0".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(outcome.fee_amount, dec("0"));
    assert_eq!(outcome.amount_out, dec("4"));
    assert_eq!(chain.calls().len(), 1);
    assert_eq!(chain.balance(BSC_USDT), ether(6));
}

#[tokio::test]
async fn test_quote_uses_default_venue() {
    let chain = Arc::new(FakeChain::bsc());
    let executor = executor(chain, "0.3").await;

    let price = executor.quote("USDT", "BNB", dec("1"), None).await.unwrap();
    assert_eq!(price, dec("0.003"));

    let err = executor.quote("USDT", "BNB", dec("1"), Some("nowhere".to_string())).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_dispatcher_routes_transfer_and_reports_it() {
    let chain = Arc::new(FakeChain::bsc());
    chain.set_token(BSC_USDT, ether(10));
    let executor: Arc<dyn SwapExecutor> = Arc::new(executor(chain.clone(), "0.3").await);
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let dispatcher = TradeDispatcher::new(SwapExecutorRegistry::new(vec![executor]).unwrap(), events);

    let mut intent = TradeIntent::swap(USER, user_address(), "bsc", "USDT", "", dec("2"));
    intent.operation = OperationKind::Transfer;
    intent.recipient = Some("0x00000000000000000000000000000000000000b0".to_string());
    let result = dispatcher.dispatch(intent).await.unwrap();

    assert_eq!(result.tx_ref, "0xtransfer");
    assert_eq!(chain.balance(BSC_USDT), ether(8));
    match rx.recv().await.unwrap() {
        EngineEvent::TradeCompleted { trade_id, tx_ref, .. } => {
            assert_eq!(trade_id, result.trade_id);
            assert_eq!(tx_ref, "0xtransfer");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_dispatcher_rejects_unknown_chain_before_any_call() {
    let chain = Arc::new(FakeChain::bsc());
    let executor: Arc<dyn SwapExecutor> = Arc::new(executor(chain.clone(), "0.3").await);
    let dispatcher = TradeDispatcher::new(SwapExecutorRegistry::new(vec![executor]).unwrap(), EventBus::default());

    let intent = TradeIntent::swap(USER, user_address(), "polygon", "USDT", "BNB", dec("1"));
    let err = dispatcher.dispatch(intent).await.unwrap_err();

    assert!(matches!(err, EngineError::ChainNotSupported(_)));
    assert!(chain.calls().is_empty());
}
