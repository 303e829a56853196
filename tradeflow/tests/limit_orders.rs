mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tradeflow::notifications::{EngineEvent, EventBus};
use tradeflow::scheduler::{LimitOrderScheduler, ManualClock, SchedulerPass};
use tradeflow::store::{InMemoryStore, LimitOrderStore};
use tradeflow::tokens::ConfigTokenResolver;
use tradeflow::tradelogic::traits::PriceSource;
use tradeflow::types::LimitOrderCloseReason;
use tradeflow::{EngineError, EngineResult, LimitOrderRequest, TradingEngine};

use common::*;

const START: u64 = 1_700_000_000;

struct Fixture {
    engine: TradingEngine,
    scheduler: LimitOrderScheduler,
    store: Arc<InMemoryStore>,
    prices: Arc<FakePrice>,
    clock: Arc<ManualClock>,
    events: EventBus,
}

fn fixture(dispatcher: MockDispatch) -> Fixture {
    let dispatcher = Arc::new(dispatcher);
    let store = Arc::new(InMemoryStore::new());
    let prices = Arc::new(FakePrice::new(dec("100")));
    let clock = Arc::new(ManualClock::new(START));
    let events = EventBus::new(64);
    let engine = TradingEngine::new(
        dispatcher.clone(),
        Arc::new(ConfigTokenResolver::new(&engine_config())),
        prices.clone(),
        store.clone(),
        store.clone(),
        events.clone(),
        clock.clone(),
    );
    let scheduler = LimitOrderScheduler::new(store.clone(), prices.clone(), dispatcher, events.clone(), clock.clone());
    Fixture { engine, scheduler, store, prices, clock, events }
}

fn request(expiration: u64) -> LimitOrderRequest {
    LimitOrderRequest {
        user_id: USER.to_string(),
        user_address: user_address(),
        chain: "bsc".to_string(),
        token_in: "USDT".to_string(),
        token_out: "BUSD".to_string(),
        amount: dec("50"),
        threshold: dec("10"),
        expiration,
        venue: None,
    }
}

#[tokio::test]
async fn test_order_fills_once_when_price_drops_to_sell_price() {
    let mut dispatcher = MockDispatch::new();
    dispatcher
        .expect_dispatch()
        .withf(|intent| intent.from_asset == BSC_BUSD && intent.to_asset == BSC_USDT && intent.amount == dec("50"))
        .times(1)
        .returning(|_| Ok(ok_result("0xfill")));
    let f = fixture(dispatcher);
    let mut events = f.events.subscribe();

    let order = f.engine.create_limit_order(request(0)).await.unwrap();
    assert_eq!(order.buy_price, dec("100"));
    assert_eq!(order.sell_price.round_dp(2), dec("90.91"));
    assert!(order.is_active);

    f.prices.set(Some(dec("95")));
    let summary = f.scheduler.run_pass().await;
    assert_eq!(summary.fired, 0);
    assert!(f.store.get_order(&order.order_id).await.unwrap().unwrap().is_active);

    f.prices.set(Some(dec("90")));
    assert_eq!(f.scheduler.run_pass().await.fired, 1);

    let stored = f.store.get_order(&order.order_id).await.unwrap().unwrap();
    assert!(!stored.is_active);
    assert_eq!(stored.close_reason, Some(LimitOrderCloseReason::Filled));
    assert_eq!(stored.close_tx_ref.as_deref(), Some("0xfill"));

    // closed orders are never evaluated again
    let calls = f.prices.calls();
    assert_eq!(f.scheduler.run_pass().await.scanned, 0);
    assert_eq!(f.prices.calls(), calls);

    match events.recv().await.unwrap() {
        EngineEvent::LimitOrderClosed { reason, success, tx_ref, .. } => {
            assert_eq!(reason, "filled");
            assert!(success);
            assert_eq!(tx_ref.as_deref(), Some("0xfill"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_sell_back_still_closes_order() {
    let mut dispatcher = MockDispatch::new();
    dispatcher
        .expect_dispatch()
        .times(1)
        .returning(|_| Err(EngineError::Remote("router reverted".to_string())));
    let f = fixture(dispatcher);
    let mut events = f.events.subscribe();

    let order = f.engine.create_limit_order(request(0)).await.unwrap();
    f.prices.set(Some(dec("80")));
    assert_eq!(f.scheduler.run_pass().await.failed, 1);
    assert_eq!(f.scheduler.run_pass().await.scanned, 0);

    let stored = f.store.get_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(stored.close_reason, Some(LimitOrderCloseReason::Filled));
    assert!(stored.close_tx_ref.is_none());

    match events.recv().await.unwrap() {
        EngineEvent::LimitOrderClosed { success, error, .. } => {
            assert!(!success);
            assert!(error.unwrap().contains("router reverted"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_expired_order_closes_without_trading() {
    let mut dispatcher = MockDispatch::new();
    dispatcher.expect_dispatch().never();
    let f = fixture(dispatcher);

    let order = f.engine.create_limit_order(request(START + 60)).await.unwrap();
    let calls = f.prices.calls();
    f.prices.set(Some(dec("1")));
    f.clock.advance(60);

    let summary = f.scheduler.run_pass().await;

    assert_eq!(summary.closed, 1);
    assert_eq!(f.prices.calls(), calls);
    let stored = f.store.get_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(stored.close_reason, Some(LimitOrderCloseReason::Expired));
    assert_eq!(stored.closed_at, Some(START + 60));
}

#[tokio::test]
async fn test_missing_price_skips_order() {
    let mut dispatcher = MockDispatch::new();
    dispatcher.expect_dispatch().never();
    let f = fixture(dispatcher);

    let order = f.engine.create_limit_order(request(0)).await.unwrap();
    f.prices.set(None);

    let summary = f.scheduler.run_pass().await;

    assert_eq!(summary.skipped, 1);
    assert!(f.store.get_order(&order.order_id).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn test_past_expiration_is_rejected() {
    let mut dispatcher = MockDispatch::new();
    dispatcher.expect_dispatch().never();
    let f = fixture(dispatcher);

    let err = f.engine.create_limit_order(request(START - 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_user_close_is_idempotent() {
    let mut dispatcher = MockDispatch::new();
    dispatcher.expect_dispatch().never();
    let f = fixture(dispatcher);
    let address = user_address();

    let order = f.engine.create_limit_order(request(0)).await.unwrap();

    assert!(f.engine.close_limit_order(USER, &address, &order.order_id).await.unwrap());
    assert!(!f.engine.close_limit_order(USER, &address, &order.order_id).await.unwrap());

    let stored = f.store.get_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(stored.close_reason, Some(LimitOrderCloseReason::ClosedByUser));

    let err = f.engine.close_limit_order(USER, &address, "missing").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(f.scheduler.run_pass().await.scanned, 0);
}

/// Quotes 100 until armed; once armed the user closes the order while the
/// quote is in flight, and the quote comes back below the sell price
struct UserClosesMidQuote {
    store: Arc<InMemoryStore>,
    order_id: Mutex<Option<String>>,
}

#[async_trait]
impl PriceSource for UserClosesMidQuote {
    async fn price(&self, _chain: &str, _venue: Option<String>, _base: &str, _quote: &str) -> EngineResult<Decimal> {
        let armed = self.order_id.lock().unwrap().clone();
        let Some(order_id) = armed else {
            return Ok(dec("100"));
        };
        let mut order = self.store.get_order(&order_id).await?.unwrap();
        assert!(order.close(LimitOrderCloseReason::ClosedByUser, START + 1));
        assert!(self.store.close_order(&order).await?);
        Ok(dec("80"))
    }
}

#[tokio::test]
async fn test_user_close_during_quote_wins_over_fill() {
    let mut dispatcher = MockDispatch::new();
    dispatcher.expect_dispatch().never();
    let dispatcher = Arc::new(dispatcher);
    let store = Arc::new(InMemoryStore::new());
    let prices = Arc::new(UserClosesMidQuote { store: store.clone(), order_id: Mutex::new(None) });
    let clock = Arc::new(ManualClock::new(START));
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let engine = TradingEngine::new(
        dispatcher.clone(),
        Arc::new(ConfigTokenResolver::new(&engine_config())),
        prices.clone(),
        store.clone(),
        store.clone(),
        events.clone(),
        clock.clone(),
    );
    let scheduler = LimitOrderScheduler::new(store.clone(), prices.clone(), dispatcher, events, clock);

    let order = engine.create_limit_order(request(0)).await.unwrap();
    *prices.order_id.lock().unwrap() = Some(order.order_id.clone());

    let summary = scheduler.run_pass().await;

    assert_eq!(summary.fired, 0);
    assert_eq!(summary.skipped, 1);
    let stored = store.get_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(stored.close_reason, Some(LimitOrderCloseReason::ClosedByUser));
    assert_eq!(stored.closed_at, Some(START + 1));
    assert!(stored.close_tx_ref.is_none());
    assert!(rx.try_recv().is_err());
}
