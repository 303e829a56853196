mod common;

use std::sync::Arc;
use std::time::Duration;

use tradeflow::notifications::{EngineEvent, EventBus};
use tradeflow::scheduler::{Clock, DcaScheduler, ManualClock, SchedulerPass};
use tradeflow::store::{DcaStore, InMemoryStore};
use tradeflow::tokens::ConfigTokenResolver;
use tradeflow::types::DcaCycleState;
use tradeflow::{ChainFamily, DcaRequest, EngineError, TradingEngine};

use common::*;

const START: u64 = 1_700_000_000;
const HOUR: u64 = 3_600;

struct Fixture {
    engine: TradingEngine,
    scheduler: DcaScheduler,
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    events: EventBus,
}

fn fixture(dispatcher: MockDispatch) -> Fixture {
    let dispatcher = Arc::new(dispatcher);
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(START));
    let events = EventBus::new(64);
    let engine = TradingEngine::new(
        dispatcher.clone(),
        Arc::new(ConfigTokenResolver::new(&engine_config())),
        Arc::new(FakePrice::new(dec("300"))),
        store.clone(),
        store.clone(),
        events.clone(),
        clock.clone(),
    );
    let scheduler = DcaScheduler::new(store.clone(), dispatcher, events.clone(), clock.clone(), Duration::from_secs(10), 3);
    Fixture { engine, scheduler, store, clock, events }
}

fn request(amount: &str, per_cycle: &str) -> DcaRequest {
    DcaRequest {
        user_id: USER.to_string(),
        user_address: user_address(),
        chain: "bsc".to_string(),
        token_in: "USDT".to_string(),
        token_out: "BNB".to_string(),
        amount: dec(amount),
        amount_per_cycle: dec(per_cycle),
        cycle_interval_secs: HOUR,
        venue: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_subscription_runs_every_cycle_then_closes() {
    let mut dispatcher = MockDispatch::new();
    dispatcher
        .expect_dispatch()
        .withf(|intent| {
            intent.from_asset == BSC_USDT
                && intent.to_asset == ChainFamily::Evm.default_native_marker()
                && intent.amount == dec("25")
        })
        .times(4)
        .returning(|_| Ok(ok_result("0xdca")));
    let f = fixture(dispatcher);
    let mut events = f.events.subscribe();

    let subscription = f.engine.subscribe_dca(request("100", "25")).await.unwrap();
    assert_eq!(subscription.cycles_left, 4);
    assert_eq!(subscription.last_trigger, 0);

    for remaining in (0..4).rev() {
        let summary = f.scheduler.run_pass().await;
        assert_eq!(summary.fired, 1);
        if remaining > 0 {
            let stored = f.store.get_subscription(&subscription.key).await.unwrap().unwrap();
            assert_eq!(stored.cycles_left, remaining);
            assert_eq!(stored.last_trigger, f.clock.now());
            assert_eq!(stored.state, DcaCycleState::Idle);
        }
        // a second pass inside the same interval does nothing
        assert_eq!(f.scheduler.run_pass().await.fired, 0);
        f.clock.advance(HOUR);
    }

    let mut fired = 0;
    loop {
        match events.recv().await.unwrap() {
            EngineEvent::DcaCycleFired { outcome, .. } => {
                assert_eq!(outcome, "consumed");
                fired += 1;
            }
            EngineEvent::DcaClosed { key, reason, .. } => {
                assert_eq!(key, subscription.key);
                assert_eq!(reason, "completed");
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(fired, 4);
    assert!(f.store.get_subscription(&subscription.key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cycle_amount_above_total_is_rejected() {
    let mut dispatcher = MockDispatch::new();
    dispatcher.expect_dispatch().never();
    let f = fixture(dispatcher);

    let err = f.engine.subscribe_dca(request("10", "25")).await.unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert!(f.store.list_active_subscriptions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_cycle_is_dropped() {
    let mut dispatcher = MockDispatch::new();
    dispatcher.expect_dispatch().never();
    let f = fixture(dispatcher);

    let subscription = f.engine.subscribe_dca(request("110", "25")).await.unwrap();
    assert_eq!(subscription.cycles_left, 4);
    assert_eq!(subscription.amount_left, dec("110"));
}

#[tokio::test]
async fn test_user_close_deletes_and_reports_once() {
    let mut dispatcher = MockDispatch::new();
    dispatcher.expect_dispatch().never();
    let f = fixture(dispatcher);
    let mut events = f.events.subscribe();

    let subscription = f.engine.subscribe_dca(request("100", "25")).await.unwrap();
    let address = user_address();

    let err = f.engine.close_dca("someone-else", &address, &subscription.key).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    assert!(f.engine.close_dca(USER, &address, &subscription.key).await.unwrap());
    assert!(!f.engine.close_dca(USER, &address, &subscription.key).await.unwrap());

    match events.recv().await.unwrap() {
        EngineEvent::DcaClosed { reason, .. } => assert_eq!(reason, "closed-by-user"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(f.scheduler.run_pass().await.scanned, 0);
}
