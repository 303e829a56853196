//! DCA scheduler
//!
//! Trạng thái mỗi chu kỳ: `Idle/Due -> Executing -> {Consumed, FailedSkipped}`.
//! Chu kỳ chỉ bị trừ sau khi dispatch thành công; lỗi được thử lại ở các pass
//! sau, tối đa `max_cycle_retries` lần, rồi mới bỏ qua chu kỳ.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::metric;
use crate::notifications::{EngineEvent, EventBus};
use crate::scheduler::{Clock, PassSummary, SchedulerPass};
use crate::store::DcaStore;
use crate::tradelogic::traits::TradeDispatch;
use crate::types::{DcaCycleState, DcaSubscription, TradeIntent};

pub const OUTCOME_CONSUMED: &str = "consumed";
pub const OUTCOME_FAILED_SKIPPED: &str = "failed-skipped";
pub const OUTCOME_RETRYING: &str = "retrying";

pub struct DcaScheduler {
    store: Arc<dyn DcaStore>,
    dispatcher: Arc<dyn TradeDispatch>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    grace: Duration,
    max_cycle_retries: u32,
}

impl DcaScheduler {
    pub fn new(
        store: Arc<dyn DcaStore>,
        dispatcher: Arc<dyn TradeDispatch>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        grace: Duration,
        max_cycle_retries: u32,
    ) -> Self {
        Self { store, dispatcher, events, clock, grace, max_cycle_retries }
    }

    /// Chu kỳ cần chạy: đến hạn, đang chờ thử lại, hoặc bị kẹt ở Executing từ lần chạy trước
    fn needs_cycle(subscription: &DcaSubscription, now: u64) -> bool {
        match subscription.state {
            DcaCycleState::Due | DcaCycleState::Executing => subscription.cycles_left > 0,
            DcaCycleState::Idle => subscription.is_due(now),
        }
    }

    fn schedule_deletion(&self, subscription: &DcaSubscription) {
        let store = self.store.clone();
        let events = self.events.clone();
        let grace = self.grace;
        let key = subscription.key.clone();
        let user_id = subscription.user_id.clone();
        let chain = subscription.chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match store.delete_subscription(&key).await {
                Ok(true) => {
                    info!("DCA {} exhausted, deleted", key);
                    events.publish(EngineEvent::DcaClosed { key, user_id, chain, reason: "completed".to_string() });
                }
                Ok(false) => debug!("DCA {} already removed", key),
                Err(e) => warn!("DCA {}: deletion failed: {}", key, e),
            }
        });
    }

    async fn run_cycle(&self, mut subscription: DcaSubscription, now: u64, summary: &mut PassSummary) {
        subscription.state = DcaCycleState::Executing;
        match self.store.update_subscription(&subscription).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("DCA {} closed before its cycle fired", subscription.key);
                summary.skipped += 1;
                return;
            }
            Err(e) => {
                warn!("DCA {}: cannot mark cycle as executing: {}", subscription.key, e);
                summary.skipped += 1;
                return;
            }
        }

        let intent = TradeIntent::swap(
            subscription.user_id.clone(),
            subscription.user_address.clone(),
            subscription.chain.clone(),
            subscription.token_in.address.clone(),
            subscription.token_out.address.clone(),
            subscription.amount_per_cycle,
        )
        .with_venue(subscription.venue.clone());

        let (outcome, tx_ref, error) = match self.dispatcher.dispatch(intent).await {
            Ok(result) => {
                subscription.consume_cycle(now);
                summary.fired += 1;
                (OUTCOME_CONSUMED, Some(result.tx_ref), None)
            }
            Err(e) => {
                summary.failed += 1;
                subscription.failed_attempts += 1;
                if subscription.failed_attempts >= self.max_cycle_retries.max(1) {
                    warn!("DCA {}: cycle skipped after {} failures: {}", subscription.key, subscription.failed_attempts, e);
                    subscription.consume_cycle(now);
                    (OUTCOME_FAILED_SKIPPED, None, Some(e.to_string()))
                } else {
                    warn!("DCA {}: attempt {} failed, retrying next pass: {}", subscription.key, subscription.failed_attempts, e);
                    subscription.state = DcaCycleState::Due;
                    (OUTCOME_RETRYING, None, Some(e.to_string()))
                }
            }
        };

        let persisted = match self.store.update_subscription(&subscription).await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("DCA {}: cannot persist cycle outcome: {}", subscription.key, e);
                false
            }
        };

        metric::record_dca_cycle(&subscription.chain, outcome);
        self.events.publish(EngineEvent::DcaCycleFired {
            key: subscription.key.clone(),
            user_id: subscription.user_id.clone(),
            chain: subscription.chain.clone(),
            amount: subscription.amount_per_cycle.to_string(),
            cycles_left: subscription.cycles_left,
            outcome: outcome.to_string(),
            tx_ref,
            error,
        });

        if persisted && subscription.is_exhausted() {
            summary.closed += 1;
            self.schedule_deletion(&subscription);
        }
    }
}

#[async_trait]
impl SchedulerPass for DcaScheduler {
    fn name(&self) -> &'static str {
        "dca"
    }

    async fn run_pass(&self) -> PassSummary {
        let mut summary = PassSummary::default();
        let now = self.clock.now();
        let subscriptions = match self.store.list_active_subscriptions().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!("DCA pass: cannot load subscriptions: {}", e);
                return summary;
            }
        };

        for subscription in subscriptions {
            summary.scanned += 1;
            if !Self::needs_cycle(&subscription, now) {
                continue;
            }
            self.run_cycle(subscription, now, &mut summary).await;
        }
        summary
    }
}
