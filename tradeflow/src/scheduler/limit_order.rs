//! Limit-order scheduler
//!
//! Each pass re-prices every open order through its recorded venue. Expired
//! orders close without trading; an order whose price fell to or below its
//! sell price is closed as filled first, then the sell-back swap is dispatched.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::metric;
use crate::notifications::{EngineEvent, EventBus};
use crate::scheduler::{Clock, PassSummary, SchedulerPass};
use crate::store::LimitOrderStore;
use crate::tradelogic::traits::{PriceSource, TradeDispatch};
use crate::types::{LimitOrder, LimitOrderCloseReason, TradeIntent};

pub struct LimitOrderScheduler {
    store: Arc<dyn LimitOrderStore>,
    prices: Arc<dyn PriceSource>,
    dispatcher: Arc<dyn TradeDispatch>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl LimitOrderScheduler {
    pub fn new(
        store: Arc<dyn LimitOrderStore>,
        prices: Arc<dyn PriceSource>,
        dispatcher: Arc<dyn TradeDispatch>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, prices, dispatcher, events, clock }
    }

    /// Persist a closure; false when the stored order is gone or was already
    /// closed, e.g. by the user while this pass was fetching the price
    async fn persist_close(&self, order: &mut LimitOrder, reason: LimitOrderCloseReason, now: u64) -> bool {
        if !order.close(reason, now) {
            return false;
        }
        match self.store.close_order(order).await {
            Ok(true) => true,
            Ok(false) => {
                debug!("Limit order {} was closed elsewhere, not closing as {}", order.order_id, reason);
                false
            }
            Err(e) => {
                warn!("Limit order {}: cannot persist {} closure: {}", order.order_id, reason, e);
                false
            }
        }
    }

    fn publish_closed(&self, order: &LimitOrder, success: bool, amount_out: Option<String>, error: Option<String>) {
        let reason = order.close_reason.map(|r| r.as_str()).unwrap_or("unknown");
        metric::record_limit_order_closure(&order.chain, reason);
        self.events.publish(EngineEvent::LimitOrderClosed {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            chain: order.chain.clone(),
            reason: reason.to_string(),
            success,
            tx_ref: order.close_tx_ref.clone(),
            amount_in: order.amount.to_string(),
            amount_out,
            error,
        });
    }

    async fn fill(&self, mut order: LimitOrder, now: u64, summary: &mut PassSummary) {
        if !self.persist_close(&mut order, LimitOrderCloseReason::Filled, now).await {
            summary.skipped += 1;
            return;
        }

        let intent = TradeIntent::swap(
            order.user_id.clone(),
            order.user_address.clone(),
            order.chain.clone(),
            order.token_out.address.clone(),
            order.token_in.address.clone(),
            order.amount,
        )
        .with_venue(order.venue.clone());

        match self.dispatcher.dispatch(intent).await {
            Ok(result) => {
                order.close_tx_ref = Some(result.tx_ref.clone());
                if let Err(e) = self.store.update_order(&order).await {
                    warn!("Limit order {}: cannot record tx ref: {}", order.order_id, e);
                }
                info!("Limit order {} filled ({})", order.order_id, result.tx_ref);
                summary.fired += 1;
                self.publish_closed(&order, true, Some(result.amount_out.to_string()), None);
            }
            Err(e) => {
                warn!("Limit order {}: sell-back failed: {}", order.order_id, e);
                summary.failed += 1;
                self.publish_closed(&order, false, None, Some(e.to_string()));
            }
        }
    }
}

#[async_trait]
impl SchedulerPass for LimitOrderScheduler {
    fn name(&self) -> &'static str {
        "limit_order"
    }

    async fn run_pass(&self) -> PassSummary {
        let mut summary = PassSummary::default();
        let now = self.clock.now();
        let orders = match self.store.list_open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Limit-order pass: cannot load orders: {}", e);
                return summary;
            }
        };

        for mut order in orders {
            summary.scanned += 1;
            if !order.is_active {
                continue;
            }

            if order.is_expired(now) {
                if self.persist_close(&mut order, LimitOrderCloseReason::Expired, now).await {
                    info!("Limit order {} expired", order.order_id);
                    summary.closed += 1;
                    self.publish_closed(&order, false, None, None);
                }
                continue;
            }

            let price = match self
                .prices
                .price(&order.chain, order.venue.clone(), &order.token_out.address, &order.token_in.address)
                .await
            {
                Ok(price) => price,
                Err(e) => {
                    warn!("Limit order {}: price unavailable, skipping: {}", order.order_id, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            debug!("Limit order {}: price {} vs sell {}", order.order_id, price, order.sell_price);
            if price <= order.sell_price {
                self.fill(order, now, &mut summary).await;
            }
        }
        summary
    }
}
