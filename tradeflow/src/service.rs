//! Engine facade
//!
//! Entry points for the API layer: one-shot trades go straight to the
//! dispatcher, standing intents (DCA subscriptions and limit orders) are
//! validated, priced and persisted for the schedulers to pick up.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::notifications::{EngineEvent, EventBus};
use crate::scheduler::Clock;
use crate::store::{DcaStore, LimitOrderStore};
use crate::tokens::TokenResolver;
use crate::tradelogic::traits::{PriceSource, TradeDispatch};
use crate::types::{DcaCycleState, DcaSubscription, LimitOrder, LimitOrderCloseReason, TradeIntent, TradeResult};

/// Yêu cầu đăng ký DCA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaRequest {
    pub user_id: String,
    pub user_address: String,
    pub chain: String,
    /// Asset spent each cycle
    pub token_in: String,
    /// Asset bought each cycle
    pub token_out: String,
    pub amount: Decimal,
    pub amount_per_cycle: Decimal,
    pub cycle_interval_secs: u64,
    pub venue: Option<String>,
}

/// Yêu cầu tạo limit order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOrderRequest {
    pub user_id: String,
    pub user_address: String,
    pub chain: String,
    /// Asset the position was bought with
    pub token_in: String,
    /// Held asset to sell back
    pub token_out: String,
    pub amount: Decimal,
    /// Percentage below the entry price that triggers the sell
    pub threshold: Decimal,
    /// Unix seconds, 0 = never
    #[serde(default)]
    pub expiration: u64,
    pub venue: Option<String>,
}

fn require(value: &str, field: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn owned_by(user_id: &str, address: &str, owner_id: &str, owner_address: &str) -> EngineResult<()> {
    if user_id != owner_id || !address.eq_ignore_ascii_case(owner_address) {
        return Err(EngineError::Validation("record belongs to another wallet".to_string()));
    }
    Ok(())
}

pub struct TradingEngine {
    dispatcher: Arc<dyn TradeDispatch>,
    resolver: Arc<dyn TokenResolver>,
    prices: Arc<dyn PriceSource>,
    dca_store: Arc<dyn DcaStore>,
    order_store: Arc<dyn LimitOrderStore>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl TradingEngine {
    pub fn new(
        dispatcher: Arc<dyn TradeDispatch>,
        resolver: Arc<dyn TokenResolver>,
        prices: Arc<dyn PriceSource>,
        dca_store: Arc<dyn DcaStore>,
        order_store: Arc<dyn LimitOrderStore>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { dispatcher, resolver, prices, dca_store, order_store, events, clock }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Giao dịch một lần
    pub async fn swap(&self, intent: TradeIntent) -> EngineResult<TradeResult> {
        self.dispatcher.dispatch(intent).await
    }

    /// Đăng ký DCA; `cycles = floor(amount / amount_per_cycle)`, chu kỳ đầu chạy ở pass kế tiếp
    pub async fn subscribe_dca(&self, request: DcaRequest) -> EngineResult<DcaSubscription> {
        require(&request.user_id, "user_id")?;
        require(&request.user_address, "user_address")?;
        require(&request.chain, "chain")?;
        if request.amount_per_cycle <= Decimal::ZERO {
            return Err(EngineError::Validation("amount per cycle must be positive".to_string()));
        }
        if request.amount_per_cycle > request.amount {
            return Err(EngineError::Validation(format!(
                "amount per cycle {} exceeds total amount {}",
                request.amount_per_cycle, request.amount
            )));
        }
        if request.cycle_interval_secs == 0 {
            return Err(EngineError::Validation("cycle interval must be positive".to_string()));
        }
        let cycles = (request.amount / request.amount_per_cycle)
            .floor()
            .to_u32()
            .ok_or_else(|| EngineError::Validation("too many cycles".to_string()))?;

        let token_in = self.resolver.resolve(&request.chain, &request.token_in).await?;
        let token_out = self.resolver.resolve(&request.chain, &request.token_out).await?;

        let subscription = DcaSubscription {
            key: Uuid::new_v4().to_string(),
            user_id: request.user_id,
            user_address: request.user_address,
            chain: request.chain,
            token_in,
            token_out,
            total_amount: request.amount,
            amount_per_cycle: request.amount_per_cycle,
            cycle_interval_secs: request.cycle_interval_secs,
            cycles_left: cycles,
            amount_left: request.amount,
            last_trigger: 0,
            venue: request.venue,
            state: DcaCycleState::Idle,
            failed_attempts: 0,
            created_at: self.clock.now(),
        };
        self.dca_store.insert_subscription(&subscription).await?;
        info!("DCA {} created: {} cycles of {} {}", subscription.key, cycles, subscription.amount_per_cycle, subscription.token_in.symbol);
        Ok(subscription)
    }

    /// Người dùng hủy DCA; trả về false nếu không còn bản ghi
    pub async fn close_dca(&self, user_id: &str, address: &str, key: &str) -> EngineResult<bool> {
        let subscription = match self.dca_store.get_subscription(key).await? {
            Some(subscription) => subscription,
            None => return Ok(false),
        };
        owned_by(user_id, address, &subscription.user_id, &subscription.user_address)?;
        if !self.dca_store.delete_subscription(key).await? {
            return Ok(false);
        }
        info!("DCA {} closed by user", key);
        self.events.publish(EngineEvent::DcaClosed {
            key: key.to_string(),
            user_id: subscription.user_id,
            chain: subscription.chain,
            reason: "closed-by-user".to_string(),
        });
        Ok(true)
    }

    /// Tạo limit order với giá mua là giá hiện tại trên venue
    pub async fn create_limit_order(&self, request: LimitOrderRequest) -> EngineResult<LimitOrder> {
        require(&request.user_id, "user_id")?;
        require(&request.user_address, "user_address")?;
        require(&request.chain, "chain")?;
        if request.amount <= Decimal::ZERO {
            return Err(EngineError::Validation("amount must be positive".to_string()));
        }
        let now = self.clock.now();
        if request.expiration != 0 && request.expiration <= now {
            return Err(EngineError::Validation("expiration is in the past".to_string()));
        }

        let token_in = self.resolver.resolve(&request.chain, &request.token_in).await?;
        let token_out = self.resolver.resolve(&request.chain, &request.token_out).await?;
        let buy_price = self
            .prices
            .price(&request.chain, request.venue.clone(), &token_out.address, &token_in.address)
            .await?;
        let sell_price = LimitOrder::compute_sell_price(buy_price, request.threshold)?;

        let order = LimitOrder {
            order_id: Uuid::new_v4().to_string(),
            user_id: request.user_id,
            user_address: request.user_address,
            chain: request.chain,
            venue: request.venue,
            token_in,
            token_out,
            amount: request.amount,
            buy_price,
            sell_price,
            threshold: request.threshold,
            created_at: now,
            expiration: request.expiration,
            is_active: true,
            close_reason: None,
            closed_at: None,
            close_tx_ref: None,
        };
        self.order_store.insert_order(&order).await?;
        info!("Limit order {} created: buy {} sell {}", order.order_id, buy_price, sell_price);
        Ok(order)
    }

    /// Người dùng đóng limit order; đóng lệnh đã inactive là no-op
    pub async fn close_limit_order(&self, user_id: &str, address: &str, order_id: &str) -> EngineResult<bool> {
        let mut order = self
            .order_store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown limit order {}", order_id)))?;
        owned_by(user_id, address, &order.user_id, &order.user_address)?;
        if !order.close(LimitOrderCloseReason::ClosedByUser, self.clock.now()) {
            return Ok(false);
        }
        if !self.order_store.close_order(&order).await? {
            return Ok(false);
        }
        info!("Limit order {} closed by user", order_id);
        self.events.publish(EngineEvent::LimitOrderClosed {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            chain: order.chain.clone(),
            reason: LimitOrderCloseReason::ClosedByUser.as_str().to_string(),
            success: false,
            tx_ref: None,
            amount_in: order.amount.to_string(),
            amount_out: None,
            error: None,
        });
        Ok(true)
    }
}
