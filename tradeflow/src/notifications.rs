/// Module phát sự kiện của engine
///
/// Engine không tự gửi thông báo tới người dùng; nó phát các `EngineEvent` phẳng
/// (id, chain, số lượng dạng chuỗi thập phân, tx ref, lý do) lên một broadcast
/// bus nội bộ. Các kênh thông báo (websocket, Telegram) subscribe bus này.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Dung lượng mặc định của bus
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Sự kiện do engine phát ra
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Một giao dịch dispatch thành công
    TradeCompleted {
        trade_id: String,
        user_id: String,
        chain: String,
        destination_chain: Option<String>,
        from_asset: String,
        to_asset: String,
        amount_in: String,
        fee_amount: String,
        amount_out: String,
        tx_ref: String,
    },
    /// Một giao dịch dispatch thất bại
    TradeFailed {
        trade_id: String,
        user_id: String,
        chain: String,
        from_asset: String,
        to_asset: String,
        amount_in: String,
        category: String,
        reason: String,
    },
    /// Một chu kỳ DCA đã được xử lý
    DcaCycleFired {
        key: String,
        user_id: String,
        chain: String,
        amount: String,
        cycles_left: u32,
        /// consumed | failed-skipped | retrying
        outcome: String,
        tx_ref: Option<String>,
        error: Option<String>,
    },
    /// Subscription DCA kết thúc
    DcaClosed {
        key: String,
        user_id: String,
        chain: String,
        /// completed | closed-by-user
        reason: String,
    },
    /// Limit order đóng
    LimitOrderClosed {
        order_id: String,
        user_id: String,
        chain: String,
        reason: String,
        success: bool,
        tx_ref: Option<String>,
        amount_in: String,
        amount_out: Option<String>,
        error: Option<String>,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TradeCompleted { .. } => "trade_completed",
            Self::TradeFailed { .. } => "trade_failed",
            Self::DcaCycleFired { .. } => "dca_cycle_fired",
            Self::DcaClosed { .. } => "dca_closed",
            Self::LimitOrderClosed { .. } => "limit_order_closed",
        }
    }
}

/// Broadcast bus, fire-and-forget
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Phát một sự kiện; không có subscriber thì sự kiện bị bỏ qua
    pub fn publish(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            debug!("Event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Subscriber ghi log mọi sự kiện, luôn được gắn khi engine khởi động
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match &event {
                    EngineEvent::TradeFailed { trade_id, chain, reason, .. } => {
                        warn!("[event] trade_failed {} on {}: {}", trade_id, chain, reason);
                    }
                    other => match serde_json::to_string(other) {
                        Ok(json) => info!("[event] {}", json),
                        Err(_) => info!("[event] {}", other.name()),
                    },
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event logger lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
