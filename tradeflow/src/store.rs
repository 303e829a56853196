//! Persistence for standing intents
//!
//! DCA subscriptions and limit orders are stored as JSON values, in memory or in
//! Redis hashes. The engine does no locking beyond read, mutate, write back;
//! `update` never recreates a record that was deleted in the meantime, and
//! `close_order` only writes while the stored order is still open. On Redis
//! both checks run inside a Lua script together with the write.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::{DcaSubscription, LimitOrder};

#[async_trait]
pub trait DcaStore: Send + Sync + 'static {
    async fn insert_subscription(&self, subscription: &DcaSubscription) -> EngineResult<()>;

    async fn get_subscription(&self, key: &str) -> EngineResult<Option<DcaSubscription>>;

    /// Subscriptions with cycles left
    async fn list_active_subscriptions(&self) -> EngineResult<Vec<DcaSubscription>>;

    /// Write back; returns false when the record no longer exists
    async fn update_subscription(&self, subscription: &DcaSubscription) -> EngineResult<bool>;

    /// Returns false when there was nothing to delete
    async fn delete_subscription(&self, key: &str) -> EngineResult<bool>;
}

#[async_trait]
pub trait LimitOrderStore: Send + Sync + 'static {
    async fn insert_order(&self, order: &LimitOrder) -> EngineResult<()>;

    async fn get_order(&self, order_id: &str) -> EngineResult<Option<LimitOrder>>;

    /// Orders with `is_active == true`
    async fn list_open_orders(&self) -> EngineResult<Vec<LimitOrder>>;

    /// Write back; returns false when the record no longer exists
    async fn update_order(&self, order: &LimitOrder) -> EngineResult<bool>;

    /// Write a closed order only if the stored one is still active.
    /// Returns false when the order is missing or was closed by someone else.
    async fn close_order(&self, order: &LimitOrder) -> EngineResult<bool>;
}

/// In-memory store, the default backend and the one used in tests
#[derive(Default)]
pub struct InMemoryStore {
    subscriptions: RwLock<HashMap<String, DcaSubscription>>,
    orders: RwLock<HashMap<String, LimitOrder>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DcaStore for InMemoryStore {
    async fn insert_subscription(&self, subscription: &DcaSubscription) -> EngineResult<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.key) {
            return Err(EngineError::Storage(format!("subscription {} already exists", subscription.key)));
        }
        subscriptions.insert(subscription.key.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, key: &str) -> EngineResult<Option<DcaSubscription>> {
        Ok(self.subscriptions.read().await.get(key).cloned())
    }

    async fn list_active_subscriptions(&self) -> EngineResult<Vec<DcaSubscription>> {
        let mut list: Vec<DcaSubscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.cycles_left > 0)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        Ok(list)
    }

    async fn update_subscription(&self, subscription: &DcaSubscription) -> EngineResult<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(&subscription.key) {
            Some(existing) => {
                *existing = subscription.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_subscription(&self, key: &str) -> EngineResult<bool> {
        Ok(self.subscriptions.write().await.remove(key).is_some())
    }
}

#[async_trait]
impl LimitOrderStore for InMemoryStore {
    async fn insert_order(&self, order: &LimitOrder) -> EngineResult<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.order_id) {
            return Err(EngineError::Storage(format!("order {} already exists", order.order_id)));
        }
        orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> EngineResult<Option<LimitOrder>> {
        Ok(self.orders.read().await.get(order_id).cloned())
    }

    async fn list_open_orders(&self) -> EngineResult<Vec<LimitOrder>> {
        let mut list: Vec<LimitOrder> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.is_active)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.order_id.cmp(&b.order_id)));
        Ok(list)
    }

    async fn update_order(&self, order: &LimitOrder) -> EngineResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.order_id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_order(&self, order: &LimitOrder) -> EngineResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.order_id) {
            Some(existing) if existing.is_active => {
                *existing = order.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// HSET only when the field already exists
const UPDATE_IF_EXISTS: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    return 1
end
return 0
"#;

/// HSET only when the stored record still has `is_active == true`
const CLOSE_IF_ACTIVE: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then
    return 0
end
if cjson.decode(current)['is_active'] ~= true then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
"#;

/// Redis store: one hash per record type, JSON values keyed by id
pub struct RedisStore {
    client: Client,
    prefix: String,
}

impl RedisStore {
    pub fn new(redis_url: &str, prefix: &str) -> EngineResult<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client, prefix: prefix.to_string() })
    }

    async fn get_connection(&self) -> EngineResult<redis::aio::Connection> {
        Ok(self.client.get_async_connection().await?)
    }

    fn hash(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    async fn put<T: Serialize + Sync>(&self, hash: &str, id: &str, value: &T) -> EngineResult<()> {
        let json = serde_json::to_string(value).map_err(|e| EngineError::Storage(e.to_string()))?;
        let mut conn = self.get_connection().await?;
        conn.hset::<_, _, _, ()>(self.hash(hash), id, json).await?;
        Ok(())
    }

    async fn fetch<T: DeserializeOwned>(&self, hash: &str, id: &str) -> EngineResult<Option<T>> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn.hget(self.hash(hash), id).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(|e| EngineError::Storage(e.to_string())))
            .transpose()
    }

    async fn values<T: DeserializeOwned>(&self, hash: &str) -> EngineResult<Vec<T>> {
        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn.hvals(self.hash(hash)).await?;
        let mut values = Vec::with_capacity(raw.len());
        for json in raw {
            match serde_json::from_str(&json) {
                Ok(value) => values.push(value),
                Err(e) => debug!("Skipping unreadable {} record: {}", hash, e),
            }
        }
        Ok(values)
    }

    /// Run a guarded write script; true when the script wrote
    async fn put_guarded<T: Serialize + Sync>(&self, script: &str, hash: &str, id: &str, value: &T) -> EngineResult<bool> {
        let json = serde_json::to_string(value).map_err(|e| EngineError::Storage(e.to_string()))?;
        let mut conn = self.get_connection().await?;
        let written: i32 = Script::new(script)
            .key(self.hash(hash))
            .arg(id)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn exists(&self, hash: &str, id: &str) -> EngineResult<bool> {
        let mut conn = self.get_connection().await?;
        Ok(conn.hexists(self.hash(hash), id).await?)
    }

    async fn remove(&self, hash: &str, id: &str) -> EngineResult<bool> {
        let mut conn = self.get_connection().await?;
        let removed: u32 = conn.hdel(self.hash(hash), id).await?;
        Ok(removed > 0)
    }
}

const DCA_HASH: &str = "dca";
const ORDER_HASH: &str = "limit_orders";

#[async_trait]
impl DcaStore for RedisStore {
    async fn insert_subscription(&self, subscription: &DcaSubscription) -> EngineResult<()> {
        if self.exists(DCA_HASH, &subscription.key).await? {
            return Err(EngineError::Storage(format!("subscription {} already exists", subscription.key)));
        }
        self.put(DCA_HASH, &subscription.key, subscription).await
    }

    async fn get_subscription(&self, key: &str) -> EngineResult<Option<DcaSubscription>> {
        self.fetch(DCA_HASH, key).await
    }

    async fn list_active_subscriptions(&self) -> EngineResult<Vec<DcaSubscription>> {
        let mut list: Vec<DcaSubscription> = self.values(DCA_HASH).await?;
        list.retain(|s| s.cycles_left > 0);
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        Ok(list)
    }

    async fn update_subscription(&self, subscription: &DcaSubscription) -> EngineResult<bool> {
        self.put_guarded(UPDATE_IF_EXISTS, DCA_HASH, &subscription.key, subscription).await
    }

    async fn delete_subscription(&self, key: &str) -> EngineResult<bool> {
        self.remove(DCA_HASH, key).await
    }
}

#[async_trait]
impl LimitOrderStore for RedisStore {
    async fn insert_order(&self, order: &LimitOrder) -> EngineResult<()> {
        if self.exists(ORDER_HASH, &order.order_id).await? {
            return Err(EngineError::Storage(format!("order {} already exists", order.order_id)));
        }
        self.put(ORDER_HASH, &order.order_id, order).await
    }

    async fn get_order(&self, order_id: &str) -> EngineResult<Option<LimitOrder>> {
        self.fetch(ORDER_HASH, order_id).await
    }

    async fn list_open_orders(&self) -> EngineResult<Vec<LimitOrder>> {
        let mut list: Vec<LimitOrder> = self.values(ORDER_HASH).await?;
        list.retain(|o| o.is_active);
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.order_id.cmp(&b.order_id)));
        Ok(list)
    }

    async fn update_order(&self, order: &LimitOrder) -> EngineResult<bool> {
        self.put_guarded(UPDATE_IF_EXISTS, ORDER_HASH, &order.order_id, order).await
    }

    async fn close_order(&self, order: &LimitOrder) -> EngineResult<bool> {
        self.put_guarded(CLOSE_IF_ACTIVE, ORDER_HASH, &order.order_id, order).await
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rust_decimal::Decimal;

    use crate::types::{DcaCycleState, DcaSubscription, LimitOrder, TokenInfo};

    pub fn token(symbol: &str, decimals: u8, is_native: bool) -> TokenInfo {
        TokenInfo {
            symbol: symbol.to_string(),
            address: format!("addr-{}", symbol.to_lowercase()),
            decimals,
            is_native,
        }
    }

    pub fn subscription(key: &str, cycles: u32) -> DcaSubscription {
        DcaSubscription {
            key: key.to_string(),
            user_id: "u1".into(),
            user_address: "0xabc".into(),
            chain: "bsc".into(),
            token_in: token("USDT", 18, false),
            token_out: token("BNB", 18, true),
            total_amount: Decimal::from(100),
            amount_per_cycle: Decimal::from(25),
            cycle_interval_secs: 3600,
            cycles_left: cycles,
            amount_left: Decimal::from(25 * cycles),
            last_trigger: 0,
            venue: None,
            state: DcaCycleState::Idle,
            failed_attempts: 0,
            created_at: 1,
        }
    }

    pub fn order(order_id: &str) -> LimitOrder {
        LimitOrder {
            order_id: order_id.to_string(),
            user_id: "u1".into(),
            user_address: "0xabc".into(),
            chain: "bsc".into(),
            venue: None,
            token_in: token("USDT", 18, false),
            token_out: token("CAKE", 18, false),
            amount: Decimal::from(10),
            buy_price: Decimal::from(100),
            sell_price: Decimal::new(9091, 2),
            threshold: Decimal::from(10),
            created_at: 1,
            expiration: 0,
            is_active: true,
            close_reason: None,
            closed_at: None,
            close_tx_ref: None,
        }
    }
}
