//! Shared data types for the trading engine
//!
//! Intents, results, standing orders (DCA subscriptions and limit orders) and the
//! conversions between human-readable decimal amounts and on-chain integer units.

use std::fmt;

use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use common::OperationKind;

use crate::error::{EngineError, EngineResult};

/// Resolved asset on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Symbol as given by the user or config
    pub symbol: String,
    /// Contract address / mint (native marker for the native asset)
    pub address: String,
    /// Token decimals
    pub decimals: u8,
    /// Whether this is the chain's native asset
    pub is_native: bool,
}

/// Normalized unit of work passed to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub user_id: String,
    pub user_address: String,
    /// Source chain name
    pub chain: String,
    /// Destination chain for bridge / cross-chain swaps
    pub destination_chain: Option<String>,
    pub from_asset: String,
    pub to_asset: String,
    /// Amount of `from_asset` in human units (before fee)
    pub amount: Decimal,
    pub operation: OperationKind,
    /// Slippage tolerance in basis points
    pub slippage_bps: Option<u32>,
    /// Minimum acceptable output in human units
    pub min_amount_out: Option<Decimal>,
    /// Recipient for transfers
    pub recipient: Option<String>,
    /// Preferred venue tag on the source chain
    pub venue: Option<String>,
}

impl TradeIntent {
    /// Build a same-chain swap intent
    pub fn swap(
        user_id: impl Into<String>,
        user_address: impl Into<String>,
        chain: impl Into<String>,
        from_asset: impl Into<String>,
        to_asset: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_address: user_address.into(),
            chain: chain.into(),
            destination_chain: None,
            from_asset: from_asset.into(),
            to_asset: to_asset.into(),
            amount,
            operation: OperationKind::Swap,
            slippage_bps: None,
            min_amount_out: None,
            recipient: None,
            venue: None,
        }
    }

    pub fn with_venue(mut self, venue: Option<String>) -> Self {
        self.venue = venue;
        self
    }

    pub fn with_destination(mut self, chain: impl Into<String>) -> Self {
        self.destination_chain = Some(chain.into());
        self
    }

    /// True when the intent must go through the cross-chain orchestrator
    pub fn is_cross_chain(&self) -> bool {
        match &self.destination_chain {
            Some(dst) => dst != &self.chain && self.operation.allows_cross_chain(),
            None => false,
        }
    }
}

/// Outcome of a dispatched trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub trade_id: String,
    pub chain: String,
    pub destination_chain: Option<String>,
    /// Transaction reference of the primary transaction; empty when the venue gave no proof
    pub tx_ref: String,
    /// Amount that went into the venue after the fee skim
    pub net_amount_in: Decimal,
    /// Fee skimmed to the treasury
    pub fee_amount: Decimal,
    /// Realized output (balance delta), or the venue's figure for cross-chain fills
    pub amount_out: Decimal,
}

/// Per-subscription cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DcaCycleState {
    /// Waiting for the next cycle
    Idle,
    /// Cycle is due (retrying after a failed attempt)
    Due,
    /// A dispatch for the current cycle is in flight
    Executing,
}

impl Default for DcaCycleState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Persisted recurring-buy subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaSubscription {
    /// Unique subscription key
    pub key: String,
    pub user_id: String,
    pub user_address: String,
    pub chain: String,
    pub token_in: TokenInfo,
    pub token_out: TokenInfo,
    pub total_amount: Decimal,
    pub amount_per_cycle: Decimal,
    pub cycle_interval_secs: u64,
    pub cycles_left: u32,
    pub amount_left: Decimal,
    /// Unix seconds of the last consumed cycle (0 = never)
    pub last_trigger: u64,
    pub venue: Option<String>,
    #[serde(default)]
    pub state: DcaCycleState,
    /// Failed attempts for the current cycle
    #[serde(default)]
    pub failed_attempts: u32,
    pub created_at: u64,
}

impl DcaSubscription {
    /// Cycle is due at `now`
    pub fn is_due(&self, now: u64) -> bool {
        self.cycles_left > 0 && now >= self.last_trigger.saturating_add(self.cycle_interval_secs)
    }

    /// Consume one cycle, successful or skipped.
    ///
    /// The trigger time stays on the cycle's own slot, so a cycle that needed
    /// retries does not push the next one back. The first cycle, and a schedule
    /// that fell a whole interval behind, restart from `now`.
    pub fn consume_cycle(&mut self, now: u64) {
        self.cycles_left = self.cycles_left.saturating_sub(1);
        self.amount_left = (self.amount_left - self.amount_per_cycle).max(Decimal::ZERO);
        let slot = self.last_trigger.saturating_add(self.cycle_interval_secs);
        self.last_trigger = if self.last_trigger == 0 || now.saturating_sub(slot) >= self.cycle_interval_secs {
            now
        } else {
            slot
        };
        self.failed_attempts = 0;
        self.state = DcaCycleState::Idle;
    }

    pub fn is_exhausted(&self) -> bool {
        self.cycles_left == 0
    }
}

/// Why a limit order became inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitOrderCloseReason {
    Filled,
    Expired,
    ClosedByUser,
}

impl LimitOrderCloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filled => "filled",
            Self::Expired => "expired",
            Self::ClosedByUser => "closed-by-user",
        }
    }
}

impl fmt::Display for LimitOrderCloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted conditional sell order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub order_id: String,
    pub user_id: String,
    pub user_address: String,
    pub chain: String,
    pub venue: Option<String>,
    /// Asset the position was bought with; the sell returns into it
    pub token_in: TokenInfo,
    /// Held asset that gets sold back
    pub token_out: TokenInfo,
    /// Held amount of `token_out` to sell
    pub amount: Decimal,
    /// Price of one `token_out` in `token_in` at creation
    pub buy_price: Decimal,
    /// Trigger price
    pub sell_price: Decimal,
    /// Threshold percentage
    pub threshold: Decimal,
    pub created_at: u64,
    /// Unix seconds, 0 = never expires
    pub expiration: u64,
    pub is_active: bool,
    pub close_reason: Option<LimitOrderCloseReason>,
    pub closed_at: Option<u64>,
    pub close_tx_ref: Option<String>,
}

impl LimitOrder {
    /// `sellPrice = buyPrice / (1 + threshold / 100)`
    pub fn compute_sell_price(buy_price: Decimal, threshold: Decimal) -> EngineResult<Decimal> {
        let divisor = Decimal::ONE + threshold / Decimal::ONE_HUNDRED;
        if divisor <= Decimal::ZERO {
            return Err(EngineError::Validation(format!("threshold {} gives a non-positive divisor", threshold)));
        }
        Ok(buy_price / divisor)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration != 0 && now >= self.expiration
    }

    /// Deactivate the order; returns false if it was already inactive
    pub fn close(&mut self, reason: LimitOrderCloseReason, now: u64) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.close_reason = Some(reason);
        self.closed_at = Some(now);
        true
    }
}

/// Convert a human amount into integer units, truncating extra precision
pub fn amount_to_units(amount: Decimal, decimals: u8) -> EngineResult<U256> {
    if amount.is_sign_negative() {
        return Err(EngineError::Validation(format!("negative amount {}", amount)));
    }
    let mantissa = U256::from(amount.mantissa().unsigned_abs());
    let scale = amount.scale();
    let decimals = u32::from(decimals);
    let units = if scale <= decimals {
        mantissa
            .checked_mul(U256::exp10((decimals - scale) as usize))
            .ok_or_else(|| EngineError::Validation(format!("amount {} overflows", amount)))?
    } else {
        mantissa / U256::exp10((scale - decimals) as usize)
    };
    Ok(units)
}

/// Convert integer units into a human amount, dropping precision that does not fit a Decimal
pub fn units_to_amount(units: U256, decimals: u8) -> Decimal {
    let mut value = units;
    let mut scale = u32::from(decimals);
    let max = U256::from(u128::MAX >> 32);
    while value > max {
        value /= U256::from(10u8);
        if scale > 0 {
            scale -= 1;
        } else {
            return Decimal::MAX;
        }
    }
    while scale > 28 {
        value /= U256::from(10u8);
        scale -= 1;
    }
    Decimal::try_from_i128_with_scale(value.as_u128() as i128, scale)
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_consume_cycle_schedule() {
        let mut sub = crate::store::fixtures::subscription("k", 3);
        sub.consume_cycle(5_000);
        assert_eq!(sub.last_trigger, 5_000);

        // late by a retry: stays on the 8_600 slot
        sub.consume_cycle(8_700);
        assert_eq!(sub.last_trigger, 8_600);

        // a whole interval behind: restart from now
        sub.consume_cycle(20_000);
        assert_eq!(sub.last_trigger, 20_000);
        assert_eq!(sub.cycles_left, 0);
    }

    #[test]
    fn test_amount_conversions() {
        assert_eq!(amount_to_units(dec("1.5"), 18).unwrap(), U256::from(1_500_000_000_000_000_000u128));
        assert_eq!(amount_to_units(dec("0.1234567"), 6).unwrap(), U256::from(123_456u64));
        assert_eq!(units_to_amount(U256::from(2_500_000u64), 6), dec("2.5"));
        assert_eq!(units_to_amount(U256::exp10(30), 18), dec("1000000000000"));
        assert!(amount_to_units(dec("-1"), 6).is_err());
    }

    #[test]
    fn test_sell_price() {
        let sell = LimitOrder::compute_sell_price(dec("100"), dec("10")).unwrap();
        assert_eq!(sell.round_dp(2), dec("90.91"));
        assert!(LimitOrder::compute_sell_price(dec("100"), dec("-100")).is_err());
    }

    #[test]
    fn test_intent_cross_chain_detection() {
        let intent = TradeIntent::swap("u", "0xabc", "ethereum", "USDC", "USDC", dec("10"));
        assert!(!intent.is_cross_chain());
        assert!(intent.clone().with_destination("base").is_cross_chain());
        assert!(!intent.with_destination("ethereum").is_cross_chain());
    }
}
