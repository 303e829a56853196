//! Giá cho limit order, lấy từ quote của venue

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};
use crate::tradelogic::executors::SwapExecutorRegistry;
use crate::tradelogic::traits::PriceSource;

/// Giá của một đơn vị `base` tính bằng `quote`, dựa trên quote của venue trên chain
pub struct VenueQuotePriceSource {
    executors: SwapExecutorRegistry,
}

impl VenueQuotePriceSource {
    pub fn new(executors: SwapExecutorRegistry) -> Self {
        Self { executors }
    }
}

#[async_trait]
impl PriceSource for VenueQuotePriceSource {
    async fn price(&self, chain: &str, venue: Option<String>, base: &str, quote: &str) -> EngineResult<Decimal> {
        let executor = self.executors.get(chain)?;
        let price = executor.quote(base, quote, Decimal::ONE, venue).await?;
        if price <= Decimal::ZERO {
            return Err(EngineError::Remote(format!("zero price for {}/{} on {}", base, quote, chain)));
        }
        Ok(price)
    }
}
