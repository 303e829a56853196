//! Fee extraction
//!
//! Tính và chuyển phần phí giao thức về treasury trước khi thực thi giao dịch
//! chính. Phí và giao dịch chính là hai transaction độc lập: phí đã chuyển thì
//! không được hoàn lại nếu giao dịch chính thất bại sau đó.

use std::collections::BTreeMap;

use ethers::types::{U256, U512};
use rust_decimal::Decimal;
use tracing::{debug, info};

use common::{ChainFamily, OperationKind};

use crate::chain_adapters::{ChainClient, ChainSigner};
use crate::config::{FeeConfig, FeeRates};
use crate::error::{EngineError, EngineResult};
use crate::types::TokenInfo;

/// `gross = fee + net`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSplit {
    pub gross: U256,
    pub fee: U256,
    pub net: U256,
    /// Treasury transfer, when one was sent
    pub tx_ref: Option<String>,
}

/// Validated fee rates and treasuries
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    rates: FeeRates,
    treasury: BTreeMap<ChainFamily, String>,
}

impl FeeSchedule {
    /// Build the schedule; a rate outside `[0, 100)` is fatal
    pub fn from_config(config: &FeeConfig) -> EngineResult<Self> {
        for kind in OperationKind::ALL {
            let rate = config.rates.rate(kind);
            if rate < Decimal::ZERO || rate >= Decimal::ONE_HUNDRED {
                return Err(EngineError::FeeConfiguration(format!(
                    "{} fee rate {} must satisfy 0 <= rate < 100",
                    kind, rate
                )));
            }
        }
        Ok(Self {
            rates: config.rates.clone(),
            treasury: config.treasury.clone(),
        })
    }

    pub fn rate(&self, kind: OperationKind) -> Decimal {
        self.rates.rate(kind)
    }

    pub fn treasury(&self, family: ChainFamily) -> Option<&str> {
        self.treasury.get(&family).map(String::as_str)
    }

    /// Integer split of `gross`; the fee is rounded down so `net + fee == gross`
    ///
    /// # Errors
    /// `AmountTooLow` when nothing is left after the fee
    pub fn split(&self, gross: U256, kind: OperationKind) -> EngineResult<FeeSplit> {
        let rate = self.rate(kind);
        let numerator = U256::from(rate.mantissa().unsigned_abs());
        let denominator = U256::from(100u8) * U256::exp10(rate.scale() as usize);
        let fee = gross.full_mul(numerator) / U512::from(denominator);
        let fee = U256::try_from(fee).map_err(|_| EngineError::Validation(format!("fee on {} overflows", gross)))?;
        let net = gross - fee;
        if net.is_zero() {
            return Err(EngineError::AmountTooLow(format!("{} leaves nothing after the {} fee", gross, kind)));
        }
        Ok(FeeSplit { gross, fee, net, tx_ref: None })
    }
}

/// Fee extractor
pub struct FeeExtractor {
    schedule: FeeSchedule,
}

impl FeeExtractor {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Split without any on-chain effect, as `pay_fee` would for this chain family
    pub fn preview(&self, family: ChainFamily, gross: U256, kind: OperationKind) -> EngineResult<FeeSplit> {
        if self.schedule.treasury(family).is_none() {
            return unskimmed(gross);
        }
        self.schedule.split(gross, kind)
    }

    /// Skim the fee to the treasury and return the split
    ///
    /// The treasury transfer is confirmed before this returns. Without a treasury
    /// for the chain family the full amount is returned untouched.
    ///
    /// # Errors
    /// `AmountTooLow` when the net amount is zero; any transfer error aborts the trade
    pub async fn pay_fee(
        &self,
        client: &dyn ChainClient,
        signer: &ChainSigner,
        asset: &TokenInfo,
        gross: U256,
        kind: OperationKind,
    ) -> EngineResult<FeeSplit> {
        let chain = client.descriptor();
        let treasury = match self.schedule.treasury(chain.family) {
            Some(treasury) => treasury,
            None => {
                debug!("No treasury for {}, fee extraction skipped on {}", chain.family, chain.name);
                return unskimmed(gross);
            }
        };

        let mut split = self.schedule.split(gross, kind)?;
        if split.fee.is_zero() {
            return Ok(split);
        }

        let submitted = client.transfer(signer, asset, treasury, split.fee).await?;
        info!(
            "Fee {} {} sent to treasury on {} ({})",
            split.fee, asset.symbol, chain.name, submitted.tx_ref
        );
        split.tx_ref = Some(submitted.tx_ref);
        Ok(split)
    }
}

fn unskimmed(gross: U256) -> EngineResult<FeeSplit> {
    if gross.is_zero() {
        return Err(EngineError::AmountTooLow("amount is zero".to_string()));
    }
    Ok(FeeSplit { gross, fee: U256::zero(), net: gross, tx_ref: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn schedule(swap: &str) -> FeeSchedule {
        let mut config = FeeConfig::default();
        config.rates.swap = Decimal::from_str(swap).unwrap();
        config.treasury.insert(ChainFamily::Evm, "0x00000000000000000000000000000000000000fe".into());
        FeeSchedule::from_config(&config).unwrap()
    }

    #[test]
    fn test_split_is_exact() {
        let split = schedule("0.3").split(U256::from(1_000_000u64), OperationKind::Swap).unwrap();
        assert_eq!(split.fee, U256::from(3_000u64));
        assert_eq!(split.net, U256::from(997_000u64));

        for gross in [1u64, 7, 999, 123_456_789] {
            for rate in ["0", "0.3", "12.5", "99.99"] {
                let split = schedule(rate).split(U256::from(gross), OperationKind::Swap);
                if let Ok(split) = split {
                    assert_eq!(split.fee + split.net, split.gross);
                }
            }
        }
    }

    #[test]
    fn test_net_zero_is_amount_too_low() {
        let split = schedule("99.99").split(U256::from(10_000u64), OperationKind::Swap).unwrap();
        assert_eq!(split.net, U256::one());
        let mut config = FeeConfig::default();
        config.rates.transfer = Decimal::from_str("50").unwrap();
        let half = FeeSchedule::from_config(&config).unwrap();
        assert!(half.split(U256::from(3u64), OperationKind::Transfer).is_ok());
        assert!(matches!(
            half.split(U256::zero(), OperationKind::Transfer),
            Err(EngineError::AmountTooLow(_))
        ));
    }

    #[test]
    fn test_rate_bounds() {
        let mut config = FeeConfig::default();
        config.rates.bridge = Decimal::ONE_HUNDRED;
        assert!(matches!(FeeSchedule::from_config(&config), Err(EngineError::FeeConfiguration(_))));
        config.rates.bridge = Decimal::from_str("-0.1").unwrap();
        assert!(matches!(FeeSchedule::from_config(&config), Err(EngineError::FeeConfiguration(_))));
    }

    #[test]
    fn test_preview_without_treasury_keeps_gross() {
        let extractor = FeeExtractor::new(schedule("1"));
        let split = extractor.preview(ChainFamily::Solana, U256::from(500u64), OperationKind::Swap).unwrap();
        assert_eq!(split.net, U256::from(500u64));
        let split = extractor.preview(ChainFamily::Evm, U256::from(500u64), OperationKind::Swap).unwrap();
        assert_eq!(split.fee, U256::from(5u64));
    }
}
