//! Gas management utilities
//!
//! Fee-scheme selection for EVM chains, gas-limit padding and the worst-case
//! balance check that every executor runs before submitting a priced transaction.

use ethers::types::U256;
use tracing::debug;

use crate::chain_adapters::FeeQuote;
use crate::error::{EngineError, EngineResult};

/// Gas limit padding over the raw estimate, in percent
pub const GAS_LIMIT_PADDING_PERCENT: u64 = 20;

/// One gwei in wei
pub const GWEI: u64 = 1_000_000_000;

/// Choose the fee scheme for an EVM chain
///
/// EIP-1559 chains with a reported base fee get `maxFeePerGas = 2 × baseFee` and
/// `maxPriorityFeePerGas = maxFeePerGas − 1`. Otherwise the legacy gas price plus
/// `legacy_buffer_gwei` is used.
///
/// # Errors
/// `FeeUnavailable` when neither a base fee nor a gas price is available
pub fn select_evm_fee(
    chain: &str,
    eip1559: bool,
    base_fee: Option<U256>,
    gas_price: Option<U256>,
    legacy_buffer_gwei: u64,
) -> EngineResult<FeeQuote> {
    if eip1559 {
        if let Some(base_fee) = base_fee.filter(|b| !b.is_zero()) {
            let max_fee_per_gas = base_fee.saturating_mul(U256::from(2u8));
            let max_priority_fee_per_gas = max_fee_per_gas - U256::one();
            debug!("{}: EIP-1559 fees, base fee {}, max fee {}", chain, base_fee, max_fee_per_gas);
            return Ok(FeeQuote::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas });
        }
    }

    match gas_price {
        Some(gas_price) => {
            let buffer = U256::from(legacy_buffer_gwei).saturating_mul(U256::from(GWEI));
            Ok(FeeQuote::Legacy { gas_price: gas_price.saturating_add(buffer) })
        }
        None => Err(EngineError::FeeUnavailable(chain.to_string())),
    }
}

/// Pad a raw gas estimate by 20%
pub fn pad_gas_limit(estimate: U256) -> U256 {
    estimate.saturating_mul(U256::from(100 + GAS_LIMIT_PADDING_PERCENT)) / U256::from(100u8)
}

/// `paddedGasLimit × maxPricePerUnit`
pub fn worst_case_fee(gas_limit: U256, fee: &FeeQuote) -> U256 {
    gas_limit.saturating_mul(fee.max_price_per_unit())
}

/// Ensure `native_balance` covers the worst-case fee plus any native value sent along
///
/// # Errors
/// `InsufficientBalanceForWorstCaseGas` when it does not
pub fn ensure_worst_case_covered(native_balance: U256, value: U256, gas_limit: U256, fee: &FeeQuote) -> EngineResult<()> {
    let required = worst_case_fee(gas_limit, fee).saturating_add(value);
    if native_balance < required {
        return Err(EngineError::InsufficientBalanceForWorstCaseGas {
            required: required.to_string(),
            available: native_balance.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip1559_fee_from_base_fee() {
        let fee = select_evm_fee("ethereum", true, Some(U256::from(30 * GWEI)), Some(U256::from(1)), 2).unwrap();
        assert_eq!(
            fee,
            FeeQuote::Eip1559 {
                max_fee_per_gas: U256::from(60 * GWEI),
                max_priority_fee_per_gas: U256::from(60 * GWEI - 1),
            }
        );
    }

    #[test]
    fn test_legacy_fee_gets_buffer() {
        let fee = select_evm_fee("bsc", false, Some(U256::from(7)), Some(U256::from(3 * GWEI)), 2).unwrap();
        assert_eq!(fee, FeeQuote::Legacy { gas_price: U256::from(5 * GWEI) });
    }

    #[test]
    fn test_eip1559_chain_without_base_fee_falls_back_to_legacy() {
        let fee = select_evm_fee("base", true, None, Some(U256::from(GWEI)), 2).unwrap();
        assert_eq!(fee, FeeQuote::Legacy { gas_price: U256::from(3 * GWEI) });
    }

    #[test]
    fn test_no_fee_scheme_is_fee_unavailable() {
        let err = select_evm_fee("arbitrum", true, None, None, 2).unwrap_err();
        assert_eq!(err, EngineError::FeeUnavailable("arbitrum".into()));
    }

    #[test]
    fn test_padding_and_worst_case() {
        assert_eq!(pad_gas_limit(U256::from(100_000)), U256::from(120_000));
        let fee = FeeQuote::Legacy { gas_price: U256::from(10) };
        assert!(ensure_worst_case_covered(U256::from(1_200_000), U256::zero(), U256::from(120_000), &fee).is_ok());
        let err = ensure_worst_case_covered(U256::from(1_200_000), U256::from(1), U256::from(120_000), &fee).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalanceForWorstCaseGas { .. }));
    }
}
