//! EVM aggregator venue
//!
//! REST aggregator (1inch-style API): `/quote` for pricing, `/approve/spender`
//! for the allowance target and `/swap` for ready-to-sign calldata.

use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Bytes, U256};
use ethers::utils::hex;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::chain_adapters::evm_adapter::parse_address;
use crate::chain_adapters::PreparedTx;
use crate::error::{EngineError, EngineResult};
use crate::tradelogic::executors::min_amount_out;
use crate::tradelogic::traits::{RouteRequest, RoutePlan, SwapVenue};
use crate::types::TokenInfo;

fn field_u256(body: &Value, pointer: &str) -> EngineResult<U256> {
    let raw = body
        .pointer(pointer)
        .ok_or_else(|| EngineError::Remote(format!("aggregator response has no {}", pointer)))?;
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(EngineError::Remote(format!("aggregator field {} is not numeric", pointer))),
    };
    if let Some(hex_text) = text.strip_prefix("0x") {
        U256::from_str_radix(hex_text, 16).map_err(|e| EngineError::remote(pointer, e))
    } else {
        U256::from_dec_str(&text).map_err(|e| EngineError::remote(pointer, e))
    }
}

/// Parse the `/swap` response into an unsigned transaction and the quoted output
pub fn parse_swap_response(body: &Value) -> EngineResult<(PreparedTx, U256)> {
    let to = body
        .pointer("/tx/to")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Remote("aggregator swap has no tx.to".to_string()))?;
    let data = body
        .pointer("/tx/data")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Remote("aggregator swap has no tx.data".to_string()))?;
    let data = hex::decode(data.strip_prefix("0x").unwrap_or(data)).map_err(|e| EngineError::remote("tx.data", e))?;
    let value = if body.pointer("/tx/value").is_some() {
        field_u256(body, "/tx/value")?
    } else {
        U256::zero()
    };
    let expected = field_u256(body, "/dstAmount")?;
    Ok((
        PreparedTx::Evm { to: parse_address(to)?, data: Bytes::from(data), value },
        expected,
    ))
}

/// Aggregator venue for one EVM chain
pub struct EvmAggregatorVenue {
    tag: String,
    chain: String,
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    spender: OnceCell<String>,
}

impl EvmAggregatorVenue {
    pub fn new(tag: &str, chain: &str, base_url: &str, api_key: Option<String>) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| EngineError::Validation(format!("aggregator http client: {}", e)))?;
        Ok(Self {
            tag: tag.to_string(),
            chain: chain.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
            spender: OnceCell::new(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> EngineResult<Value> {
        let mut request = self.http.get(format!("{}/{}", self.base_url, path)).query(query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Remote(format!("{} rejected: {}", path, body)));
        }
        Ok(response.error_for_status()?.json().await?)
    }

    fn not_found(&self, from: &TokenInfo, to: &TokenInfo) -> EngineError {
        EngineError::PoolNotFound { chain: self.chain.clone(), from: from.symbol.clone(), to: to.symbol.clone() }
    }

    async fn spender(&self) -> EngineResult<String> {
        let spender = self
            .spender
            .get_or_try_init(|| async {
                let body = self.get("approve/spender", &[]).await?;
                body.get("address")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| EngineError::Remote("aggregator returned no spender".to_string()))
            })
            .await?;
        Ok(spender.clone())
    }
}

#[async_trait]
impl SwapVenue for EvmAggregatorVenue {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn quote(&self, from: &TokenInfo, to: &TokenInfo, amount_in: U256) -> EngineResult<U256> {
        let body = self
            .get(
                "quote",
                &[
                    ("src", from.address.clone()),
                    ("dst", to.address.clone()),
                    ("amount", amount_in.to_string()),
                ],
            )
            .await
            .map_err(|_| self.not_found(from, to))?;
        let out = field_u256(&body, "/dstAmount")?;
        if out.is_zero() {
            return Err(self.not_found(from, to));
        }
        Ok(out)
    }

    async fn build_swap(&self, request: &RouteRequest) -> EngineResult<RoutePlan> {
        let slippage_percent = Decimal::from(request.slippage_bps) / Decimal::ONE_HUNDRED;
        let body = self
            .get(
                "swap",
                &[
                    ("src", request.from.address.clone()),
                    ("dst", request.to.address.clone()),
                    ("amount", request.amount_in.to_string()),
                    ("from", request.recipient.clone()),
                    ("receiver", request.recipient.clone()),
                    ("slippage", slippage_percent.normalize().to_string()),
                    ("disableEstimate", "true".to_string()),
                ],
            )
            .await?;
        let (tx, expected_out) = parse_swap_response(&body)?;
        if min_amount_out(expected_out, request.slippage_bps, request.min_amount_out) > expected_out {
            return Err(EngineError::Validation(format!(
                "quote {} is below the minimum output {}",
                expected_out, request.min_amount_out
            )));
        }
        let spender = if request.from.is_native { None } else { Some(self.spender().await?) };
        Ok(RoutePlan { route: self.tag.clone(), spender, tx, expected_out })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_swap_response() {
        let body = json!({
            "dstAmount": "2500000",
            "tx": {
                "to": "0x111111125421cA6dc452d289314280a0f8842A65",
                "data": "0x12aa3caf0000",
                "value": "1000000000000000",
                "gas": 0
            }
        });
        let (tx, expected) = parse_swap_response(&body).unwrap();
        assert_eq!(expected, U256::from(2_500_000u64));
        match tx {
            PreparedTx::Evm { data, value, .. } => {
                assert_eq!(data.len(), 6);
                assert_eq!(value, U256::exp10(15));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_swap_response_requires_calldata() {
        let body = json!({ "dstAmount": "1", "tx": { "to": "0x111111125421cA6dc452d289314280a0f8842A65" } });
        assert!(matches!(parse_swap_response(&body), Err(EngineError::Remote(_))));
    }
}
