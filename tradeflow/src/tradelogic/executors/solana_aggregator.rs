//! Solana aggregator venue
//!
//! Jupiter-style API: `/quote` returns a route, `/swap` turns it into a
//! serialized transaction that is signed locally before submission.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ethers::types::U256;
use serde_json::{json, Value};
use solana_sdk::transaction::VersionedTransaction;
use tracing::debug;

use crate::chain_adapters::PreparedTx;
use crate::error::{EngineError, EngineResult};
use crate::tradelogic::executors::min_amount_out;
use crate::tradelogic::traits::{RouteRequest, RoutePlan, SwapVenue};
use crate::types::TokenInfo;

fn out_amount(quote: &Value) -> EngineResult<U256> {
    let text = quote
        .get("outAmount")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Remote("quote has no outAmount".to_string()))?;
    U256::from_dec_str(text).map_err(|e| EngineError::remote("outAmount", e))
}

/// Route labels, e.g. "Raydium -> Orca"
pub fn route_label(quote: &Value) -> String {
    let labels: Vec<&str> = quote
        .get("routePlan")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter_map(|step| step.pointer("/swapInfo/label").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if labels.is_empty() {
        "direct".to_string()
    } else {
        labels.join(" -> ")
    }
}

/// Decode the base64, bincode-serialized swap transaction
pub fn decode_swap_transaction(body: &Value) -> EngineResult<VersionedTransaction> {
    let encoded = body
        .get("swapTransaction")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Remote("swap response has no swapTransaction".to_string()))?;
    let raw = BASE64.decode(encoded).map_err(|e| EngineError::remote("swapTransaction", e))?;
    bincode::deserialize(&raw).map_err(|e| EngineError::remote("swapTransaction", e))
}

pub struct SolanaAggregatorVenue {
    tag: String,
    chain: String,
    base_url: String,
    http: reqwest::Client,
}

impl SolanaAggregatorVenue {
    pub fn new(tag: &str, chain: &str, base_url: &str) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| EngineError::Validation(format!("aggregator http client: {}", e)))?;
        Ok(Self {
            tag: tag.to_string(),
            chain: chain.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn fetch_quote(&self, from: &TokenInfo, to: &TokenInfo, amount_in: U256, slippage_bps: u32) -> EngineResult<Value> {
        let response = self
            .http
            .get(format!("{}/quote", self.base_url))
            .query(&[
                ("inputMint", from.address.clone()),
                ("outputMint", to.address.clone()),
                ("amount", amount_in.to_string()),
                ("slippageBps", slippage_bps.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            debug!("{}: quote {} -> {} failed with {}", self.chain, from.symbol, to.symbol, response.status());
            return Err(EngineError::PoolNotFound {
                chain: self.chain.clone(),
                from: from.symbol.clone(),
                to: to.symbol.clone(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SwapVenue for SolanaAggregatorVenue {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn quote(&self, from: &TokenInfo, to: &TokenInfo, amount_in: U256) -> EngineResult<U256> {
        let quote = self.fetch_quote(from, to, amount_in, 50).await?;
        out_amount(&quote)
    }

    async fn build_swap(&self, request: &RouteRequest) -> EngineResult<RoutePlan> {
        let quote = self
            .fetch_quote(&request.from, &request.to, request.amount_in, request.slippage_bps)
            .await?;
        let expected_out = out_amount(&quote)?;
        if min_amount_out(expected_out, request.slippage_bps, request.min_amount_out) > expected_out {
            return Err(EngineError::Validation(format!(
                "quote {} is below the minimum output {}",
                expected_out, request.min_amount_out
            )));
        }
        let route = route_label(&quote);

        let body: Value = self
            .http
            .post(format!("{}/swap", self.base_url))
            .json(&json!({
                "quoteResponse": quote,
                "userPublicKey": request.recipient,
                "wrapAndUnwrapSol": true,
                "dynamicComputeUnitLimit": true,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let transaction = decode_swap_transaction(&body)?;

        Ok(RoutePlan {
            route,
            spender: None,
            tx: PreparedTx::Solana { transaction },
            expected_out,
        })
    }
}
