//! Bridge adapter
//!
//! REST client cho relayer swap xuyên chuỗi kiểu hashlock (quote, build lệnh
//! EIP-712, submit lệnh kèm secret hashes, truy vấn fill sẵn sàng nhận secret,
//! submit secret, trạng thái lệnh kèm escrow events).

use std::time::Duration;

use async_trait::async_trait;
use ethers::signers::Signer;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{H256, U256};
use ethers::utils::hex;
use serde_json::{json, Value};
use tracing::{debug, info};

use common::CrossChainStatus;

use crate::chain_adapters::ChainSigner;
use crate::error::{EngineError, EngineResult};
use crate::tradelogic::traits::{BridgeVenue, CrossChainOrderState, CrossChainQuote, CrossChainQuoteRequest, EscrowEvent};

/// Limit-order protocol router that pulls the maker's source tokens
pub const DEFAULT_SOURCE_SPENDER: &str = "0x111111125421cA6dc452d289314280a0f8842A65";

fn h256_hex(value: &H256) -> String {
    format!("0x{}", hex::encode(value.as_bytes()))
}

fn parse_u256(value: &Value, field: &str) -> EngineResult<U256> {
    let text = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Remote(format!("quote is missing {}", field)))?;
    U256::from_dec_str(text).map_err(|e| EngineError::remote(field, e))
}

/// Build a `CrossChainQuote` from the relayer's quote payload
fn parse_quote(request: &CrossChainQuoteRequest, body: Value) -> EngineResult<CrossChainQuote> {
    let preset_name = body
        .get("recommendedPreset")
        .and_then(Value::as_str)
        .unwrap_or("fast")
        .to_string();
    let secrets_count = body
        .pointer(&format!("/presets/{}/secretsCount", preset_name))
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| EngineError::Remote(format!("preset {} has no secretsCount", preset_name)))?;

    Ok(CrossChainQuote {
        quote_id: body.get("quoteId").and_then(Value::as_str).unwrap_or_default().to_string(),
        src_amount: parse_u256(&body, "srcTokenAmount")?,
        dst_amount: parse_u256(&body, "dstTokenAmount")?,
        secrets_count,
        spender: Some(
            body.get("srcSpender")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SOURCE_SPENDER)
                .to_string(),
        ),
        raw: json!({ "request": request, "preset": preset_name, "quote": body }),
    })
}

fn parse_ready_indices(body: &Value) -> Vec<u32> {
    body.get("fills")
        .and_then(Value::as_array)
        .map(|fills| {
            fills
                .iter()
                .filter_map(|fill| fill.get("idx").and_then(Value::as_u64))
                .filter_map(|idx| u32::try_from(idx).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_status(body: &Value) -> EngineResult<CrossChainOrderState> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Remote("order status is missing".to_string()))?
        .parse::<CrossChainStatus>()
        .map_err(EngineError::Remote)?;

    let escrow_events = body
        .get("fills")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|fill| fill.get("escrowEvents").and_then(Value::as_array))
        .flatten()
        .filter_map(|event| {
            Some(EscrowEvent {
                action: event.get("action")?.as_str()?.to_string(),
                side: event.get("side")?.as_str()?.to_string(),
                tx_hash: event.get("transactionHash")?.as_str()?.to_string(),
            })
        })
        .collect();

    Ok(CrossChainOrderState { status, escrow_events })
}

/// REST client cho hashlock relayer
pub struct HashlockRelayerClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HashlockRelayerClient {
    /// Tạo client mới
    ///
    /// # Arguments
    /// * `base_url` - URL gốc của relayer
    /// * `api_key` - API key (Bearer), nếu có
    pub fn new(base_url: &str, api_key: Option<String>) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| EngineError::Validation(format!("relayer http client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> EngineResult<Value> {
        let response = self
            .authorize(self.http.get(self.url(path)).query(query))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> EngineResult<Value> {
        let response = self
            .authorize(self.http.post(self.url(path)).json(body))
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| EngineError::remote(path, e))
    }
}

#[async_trait]
impl BridgeVenue for HashlockRelayerClient {
    async fn quote(&self, request: &CrossChainQuoteRequest) -> EngineResult<CrossChainQuote> {
        let body = self
            .get_json(
                "quoter/v1.0/quote/receive",
                &[
                    ("srcChain", request.src_chain_id.to_string()),
                    ("dstChain", request.dst_chain_id.to_string()),
                    ("srcTokenAddress", request.src_token.clone()),
                    ("dstTokenAddress", request.dst_token.clone()),
                    ("amount", request.amount.to_string()),
                    ("walletAddress", request.wallet_address.clone()),
                    ("enableEstimate", "true".to_string()),
                ],
            )
            .await?;
        let quote = parse_quote(request, body)?;
        debug!("Cross-chain quote {}: {} -> {} ({} secrets)", quote.quote_id, quote.src_amount, quote.dst_amount, quote.secrets_count);
        Ok(quote)
    }

    async fn place_order(&self, signer: &ChainSigner, quote: &CrossChainQuote, hash_lock: H256, secret_hashes: &[H256]) -> EngineResult<String> {
        let wallet = signer.as_evm()?;
        let hashes: Vec<String> = secret_hashes.iter().map(h256_hex).collect();

        let built = self
            .post_json(
                "quoter/v1.0/quote/build",
                &json!({
                    "quote": quote.raw.get("quote").cloned().unwrap_or(Value::Null),
                    "preset": quote.raw.get("preset").cloned().unwrap_or(Value::Null),
                    "hashLock": h256_hex(&hash_lock),
                    "secretsHashList": hashes,
                }),
            )
            .await?;

        let typed_value = built
            .get("typedData")
            .cloned()
            .ok_or_else(|| EngineError::Remote("build response has no typedData".to_string()))?;
        let order_hash = built
            .get("orderHash")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Remote("build response has no orderHash".to_string()))?
            .to_string();
        let typed: TypedData = serde_json::from_value(typed_value.clone()).map_err(|e| EngineError::remote("typedData", e))?;
        let signature = wallet
            .sign_typed_data(&typed)
            .await
            .map_err(|e| EngineError::Custody(format!("failed to sign order: {}", e)))?;

        let src_chain_id = quote.raw.pointer("/request/src_chain_id").cloned().unwrap_or(Value::Null);
        let mut submission = json!({
            "order": typed_value.get("message").cloned().unwrap_or(Value::Null),
            "srcChainId": src_chain_id,
            "signature": format!("0x{}", hex::encode(signature.to_vec())),
            "extension": built.get("extension").cloned().unwrap_or(Value::Null),
            "quoteId": quote.quote_id,
        });
        if secret_hashes.len() > 1 {
            submission["secretHashes"] = json!(hashes);
        }
        self.post_json("relayer/v1.0/submit", &submission).await?;
        info!("Cross-chain order {} submitted", order_hash);
        Ok(order_hash)
    }

    async fn ready_secret_indices(&self, order_hash: &str) -> EngineResult<Vec<u32>> {
        let body = self
            .get_json(&format!("orders/v1.0/order/ready-to-accept-secret-fills/{}", order_hash), &[])
            .await?;
        Ok(parse_ready_indices(&body))
    }

    async fn submit_secret(&self, order_hash: &str, secret: H256) -> EngineResult<()> {
        self.post_json(
            "relayer/v1.0/submit/secret",
            &json!({ "orderHash": order_hash, "secret": h256_hex(&secret) }),
        )
        .await?;
        Ok(())
    }

    async fn order_status(&self, order_hash: &str) -> EngineResult<CrossChainOrderState> {
        let body = self.get_json(&format!("orders/v1.0/order/status/{}", order_hash), &[]).await?;
        parse_status(&body)
    }
}
