//! Uniswap-V2-style router venue
//!
//! Routers are tried in the configured order; the first one whose
//! `getAmountsOut` quotes the pair wins. That is a first-match policy, not a
//! best-price search.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use tracing::debug;

use crate::chain_adapters::evm_adapter::parse_address;
use crate::chain_adapters::PreparedTx;
use crate::config::RouterConfig;
use crate::error::{EngineError, EngineResult};
use crate::tradelogic::executors::min_amount_out;
use crate::tradelogic::traits::{RouteRequest, RoutePlan, SwapVenue};
use crate::types::TokenInfo;

abigen!(
    IUniswapV2Router02,
    r#"[
        function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts)
        function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline) external payable returns (uint256[] amounts)
        function swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external returns (uint256[] amounts)
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external returns (uint256[] amounts)
    ]"#
);

/// Deadline offset for router swaps
const SWAP_DEADLINE_SECS: u64 = 1200;

/// Which router entry point a pair needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    NativeForTokens,
    TokensForNative,
    TokensForTokens,
}

impl SwapKind {
    pub fn for_pair(from: &TokenInfo, to: &TokenInfo) -> EngineResult<Self> {
        match (from.is_native, to.is_native) {
            (true, false) => Ok(Self::NativeForTokens),
            (false, true) => Ok(Self::TokensForNative),
            (false, false) => Ok(Self::TokensForTokens),
            (true, true) => Err(EngineError::Validation("native to native is not a swap".to_string())),
        }
    }
}

/// Candidate paths for a pair: direct first, then through the wrapped native token
pub fn candidate_paths(from: &TokenInfo, to: &TokenInfo, wrapped_native: Address) -> EngineResult<Vec<Vec<Address>>> {
    let hop = |token: &TokenInfo| -> EngineResult<Address> {
        if token.is_native {
            Ok(wrapped_native)
        } else {
            parse_address(&token.address)
        }
    };
    let (a, b) = (hop(from)?, hop(to)?);
    if a == b {
        return Err(EngineError::Validation(format!("{} and {} route to the same token", from.symbol, to.symbol)));
    }
    let mut paths = vec![vec![a, b]];
    if a != wrapped_native && b != wrapped_native {
        paths.push(vec![a, wrapped_native, b]);
    }
    Ok(paths)
}

fn deadline() -> U256 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
    U256::from(now + SWAP_DEADLINE_SECS)
}

struct Router {
    name: String,
    contract: IUniswapV2Router02<Provider<Http>>,
}

/// On-chain router venue
pub struct V2RouterVenue {
    tag: String,
    chain: String,
    routers: Vec<Router>,
    wrapped_native: Address,
}

impl V2RouterVenue {
    pub fn new(
        tag: &str,
        chain: &str,
        provider: Arc<Provider<Http>>,
        routers: &[RouterConfig],
        wrapped_native: &str,
    ) -> EngineResult<Self> {
        if routers.is_empty() {
            return Err(EngineError::Validation(format!("venue {} on {} lists no routers", tag, chain)));
        }
        let routers = routers
            .iter()
            .map(|r| {
                Ok(Router {
                    name: r.name.clone(),
                    contract: IUniswapV2Router02::new(parse_address(&r.address)?, provider.clone()),
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            tag: tag.to_string(),
            chain: chain.to_string(),
            routers,
            wrapped_native: parse_address(wrapped_native)?,
        })
    }

    /// First router and path that quote the pair
    async fn first_quote(&self, from: &TokenInfo, to: &TokenInfo, amount_in: U256) -> EngineResult<(&Router, Vec<Address>, U256)> {
        let paths = candidate_paths(from, to, self.wrapped_native)?;
        for router in &self.routers {
            for path in &paths {
                match router.contract.get_amounts_out(amount_in, path.clone()).call().await {
                    Ok(amounts) => {
                        if let Some(out) = amounts.last().filter(|out| !out.is_zero()) {
                            return Ok((router, path.clone(), *out));
                        }
                    }
                    Err(e) => debug!("{}: {} cannot quote {} hops: {}", self.chain, router.name, path.len(), e),
                }
            }
        }
        Err(EngineError::PoolNotFound {
            chain: self.chain.clone(),
            from: from.symbol.clone(),
            to: to.symbol.clone(),
        })
    }

    fn build_call(
        router: &IUniswapV2Router02<Provider<Http>>,
        kind: SwapKind,
        amount_in: U256,
        min_out: U256,
        path: Vec<Address>,
        recipient: Address,
        deadline: U256,
    ) -> EngineResult<PreparedTx> {
        let (data, value) = match kind {
            SwapKind::NativeForTokens => (
                router.swap_exact_eth_for_tokens(min_out, path, recipient, deadline).calldata(),
                amount_in,
            ),
            SwapKind::TokensForNative => (
                router.swap_exact_tokens_for_eth(amount_in, min_out, path, recipient, deadline).calldata(),
                U256::zero(),
            ),
            SwapKind::TokensForTokens => (
                router.swap_exact_tokens_for_tokens(amount_in, min_out, path, recipient, deadline).calldata(),
                U256::zero(),
            ),
        };
        let data = data.ok_or_else(|| EngineError::Validation("failed to encode router call".to_string()))?;
        Ok(PreparedTx::Evm { to: router.address(), data, value })
    }
}

#[async_trait]
impl SwapVenue for V2RouterVenue {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn quote(&self, from: &TokenInfo, to: &TokenInfo, amount_in: U256) -> EngineResult<U256> {
        let (_, _, out) = self.first_quote(from, to, amount_in).await?;
        Ok(out)
    }

    async fn build_swap(&self, request: &RouteRequest) -> EngineResult<RoutePlan> {
        let kind = SwapKind::for_pair(&request.from, &request.to)?;
        let (router, path, expected_out) = self.first_quote(&request.from, &request.to, request.amount_in).await?;
        let min_out = min_amount_out(expected_out, request.slippage_bps, request.min_amount_out);
        if min_out > expected_out {
            return Err(EngineError::Validation(format!(
                "quote {} is below the minimum output {}",
                expected_out, min_out
            )));
        }
        let tx = Self::build_call(
            &router.contract,
            kind,
            request.amount_in,
            min_out,
            path.clone(),
            parse_address(&request.recipient)?,
            deadline(),
        )?;
        Ok(RoutePlan {
            route: format!("{} ({} hops)", router.name, path.len() - 1),
            spender: Some(format!("{:?}", router.contract.address())),
            tx,
            expected_out,
        })
    }
}
