//! Token resolution
//!
//! Symbol -> (address, decimals, native?) per chain, built once from configuration.
//! Raw contract addresses / mints are accepted too and resolved through the chain
//! client's metadata lookup.

use std::collections::HashMap;

use async_trait::async_trait;

use common::ChainFamily;

use crate::chain_adapters::sol_adapter::parse_pubkey;
use crate::chain_adapters::ChainRegistry;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::TokenInfo;

/// Resolve a user-facing symbol on a chain
#[async_trait]
pub trait TokenResolver: Send + Sync + 'static {
    /// # Errors
    /// `TokenNotFound` when the chain has no such asset
    async fn resolve(&self, chain: &str, symbol: &str) -> EngineResult<TokenInfo>;
}

struct ChainTokens {
    family: ChainFamily,
    native: TokenInfo,
    by_symbol: HashMap<String, TokenInfo>,
    by_address: HashMap<String, TokenInfo>,
}

/// Config-backed resolver
pub struct ConfigTokenResolver {
    chains: HashMap<String, ChainTokens>,
    registry: Option<ChainRegistry>,
}

impl ConfigTokenResolver {
    pub fn new(config: &EngineConfig) -> Self {
        let mut chains = HashMap::new();
        for (name, chain) in &config.chains {
            let native = TokenInfo {
                symbol: chain.native_symbol.clone(),
                address: chain.family.default_native_marker().to_string(),
                decimals: chain.native_decimals,
                is_native: true,
            };
            let mut by_symbol = HashMap::new();
            let mut by_address = HashMap::new();
            for token in &chain.tokens {
                let info = TokenInfo {
                    symbol: token.symbol.clone(),
                    address: token.address.clone(),
                    decimals: token.decimals,
                    is_native: false,
                };
                by_address.insert(normalize_address(chain.family, &token.address), info.clone());
                by_symbol.insert(token.symbol.to_uppercase(), info);
            }
            chains.insert(
                name.clone(),
                ChainTokens { family: chain.family, native, by_symbol, by_address },
            );
        }
        Self { chains, registry: None }
    }

    /// Resolve unknown addresses through the chain clients
    pub fn with_registry(mut self, registry: ChainRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Known tokens of a chain, native first
    pub fn known_tokens(&self, chain: &str) -> Vec<TokenInfo> {
        match self.chains.get(chain) {
            Some(tokens) => {
                let mut list = vec![tokens.native.clone()];
                let mut rest: Vec<TokenInfo> = tokens.by_symbol.values().cloned().collect();
                rest.sort_by(|a, b| a.symbol.cmp(&b.symbol));
                list.extend(rest);
                list
            }
            None => Vec::new(),
        }
    }
}

fn normalize_address(family: ChainFamily, address: &str) -> String {
    match family {
        ChainFamily::Evm => address.to_lowercase(),
        ChainFamily::Solana => address.to_string(),
    }
}

fn looks_like_address(family: ChainFamily, value: &str) -> bool {
    match family {
        ChainFamily::Evm => {
            value.len() == 42 && value.starts_with("0x") && value[2..].chars().all(|c| c.is_ascii_hexdigit())
        }
        ChainFamily::Solana => parse_pubkey(value).is_ok(),
    }
}

#[async_trait]
impl TokenResolver for ConfigTokenResolver {
    async fn resolve(&self, chain: &str, symbol: &str) -> EngineResult<TokenInfo> {
        let tokens = self
            .chains
            .get(chain)
            .ok_or_else(|| EngineError::ChainNotSupported(chain.to_string()))?;
        let not_found = || EngineError::TokenNotFound { chain: chain.to_string(), symbol: symbol.to_string() };

        let trimmed = symbol.trim();
        if trimmed.is_empty() {
            return Err(not_found());
        }
        if trimmed.eq_ignore_ascii_case(&tokens.native.symbol)
            || normalize_address(tokens.family, trimmed) == normalize_address(tokens.family, &tokens.native.address)
        {
            return Ok(tokens.native.clone());
        }
        if let Some(info) = tokens.by_symbol.get(&trimmed.to_uppercase()) {
            return Ok(info.clone());
        }
        if let Some(info) = tokens.by_address.get(&normalize_address(tokens.family, trimmed)) {
            return Ok(info.clone());
        }

        match &self.registry {
            Some(registry) if looks_like_address(tokens.family, trimmed) => {
                let client = registry.get(chain)?;
                let metadata = client.token_metadata(trimmed).await.map_err(|_| not_found())?;
                Ok(TokenInfo {
                    symbol: metadata.symbol,
                    address: trimmed.to_string(),
                    decimals: metadata.decimals,
                    is_native: false,
                })
            }
            _ => Err(not_found()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::initialize_default_config;

    #[tokio::test]
    async fn test_native_symbol_resolves_to_marker() {
        let resolver = ConfigTokenResolver::new(&initialize_default_config());
        let bnb = resolver.resolve("bsc", "bnb").await.unwrap();
        assert!(bnb.is_native);
        assert_eq!(bnb.address, common::NATIVE_EVM_MARKER);
        assert_eq!(bnb.decimals, 18);

        let sol = resolver.resolve("solana", "SOL").await.unwrap();
        assert!(sol.is_native);
        assert_eq!(sol.decimals, 9);
    }

    #[tokio::test]
    async fn test_token_by_symbol_and_address() {
        let resolver = ConfigTokenResolver::new(&initialize_default_config());
        let usdc = resolver.resolve("ethereum", "usdc").await.unwrap();
        assert_eq!(usdc.decimals, 6);
        assert!(!usdc.is_native);

        let by_address = resolver
            .resolve("ethereum", "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")
            .await
            .unwrap();
        assert_eq!(by_address.symbol, "USDC");
    }

    #[tokio::test]
    async fn test_unknown_symbol_and_chain() {
        let resolver = ConfigTokenResolver::new(&initialize_default_config());
        assert!(matches!(
            resolver.resolve("bsc", "NOPE").await,
            Err(EngineError::TokenNotFound { .. })
        ));
        assert!(matches!(
            resolver.resolve("tron", "USDT").await,
            Err(EngineError::ChainNotSupported(_))
        ));
        assert_eq!(resolver.known_tokens("base")[0].symbol, "ETH");
    }
}
