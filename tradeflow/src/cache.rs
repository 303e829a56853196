/// Token metadata caching module
///
/// Keeps name/symbol/decimals per (chain, token) so adapters can skip RPC calls
/// while an entry is fresh and fall back to a stale entry when the node is down.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::chain_adapters::TokenMetadata;

/// Cache item with fetch time; seeded entries never go stale
struct CacheItem {
    metadata: TokenMetadata,
    fetched_at: Option<Instant>,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub item_count: usize,
    pub hits: u64,
    pub misses: u64,
}

/// In-memory token metadata cache
pub struct TokenMetadataCache {
    items: RwLock<HashMap<String, CacheItem>>,
    ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl TokenMetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            ttl,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    fn key(chain: &str, token: &str) -> String {
        format!("{}:{}", chain, token.to_lowercase())
    }

    /// Pin metadata known from configuration
    pub async fn seed(&self, chain: &str, token: &str, metadata: TokenMetadata) {
        self.items.write().await.insert(
            Self::key(chain, token),
            CacheItem { metadata, fetched_at: None },
        );
    }

    /// Store freshly fetched metadata
    pub async fn insert(&self, chain: &str, token: &str, metadata: TokenMetadata) {
        self.items.write().await.insert(
            Self::key(chain, token),
            CacheItem { metadata, fetched_at: Some(Instant::now()) },
        );
    }

    /// Entry still within its TTL
    pub async fn get_fresh(&self, chain: &str, token: &str) -> Option<TokenMetadata> {
        let items = self.items.read().await;
        let found = items.get(&Self::key(chain, token)).and_then(|item| match item.fetched_at {
            None => Some(item.metadata.clone()),
            Some(at) if at.elapsed() < self.ttl => Some(item.metadata.clone()),
            Some(_) => None,
        });
        drop(items);

        let mut stats = self.stats.write().await;
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// Any entry, stale or not
    pub async fn get_any(&self, chain: &str, token: &str) -> Option<TokenMetadata> {
        let found = self
            .items
            .read()
            .await
            .get(&Self::key(chain, token))
            .map(|item| item.metadata.clone());
        if found.is_some() {
            debug!("Serving cached metadata for {} on {}", token, chain);
        }
        found
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = *self.stats.read().await;
        stats.item_count = self.items.read().await.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> TokenMetadata {
        TokenMetadata { name: "USD Coin".into(), symbol: "USDC".into(), decimals: 6 }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_go_stale_but_remain_as_fallback() {
        let cache = TokenMetadataCache::new(Duration::from_secs(60));
        cache.insert("ethereum", "0xA0b8", usdc()).await;
        assert_eq!(cache.get_fresh("ethereum", "0xa0b8").await, Some(usdc()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get_fresh("ethereum", "0xa0b8").await, None);
        assert_eq!(cache.get_any("ethereum", "0xA0B8").await, Some(usdc()));

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.item_count), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_entries_never_expire() {
        let cache = TokenMetadataCache::new(Duration::from_secs(1));
        cache.seed("base", "0x8335", usdc()).await;
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(cache.get_fresh("base", "0x8335").await.is_some());
    }
}
