//! Per-wallet lease
//!
//! At most one signing operation is in flight per (chain, address). The lease is
//! taken before fee extraction and released after the last confirmation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Held for the duration of one signing operation
pub type WalletLease = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct WalletLocks {
    locks: std::sync::Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lease on `(chain, address)`; addresses compare case-insensitively
    pub async fn acquire(&self, chain: &str, address: &str) -> WalletLease {
        let key = (chain.to_string(), address.to_lowercase());
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.entry(key).or_default().clone()
        };
        if lock.try_lock().is_err() {
            debug!("Waiting for wallet lease {}:{}", chain, address);
        }
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
