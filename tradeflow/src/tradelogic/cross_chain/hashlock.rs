//! Hashlock secrets
//!
//! N single-use secrets per order. N = 1 locks against the secret's keccak hash;
//! N > 1 locks against a Merkle root over `keccak(uint64 index ‖ secretHash)`
//! leaves with `N − 1` stored in the top 16 bits.

use ethers::types::H256;
use ethers::utils::keccak256;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{EngineError, EngineResult};

/// The Merkle lock stores `N − 1` in 16 bits
pub const MAX_SECRETS: u32 = u16::MAX as u32 + 1;

fn hash_pair(a: &H256, b: &H256) -> H256 {
    let (first, second) = if a.as_bytes() <= b.as_bytes() { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(first.as_bytes());
    buf[32..].copy_from_slice(second.as_bytes());
    H256(keccak256(buf))
}

/// Leaf for secret `index`: `keccak256(abi.encodePacked(uint64 index, bytes32 secretHash))`
pub fn merkle_leaf(index: u64, secret_hash: &H256) -> H256 {
    let mut buf = [0u8; 40];
    buf[..8].copy_from_slice(&index.to_be_bytes());
    buf[8..].copy_from_slice(secret_hash.as_bytes());
    H256(keccak256(buf))
}

/// Root of a complete binary tree over sorted leaves, hashing sorted pairs
pub fn merkle_root(leaves: &[H256]) -> EngineResult<H256> {
    if leaves.is_empty() {
        return Err(EngineError::Validation("merkle tree needs at least one leaf".to_string()));
    }
    let mut sorted = leaves.to_vec();
    sorted.sort();
    let n = sorted.len();
    let mut tree = vec![H256::zero(); 2 * n - 1];
    for (i, leaf) in sorted.into_iter().enumerate() {
        tree[2 * n - 2 - i] = leaf;
    }
    for i in (0..n - 1).rev() {
        tree[i] = hash_pair(&tree[2 * i + 1], &tree[2 * i + 2]);
    }
    Ok(tree[0])
}

/// Hash lock for a set of secret hashes
pub fn hash_lock(secret_hashes: &[H256]) -> EngineResult<H256> {
    match secret_hashes {
        [] => Err(EngineError::Validation("hash lock needs at least one secret".to_string())),
        [single] => Ok(*single),
        many => {
            let count = u16::try_from(many.len() - 1).map_err(|_| {
                EngineError::Validation(format!("{} secrets exceed the hash lock limit of {}", many.len(), MAX_SECRETS))
            })?;
            let leaves: Vec<H256> = many
                .iter()
                .enumerate()
                .map(|(i, hash)| merkle_leaf(i as u64, hash))
                .collect();
            let mut root = merkle_root(&leaves)?.0;
            root[..2].copy_from_slice(&count.to_be_bytes());
            Ok(H256(root))
        }
    }
}

/// Single-use secrets of one order; wiped on drop
pub struct SecretSet {
    secrets: Vec<H256>,
    hashes: Vec<H256>,
    hash_lock: H256,
}

impl SecretSet {
    /// Generate `count` random secrets
    pub fn generate(count: u32) -> EngineResult<Self> {
        if count == 0 {
            return Err(EngineError::Validation("secrets count must be positive".to_string()));
        }
        if count > MAX_SECRETS {
            return Err(EngineError::Validation(format!("secrets count {} exceeds {}", count, MAX_SECRETS)));
        }
        let secrets: Vec<H256> = (0..count)
            .map(|_| {
                let mut bytes = [0u8; 32];
                OsRng.fill_bytes(&mut bytes);
                H256(bytes)
            })
            .collect();
        Self::from_secrets(secrets)
    }

    pub fn from_secrets(secrets: Vec<H256>) -> EngineResult<Self> {
        let hashes: Vec<H256> = secrets.iter().map(|s| H256(keccak256(s.as_bytes()))).collect();
        let hash_lock = hash_lock(&hashes)?;
        Ok(Self { secrets, hashes, hash_lock })
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn hash_lock(&self) -> H256 {
        self.hash_lock
    }

    pub fn hashes(&self) -> &[H256] {
        &self.hashes
    }

    pub fn secret(&self, index: u32) -> Option<H256> {
        self.secrets.get(index as usize).copied()
    }
}

impl Drop for SecretSet {
    fn drop(&mut self) {
        for secret in &mut self.secrets {
            secret.0.zeroize();
        }
    }
}
