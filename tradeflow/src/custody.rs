//! Key custody
//!
//! Khóa ví được lưu mã hóa (AES-256-GCM, key dẫn xuất bằng PBKDF2-SHA256 từ
//! master secret trong biến môi trường). Khóa chỉ được giải mã khi ký và nằm
//! trong buffer `Zeroizing`, bị xóa ngay khi operation kết thúc.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::chain_adapters::{ChainClient, ChainSigner};
use crate::error::{EngineError, EngineResult};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Encrypted key blob, base64 fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Custodial key of one (user, address) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCredential {
    pub user_id: String,
    pub address: String,
    pub encrypted_key: EncryptedKey,
}

/// Decryption service
#[async_trait]
pub trait KeyCustody: Send + Sync + 'static {
    async fn decrypt(&self, encrypted: &EncryptedKey) -> EngineResult<Zeroizing<Vec<u8>>>;
}

/// Lookup of wallet credentials by reference
#[async_trait]
pub trait WalletDirectory: Send + Sync + 'static {
    async fn credential(&self, user_id: &str, address: &str) -> EngineResult<WalletCredential>;
}

/// AES-256-GCM custody with a PBKDF2-derived key
pub struct AesGcmCustody {
    master_secret: Zeroizing<String>,
}

impl AesGcmCustody {
    pub fn new(master_secret: impl Into<String>) -> Self {
        Self { master_secret: Zeroizing::new(master_secret.into()) }
    }

    /// Read the master secret from `var`
    pub fn from_env(var: &str) -> EngineResult<Self> {
        let secret = std::env::var(var)
            .map_err(|_| EngineError::Custody(format!("master key variable {} is not set", var)))?;
        if secret.is_empty() {
            return Err(EngineError::Custody(format!("master key variable {} is empty", var)));
        }
        Ok(Self::new(secret))
    }

    fn cipher(&self, salt: &[u8]) -> EngineResult<Aes256Gcm> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(self.master_secret.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
        Aes256Gcm::new_from_slice(&key[..]).map_err(|e| EngineError::Custody(format!("failed to init cipher: {}", e)))
    }

    /// Encrypt raw key material, e.g. when importing a wallet
    pub fn encrypt(&self, plaintext: &[u8]) -> EngineResult<EncryptedKey> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher(&salt)?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| EngineError::Custody(format!("encryption failed: {}", e)))?;

        Ok(EncryptedKey {
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }
}

fn decode_field(name: &str, value: &str) -> EngineResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| EngineError::Custody(format!("invalid {} encoding: {}", name, e)))
}

#[async_trait]
impl KeyCustody for AesGcmCustody {
    async fn decrypt(&self, encrypted: &EncryptedKey) -> EngineResult<Zeroizing<Vec<u8>>> {
        let salt = decode_field("salt", &encrypted.salt)?;
        let nonce = decode_field("nonce", &encrypted.nonce)?;
        let ciphertext = decode_field("ciphertext", &encrypted.ciphertext)?;
        if nonce.len() != NONCE_SIZE {
            return Err(EngineError::Custody(format!("nonce must be {} bytes", NONCE_SIZE)));
        }

        let plaintext = self
            .cipher(&salt)?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| EngineError::Custody("decryption failed".to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// Wallet directory kept in memory, optionally loaded from a JSON file
#[derive(Default)]
pub struct JsonWalletDirectory {
    wallets: RwLock<HashMap<(String, String), WalletCredential>>,
}

fn wallet_key(user_id: &str, address: &str) -> (String, String) {
    (user_id.to_string(), address.to_lowercase())
}

impl JsonWalletDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load credentials from a JSON array; a missing file gives an empty directory
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let directory = Self::new();
        if !Path::new(path).exists() {
            warn!("Wallet file {} not found, starting with no custodial wallets", path);
            return Ok(directory);
        }
        let content = fs::read_to_string(path)?;
        let credentials: Vec<WalletCredential> = serde_json::from_str(&content)?;
        let count = credentials.len();
        {
            let mut wallets = directory.wallets.try_write()?;
            for credential in credentials {
                wallets.insert(wallet_key(&credential.user_id, &credential.address), credential);
            }
        }
        info!("Loaded {} custodial wallets from {}", count, path);
        Ok(directory)
    }

    pub async fn insert(&self, credential: WalletCredential) {
        self.wallets
            .write()
            .await
            .insert(wallet_key(&credential.user_id, &credential.address), credential);
    }

    pub async fn len(&self) -> usize {
        self.wallets.read().await.len()
    }
}

#[async_trait]
impl WalletDirectory for JsonWalletDirectory {
    async fn credential(&self, user_id: &str, address: &str) -> EngineResult<WalletCredential> {
        self.wallets
            .read()
            .await
            .get(&wallet_key(user_id, address))
            .cloned()
            .ok_or_else(|| EngineError::Custody(format!("no wallet {} for user {}", address, user_id)))
    }
}

/// Builds per-operation signers from custodial credentials
#[derive(Clone)]
pub struct KeyVault {
    directory: Arc<dyn WalletDirectory>,
    custody: Arc<dyn KeyCustody>,
}

impl KeyVault {
    pub fn new(directory: Arc<dyn WalletDirectory>, custody: Arc<dyn KeyCustody>) -> Self {
        Self { directory, custody }
    }

    /// Decrypt the wallet key and build a signer for `client`'s chain
    ///
    /// The decrypted bytes are wiped when this returns; the signer must match `address`.
    pub async fn signer(&self, client: &dyn ChainClient, user_id: &str, address: &str) -> EngineResult<ChainSigner> {
        let credential = self.directory.credential(user_id, address).await?;
        let key = self.custody.decrypt(&credential.encrypted_key).await?;
        let signer = client.signer_from_key(&key)?;
        drop(key);

        let expected = match client.descriptor().family {
            common::ChainFamily::Evm => address.eq_ignore_ascii_case(&signer.address()),
            common::ChainFamily::Solana => address == signer.address(),
        };
        if !expected {
            return Err(EngineError::Custody(format!("stored key does not match wallet {}", address)));
        }
        debug!("Signer ready for {} on {}", address, client.descriptor().name);
        Ok(signer)
    }
}
