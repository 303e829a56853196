//! Chain descriptors and chain families
//!
//! This module defines the static identity of every chain the engine can trade on.
//! A `ChainDescriptor` is loaded once from configuration at startup and never mutated.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// Native asset marker used by EVM chains (the conventional "0xEeee..." address)
pub const NATIVE_EVM_MARKER: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

/// Native asset marker used by Solana (wrapped SOL mint)
pub const NATIVE_SOLANA_MARKER: &str = "So11111111111111111111111111111111111111112";

/// Chain family, decides which client/signer implementation serves a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// Ethereum-compatible chains (Ethereum, BSC, Base, Arbitrum...)
    Evm,
    /// Solana
    Solana,
}

impl ChainFamily {
    /// Get string representation of the family
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Solana => "solana",
        }
    }

    /// Default native asset marker for this family
    pub fn default_native_marker(&self) -> &'static str {
        match self {
            ChainFamily::Evm => NATIVE_EVM_MARKER,
            ChainFamily::Solana => NATIVE_SOLANA_MARKER,
        }
    }

    /// Check if this family uses EVM-style accounts and transactions
    pub fn is_evm(&self) -> bool {
        matches!(self, ChainFamily::Evm)
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChainFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "evm" => Ok(ChainFamily::Evm),
            "solana" | "sol" => Ok(ChainFamily::Solana),
            _ => Err(format!("Unknown chain family: {}", s)),
        }
    }
}

/// Identity of a target chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainDescriptor {
    /// Logical chain name, used as registry key ("ethereum", "bsc", "solana"...)
    pub name: String,
    /// Numeric chain id (Solana uses a conventional id, never sent on-chain)
    pub chain_id: u64,
    /// Address/mint that stands for the native asset
    pub native_marker: String,
    /// Native asset symbol
    pub native_symbol: String,
    /// Chain family
    pub family: ChainFamily,
}

impl ChainDescriptor {
    /// Create a descriptor using the family's default native marker
    pub fn new(name: impl Into<String>, chain_id: u64, native_symbol: impl Into<String>, family: ChainFamily) -> Self {
        Self {
            name: name.into(),
            chain_id,
            native_marker: family.default_native_marker().to_string(),
            native_symbol: native_symbol.into(),
            family,
        }
    }

    /// Check whether an asset reference designates the native asset of this chain
    pub fn is_native(&self, asset: &str) -> bool {
        asset.eq_ignore_ascii_case(&self.native_marker)
            || asset.eq_ignore_ascii_case(&self.native_symbol)
    }
}

impl fmt::Display for ChainDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_parse_and_display() {
        assert_eq!("EVM".parse::<ChainFamily>(), Ok(ChainFamily::Evm));
        assert_eq!("sol".parse::<ChainFamily>(), Ok(ChainFamily::Solana));
        assert!("cosmos".parse::<ChainFamily>().is_err());
        assert_eq!(ChainFamily::Solana.to_string(), "solana");
    }

    #[test]
    fn test_native_detection() {
        let eth = ChainDescriptor::new("ethereum", 1, "ETH", ChainFamily::Evm);
        assert!(eth.is_native("eth"));
        assert!(eth.is_native(&NATIVE_EVM_MARKER.to_lowercase()));
        assert!(!eth.is_native("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"));

        let sol = ChainDescriptor::new("solana", 101, "SOL", ChainFamily::Solana);
        assert_eq!(sol.native_marker, NATIVE_SOLANA_MARKER);
        assert_eq!(sol.to_string(), "solana (101)");
    }

    #[test]
    fn test_family_serde_lowercase() {
        let yaml = serde_yaml::to_string(&ChainFamily::Evm).unwrap();
        assert_eq!(yaml.trim(), "evm");
    }
}
