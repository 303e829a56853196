//! Common trading action definitions
//!
//! Operation kinds shared by the dispatcher, the fee schedule and the event stream.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// Kind of user-facing operation, drives routing and fee rate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Swap one asset for another (same chain, or cross-chain when chains differ)
    Swap,

    /// Move the same asset across chains
    Bridge,

    /// Plain transfer to another address
    Transfer,
}

impl Default for OperationKind {
    fn default() -> Self {
        Self::Swap
    }
}

impl OperationKind {
    /// All operation kinds, used when validating fee schedules
    pub const ALL: [OperationKind; 3] = [Self::Swap, Self::Bridge, Self::Transfer];

    /// Get string representation of the operation kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swap => "swap",
            Self::Bridge => "bridge",
            Self::Transfer => "transfer",
        }
    }

    /// Check whether this kind may be routed cross-chain
    pub fn allows_cross_chain(&self) -> bool {
        matches!(self, Self::Swap | Self::Bridge)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "swap" => Ok(Self::Swap),
            "bridge" => Ok(Self::Bridge),
            "transfer" => Ok(Self::Transfer),
            _ => Err(format!("Unknown operation kind: {}", s)),
        }
    }
}
