//! Cross-chain order status types
//!
//! This module defines the `CrossChainStatus` enum reported by a hashlock relayer for
//! a cross-chain order, along with helper methods for status handling and conversion.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;

/// Status of a cross-chain order as reported by the relayer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossChainStatus {
    /// Order accepted, waiting for a resolver
    Pending,
    /// Resolver filled part of the order, secrets may be requested
    PartiallyFilled,
    /// Swap completed on both chains
    Executed,
    /// Order expired before completion
    Expired,
    /// Source funds were returned to the maker
    Refunded,
    /// Order was cancelled by the relayer
    Cancelled,
}

impl CrossChainStatus {
    /// Check if the order status is terminal (polling stops)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Expired | Self::Refunded | Self::Cancelled)
    }

    /// Check if the order was successful
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Executed)
    }

    /// Get string representation as used by the relayer API
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PartiallyFilled => "partially-filled",
            Self::Executed => "executed",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CrossChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CrossChainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "pending" => Ok(Self::Pending),
            "partially-filled" | "partiallyfilled" => Ok(Self::PartiallyFilled),
            "executed" => Ok(Self::Executed),
            "expired" => Ok(Self::Expired),
            "refunded" => Ok(Self::Refunded),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown cross-chain status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_properties() {
        assert!(CrossChainStatus::Executed.is_terminal());
        assert!(CrossChainStatus::Expired.is_terminal());
        assert!(CrossChainStatus::Refunded.is_terminal());
        assert!(!CrossChainStatus::Pending.is_terminal());
        assert!(!CrossChainStatus::PartiallyFilled.is_terminal());

        assert!(CrossChainStatus::Executed.is_successful());
        assert!(!CrossChainStatus::Refunded.is_successful());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("EXECUTED".parse::<CrossChainStatus>(), Ok(CrossChainStatus::Executed));
        assert_eq!("partially_filled".parse::<CrossChainStatus>(), Ok(CrossChainStatus::PartiallyFilled));
        assert_eq!("canceled".parse::<CrossChainStatus>(), Ok(CrossChainStatus::Cancelled));
        assert!("unknown".parse::<CrossChainStatus>().is_err());
        assert_eq!(CrossChainStatus::PartiallyFilled.to_string(), "partially-filled");
    }
}
