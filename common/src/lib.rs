// Common library for the Tradeflow project
//
// This crate provides the chain-agnostic vocabulary shared by every crate in the
// workspace: chain descriptors, operation kinds and cross-chain order status.

pub mod chain;
pub mod trading_actions;

// Bridge types for cross-chain operations
pub mod bridge_types;

pub use chain::{ChainDescriptor, ChainFamily, NATIVE_EVM_MARKER, NATIVE_SOLANA_MARKER};
pub use trading_actions::OperationKind;
pub use bridge_types::CrossChainStatus;
