//! TradeLogic module for Tradeflow
//!
//! Contains the execution pipeline: fee extraction, per-chain swap executors,
//! the cross-chain orchestrator and the dispatcher that routes between them.

// Re-export traits
pub mod traits;
pub use traits::*;

// Core logic and implementations
pub mod common;
pub mod executors;
pub mod cross_chain;
pub mod coordinator;
pub mod price;

pub use coordinator::TradeDispatcher;
pub use executors::{ExecutorContext, SwapExecutorRegistry, VenueSwapExecutor};
pub use price::VenueQuotePriceSource;
