//! Cross-chain swaps over a hashlock relayer

pub mod hashlock;
pub mod orchestrator;

pub use hashlock::SecretSet;
pub use orchestrator::{CrossChainOrchestrator, CrossChainOutcome, CrossChainReport, CrossChainRequest, PollPolicy};
