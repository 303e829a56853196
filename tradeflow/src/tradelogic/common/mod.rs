/// Common functionality shared between executors, the cross-chain orchestrator
/// and the dispatcher: gas policy, fee extraction and per-wallet leases.

pub mod gas;
pub mod fee;
pub mod wallet_lock;

pub use gas::{ensure_worst_case_covered, pad_gas_limit, select_evm_fee, worst_case_fee, GAS_LIMIT_PADDING_PERCENT, GWEI};
pub use fee::{FeeExtractor, FeeSchedule, FeeSplit};
pub use wallet_lock::{WalletLease, WalletLocks};
