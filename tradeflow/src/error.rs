//! Các error type cho engine giao dịch
//!
//! Mỗi lỗi thuộc về một nhóm trong taxonomy chung (`ErrorCategory`), được dùng
//! để quyết định cách xử lý: trả lỗi đồng bộ cho one-shot dispatch, hay chuyển
//! thành failure event trong các scheduler.

use std::fmt;

use thiserror::Error;

/// Nhóm lỗi, dùng cho logging, metrics và chính sách lan truyền lỗi
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Intent thiếu trường hoặc sai định dạng, bị từ chối trước mọi I/O
    Validation,
    /// Không tìm thấy symbol, pool hoặc route
    ResolutionFailure,
    /// Thiếu số dư hoặc không đủ gas cho trường hợp xấu nhất
    InsufficientFunds,
    /// Cấu hình phí sai, chỉ gặp lúc khởi động
    FeeConfigurationError,
    /// Lỗi RPC/HTTP từ chain hoặc venue
    RemoteFailure,
    /// Polling xuyên chuỗi không đạt trạng thái cuối
    ProtocolTimeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ResolutionFailure => "resolution_failure",
            Self::InsufficientFunds => "insufficient_funds",
            Self::FeeConfigurationError => "fee_configuration",
            Self::RemoteFailure => "remote_failure",
            Self::ProtocolTimeout => "protocol_timeout",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Các loại lỗi có thể xảy ra trong engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Symbol không resolve được trên chain
    #[error("Token not found: {symbol} on {chain}")]
    TokenNotFound { chain: String, symbol: String },

    /// Không venue/pool nào quote được cặp token
    #[error("No pool can quote {from} -> {to} on {chain}")]
    PoolNotFound { chain: String, from: String, to: String },

    /// Số dư không đủ cho số lượng sau phí
    #[error("Insufficient balance of {asset}: required {required}, available {available}")]
    InsufficientBalance { asset: String, required: String, available: String },

    /// Node từ chối lệnh estimate gas
    #[error("Gas estimation failed: {0}")]
    GasEstimationFailed(String),

    /// Số dư native không đủ cho paddedGasLimit × maxFeePerGas
    #[error("Insufficient native balance for worst-case gas: required {required}, available {available}")]
    InsufficientBalanceForWorstCaseGas { required: String, available: String },

    /// Không có cơ chế phí nào khả dụng trên chain
    #[error("Fee data unavailable on {0}")]
    FeeUnavailable(String),

    /// Số lượng sau phí bằng 0
    #[error("Amount too low: {0}")]
    AmountTooLow(String),

    /// Intent không hợp lệ
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Chain chưa được đăng ký
    #[error("Chain not supported: {0}")]
    ChainNotSupported(String),

    /// Cấu hình phí không hợp lệ
    #[error("Invalid fee configuration: {0}")]
    FeeConfiguration(String),

    /// Lỗi RPC/HTTP
    #[error("Remote call failed: {0}")]
    Remote(String),

    /// Lệnh xuyên chuỗi không đạt trạng thái cuối trong ngân sách polling
    #[error("Cross-chain order {order_hash} reached no terminal status after {iterations} polls")]
    ProtocolTimeout { order_hash: String, iterations: u32 },

    /// Lệnh xuyên chuỗi kết thúc mà không được thực thi
    #[error("Cross-chain order {order_hash} ended as {status}")]
    CrossChainNotExecuted { order_hash: String, status: String },

    /// Lỗi giải mã khóa hoặc không tìm thấy ví
    #[error("Key custody error: {0}")]
    Custody(String),

    /// Lỗi lưu trữ
    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Nhóm lỗi tương ứng trong taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::ChainNotSupported(_) | Self::AmountTooLow(_) => ErrorCategory::Validation,
            Self::TokenNotFound { .. } | Self::PoolNotFound { .. } => ErrorCategory::ResolutionFailure,
            Self::InsufficientBalance { .. } | Self::InsufficientBalanceForWorstCaseGas { .. } => {
                ErrorCategory::InsufficientFunds
            }
            Self::FeeConfiguration(_) => ErrorCategory::FeeConfigurationError,
            Self::ProtocolTimeout { .. } => ErrorCategory::ProtocolTimeout,
            Self::GasEstimationFailed(_)
            | Self::FeeUnavailable(_)
            | Self::Remote(_)
            | Self::CrossChainNotExecuted { .. }
            | Self::Custody(_)
            | Self::Storage(_) => ErrorCategory::RemoteFailure,
        }
    }

    /// Lỗi có thể được thử lại ở pass sau của scheduler hay không
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::FeeUnavailable(_) | Self::Storage(_) | Self::ProtocolTimeout { .. })
    }

    pub fn remote(context: &str, err: impl fmt::Display) -> Self {
        Self::Remote(format!("{}: {}", context, err))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Remote(err.to_string())
    }
}

impl From<solana_client::client_error::ClientError> for EngineError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        Self::Remote(err.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias cho engine
pub type EngineResult<T> = Result<T, EngineError>;
