//! # Bridge Types Module
//!
//! Kiểu dữ liệu cho các lệnh swap xuyên chuỗi (hashlock / secret-reveal).

pub mod status;

pub use status::CrossChainStatus;
