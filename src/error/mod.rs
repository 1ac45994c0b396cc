//! 错误处理模块
//!
//! 提供 broker 客户端的错误代码分类和统一错误类型

pub mod broker_error;
pub mod code;
pub mod conversions;

pub use broker_error::{BrokerError, FieldViolation, Result};
pub use code::ErrorCode;
