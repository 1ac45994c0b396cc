//! Broker 客户端统一错误类型

use super::code::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 单个字段的校验失败信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// 字段的线上名称（序列化后的名称）
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Broker 客户端统一错误类型
///
/// - 配置错误、消息格式错误：在边界处快速失败，不重试
/// - 传输错误：创建/发送时抛给调用方，poll 循环内只记录日志
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// 配置错误（缺少 uri、消息 schema 声明不合法等）
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 非法参数
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 消息类型未注册（编程错误）
    #[error("message type is not registered, type={0}")]
    UnregisteredType(String),

    /// 消息校验失败，包含所有不合法的字段
    #[error("validation failed, type={type_name}, violations=[{}]", join_violations(.violations))]
    Validation {
        type_name: String,
        violations: Vec<FieldViolation>,
    },

    /// 网络 / broker 故障
    #[error("transport error [{}] {reason}", .code.as_str())]
    Transport { code: ErrorCode, reason: String },

    /// 序列化 / 反序列化错误
    #[error("serialization error: {0}")]
    Serialization(String),

    /// 关闭超时（只记录，不向上抛出）
    #[error("shutdown timeout: {0}")]
    ShutdownTimeout(String),
}

impl BrokerError {
    /// 创建配置错误
    pub fn configuration(msg: impl Into<String>) -> Self {
        BrokerError::Configuration(msg.into())
    }

    /// 创建非法参数错误
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        BrokerError::InvalidArgument(msg.into())
    }

    /// 创建传输错误
    pub fn transport(code: ErrorCode, reason: impl Into<String>) -> Self {
        BrokerError::Transport {
            code,
            reason: reason.into(),
        }
    }

    /// 创建连接失败错误
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::transport(ErrorCode::ConnectionFailed, reason)
    }

    /// 创建消息发送失败错误
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::transport(ErrorCode::MessageSendFailed, reason)
    }

    /// 创建 offset 提交失败错误
    pub fn commit_failed(reason: impl Into<String>) -> Self {
        Self::transport(ErrorCode::MessageCommitFailed, reason)
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            BrokerError::Configuration(_) => ErrorCode::ConfigurationError,
            BrokerError::InvalidArgument(_) => ErrorCode::InvalidParameter,
            BrokerError::UnregisteredType(_) => ErrorCode::MessageTypeNotRegistered,
            BrokerError::Validation { .. } => ErrorCode::MessageValidationFailed,
            BrokerError::Transport { code, .. } => *code,
            BrokerError::Serialization(_) => ErrorCode::SerializationError,
            BrokerError::ShutdownTimeout(_) => ErrorCode::OperationTimeout,
        }
    }

    /// 校验失败的字段列表（其他错误返回空）
    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            BrokerError::Validation { violations, .. } => violations,
            _ => &[],
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Transport { .. }) && self.code().is_retryable()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, BrokerError>;
