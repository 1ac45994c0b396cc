//! 错误类型转换实现

use super::{BrokerError, ErrorCode};
use std::io;

impl From<io::Error> for BrokerError {
    fn from(err: io::Error) -> Self {
        BrokerError::transport(ErrorCode::InternalError, format!("io error: {}", err))
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BrokerError {
    fn from(err: toml::de::Error) -> Self {
        BrokerError::configuration(format!("invalid toml: {}", err))
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for BrokerError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        use rdkafka::error::KafkaError;

        let code = match &err {
            KafkaError::ClientCreation(_) => ErrorCode::ConnectionFailed,
            KafkaError::MessageProduction(_) => ErrorCode::MessageSendFailed,
            KafkaError::ConsumerCommit(_) => ErrorCode::MessageCommitFailed,
            KafkaError::MessageConsumption(_) => ErrorCode::NetworkError,
            KafkaError::Flush(_) => ErrorCode::NetworkTimeout,
            _ => ErrorCode::NetworkError,
        };
        BrokerError::transport(code, err.to_string())
    }
}
