//! Flare Broker Client Library
//!
//! Managed Kafka client: validated messages, a lazily created producer, consumer-group listeners
//! with bounded batch size and processing time, client metrics and lifecycle integration.

pub mod config;
pub mod error;
pub mod log;
pub mod metrics;
pub mod validate;

// Kafka 客户端
pub mod kafka;

// 测试用的内存实现
pub mod mock;

// 组件生命周期运行时
pub mod runtime;

// Re-exports
pub use config::KafkaConfig;
pub use error::{BrokerError, ErrorCode, FieldViolation, Result};
pub use kafka::{
    BatchHandler, ConsumerHandle, Kafka, KafkaBuilder, KafkaMessageListener, ListenerState,
    MessageHandler, MessagePublisher, ProducerHandle, Record, StopOutcome,
};
pub use log::{ActionLog, ActionLogSink, ActionLogWriter};
pub use metrics::{ClientMetrics, KafkaMetrics, MetricsSource};
pub use validate::{Constraint, FieldSpec, Message, MessageValidator};

// 运行时框架 re-exports
pub use runtime::{Lifecycle, LifecycleRuntime, RuntimeConfig};
