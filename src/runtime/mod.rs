//! 组件生命周期运行时
//!
//! 统一管理 broker 连接等组件的启动和关闭：
//!
//! 1. **顺序启动**：按注册顺序初始化，任一组件失败时关闭已启动的组件
//! 2. **逆序关闭**：后启动的先关闭，每个组件的关闭时间有上限
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use flare_broker_client::config::KafkaConfig;
//! use flare_broker_client::kafka::Kafka;
//! use flare_broker_client::mock::MockBroker;
//! use flare_broker_client::runtime::LifecycleRuntime;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = KafkaConfig::named("order").with_uri("localhost:9092");
//! let kafka = Kafka::new(config, Arc::new(MockBroker::new()));
//!
//! LifecycleRuntime::new("order-service")
//!     .add(Arc::new(kafka))
//!     .run()
//!     .await
//! # }
//! ```

pub mod config;
pub mod lifecycle;
pub mod runtime;

pub use config::RuntimeConfig;
pub use lifecycle::Lifecycle;
pub use runtime::LifecycleRuntime;
