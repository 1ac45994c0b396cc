//! Kafka 客户端模块
//!
//! [`Kafka`] 管理一个 broker 连接上的全部资源：
//! - 懒加载、只创建一次的 producer
//! - 按需创建的 consumer
//! - 一个消费组监听器，随应用启动 / 关闭
//!
//! ```rust,no_run
//! use flare_broker_client::config::KafkaConfig;
//! use flare_broker_client::kafka::{Kafka, handler_fn};
//! use flare_broker_client::mock::MockBroker;
//! use std::sync::Arc;
//!
//! # async fn run() -> flare_broker_client::error::Result<()> {
//! let config = KafkaConfig::named("order").with_uri("localhost:9092");
//! let kafka = Kafka::new(config, Arc::new(MockBroker::new()));
//!
//! kafka.listener().subscribe("order-created", handler_fn(|topic, records| async move {
//!     tracing::info!(topic = %topic, count = records.len(), "order created");
//!     Ok(())
//! }))?;
//!
//! kafka.initialize().await?;
//! kafka.producer()?.send("order-created", Some("order-1"), b"{}").await?;
//! kafka.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod consumer_config;
pub mod factory;
pub mod handler;
pub mod listener;
pub mod producer_config;
pub mod publisher;
#[cfg(feature = "kafka")]
pub mod rdkafka_client;
pub mod record;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::config::KafkaConfig;
use crate::error::{BrokerError, ErrorCode, Result};
use crate::log::{ActionLogSink, ActionLogWriter};
use crate::metrics::KafkaMetrics;
use crate::runtime::Lifecycle;
use crate::validate::{Message, MessageValidator};

pub use client::{BrokerConnector, BrokerConsumer, BrokerProducer, ConsumerHandle, ProducerHandle};
pub use consumer_config::ConsumerSettings;
pub use factory::ClientFactory;
pub use handler::{
    BatchHandler, HandlerError, HandlerFn, HandlerResult, MessageHandler, MessageHandlerFn,
    ReceivedMessage, handler_fn, message_handler_fn,
};
pub use listener::{KafkaMessageListener, ListenerState, ListenerStats, StopOutcome};
pub use producer_config::ProducerSettings;
pub use publisher::MessagePublisher;
#[cfg(feature = "kafka")]
pub use rdkafka_client::RdKafkaConnector;
pub use record::{Delivery, PartitionOffset, Record};

/// [`Kafka`] 构建器
pub struct KafkaBuilder {
    config: KafkaConfig,
    connector: Arc<dyn BrokerConnector>,
    validator: Option<Arc<MessageValidator>>,
    action_log: Option<Arc<dyn ActionLogSink>>,
}

impl KafkaBuilder {
    pub fn new(config: KafkaConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            config,
            connector,
            validator: None,
            action_log: None,
        }
    }

    /// 共享校验器，多个连接使用同一套消息注册
    pub fn with_validator(mut self, validator: Arc<MessageValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// 设置 action log 输出，默认输出到控制台
    pub fn with_action_log(mut self, sink: Arc<dyn ActionLogSink>) -> Self {
        self.action_log = Some(sink);
        self
    }

    pub fn build(self) -> Kafka {
        let label = self.config.name.clone().unwrap_or_else(|| "default".to_string());
        let action_log = self
            .action_log
            .unwrap_or_else(|| Arc::new(ActionLogWriter::console()));
        Kafka {
            inner: Arc::new(KafkaInner {
                factory: Arc::new(ClientFactory::new(self.config, self.connector)),
                validator: self.validator.unwrap_or_default(),
                action_log,
                label,
                producer: Mutex::new(None),
                listener: Mutex::new(None),
                closing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

struct KafkaInner {
    factory: Arc<ClientFactory>,
    validator: Arc<MessageValidator>,
    action_log: Arc<dyn ActionLogSink>,
    label: String,
    producer: Mutex<Option<Arc<ProducerHandle>>>,
    listener: Mutex<Option<Arc<KafkaMessageListener>>>,
    /// close() 已被调用
    closing: AtomicBool,
    /// 监听器已停止，不再创建 producer
    closed: AtomicBool,
}

/// broker 连接门面，克隆后共享同一组资源
#[derive(Clone)]
pub struct Kafka {
    inner: Arc<KafkaInner>,
}

impl Kafka {
    pub fn new(config: KafkaConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        KafkaBuilder::new(config, connector).build()
    }

    pub fn builder(config: KafkaConfig, connector: Arc<dyn BrokerConnector>) -> KafkaBuilder {
        KafkaBuilder::new(config, connector)
    }

    /// 使用 rdkafka 连接真实 broker
    #[cfg(feature = "kafka")]
    pub fn connect(config: KafkaConfig) -> Self {
        Self::new(config, Arc::new(RdKafkaConnector::new()))
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.factory.name()
    }

    pub fn uri(&self) -> &str {
        &self.inner.factory.config().uri
    }

    pub fn config(&self) -> &KafkaConfig {
        self.inner.factory.config()
    }

    pub fn validator(&self) -> &Arc<MessageValidator> {
        &self.inner.validator
    }

    /// 注册消息类型，重复注册是 no-op
    pub fn register<M: Message>(&self) -> Result<()> {
        self.inner.validator.register::<M>()
    }

    pub fn producer_metrics(&self) -> &Arc<KafkaMetrics> {
        self.inner.factory.producer_metrics()
    }

    pub fn consumer_metrics(&self) -> &Arc<KafkaMetrics> {
        self.inner.factory.consumer_metrics()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 获取 producer，首次调用时创建，之后返回同一个实例
    pub fn producer(&self) -> Result<Arc<ProducerHandle>> {
        let mut slot = self.inner.producer.lock();
        if let Some(producer) = slot.as_ref() {
            return Ok(producer.clone());
        }
        if self.is_closed() {
            return Err(BrokerError::transport(
                ErrorCode::ConnectionClosed,
                format!("kafka is closed, name={}", self.inner.label),
            ));
        }

        let producer = Arc::new(self.inner.factory.create_producer()?);
        *slot = Some(producer.clone());
        Ok(producer)
    }

    /// 创建新的 consumer，每次调用都是独立实例，由调用方负责关闭
    pub fn consumer(&self, group_id: &str, topics: &[&str]) -> Result<ConsumerHandle> {
        if group_id.trim().is_empty() {
            return Err(BrokerError::invalid_argument("group must not be empty"));
        }
        if topics.is_empty() {
            return Err(BrokerError::invalid_argument("topics must not be empty"));
        }
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        self.inner.factory.create_consumer(group_id, &topics)
    }

    /// 获取消费组监听器，首次调用时创建
    pub fn listener(&self) -> Arc<KafkaMessageListener> {
        self.inner
            .listener
            .lock()
            .get_or_insert_with(|| {
                Arc::new(KafkaMessageListener::new(
                    self.inner.factory.clone(),
                    self.inner.validator.clone(),
                    self.inner.action_log.clone(),
                ))
            })
            .clone()
    }

    /// 发送 `M` 类型消息到 `topic`
    pub fn publisher<M: Message>(&self, topic: impl Into<String>) -> MessagePublisher<M> {
        MessagePublisher::new(self.clone(), topic.into())
    }

    /// 启动监听器，没有监听器时是 no-op
    pub async fn initialize(&self) -> Result<()> {
        let listener = self.inner.listener.lock().clone();
        if let Some(listener) = listener {
            listener.start()?;
            info!(name = %self.inner.label, group = %listener.group_id(), "Kafka listener initialized");
        }
        Ok(())
    }

    /// 先停止监听器，再 flush 并关闭 producer，重复调用是 no-op
    ///
    /// 监听器停止前，仍在运行的 handler 可以正常获取 producer
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let listener = self.inner.listener.lock().clone();
        if let Some(listener) = listener {
            let outcome = listener.stop().await;
            info!(name = %self.inner.label, outcome = ?outcome, "Kafka listener closed");
        }

        let producer = {
            let mut slot = self.inner.producer.lock();
            self.inner.closed.store(true, Ordering::Release);
            slot.take()
        };
        if let Some(producer) = producer {
            if let Err(e) = producer.flush(self.config().flush_timeout) {
                warn!(client_id = %producer.client_id(), error = %e, "Failed to flush kafka producer");
            }
            if let Err(e) = producer.close() {
                warn!(client_id = %producer.client_id(), error = %e, "Failed to close kafka producer");
            }
        }
    }
}

#[async_trait]
impl Lifecycle for Kafka {
    fn name(&self) -> &str {
        &self.inner.label
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Kafka::initialize(self).await?;
        Ok(())
    }

    async fn close(&self) {
        Kafka::close(self).await
    }
}
