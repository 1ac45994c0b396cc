//! broker 客户端抽象
//!
//! [`BrokerConnector`] 负责建立真实连接（rdkafka）或内存实现（[`crate::mock::MockBroker`]），
//! [`ProducerHandle`] / [`ConsumerHandle`] 在其之上负责 client id 和 metrics 的生命周期。

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use super::consumer_config::ConsumerSettings;
use super::producer_config::ProducerSettings;
use super::record::{Delivery, PartitionOffset, Record};
use crate::error::{BrokerError, ErrorCode, Result};
use crate::metrics::{KafkaMetrics, MetricsSource};

/// 底层 producer 连接，允许多个调用方并发发送
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    async fn send(&self, topic: &str, key: Option<&str>, value: &[u8]) -> Result<Delivery>;

    fn flush(&self, timeout: Duration) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// 底层 consumer 连接（消费组成员），同一时间只被一个 poll 循环使用
#[async_trait]
pub trait BrokerConsumer: Send {
    fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    /// 拉取一批消息，最多 `max_records` 条，无消息时返回空
    async fn poll(&mut self, max_records: usize) -> Result<Vec<Record>>;

    /// 同步提交 offset
    fn commit(&mut self, offsets: &[PartitionOffset]) -> Result<()>;

    /// 回退消费位置，下一次 poll 从这些 offset 开始重新投递
    fn rewind(&mut self, offsets: &[PartitionOffset]) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// 建立 broker 连接
pub trait BrokerConnector: Send + Sync {
    fn create_producer(
        &self,
        settings: &ProducerSettings,
        metrics: MetricsSource,
    ) -> Result<Box<dyn BrokerProducer>>;

    fn create_consumer(
        &self,
        settings: &ConsumerSettings,
        metrics: MetricsSource,
    ) -> Result<Box<dyn BrokerConsumer>>;
}

/// producer 句柄，由 [`crate::kafka::Kafka`] 独占并在首次使用时创建
pub struct ProducerHandle {
    client_id: String,
    uri: String,
    inner: Box<dyn BrokerProducer>,
    metrics: Arc<KafkaMetrics>,
    closed: AtomicBool,
}

impl ProducerHandle {
    pub(crate) fn new(
        client_id: String,
        uri: String,
        inner: Box<dyn BrokerProducer>,
        metrics: Arc<KafkaMetrics>,
    ) -> Self {
        Self {
            client_id,
            uri,
            inner,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 发送原始消息
    pub async fn send(&self, topic: &str, key: Option<&str>, value: &[u8]) -> Result<Delivery> {
        if self.is_closed() {
            return Err(BrokerError::transport(
                ErrorCode::ConnectionClosed,
                format!("producer is closed, client_id={}", self.client_id),
            ));
        }
        self.inner.send(topic, key, value).await
    }

    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.inner.flush(timeout)
    }

    /// 先注销 metrics，再释放连接，只执行一次
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(operation = "close kafka producer", uri = %self.uri, client_id = %self.client_id);
        self.metrics.remove(&self.client_id);
        self.inner.close()
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("client_id", &self.client_id)
            .field("uri", &self.uri)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.metrics.remove(&self.client_id);
        }
    }
}

/// consumer 句柄，创建时已订阅 topic
pub struct ConsumerHandle {
    client_id: String,
    sequence: u32,
    group_id: String,
    topics: Vec<String>,
    inner: Box<dyn BrokerConsumer>,
    metrics: Arc<KafkaMetrics>,
    closed: bool,
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("client_id", &self.client_id)
            .field("sequence", &self.sequence)
            .field("group_id", &self.group_id)
            .field("topics", &self.topics)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ConsumerHandle {
    pub(crate) fn new(
        client_id: String,
        sequence: u32,
        group_id: String,
        topics: Vec<String>,
        inner: Box<dyn BrokerConsumer>,
        metrics: Arc<KafkaMetrics>,
    ) -> Self {
        Self {
            client_id,
            sequence,
            group_id,
            topics,
            inner,
            metrics,
            closed: false,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// client id 中的序号，同一个 broker 连接内单调递增，不复用
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn poll(&mut self, max_records: usize) -> Result<Vec<Record>> {
        self.ensure_open()?;
        self.inner.poll(max_records).await
    }

    pub fn commit(&mut self, offsets: &[PartitionOffset]) -> Result<()> {
        self.ensure_open()?;
        if offsets.is_empty() {
            return Ok(());
        }
        self.inner.commit(offsets)
    }

    pub fn rewind(&mut self, offsets: &[PartitionOffset]) -> Result<()> {
        self.ensure_open()?;
        if offsets.is_empty() {
            return Ok(());
        }
        self.inner.rewind(offsets)
    }

    /// 先注销 metrics，再释放连接；底层关闭失败也保证 metrics 只注销一次
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.metrics.remove(&self.client_id);
        let result = self.inner.close();
        info!(
            operation = "close kafka consumer",
            client_id = %self.client_id,
            group = %self.group_id,
            topics = ?self.topics,
            "kafka consumer closed"
        );
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(BrokerError::transport(
                ErrorCode::ConnectionClosed,
                format!("consumer is closed, client_id={}", self.client_id),
            ))
        } else {
            Ok(())
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(client_id = %self.client_id, error = %e, "Failed to close kafka consumer on drop");
            }
        }
    }
}
