//! 类型化消息发送

use std::marker::PhantomData;
use std::time::Instant;
use tracing::debug;

use super::Kafka;
use super::record::Delivery;
use crate::error::Result;
use crate::validate::Message;

/// 发送 `M` 类型消息到固定 topic
///
/// 消息先校验再序列化，校验失败不会产生任何网络请求
pub struct MessagePublisher<M> {
    kafka: Kafka,
    topic: String,
    _message: PhantomData<fn(M)>,
}

impl<M: Message> MessagePublisher<M> {
    pub(crate) fn new(kafka: Kafka, topic: String) -> Self {
        Self {
            kafka,
            topic,
            _message: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(&self, message: &M) -> Result<Delivery> {
        self.send(None, message).await
    }

    pub async fn publish_with_key(&self, key: &str, message: &M) -> Result<Delivery> {
        self.send(Some(key), message).await
    }

    async fn send(&self, key: Option<&str>, message: &M) -> Result<Delivery> {
        let payload = self.kafka.validator().encode(message)?;
        let producer = self.kafka.producer()?;

        let started = Instant::now();
        let delivery = producer.send(&self.topic, key, &payload).await?;
        debug!(
            topic = %self.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            size = payload.len(),
            elapsed = ?started.elapsed(),
            "Kafka message published"
        );
        Ok(delivery)
    }
}

impl<M> Clone for MessagePublisher<M> {
    fn clone(&self) -> Self {
        Self {
            kafka: self.kafka.clone(),
            topic: self.topic.clone(),
            _message: PhantomData,
        }
    }
}
