//! 基于 rdkafka 的 broker 连接
//!
//! librdkafka 的统计回调按 `statistics.interval.ms` 上报，
//! 由 [`StatsContext`] 写入对应客户端的 [`MetricsSource`]。

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::statistics::Statistics;
use rdkafka::util::Timeout;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info};

use super::client::{BrokerConnector, BrokerConsumer, BrokerProducer};
use super::consumer_config::ConsumerSettings;
use super::producer_config::ProducerSettings;
use super::record::{Delivery, PartitionOffset, Record};
use crate::error::{BrokerError, Result};
use crate::metrics::{ClientMetrics, MetricsSource};

/// 凑批时等待后续消息的时间
const BATCH_FILL_WAIT: Duration = Duration::from_millis(10);

/// seek 的等待时间
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// 把 librdkafka 统计写入 metrics 的客户端上下文
pub struct StatsContext {
    client_id: String,
    metrics: MetricsSource,
}

impl StatsContext {
    fn new(client_id: &str, metrics: MetricsSource) -> Self {
        Self {
            client_id: client_id.to_string(),
            metrics,
        }
    }
}

impl ClientContext for StatsContext {
    fn stats(&self, statistics: Statistics) {
        let latencies: Vec<i64> = statistics
            .brokers
            .values()
            .filter_map(|broker| broker.rtt.as_ref().map(|rtt| rtt.avg))
            .filter(|avg| *avg > 0)
            .collect();
        let request_latency_avg_us = if latencies.is_empty() {
            0
        } else {
            latencies.iter().sum::<i64>() / latencies.len() as i64
        };

        // consumer_lag 为 -1 表示未知
        let records_lag = statistics
            .topics
            .values()
            .flat_map(|topic| topic.partitions.values())
            .map(|partition| partition.consumer_lag)
            .filter(|lag| *lag > 0)
            .sum();

        self.metrics.update(ClientMetrics {
            bytes_sent: statistics.tx_bytes,
            bytes_received: statistics.rx_bytes,
            request_latency_avg_us,
            records_lag,
        });
        debug!(client_id = %self.client_id, "Kafka client statistics updated");
    }
}

impl ConsumerContext for StatsContext {}

fn client_config(properties: Vec<(&'static str, String)>) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in properties {
        config.set(key, value);
    }
    config
}

pub struct RdKafkaProducer {
    producer: FutureProducer<StatsContext>,
    queue_timeout: Duration,
}

#[async_trait]
impl BrokerProducer for RdKafkaProducer {
    async fn send(&self, topic: &str, key: Option<&str>, value: &[u8]) -> Result<Delivery> {
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(value);
        if let Some(key) = key {
            record = record.key(key);
        }

        let delivery = self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
            .map_err(|(err, _)| BrokerError::send_failed(format!("topic={}, {}", topic, err)))?;
        Ok(Delivery {
            topic: topic.to_string(),
            partition: delivery.partition,
            offset: delivery.offset,
        })
    }

    fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(Timeout::After(timeout))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        // librdkafka 在 drop 时释放连接，未发送的消息已由 flush 处理
        Ok(())
    }
}

pub struct RdKafkaConsumer {
    consumer: StreamConsumer<StatsContext>,
    poll_timeout: Duration,
}

impl RdKafkaConsumer {
    fn to_record(message: &rdkafka::message::BorrowedMessage<'_>) -> Record {
        Record {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            value: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
            timestamp: message.timestamp().to_millis(),
        }
    }
}

#[async_trait]
impl BrokerConsumer for RdKafkaConsumer {
    fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        Ok(())
    }

    async fn poll(&mut self, max_records: usize) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let first = match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Ok(message) => Self::to_record(&message?),
            Err(_) => return Ok(records),
        };
        records.push(first);

        while records.len() < max_records {
            match tokio::time::timeout(BATCH_FILL_WAIT, self.consumer.recv()).await {
                Ok(Ok(message)) => records.push(Self::to_record(&message)),
                // 已拉到的消息先交给处理器，错误留给下一次 poll
                Ok(Err(e)) => {
                    debug!(error = %e, "Kafka recv failed while filling batch");
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(records)
    }

    fn commit(&mut self, offsets: &[PartitionOffset]) -> Result<()> {
        let mut list = TopicPartitionList::new();
        for offset in offsets {
            list.add_partition_offset(&offset.topic, offset.partition, Offset::Offset(offset.offset))?;
        }
        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(|e| BrokerError::commit_failed(e.to_string()))?;
        Ok(())
    }

    fn rewind(&mut self, offsets: &[PartitionOffset]) -> Result<()> {
        for offset in offsets {
            self.consumer.seek(
                &offset.topic,
                offset.partition,
                Offset::Offset(offset.offset),
                Timeout::After(SEEK_TIMEOUT),
            )?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// 使用 librdkafka 建立连接
#[derive(Debug, Default, Clone)]
pub struct RdKafkaConnector;

impl RdKafkaConnector {
    pub fn new() -> Self {
        Self
    }
}

impl BrokerConnector for RdKafkaConnector {
    fn create_producer(
        &self,
        settings: &ProducerSettings,
        metrics: MetricsSource,
    ) -> Result<Box<dyn BrokerProducer>> {
        let context = StatsContext::new(&settings.client_id, metrics);
        let producer: FutureProducer<StatsContext> =
            client_config(settings.properties()).create_with_context(context)?;

        info!(
            bootstrap = %settings.bootstrap_servers,
            client_id = %settings.client_id,
            "Kafka producer created successfully"
        );
        Ok(Box::new(RdKafkaProducer {
            producer,
            queue_timeout: settings.metadata_timeout,
        }))
    }

    fn create_consumer(
        &self,
        settings: &ConsumerSettings,
        metrics: MetricsSource,
    ) -> Result<Box<dyn BrokerConsumer>> {
        let context = StatsContext::new(&settings.client_id, metrics);
        let consumer: StreamConsumer<StatsContext> =
            client_config(settings.properties()).create_with_context(context)?;

        info!(
            bootstrap = %settings.bootstrap_servers,
            group = %settings.group_id,
            client_id = %settings.client_id,
            "Kafka consumer created successfully"
        );
        Ok(Box::new(RdKafkaConsumer {
            consumer,
            poll_timeout: settings.poll_timeout,
        }))
    }
}
