//! producer / consumer 的创建
//!
//! 统一负责 client id 分配、创建耗时日志和 metrics 注册

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::info;

use super::client::{BrokerConnector, ConsumerHandle, ProducerHandle};
use super::consumer_config::ConsumerSettings;
use super::producer_config::ProducerSettings;
use crate::config::KafkaConfig;
use crate::error::{BrokerError, Result};
use crate::metrics::{KafkaMetrics, MetricsSource};

pub struct ClientFactory {
    config: KafkaConfig,
    connector: Arc<dyn BrokerConnector>,
    producer_metrics: Arc<KafkaMetrics>,
    consumer_metrics: Arc<KafkaMetrics>,
    consumer_sequence: AtomicU32,
}

impl ClientFactory {
    pub fn new(config: KafkaConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            config,
            connector,
            producer_metrics: Arc::new(KafkaMetrics::producer()),
            consumer_metrics: Arc::new(KafkaMetrics::consumer()),
            consumer_sequence: AtomicU32::new(1),
        }
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn producer_metrics(&self) -> &Arc<KafkaMetrics> {
        &self.producer_metrics
    }

    pub fn consumer_metrics(&self) -> &Arc<KafkaMetrics> {
        &self.consumer_metrics
    }

    /// `kafka-producer[-name]-1`
    pub fn producer_client_id(&self) -> String {
        let mut client_id = String::from("kafka-producer");
        if let Some(name) = self.name() {
            client_id.push('-');
            client_id.push_str(name);
        }
        client_id.push_str("-1");
        client_id
    }

    /// `kafka-consumer[-name]-<seq>`，序号只增不减
    fn next_consumer_client_id(&self) -> (u32, String) {
        let sequence = self.consumer_sequence.fetch_add(1, Ordering::AcqRel);
        let mut client_id = String::from("kafka-consumer");
        if let Some(name) = self.name() {
            client_id.push('-');
            client_id.push_str(name);
        }
        client_id.push('-');
        client_id.push_str(&sequence.to_string());
        (sequence, client_id)
    }

    fn require_uri(&self) -> Result<()> {
        if self.config.uri.trim().is_empty() {
            return Err(BrokerError::configuration("uri must not be empty"));
        }
        Ok(())
    }

    pub fn create_producer(&self) -> Result<ProducerHandle> {
        self.require_uri()?;
        let started = Instant::now();
        let client_id = self.producer_client_id();
        let settings = ProducerSettings::new(&self.config.uri, &client_id);

        let source = MetricsSource::new();
        let result = self
            .connector
            .create_producer(&settings, source.clone())
            .map(|producer| {
                self.producer_metrics.add(&client_id, source);
                ProducerHandle::new(
                    client_id.clone(),
                    self.config.uri.clone(),
                    producer,
                    self.producer_metrics.clone(),
                )
            });

        info!(
            operation = "create kafka producer",
            uri = %self.config.uri,
            name = self.name().unwrap_or_default(),
            client_id = %client_id,
            elapsed_time = ?started.elapsed(),
            success = result.is_ok(),
        );
        result
    }

    pub fn create_consumer(&self, group_id: &str, topics: &[String]) -> Result<ConsumerHandle> {
        self.require_uri()?;
        let started = Instant::now();
        let (sequence, client_id) = self.next_consumer_client_id();
        let settings = ConsumerSettings::new(&self.config, group_id, &client_id, topics);

        let source = MetricsSource::new();
        let result = self
            .connector
            .create_consumer(&settings, source.clone())
            .and_then(|mut consumer| {
                consumer.subscribe(topics)?;
                Ok(consumer)
            })
            .map(|consumer| {
                self.consumer_metrics.add(&client_id, source);
                ConsumerHandle::new(
                    client_id.clone(),
                    sequence,
                    group_id.to_string(),
                    topics.to_vec(),
                    consumer,
                    self.consumer_metrics.clone(),
                )
            });

        info!(
            operation = "create kafka consumer",
            uri = %self.config.uri,
            name = self.name().unwrap_or_default(),
            group = %group_id,
            topics = ?topics,
            client_id = %client_id,
            elapsed_time = ?started.elapsed(),
            success = result.is_ok(),
        );
        result
    }
}
