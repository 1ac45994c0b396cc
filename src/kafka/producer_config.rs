//! Kafka 生产者配置
//!
//! producer 的配置由 broker 连接统一决定，不允许按调用覆盖

use std::time::Duration;

/// metadata 获取 / 发送队列等待超时
pub const METADATA_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// 统计上报间隔（用于 metrics）
pub const STATISTICS_INTERVAL: Duration = Duration::from_secs(30);

/// Kafka 生产者配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Kafka Bootstrap Servers 地址
    pub bootstrap_servers: String,
    pub client_id: String,
    /// metadata 获取超时，同时作为发送时本地队列的等待时间
    pub metadata_timeout: Duration,
    pub statistics_interval: Duration,
}

impl ProducerSettings {
    pub fn new(bootstrap_servers: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            client_id: client_id.into(),
            metadata_timeout: METADATA_FETCH_TIMEOUT,
            statistics_interval: STATISTICS_INTERVAL,
        }
    }

    /// librdkafka 配置项
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("bootstrap.servers", self.bootstrap_servers.clone()),
            ("client.id", self.client_id.clone()),
            ("statistics.interval.ms", self.statistics_interval.as_millis().to_string()),
            ("security.protocol", "plaintext".to_string()),
        ]
    }
}
