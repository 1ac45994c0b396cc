//! Kafka 消费者配置
//!
//! 消费者配置固定：关闭自动提交、从最早的 offset 开始、单次 fetch 最多 3MB，
//! poll 间隔和请求超时由最大处理时间推导。

use std::time::Duration;

use super::producer_config::STATISTICS_INTERVAL;
use crate::config::KafkaConfig;

/// 单次 fetch 最大字节数（3MB）
pub const FETCH_MAX_BYTES: usize = 3 * 1024 * 1024;

/// 请求超时在最大处理时间基础上的余量
pub const REQUEST_TIMEOUT_HEADROOM: Duration = Duration::from_secs(5);

/// librdkafka 默认的 session 超时
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(45);

/// librdkafka socket.timeout.ms 的上限
const MAX_SOCKET_TIMEOUT: Duration = Duration::from_secs(300);

/// Kafka 消费者配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Kafka Bootstrap Servers 地址
    pub bootstrap_servers: String,
    /// Consumer Group ID
    pub group_id: String,
    pub client_id: String,
    pub topics: Vec<String>,
    /// 是否自动提交 offset，固定为 false，由 listener 处理成功后提交
    pub enable_auto_commit: bool,
    /// Offset 重置策略，固定为 "earliest"
    pub auto_offset_reset: String,
    pub fetch_max_bytes: usize,
    /// 两次 poll 之间的最大间隔，等于最大处理时间
    pub max_poll_interval: Duration,
    /// 请求超时，最大处理时间 + 5 秒
    pub request_timeout: Duration,
    /// 单次 poll 最多返回的消息数
    pub max_poll_records: usize,
    /// 单次 poll 的等待时间
    pub poll_timeout: Duration,
    pub statistics_interval: Duration,
}

impl ConsumerSettings {
    pub fn new(
        config: &KafkaConfig,
        group_id: impl Into<String>,
        client_id: impl Into<String>,
        topics: &[String],
    ) -> Self {
        Self {
            bootstrap_servers: config.uri.clone(),
            group_id: group_id.into(),
            client_id: client_id.into(),
            topics: topics.to_vec(),
            enable_auto_commit: false,
            auto_offset_reset: "earliest".to_string(),
            fetch_max_bytes: FETCH_MAX_BYTES,
            max_poll_interval: config.max_process_time,
            request_timeout: config.max_process_time + REQUEST_TIMEOUT_HEADROOM,
            max_poll_records: config.max_batch_size,
            poll_timeout: config.poll_timeout,
            statistics_interval: STATISTICS_INTERVAL,
        }
    }

    /// librdkafka 配置项
    ///
    /// librdkafka 没有 max.poll.records，单批大小由 poll 循环控制；
    /// 请求超时映射到 socket.timeout.ms，受其上限约束。
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        let max_poll_interval_ms = self.max_poll_interval.as_millis();
        let session_timeout_ms = DEFAULT_SESSION_TIMEOUT.as_millis().min(max_poll_interval_ms);
        let socket_timeout_ms = self.request_timeout.min(MAX_SOCKET_TIMEOUT).as_millis();

        vec![
            ("bootstrap.servers", self.bootstrap_servers.clone()),
            ("group.id", self.group_id.clone()),
            ("client.id", self.client_id.clone()),
            ("enable.auto.commit", self.enable_auto_commit.to_string()),
            ("auto.offset.reset", self.auto_offset_reset.clone()),
            ("fetch.max.bytes", self.fetch_max_bytes.to_string()),
            ("max.poll.interval.ms", max_poll_interval_ms.to_string()),
            ("session.timeout.ms", session_timeout_ms.to_string()),
            ("socket.timeout.ms", socket_timeout_ms.to_string()),
            ("enable.partition.eof", "false".to_string()),
            ("statistics.interval.ms", self.statistics_interval.as_millis().to_string()),
            ("security.protocol", "plaintext".to_string()),
        ]
    }
}
