use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BrokerError, Result};

/// 单个 broker 连接的配置
///
/// 时间类字段在配置文件中以毫秒表示，例如：
///
/// ```toml
/// name = "order"
/// uri = "kafka-0:9092,kafka-1:9092"
/// max_process_time = 900000
/// max_batch_size = 500
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// 逻辑名称，用于 client id 和日志，可为空
    #[serde(default)]
    pub name: Option<String>,
    /// bootstrap servers，创建任何 producer/consumer 之前必须设置
    #[serde(default)]
    pub uri: String,
    /// 单批消息最大处理时间（默认 15 分钟）
    #[serde(default = "default_max_process_time", with = "duration_ms")]
    pub max_process_time: Duration,
    /// 单次 poll 最多返回的消息数（默认 500）
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// listener 中每个消费组的 consumer 数量（默认 1）
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// 消费组 id，默认使用 name
    #[serde(default)]
    pub group_id: Option<String>,
    /// 单次 poll 的等待时间（默认 1 秒）
    #[serde(default = "default_poll_timeout", with = "duration_ms")]
    pub poll_timeout: Duration,
    /// poll 出错后的重试间隔（默认 1 秒）
    #[serde(default = "default_poll_error_backoff", with = "duration_ms")]
    pub poll_error_backoff: Duration,
    /// listener 关闭的最长等待时间，超时后强制关闭连接（默认 30 秒）
    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,
    /// producer flush 的最长等待时间（默认 10 秒）
    #[serde(default = "default_flush_timeout", with = "duration_ms")]
    pub flush_timeout: Duration,
}

fn default_max_process_time() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_max_batch_size() -> usize {
    500
}

fn default_pool_size() -> usize {
    1
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_error_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_flush_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            name: None,
            uri: String::new(),
            max_process_time: default_max_process_time(),
            max_batch_size: default_max_batch_size(),
            pool_size: default_pool_size(),
            group_id: None,
            poll_timeout: default_poll_timeout(),
            poll_error_backoff: default_poll_error_backoff(),
            shutdown_timeout: default_shutdown_timeout(),
            flush_timeout: default_flush_timeout(),
        }
    }
}

impl KafkaConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带名称的默认配置
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::configuration(format!("failed to read config file, path={}, error={}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: KafkaConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// 设置 bootstrap servers
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// 设置单批最大处理时间
    pub fn with_max_process_time(mut self, max_process_time: Duration) -> Self {
        self.max_process_time = max_process_time;
        self
    }

    /// 设置单次 poll 最大消息数
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// 设置 consumer 数量
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// 设置消费组 id
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// 设置 poll 等待时间
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// 设置 poll 出错重试间隔
    pub fn with_poll_error_backoff(mut self, backoff: Duration) -> Self {
        self.poll_error_backoff = backoff;
        self
    }

    /// 设置关闭超时时间
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// 设置 flush 超时时间
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// 实际使用的消费组 id：group_id > name > "default"
    pub fn effective_group_id(&self) -> String {
        self.group_id
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "default".to_string())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
