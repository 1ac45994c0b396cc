//! 指标收集模块
//!
//! producer / consumer 各一个 [`KafkaMetrics`]，按 client id 注册客户端上报的统计数据，
//! 客户端关闭时移除。实现了 prometheus 的 `Collector`，可直接注册到 `Registry`。

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntGaugeVec, Opts};
use std::sync::Arc;
use tracing::error;

/// 客户端上报的运行时统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientMetrics {
    pub bytes_sent: i64,
    pub bytes_received: i64,
    /// 请求平均延迟（微秒）
    pub request_latency_avg_us: i64,
    /// 消费落后的消息数（producer 恒为 0）
    pub records_lag: i64,
}

/// 单个客户端的统计数据源，由客户端持续更新
#[derive(Debug, Clone, Default)]
pub struct MetricsSource {
    inner: Arc<RwLock<ClientMetrics>>,
}

impl MetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, metrics: ClientMetrics) {
        *self.inner.write() = metrics;
    }

    pub fn with<F>(&self, f: F)
    where
        F: FnOnce(&mut ClientMetrics),
    {
        f(&mut self.inner.write());
    }

    pub fn get(&self) -> ClientMetrics {
        *self.inner.read()
    }
}

struct Gauges {
    bytes_sent: IntGaugeVec,
    bytes_received: IntGaugeVec,
    request_latency: IntGaugeVec,
    records_lag: IntGaugeVec,
}

impl Gauges {
    fn new(prefix: &str) -> prometheus::Result<Self> {
        let gauge = |suffix: &str, help: &str| {
            IntGaugeVec::new(Opts::new(format!("{}_{}", prefix, suffix), help), &["client_id"])
        };
        Ok(Self {
            bytes_sent: gauge("bytes_sent", "Total bytes sent to brokers")?,
            bytes_received: gauge("bytes_received", "Total bytes received from brokers")?,
            request_latency: gauge("request_latency_avg_us", "Average broker round trip time in microseconds")?,
            records_lag: gauge("records_lag", "Number of records the consumer is behind")?,
        })
    }

    fn all(&self) -> [&IntGaugeVec; 4] {
        [
            &self.bytes_sent,
            &self.bytes_received,
            &self.request_latency,
            &self.records_lag,
        ]
    }
}

/// 按 client id 管理的客户端统计注册表
pub struct KafkaMetrics {
    prefix: String,
    sources: DashMap<String, MetricsSource>,
    gauges: Option<Gauges>,
    collect_lock: Mutex<()>,
}

impl KafkaMetrics {
    /// 创建收集器，`prefix` 为导出的指标名前缀，例如 `kafka_producer`
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let gauges = match Gauges::new(&prefix) {
            Ok(gauges) => Some(gauges),
            Err(e) => {
                error!(prefix = %prefix, error = %e, "Failed to create kafka metrics gauges, export disabled");
                None
            }
        };
        Self {
            prefix,
            sources: DashMap::new(),
            gauges,
            collect_lock: Mutex::new(()),
        }
    }

    pub fn producer() -> Self {
        Self::new("kafka_producer")
    }

    pub fn consumer() -> Self {
        Self::new("kafka_consumer")
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 注册客户端统计
    pub fn add(&self, client_id: impl Into<String>, source: MetricsSource) {
        self.sources.insert(client_id.into(), source);
    }

    /// 移除客户端统计，返回是否存在
    pub fn remove(&self, client_id: &str) -> bool {
        self.sources.remove(client_id).is_some()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sources.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 当前所有客户端的统计快照，按 client id 排序
    pub fn snapshot(&self) -> Vec<(String, ClientMetrics)> {
        let mut snapshot: Vec<(String, ClientMetrics)> = self
            .sources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().get()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// 所有客户端统计之和
    pub fn total(&self) -> ClientMetrics {
        self.sources.iter().fold(ClientMetrics::default(), |mut total, entry| {
            let metrics = entry.value().get();
            total.bytes_sent += metrics.bytes_sent;
            total.bytes_received += metrics.bytes_received;
            total.request_latency_avg_us = total.request_latency_avg_us.max(metrics.request_latency_avg_us);
            total.records_lag += metrics.records_lag;
            total
        })
    }
}

impl Collector for KafkaMetrics {
    fn desc(&self) -> Vec<&Desc> {
        match &self.gauges {
            Some(gauges) => gauges.all().into_iter().flat_map(|g| g.desc()).collect(),
            None => Vec::new(),
        }
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let Some(gauges) = &self.gauges else {
            return Vec::new();
        };
        let _guard = self.collect_lock.lock();

        // 已关闭的客户端不能残留在导出结果中
        for gauge in gauges.all() {
            gauge.reset();
        }
        for (client_id, metrics) in self.snapshot() {
            let labels = [client_id.as_str()];
            gauges.bytes_sent.with_label_values(&labels).set(metrics.bytes_sent);
            gauges.bytes_received.with_label_values(&labels).set(metrics.bytes_received);
            gauges.request_latency.with_label_values(&labels).set(metrics.request_latency_avg_us);
            gauges.records_lag.with_label_values(&labels).set(metrics.records_lag);
        }

        gauges.all().into_iter().flat_map(|g| g.collect()).collect()
    }
}
