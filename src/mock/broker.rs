//! 内存 broker
//!
//! 每个 topic 只有一个分区（0），已提交的 offset 按消费组记录。
//! 同一消费组内的 consumer 共享读取位置，组内最后一个 consumer 关闭后从已提交的 offset 重新读取。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{BrokerError, ErrorCode, Result};
use crate::kafka::{
    BrokerConnector, BrokerConsumer, BrokerProducer, ConsumerSettings, Delivery, PartitionOffset,
    ProducerSettings, Record,
};
use crate::metrics::MetricsSource;

const PARTITION: i32 = 0;

/// broker 上发生的事件，按发生顺序记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    ProducerCreated { client_id: String },
    Published { topic: String, offset: i64 },
    ProducerFlushed { client_id: String },
    ProducerClosed { client_id: String },
    ConsumerCreated { client_id: String, group: String },
    Committed { client_id: String, offsets: Vec<PartitionOffset> },
    Rewound { client_id: String, offsets: Vec<PartitionOffset> },
    ConsumerClosed { client_id: String },
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Record>>,
    committed: HashMap<(String, String, i32), i64>,
    positions: HashMap<(String, String, i32), i64>,
    /// 每个消费组当前打开的 consumer 数
    members: HashMap<String, usize>,
    events: Vec<BrokerEvent>,
    fail_next_polls: usize,
    fail_next_sends: usize,
    fail_next_commits: usize,
    fail_connections: bool,
    producers_created: usize,
    consumers_created: usize,
}

impl BrokerState {
    fn position(&self, group: &str, topic: &str) -> i64 {
        let key = (group.to_string(), topic.to_string(), PARTITION);
        self.positions
            .get(&key)
            .or_else(|| self.committed.get(&key))
            .copied()
            .unwrap_or(0)
    }

    fn append(&mut self, topic: &str, key: Option<&str>, value: &[u8]) -> i64 {
        let records = self.topics.entry(topic.to_string()).or_default();
        let offset = records.len() as i64;
        records.push(Record {
            topic: topic.to_string(),
            partition: PARTITION,
            offset,
            key: key.map(str::to_string),
            value: value.to_vec(),
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        });
        self.events.push(BrokerEvent::Published {
            topic: topic.to_string(),
            offset,
        });
        offset
    }
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    published: Notify,
}

/// 内存中的 broker，实现 [`BrokerConnector`]
#[derive(Clone)]
pub struct MockBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                published: Notify::new(),
            }),
        }
    }

    /// 直接写入一条消息，返回 offset
    pub fn publish(&self, topic: &str, key: Option<&str>, value: impl AsRef<[u8]>) -> i64 {
        let offset = self.inner.state.lock().append(topic, key, value.as_ref());
        self.inner.published.notify_waiters();
        offset
    }

    /// topic 上的全部消息
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.inner
            .state
            .lock()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// 消费组在 topic 上已提交的 offset（下一条要读取的位置）
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<i64> {
        self.inner
            .state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), PARTITION))
            .copied()
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.inner.state.lock().events.clone()
    }

    /// 所有提交记录
    pub fn commits(&self) -> Vec<Vec<PartitionOffset>> {
        self.inner
            .state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                BrokerEvent::Committed { offsets, .. } => Some(offsets.clone()),
                _ => None,
            })
            .collect()
    }

    /// 接下来 `count` 次 poll 返回错误
    pub fn fail_next_polls(&self, count: usize) {
        self.inner.state.lock().fail_next_polls = count;
    }

    /// 接下来 `count` 次发送返回错误
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.state.lock().fail_next_sends = count;
    }

    /// 接下来 `count` 次提交返回错误
    pub fn fail_next_commits(&self, count: usize) {
        self.inner.state.lock().fail_next_commits = count;
    }

    /// 之后创建连接时返回错误
    pub fn fail_connections(&self, fail: bool) {
        self.inner.state.lock().fail_connections = fail;
    }

    pub fn producers_created(&self) -> usize {
        self.inner.state.lock().producers_created
    }

    pub fn consumers_created(&self) -> usize {
        self.inner.state.lock().consumers_created
    }
}

impl BrokerConnector for MockBroker {
    fn create_producer(
        &self,
        settings: &ProducerSettings,
        metrics: MetricsSource,
    ) -> Result<Box<dyn BrokerProducer>> {
        let mut state = self.inner.state.lock();
        if state.fail_connections {
            return Err(BrokerError::connection_failed(format!(
                "broker unavailable, uri={}",
                settings.bootstrap_servers
            )));
        }
        state.producers_created += 1;
        state.events.push(BrokerEvent::ProducerCreated {
            client_id: settings.client_id.clone(),
        });
        Ok(Box::new(MockProducer {
            broker: self.clone(),
            client_id: settings.client_id.clone(),
            metrics,
        }))
    }

    fn create_consumer(
        &self,
        settings: &ConsumerSettings,
        metrics: MetricsSource,
    ) -> Result<Box<dyn BrokerConsumer>> {
        let mut state = self.inner.state.lock();
        if state.fail_connections {
            return Err(BrokerError::connection_failed(format!(
                "broker unavailable, uri={}",
                settings.bootstrap_servers
            )));
        }
        state.consumers_created += 1;
        *state.members.entry(settings.group_id.clone()).or_default() += 1;
        state.events.push(BrokerEvent::ConsumerCreated {
            client_id: settings.client_id.clone(),
            group: settings.group_id.clone(),
        });
        Ok(Box::new(MockConsumer {
            broker: self.clone(),
            client_id: settings.client_id.clone(),
            group: settings.group_id.clone(),
            topics: Vec::new(),
            poll_timeout: settings.poll_timeout,
            metrics,
            closed: false,
        }))
    }
}

struct MockProducer {
    broker: MockBroker,
    client_id: String,
    metrics: MetricsSource,
}

#[async_trait]
impl BrokerProducer for MockProducer {
    async fn send(&self, topic: &str, key: Option<&str>, value: &[u8]) -> Result<Delivery> {
        {
            let mut state = self.broker.inner.state.lock();
            if state.fail_next_sends > 0 {
                state.fail_next_sends -= 1;
                return Err(BrokerError::send_failed(format!(
                    "delivery failed, client_id={}, topic={}",
                    self.client_id, topic
                )));
            }
        }
        let offset = self.broker.publish(topic, key, value);
        self.metrics.with(|m| m.bytes_sent += value.len() as i64);
        Ok(Delivery {
            topic: topic.to_string(),
            partition: PARTITION,
            offset,
        })
    }

    fn flush(&self, _timeout: Duration) -> Result<()> {
        self.broker.inner.state.lock().events.push(BrokerEvent::ProducerFlushed {
            client_id: self.client_id.clone(),
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.broker.inner.state.lock().events.push(BrokerEvent::ProducerClosed {
            client_id: self.client_id.clone(),
        });
        Ok(())
    }
}

struct MockConsumer {
    broker: MockBroker,
    client_id: String,
    group: String,
    topics: Vec<String>,
    poll_timeout: Duration,
    metrics: MetricsSource,
    closed: bool,
}

impl MockConsumer {
    fn fetch(&self, max_records: usize) -> Result<Vec<Record>> {
        let mut state = self.broker.inner.state.lock();
        if state.fail_next_polls > 0 {
            state.fail_next_polls -= 1;
            return Err(BrokerError::transport(
                ErrorCode::NetworkError,
                format!("poll failed, client_id={}", self.client_id),
            ));
        }

        let mut fetched = Vec::new();
        let mut lag = 0;
        for topic in &self.topics {
            let position = state.position(&self.group, topic);
            let Some(records) = state.topics.get(topic) else {
                continue;
            };
            let remaining = max_records - fetched.len();
            let batch: Vec<Record> = records
                .iter()
                .skip(position.max(0) as usize)
                .take(remaining)
                .cloned()
                .collect();
            let next = position + batch.len() as i64;
            lag += records.len() as i64 - next;
            fetched.extend(batch);
            state
                .positions
                .insert((self.group.clone(), topic.clone(), PARTITION), next);
        }

        let received: i64 = fetched.iter().map(|r| r.value.len() as i64).sum();
        self.metrics.with(|m| {
            m.bytes_received += received;
            m.records_lag = lag;
        });
        Ok(fetched)
    }
}

#[async_trait]
impl BrokerConsumer for MockConsumer {
    fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        self.topics = topics.to_vec();
        Ok(())
    }

    async fn poll(&mut self, max_records: usize) -> Result<Vec<Record>> {
        let inner = self.broker.inner.clone();
        let published = inner.published.notified();
        tokio::pin!(published);
        published.as_mut().enable();

        let records = self.fetch(max_records)?;
        if !records.is_empty() {
            return Ok(records);
        }
        if tokio::time::timeout(self.poll_timeout, published).await.is_err() {
            return Ok(Vec::new());
        }
        self.fetch(max_records)
    }

    fn commit(&mut self, offsets: &[PartitionOffset]) -> Result<()> {
        let mut state = self.broker.inner.state.lock();
        if state.fail_next_commits > 0 {
            state.fail_next_commits -= 1;
            return Err(BrokerError::commit_failed(format!(
                "commit failed, client_id={}, group={}",
                self.client_id, self.group
            )));
        }
        for offset in offsets {
            state.committed.insert(
                (self.group.clone(), offset.topic.clone(), offset.partition),
                offset.offset,
            );
        }
        state.events.push(BrokerEvent::Committed {
            client_id: self.client_id.clone(),
            offsets: offsets.to_vec(),
        });
        Ok(())
    }

    fn rewind(&mut self, offsets: &[PartitionOffset]) -> Result<()> {
        let mut state = self.broker.inner.state.lock();
        for offset in offsets {
            state.positions.insert(
                (self.group.clone(), offset.topic.clone(), offset.partition),
                offset.offset,
            );
        }
        state.events.push(BrokerEvent::Rewound {
            client_id: self.client_id.clone(),
            offsets: offsets.to_vec(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut state = self.broker.inner.state.lock();
        let remaining = match state.members.get_mut(&self.group) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            let group = self.group.clone();
            state.members.remove(&group);
            state.positions.retain(|(g, _, _), _| *g != group);
        }
        state.events.push(BrokerEvent::ConsumerClosed {
            client_id: self.client_id.clone(),
        });
        Ok(())
    }
}
