//! 消费组监听器
//!
//! 状态：`Created → Running → Stopping → Stopped`
//!
//! 每个 consumer 由一个独立任务驱动，顺序执行 poll → 分发 → 提交：
//! - 同一个 consumer 的两批消息不会并发处理，offset 按批次顺序提交
//! - 处理超过 `max_process_time` 只记录告警，不强制取消处理任务
//! - 处理失败不提交 offset，并回退消费位置，下一次 poll 重新投递（at-least-once）
//! - 停止信号只在批次之间检查，不会打断正在处理的批次

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::ConsumerHandle;
use super::factory::ClientFactory;
use super::handler::{BatchHandler, MessageHandler, TypedBatchHandler};
use super::record::{PartitionOffset, Record, first_offsets, next_offsets};
use crate::error::{BrokerError, Result};
use crate::log::{ActionLog, ActionLogSink};
use crate::validate::{Message, MessageValidator};

/// 监听器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// `stop()` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 所有 poll 循环在宽限期内退出
    Graceful,
    /// 宽限期内未退出，已强制关闭连接
    Forced,
    /// 监听器未运行
    NotRunning,
}

/// 批次处理统计
#[derive(Debug, Default)]
pub struct ListenerStats {
    batches_processed: AtomicU64,
    batches_failed: AtomicU64,
    batches_timed_out: AtomicU64,
    records_processed: AtomicU64,
    poll_errors: AtomicU64,
}

impl ListenerStats {
    pub fn batches_processed(&self) -> u64 {
        self.batches_processed.load(Ordering::Relaxed)
    }

    /// 失败的批次，包括处理超时的批次
    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn batches_timed_out(&self) -> u64 {
        self.batches_timed_out.load(Ordering::Relaxed)
    }

    pub fn records_processed(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    pub fn poll_errors(&self) -> u64 {
        self.poll_errors.load(Ordering::Relaxed)
    }
}

struct ListenerInner {
    state: ListenerState,
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// 消费组监听器，由 [`crate::kafka::Kafka::listener`] 创建
pub struct KafkaMessageListener {
    factory: Arc<ClientFactory>,
    validator: Arc<MessageValidator>,
    action_log: Arc<dyn ActionLogSink>,
    group_id: String,
    handlers: RwLock<BTreeMap<String, Arc<dyn BatchHandler>>>,
    inner: Mutex<ListenerInner>,
    stats: Arc<ListenerStats>,
}

impl KafkaMessageListener {
    pub(crate) fn new(
        factory: Arc<ClientFactory>,
        validator: Arc<MessageValidator>,
        action_log: Arc<dyn ActionLogSink>,
    ) -> Self {
        let group_id = factory.config().effective_group_id();
        Self {
            factory,
            validator,
            action_log,
            group_id,
            handlers: RwLock::new(BTreeMap::new()),
            inner: Mutex::new(ListenerInner {
                state: ListenerState::Created,
                token: CancellationToken::new(),
                workers: Vec::new(),
            }),
            stats: Arc::new(ListenerStats::default()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn state(&self) -> ListenerState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    pub fn topics(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// 注册 topic 的原始批量处理器，必须在 `start()` 之前调用
    pub fn subscribe(&self, topic: impl Into<String>, handler: impl BatchHandler) -> Result<()> {
        self.add_handler(topic.into(), Arc::new(handler))
    }

    /// 注册 topic 的类型化处理器，消息类型必须已在校验器中注册
    pub fn subscribe_messages<M, H>(&self, topic: impl Into<String>, handler: H) -> Result<()>
    where
        M: Message,
        H: MessageHandler<M>,
    {
        if !self.validator.is_registered::<M>() {
            return Err(BrokerError::UnregisteredType(std::any::type_name::<M>().to_string()));
        }
        let adapter = TypedBatchHandler::<M, H>::new(self.validator.clone(), handler);
        self.add_handler(topic.into(), Arc::new(adapter))
    }

    fn add_handler(&self, topic: String, handler: Arc<dyn BatchHandler>) -> Result<()> {
        if self.state() != ListenerState::Created {
            return Err(BrokerError::configuration(format!(
                "can not subscribe after listener started, topic={}",
                topic
            )));
        }
        if topic.trim().is_empty() {
            return Err(BrokerError::configuration("topic must not be empty"));
        }

        let mut handlers = self.handlers.write();
        if handlers.contains_key(&topic) {
            return Err(BrokerError::configuration(format!(
                "topic is already subscribed, topic={}",
                topic
            )));
        }
        handlers.insert(topic, handler);
        Ok(())
    }

    /// 启动 poll 循环，已启动时为 no-op
    ///
    /// 必须在 tokio 运行时中调用
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != ListenerState::Created {
            debug!(group = %self.group_id, state = ?inner.state, "Kafka listener already started, skipping");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BrokerError::configuration(format!("kafka listener must be started inside tokio runtime: {}", e))
        })?;

        let handlers: HashMap<String, Arc<dyn BatchHandler>> = self
            .handlers
            .read()
            .iter()
            .map(|(topic, handler)| (topic.clone(), handler.clone()))
            .collect();
        if handlers.is_empty() {
            warn!(group = %self.group_id, "Kafka listener has no subscribed topic, nothing to consume");
            inner.state = ListenerState::Running;
            return Ok(());
        }

        let mut topics: Vec<String> = handlers.keys().cloned().collect();
        topics.sort();
        let pool_size = self.factory.config().pool_size.max(1);

        // 先创建全部 consumer，任何一个失败时已创建的会在 drop 时关闭
        let mut consumers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            consumers.push(self.factory.create_consumer(&self.group_id, &topics)?);
        }

        let handlers = Arc::new(handlers);
        let config = self.factory.config();
        for consumer in consumers {
            let worker = PollWorker {
                consumer,
                handlers: handlers.clone(),
                action_log: self.action_log.clone(),
                stats: self.stats.clone(),
                token: inner.token.clone(),
                max_batch_size: config.max_batch_size.max(1),
                max_process_time: config.max_process_time,
                poll_error_backoff: config.poll_error_backoff,
            };
            inner.workers.push(runtime.spawn(worker.run()));
        }

        inner.state = ListenerState::Running;
        info!(
            group = %self.group_id,
            topics = ?topics,
            pool_size = pool_size,
            "Kafka listener started"
        );
        Ok(())
    }

    /// 停止 poll 循环
    ///
    /// 等待正在处理的批次完成，最长等待 `shutdown_timeout`；超时后强制关闭连接并记录日志
    pub async fn stop(&self) -> StopOutcome {
        let (token, mut workers) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ListenerState::Running => {
                    inner.state = ListenerState::Stopping;
                    (inner.token.clone(), std::mem::take(&mut inner.workers))
                }
                ListenerState::Created => {
                    inner.state = ListenerState::Stopped;
                    return StopOutcome::NotRunning;
                }
                ListenerState::Stopping | ListenerState::Stopped => return StopOutcome::NotRunning,
            }
        };

        info!(group = %self.group_id, "Stopping kafka listener");
        token.cancel();

        let shutdown_timeout = self.factory.config().shutdown_timeout;
        let joined = tokio::time::timeout(shutdown_timeout, join_all(workers.iter_mut())).await;
        let outcome = match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(group = %self.group_id, error = %e, "Kafka poll loop exited abnormally");
                    }
                }
                StopOutcome::Graceful
            }
            Err(_) => {
                let error = BrokerError::ShutdownTimeout(format!(
                    "kafka listener did not stop within {:?}, group={}",
                    shutdown_timeout, self.group_id
                ));
                warn!(error = %error, "Force closing kafka consumers");
                for worker in &workers {
                    worker.abort();
                }
                // 任务被取消时 consumer 随之 drop 并关闭
                for worker in workers {
                    let _ = worker.await;
                }
                StopOutcome::Forced
            }
        };

        self.inner.lock().state = ListenerState::Stopped;
        info!(group = %self.group_id, outcome = ?outcome, "Kafka listener stopped");
        outcome
    }
}

/// 单个 consumer 的 poll 循环
struct PollWorker {
    consumer: ConsumerHandle,
    handlers: Arc<HashMap<String, Arc<dyn BatchHandler>>>,
    action_log: Arc<dyn ActionLogSink>,
    stats: Arc<ListenerStats>,
    token: CancellationToken,
    max_batch_size: usize,
    max_process_time: Duration,
    poll_error_backoff: Duration,
}

impl PollWorker {
    async fn run(mut self) {
        info!(client_id = %self.consumer.client_id(), topics = ?self.consumer.topics(), "Kafka poll loop started");

        loop {
            if self.token.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let polled = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                result = self.consumer.poll(self.max_batch_size) => result,
            };
            let poll_elapsed = started.elapsed();

            match polled {
                Ok(records) if records.is_empty() => {}
                Ok(records) => self.process(records, poll_elapsed).await,
                Err(e) => {
                    self.stats.poll_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        client_id = %self.consumer.client_id(),
                        error = %e,
                        "Failed to poll kafka messages, will retry"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_error_backoff) => {}
                    }
                }
            }
        }

        if let Err(e) = self.consumer.close() {
            warn!(client_id = %self.consumer.client_id(), error = %e, "Failed to close kafka consumer");
        }
        info!(client_id = %self.consumer.client_id(), "Kafka poll loop stopped");
    }

    async fn process(&mut self, records: Vec<Record>, poll_elapsed: Duration) {
        let mut batches: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for record in records {
            batches.entry(record.topic.clone()).or_default().push(record);
        }
        for (topic, records) in batches {
            self.process_topic(topic, records, poll_elapsed).await;
        }
    }

    async fn process_topic(&mut self, topic: String, records: Vec<Record>, poll_elapsed: Duration) {
        let batch_size = records.len();
        let commit_offsets = next_offsets(&records);
        let rewind_offsets = first_offsets(&records);

        let mut log = ActionLog::new(format!("topic:{}", topic));
        log.context("topic", &topic);
        log.context("client_id", self.consumer.client_id());
        log.context("group", self.consumer.group_id());
        log.context("batch_size", batch_size);
        log.track("kafka_poll", poll_elapsed);

        let Some(handler) = self.handlers.get(&topic).cloned() else {
            warn!(topic = %topic, client_id = %self.consumer.client_id(), "No handler for kafka topic, skipping batch");
            log.warn("NO_HANDLER", format!("no handler for topic, topic={}", topic));
            self.commit(&commit_offsets, &mut log);
            log.end();
            self.action_log.write(&log);
            return;
        };

        let started = Instant::now();
        let task_topic = topic.clone();
        let mut task = tokio::spawn(async move { handler.handle(&task_topic, records).await });

        let mut timed_out = false;
        let waited = tokio::time::timeout(self.max_process_time, &mut task).await;
        let outcome = match waited {
            Ok(joined) => joined,
            Err(_) => {
                timed_out = true;
                let elapsed = started.elapsed();
                self.stats.batches_timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    client_id = %self.consumer.client_id(),
                    topic = %topic,
                    batch_size = batch_size,
                    elapsed = ?elapsed,
                    max_process_time = ?self.max_process_time,
                    "Kafka batch processing exceeded max process time, waiting for handler"
                );
                log.warn(
                    "PROCESS_TIMEOUT",
                    format!("batch processing exceeded max process time, elapsed={:?}", elapsed),
                );
                task.await
            }
        };
        log.context("process_time", format!("{:?}", started.elapsed()));

        match outcome {
            Ok(Ok(())) => {
                self.commit(&commit_offsets, &mut log);
                self.stats.records_processed.fetch_add(batch_size as u64, Ordering::Relaxed);
                if timed_out {
                    self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.batches_processed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(Err(e)) => {
                error!(
                    client_id = %self.consumer.client_id(),
                    topic = %topic,
                    batch_size = batch_size,
                    error = %e,
                    "Failed to process kafka batch, offsets not committed"
                );
                log.error("HANDLER_FAILED", e.to_string());
                self.rewind(&rewind_offsets, &mut log);
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!(
                    client_id = %self.consumer.client_id(),
                    topic = %topic,
                    batch_size = batch_size,
                    error = %e,
                    "Kafka batch handler panicked, offsets not committed"
                );
                log.error("HANDLER_PANICKED", e.to_string());
                self.rewind(&rewind_offsets, &mut log);
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        log.end();
        self.action_log.write(&log);
    }

    fn commit(&mut self, offsets: &[PartitionOffset], log: &mut ActionLog) {
        let started = Instant::now();
        if let Err(e) = self.consumer.commit(offsets) {
            warn!(client_id = %self.consumer.client_id(), error = %e, "Failed to commit kafka offsets");
            log.warn("COMMIT_FAILED", e.to_string());
        }
        log.track("kafka_commit", started.elapsed());
    }

    fn rewind(&mut self, offsets: &[PartitionOffset], log: &mut ActionLog) {
        if let Err(e) = self.consumer.rewind(offsets) {
            warn!(client_id = %self.consumer.client_id(), error = %e, "Failed to rewind kafka consumer");
            log.context("rewind_error", e);
        }
    }
}
