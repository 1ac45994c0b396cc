//! 批量消息处理器
//!
//! 与运行时任务一致，处理结果使用 `Result<(), Box<dyn Error + Send + Sync>>`

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

use super::record::Record;
use crate::validate::{Message, MessageValidator};

/// 处理器返回的错误
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// 处理结果，成功后才会提交 offset
pub type HandlerResult = Result<(), HandlerError>;

/// 原始批量消息处理器
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    async fn handle(&self, topic: &str, records: Vec<Record>) -> HandlerResult;
}

/// 反序列化并校验后的消息
#[derive(Debug, Clone)]
pub struct ReceivedMessage<M> {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub timestamp: Option<i64>,
    pub message: M,
}

/// 类型化批量消息处理器
#[async_trait]
pub trait MessageHandler<M: Message>: Send + Sync + 'static {
    async fn handle(&self, messages: Vec<ReceivedMessage<M>>) -> HandlerResult;
}

/// 闭包形式的 [`BatchHandler`]
///
/// ```rust,no_run
/// use flare_broker_client::kafka::handler_fn;
///
/// let handler = handler_fn(|topic, records| async move {
///     tracing::info!(topic = %topic, count = records.len(), "received");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(String, Vec<Record>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn { f }
}

pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> BatchHandler for HandlerFn<F>
where
    F: Fn(String, Vec<Record>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, topic: &str, records: Vec<Record>) -> HandlerResult {
        (self.f)(topic.to_string(), records).await
    }
}

/// 闭包形式的 [`MessageHandler`]
pub fn message_handler_fn<M, F, Fut>(f: F) -> MessageHandlerFn<M, F>
where
    M: Message,
    F: Fn(Vec<ReceivedMessage<M>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    MessageHandlerFn {
        f,
        _message: PhantomData,
    }
}

pub struct MessageHandlerFn<M, F> {
    f: F,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, F, Fut> MessageHandler<M> for MessageHandlerFn<M, F>
where
    M: Message,
    F: Fn(Vec<ReceivedMessage<M>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, messages: Vec<ReceivedMessage<M>>) -> HandlerResult {
        (self.f)(messages).await
    }
}

/// 将类型化处理器适配为原始处理器：逐条反序列化并校验，不合法的消息记录日志后跳过
pub(crate) struct TypedBatchHandler<M, H> {
    validator: Arc<MessageValidator>,
    handler: H,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> TypedBatchHandler<M, H> {
    pub(crate) fn new(validator: Arc<MessageValidator>, handler: H) -> Self {
        Self {
            validator,
            handler,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> BatchHandler for TypedBatchHandler<M, H>
where
    M: Message,
    H: MessageHandler<M>,
{
    async fn handle(&self, topic: &str, records: Vec<Record>) -> HandlerResult {
        let mut messages = Vec::with_capacity(records.len());
        for record in records {
            match self.validator.decode::<M>(&record.value) {
                Ok(message) => messages.push(ReceivedMessage {
                    topic: record.topic,
                    partition: record.partition,
                    offset: record.offset,
                    key: record.key,
                    timestamp: record.timestamp,
                    message,
                }),
                Err(e) => {
                    warn!(
                        topic = %topic,
                        partition = record.partition,
                        offset = record.offset,
                        key = ?record.key,
                        error = %e,
                        "Skipping invalid kafka message"
                    );
                }
            }
        }

        if messages.is_empty() {
            return Ok(());
        }
        self.handler.handle(messages).await
    }
}
