//! 消费组监听器测试：提交、重投递、超时、停止

use flare_broker_client::config::KafkaConfig;
use flare_broker_client::error::BrokerError;
use flare_broker_client::kafka::{
    HandlerResult, Kafka, ListenerState, PartitionOffset, ReceivedMessage, StopOutcome, handler_fn,
    message_handler_fn,
};
use flare_broker_client::log::ActionLogWriter;
use flare_broker_client::mock::{BrokerEvent, MockBroker};
use flare_broker_client::validate::{FieldSpec, Message};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const TOPIC: &str = "orders";
const GROUP: &str = "order";

struct Fixture {
    kafka: Kafka,
    broker: MockBroker,
    action_logs: Arc<Mutex<Vec<String>>>,
}

fn test_config() -> KafkaConfig {
    KafkaConfig::named(GROUP)
        .with_uri("mock:9092")
        .with_poll_timeout(Duration::from_millis(50))
        .with_poll_error_backoff(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_secs(2))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("flare_broker_client=debug")
        .with_test_writer()
        .try_init();
}

fn fixture(config: KafkaConfig) -> Fixture {
    init_tracing();
    let broker = MockBroker::new();
    let (writer, action_logs) = ActionLogWriter::memory();
    let kafka = Kafka::builder(config, Arc::new(broker.clone()))
        .with_action_log(Arc::new(writer))
        .build();
    Fixture {
        kafka,
        broker,
        action_logs,
    }
}

/// 轮询等待条件成立，最多等待 5 秒
async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_successful_batch_is_committed() {
    let f = fixture(test_config());
    for i in 0..3 {
        f.broker.publish(TOPIC, Some(&format!("key-{}", i)), format!("value-{}", i));
    }

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    f.kafka
        .listener()
        .subscribe(
            TOPIC,
            handler_fn(move |topic, records| {
                let sink = sink.clone();
                async move {
                    assert_eq!(topic, TOPIC);
                    sink.lock().extend(records.into_iter().map(|r| r.offset));
                    Ok(())
                }
            }),
        )
        .unwrap();

    f.kafka.initialize().await.unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(3)).await;

    assert_eq!(*received.lock(), vec![0, 1, 2]);
    assert_eq!(f.broker.commits(), vec![vec![PartitionOffset::new(TOPIC, 0, 3)]]);

    let listener = f.kafka.listener();
    assert_eq!(listener.stats().batches_processed(), 1);
    assert_eq!(listener.stats().records_processed(), 3);
    assert_eq!(listener.stop().await, StopOutcome::Graceful);
    f.kafka.close().await;
}

#[tokio::test]
async fn test_failed_batch_is_redelivered() {
    let f = fixture(test_config());
    for i in 0..3 {
        f.broker.publish(TOPIC, None, format!("value-{}", i));
    }

    let attempts = Arc::new(Mutex::new(Vec::<Vec<i64>>::new()));
    let sink = attempts.clone();
    f.kafka
        .listener()
        .subscribe(
            TOPIC,
            handler_fn(move |_, records| {
                let sink = sink.clone();
                async move {
                    let attempt = {
                        let mut attempts = sink.lock();
                        attempts.push(records.iter().map(|r| r.offset).collect());
                        attempts.len()
                    };
                    let result: HandlerResult = if attempt == 1 {
                        Err("downstream unavailable".into())
                    } else {
                        Ok(())
                    };
                    result
                }
            }),
        )
        .unwrap();

    f.kafka.initialize().await.unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(3)).await;

    // 同一批消息投递两次，第一次失败后没有提交
    assert_eq!(*attempts.lock(), vec![vec![0, 1, 2], vec![0, 1, 2]]);
    assert_eq!(f.broker.commits().len(), 1);

    let events = f.broker.events();
    let rewound = events
        .iter()
        .position(|e| matches!(e, BrokerEvent::Rewound { .. }))
        .unwrap();
    let committed = events
        .iter()
        .position(|e| matches!(e, BrokerEvent::Committed { .. }))
        .unwrap();
    assert!(rewound < committed);

    let listener = f.kafka.listener();
    assert_eq!(listener.stats().batches_failed(), 1);
    assert_eq!(listener.stats().batches_processed(), 1);

    let logs = f.action_logs.lock().clone();
    assert!(logs.iter().any(|line| line.contains("| ERROR |") && line.contains("errorType=HANDLER_FAILED")));
    f.kafka.close().await;
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_loop() {
    let f = fixture(test_config());
    f.broker.publish(TOPIC, None, "value");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    f.kafka
        .listener()
        .subscribe(
            TOPIC,
            handler_fn(move |_, _| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("handler bug");
                    }
                    Ok(())
                }
            }),
        )
        .unwrap();

    f.kafka.initialize().await.unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(1)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(f.kafka.listener().state(), ListenerState::Running);
    f.kafka.close().await;
}

#[tokio::test]
async fn test_slow_batch_is_logged_and_loop_continues() {
    let config = test_config().with_max_process_time(Duration::from_millis(50));
    let f = fixture(config);
    f.broker.publish(TOPIC, None, "slow");

    let handled = Arc::new(Mutex::new(Vec::new()));
    let sink = handled.clone();
    f.kafka
        .listener()
        .subscribe(
            TOPIC,
            handler_fn(move |_, records| {
                let sink = sink.clone();
                async move {
                    if records[0].offset == 0 {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    sink.lock().extend(records.iter().map(|r| r.offset));
                    Ok(())
                }
            }),
        )
        .unwrap();

    f.kafka.initialize().await.unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(1)).await;

    // 超时的批次处理完成后照常提交，下一次 poll 继续
    f.broker.publish(TOPIC, None, "fast");
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(2)).await;
    assert_eq!(*handled.lock(), vec![0, 1]);

    let listener = f.kafka.listener();
    assert_eq!(listener.stats().batches_timed_out(), 1);
    assert_eq!(listener.state(), ListenerState::Running);

    let logs = f.action_logs.lock().clone();
    assert!(logs.iter().any(|line| line.contains("| WARN |") && line.contains("errorType=PROCESS_TIMEOUT")));
    f.kafka.close().await;
}

#[tokio::test]
async fn test_poll_errors_are_retried() {
    let f = fixture(test_config());
    f.broker.fail_next_polls(2);
    f.broker.publish(TOPIC, None, "value");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    f.kafka
        .listener()
        .subscribe(
            TOPIC,
            handler_fn(move |_, _| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

    f.kafka.initialize().await.unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(1)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.kafka.listener().stats().poll_errors(), 2);
    f.kafka.close().await;
}

#[tokio::test]
async fn test_commit_failure_is_logged_and_next_commit_covers_batch() {
    let f = fixture(test_config());
    f.broker.fail_next_commits(1);
    f.broker.publish(TOPIC, None, "first");

    f.kafka
        .listener()
        .subscribe(TOPIC, handler_fn(|_, _| async { Ok(()) }))
        .unwrap();
    f.kafka.initialize().await.unwrap();

    let logs = f.action_logs.clone();
    wait_until(|| logs.lock().iter().any(|line| line.contains("errorType=COMMIT_FAILED"))).await;
    assert_eq!(f.broker.committed_offset(GROUP, TOPIC), None);

    f.broker.publish(TOPIC, None, "second");
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(2)).await;

    let line = logs
        .lock()
        .iter()
        .find(|line| line.contains("errorType=COMMIT_FAILED"))
        .cloned()
        .unwrap();
    assert!(line.contains("| WARN |"));
    assert!(line.contains("MESSAGE_COMMIT_FAILED"));
    f.kafka.close().await;
}

#[tokio::test]
async fn test_batches_are_limited_by_max_batch_size() {
    let f = fixture(test_config().with_max_batch_size(2));
    for i in 0..5 {
        f.broker.publish(TOPIC, None, format!("value-{}", i));
    }

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let sink = sizes.clone();
    f.kafka
        .listener()
        .subscribe(
            TOPIC,
            handler_fn(move |_, records| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(records.len());
                    Ok(())
                }
            }),
        )
        .unwrap();

    f.kafka.initialize().await.unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(5)).await;

    assert_eq!(*sizes.lock(), vec![2, 2, 1]);
    f.kafka.close().await;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderCreated {
    order_id: String,
}

impl Message for OrderCreated {
    fn schema() -> Vec<FieldSpec> {
        vec![FieldSpec::named("order_id").required().not_blank()]
    }
}

#[tokio::test]
async fn test_typed_handler_skips_invalid_messages() {
    let f = fixture(test_config());
    f.kafka.register::<OrderCreated>().unwrap();
    f.broker.publish(TOPIC, Some("a"), r#"{"order_id": "order-1"}"#);
    f.broker.publish(TOPIC, Some("b"), r#"{"order_id": "  "}"#);
    f.broker.publish(TOPIC, Some("c"), "not json");

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    f.kafka
        .listener()
        .subscribe_messages::<OrderCreated, _>(
            TOPIC,
            message_handler_fn(move |messages: Vec<ReceivedMessage<OrderCreated>>| {
                let sink = sink.clone();
                async move {
                    sink.lock()
                        .extend(messages.into_iter().map(|m| (m.key, m.message.order_id)));
                    Ok(())
                }
            }),
        )
        .unwrap();

    f.kafka.initialize().await.unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(3)).await;

    assert_eq!(
        *received.lock(),
        vec![(Some("a".to_string()), "order-1".to_string())]
    );
    f.kafka.close().await;
}

#[tokio::test]
async fn test_typed_subscription_requires_registration() {
    let f = fixture(test_config());
    let err = f
        .kafka
        .listener()
        .subscribe_messages::<OrderCreated, _>(
            TOPIC,
            message_handler_fn(|_: Vec<ReceivedMessage<OrderCreated>>| async { Ok(()) }),
        )
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnregisteredType(_)));
}

#[tokio::test]
async fn test_subscribe_rules() {
    let f = fixture(test_config());
    let listener = f.kafka.listener();

    listener
        .subscribe(TOPIC, handler_fn(|_, _| async { Ok(()) }))
        .unwrap();
    let err = listener
        .subscribe(TOPIC, handler_fn(|_, _| async { Ok(()) }))
        .unwrap_err();
    assert!(matches!(err, BrokerError::Configuration(_)));

    listener.start().unwrap();
    let err = listener
        .subscribe("refunds", handler_fn(|_, _| async { Ok(()) }))
        .unwrap_err();
    assert!(matches!(err, BrokerError::Configuration(_)));

    f.kafka.close().await;
}

#[tokio::test]
async fn test_state_transitions() {
    let f = fixture(test_config());
    let listener = f.kafka.listener();
    listener
        .subscribe(TOPIC, handler_fn(|_, _| async { Ok(()) }))
        .unwrap();
    assert_eq!(listener.state(), ListenerState::Created);

    listener.start().unwrap();
    assert_eq!(listener.state(), ListenerState::Running);
    // 重复启动是 no-op
    listener.start().unwrap();
    assert_eq!(f.broker.consumers_created(), 1);

    assert_eq!(listener.stop().await, StopOutcome::Graceful);
    assert_eq!(listener.state(), ListenerState::Stopped);
    assert_eq!(listener.stop().await, StopOutcome::NotRunning);

    // 停止后不会重新启动
    listener.start().unwrap();
    assert_eq!(listener.state(), ListenerState::Stopped);
    assert_eq!(f.broker.consumers_created(), 1);
}

#[tokio::test]
async fn test_pool_size_creates_consumers() {
    let f = fixture(test_config().with_pool_size(2));
    let listener = f.kafka.listener();
    listener
        .subscribe(TOPIC, handler_fn(|_, _| async { Ok(()) }))
        .unwrap();
    listener.start().unwrap();

    assert_eq!(
        f.kafka.consumer_metrics().client_ids(),
        vec!["kafka-consumer-order-1", "kafka-consumer-order-2"]
    );

    listener.stop().await;
    assert!(f.kafka.consumer_metrics().is_empty());
}

#[tokio::test]
async fn test_pooled_consumers_redeliver_failed_batch() {
    let f = fixture(test_config().with_pool_size(2));
    for i in 0..3 {
        f.broker.publish(TOPIC, None, format!("value-{}", i));
    }

    let attempts = Arc::new(Mutex::new(Vec::<Vec<i64>>::new()));
    let sink = attempts.clone();
    let listener = f.kafka.listener();
    listener
        .subscribe(
            TOPIC,
            handler_fn(move |_, records| {
                let sink = sink.clone();
                async move {
                    let attempt = {
                        let mut attempts = sink.lock();
                        attempts.push(records.iter().map(|r| r.offset).collect());
                        attempts.len()
                    };
                    let result: HandlerResult = if attempt == 1 {
                        Err("downstream unavailable".into())
                    } else {
                        Ok(())
                    };
                    result
                }
            }),
        )
        .unwrap();

    listener.start().unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(3)).await;

    // 第一次失败的批次由组内任一 consumer 重新消费
    let attempts = attempts.lock().clone();
    assert_eq!(attempts[0], vec![0, 1, 2]);
    let mut redelivered: Vec<i64> = attempts[1..].iter().flatten().copied().collect();
    redelivered.sort_unstable();
    assert_eq!(redelivered, vec![0, 1, 2]);
    assert_eq!(listener.stats().batches_failed(), 1);

    assert_eq!(listener.stop().await, StopOutcome::Graceful);
    assert_eq!(listener.state(), ListenerState::Stopped);
    assert!(f.kafka.consumer_metrics().is_empty());

    let closed = f
        .broker
        .events()
        .iter()
        .filter(|e| matches!(e, BrokerEvent::ConsumerClosed { .. }))
        .count();
    assert_eq!(closed, 2);
    f.kafka.close().await;
}

#[tokio::test]
async fn test_closing_one_group_member_keeps_sibling_position() {
    let f = fixture(test_config());
    for i in 0..3 {
        f.broker.publish(TOPIC, None, format!("value-{}", i));
    }

    let mut first = f.kafka.consumer(GROUP, &[TOPIC]).unwrap();
    let mut second = f.kafka.consumer(GROUP, &[TOPIC]).unwrap();

    let polled = first.poll(10).await.unwrap();
    assert_eq!(polled.len(), 3);

    // 未提交时关闭其中一个，另一个不会从头读取
    second.close().unwrap();
    assert!(first.poll(10).await.unwrap().is_empty());

    // 组内最后一个关闭后，从已提交的 offset 重新读取
    first.close().unwrap();
    let mut third = f.kafka.consumer(GROUP, &[TOPIC]).unwrap();
    let redelivered = third.poll(10).await.unwrap();
    assert_eq!(redelivered.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![0, 1, 2]);
    third.close().unwrap();
}

#[tokio::test]
async fn test_stop_forces_close_after_grace_period() {
    let config = test_config().with_shutdown_timeout(Duration::from_millis(100));
    let f = fixture(config);
    f.broker.publish(TOPIC, None, "stuck");

    let entered = Arc::new(AtomicBool::new(false));
    let flag = entered.clone();
    let listener = f.kafka.listener();
    listener
        .subscribe(
            TOPIC,
            handler_fn(move |_, _| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }),
        )
        .unwrap();

    listener.start().unwrap();
    wait_until(|| entered.load(Ordering::SeqCst)).await;

    assert_eq!(listener.stop().await, StopOutcome::Forced);
    assert_eq!(listener.state(), ListenerState::Stopped);
    assert!(f.kafka.consumer_metrics().is_empty());
    assert_eq!(f.broker.committed_offset(GROUP, TOPIC), None);
}

#[tokio::test]
async fn test_action_log_per_batch() {
    let f = fixture(test_config());
    f.broker.publish(TOPIC, None, "a");
    f.broker.publish(TOPIC, None, "b");

    f.kafka
        .listener()
        .subscribe(TOPIC, handler_fn(|_, _| async { Ok(()) }))
        .unwrap();
    f.kafka.initialize().await.unwrap();
    wait_until(|| f.broker.committed_offset(GROUP, TOPIC) == Some(2)).await;
    f.kafka.close().await;

    let logs = f.action_logs.lock().clone();
    assert_eq!(logs.len(), 1);
    let line = &logs[0];
    assert!(line.contains("| OK |"));
    assert!(line.contains("action=topic:orders"));
    assert!(line.contains("client_id=kafka-consumer-order-1"));
    assert!(line.contains("group=order"));
    assert!(line.contains("batch_size=2"));
    assert!(line.contains("kafka_pollCount=1"));
    assert!(line.contains("kafka_commitCount=1"));
}

#[test]
fn test_start_requires_runtime() {
    let f = fixture(test_config());
    let listener = f.kafka.listener();
    listener
        .subscribe(TOPIC, handler_fn(|_, _| async { Ok(()) }))
        .unwrap();

    let err = listener.start().unwrap_err();
    assert!(matches!(err, BrokerError::Configuration(_)));
    assert_eq!(listener.state(), ListenerState::Created);
}
