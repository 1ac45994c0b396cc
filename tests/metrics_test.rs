//! 客户端 metrics 测试

use flare_broker_client::config::KafkaConfig;
use flare_broker_client::kafka::{ConsumerHandle, Kafka};
use flare_broker_client::log::ActionLogWriter;
use flare_broker_client::metrics::{ClientMetrics, KafkaMetrics, MetricsSource};
use flare_broker_client::mock::MockBroker;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;

fn kafka() -> Kafka {
    let (writer, _) = ActionLogWriter::memory();
    Kafka::builder(
        KafkaConfig::named("metrics").with_uri("mock:9092"),
        Arc::new(MockBroker::new()),
    )
    .with_action_log(Arc::new(writer))
    .build()
}

fn export(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[tokio::test]
async fn test_random_create_close_keeps_registry_in_sync() {
    let kafka = kafka();
    let mut rng = StdRng::seed_from_u64(20240917);
    let mut open: Vec<ConsumerHandle> = Vec::new();

    for _ in 0..200 {
        if open.is_empty() || rng.gen_bool(0.55) {
            let group = format!("group-{}", rng.gen_range(0..4));
            open.push(kafka.consumer(&group, &["orders"]).unwrap());
        } else {
            let index = rng.gen_range(0..open.len());
            let mut consumer = open.swap_remove(index);
            consumer.close().unwrap();
            // 重复关闭不会影响其他客户端
            consumer.close().unwrap();
        }

        let expected: BTreeSet<String> = open.iter().map(|c| c.client_id().to_string()).collect();
        let actual: BTreeSet<String> = kafka.consumer_metrics().client_ids().into_iter().collect();
        assert_eq!(actual, expected);
    }

    open.clear();
    assert!(kafka.consumer_metrics().is_empty());
}

#[test]
fn test_add_and_remove() {
    let metrics = KafkaMetrics::producer();
    assert_eq!(metrics.prefix(), "kafka_producer");

    metrics.add("p-1", MetricsSource::new());
    assert!(metrics.contains("p-1"));
    assert_eq!(metrics.len(), 1);

    assert!(metrics.remove("p-1"));
    assert!(!metrics.remove("p-1"));
    assert!(metrics.is_empty());
}

#[test]
fn test_snapshot_and_total() {
    let metrics = KafkaMetrics::consumer();
    let first = MetricsSource::new();
    let second = MetricsSource::new();
    metrics.add("c-2", second.clone());
    metrics.add("c-1", first.clone());

    first.update(ClientMetrics {
        bytes_sent: 10,
        bytes_received: 100,
        request_latency_avg_us: 300,
        records_lag: 5,
    });
    second.with(|m| {
        m.bytes_received = 50;
        m.request_latency_avg_us = 900;
        m.records_lag = 2;
    });

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot[0].0, "c-1");
    assert_eq!(snapshot[0].1.bytes_received, 100);
    assert_eq!(snapshot[1].0, "c-2");

    let total = metrics.total();
    assert_eq!(total.bytes_sent, 10);
    assert_eq!(total.bytes_received, 150);
    assert_eq!(total.request_latency_avg_us, 900);
    assert_eq!(total.records_lag, 7);
}

#[test]
fn test_prometheus_export() {
    let metrics = Arc::new(KafkaMetrics::consumer());
    let registry = Registry::new();
    registry.register(Box::new(ConsumerMetrics(metrics.clone()))).unwrap();

    let source = MetricsSource::new();
    source.with(|m| {
        m.bytes_received = 2048;
        m.records_lag = 12;
    });
    metrics.add("kafka-consumer-order-1", source);

    let text = export(&registry);
    assert!(text.contains(r#"kafka_consumer_bytes_received{client_id="kafka-consumer-order-1"} 2048"#));
    assert!(text.contains(r#"kafka_consumer_records_lag{client_id="kafka-consumer-order-1"} 12"#));

    // 关闭的客户端不再导出
    metrics.remove("kafka-consumer-order-1");
    let text = export(&registry);
    assert!(!text.contains("kafka-consumer-order-1"));
}

/// 注册到 prometheus 时共享同一个 `KafkaMetrics`
struct ConsumerMetrics(Arc<KafkaMetrics>);

impl Collector for ConsumerMetrics {
    fn desc(&self) -> Vec<&Desc> {
        self.0.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.0.collect()
    }
}
