//! action log 格式和输出测试

use flare_broker_client::log::{
    ACTION_LOG_TARGET, ActionLog, ActionLogSink, ActionLogWriter, LogResult, filter_line_separator,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_result_only_escalates() {
    let mut log = ActionLog::new("topic:orders");
    assert_eq!(log.result(), LogResult::Ok);

    log.warn("PROCESS_TIMEOUT", "slow");
    assert_eq!(log.result(), LogResult::Warn);

    log.error("HANDLER_FAILED", "boom");
    assert_eq!(log.result(), LogResult::Error);

    log.warn("COMMIT_FAILED", "ignored");
    assert_eq!(log.result(), LogResult::Error);
    assert_eq!(log.error_type.as_deref(), Some("HANDLER_FAILED"));
    assert_eq!(log.error_message.as_deref(), Some("boom"));
}

#[test]
fn test_performance_stats_accumulate() {
    let mut log = ActionLog::new("topic:orders");
    log.track("kafka_poll", Duration::from_millis(5));
    log.track("kafka_poll", Duration::from_millis(7));

    let stat = log.performance_stats["kafka_poll"];
    assert_eq!(stat.count, 2);
    assert_eq!(stat.total_elapsed, Duration::from_millis(12));
}

#[test]
fn test_message_format() {
    let mut log = ActionLog::new("topic:orders");
    log.ref_id = Some("ref-1".to_string());
    log.context("client_id", "kafka-consumer-1");
    log.context("batch_size", 3);
    log.track("kafka_commit", Duration::from_nanos(1500));
    log.warn("PROCESS_TIMEOUT", "took\ntoo long");
    log.end();

    let message = ActionLogWriter::action_log_message(&log);
    let parts: Vec<&str> = message.split(" | ").collect();

    assert!(parts[0].ends_with('Z'));
    assert_eq!(parts[1], "WARN");
    assert!(parts[2].starts_with("elapsed="));
    assert_eq!(parts[3], format!("id={}", log.id));
    assert_eq!(parts[4], "action=topic:orders");
    assert_eq!(parts[5], "refId=ref-1");
    assert_eq!(parts[6], "errorMessage=took too long");
    assert_eq!(parts[7], "errorType=PROCESS_TIMEOUT");
    assert_eq!(parts[8], "client_id=kafka-consumer-1");
    assert_eq!(parts[9], "batch_size=3");
    assert_eq!(parts[10], "kafka_commitCount=1");
    assert_eq!(parts[11], "kafka_commitElapsedTime=1500");
    assert!(!message.contains('\n'));
}

#[test]
fn test_filter_line_separator() {
    assert_eq!(filter_line_separator(None), "");
    assert_eq!(filter_line_separator(Some("a\r\nb")), "a  b");
    assert_eq!(filter_line_separator(Some("plain")), "plain");
}

#[test]
fn test_memory_writer() {
    let (writer, lines) = ActionLogWriter::memory();
    let mut log = ActionLog::new("topic:refunds");
    log.end();

    writer.write(&log);
    writer.write(&log);

    let lines = lines.lock();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("| OK |"));
    assert!(lines[0].contains("action=topic:refunds"));
}

#[test]
fn test_file_writer_appends_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("action.log");

    let writer = ActionLogWriter::file(&path).unwrap();
    let mut log = ActionLog::new("topic:orders");
    log.error("HANDLER_FAILED", "boom");
    log.end();
    writer.write(&log);
    drop(writer);

    // 重新打开时追加
    let writer = ActionLogWriter::file(&path).unwrap();
    writer.write(&log);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line.contains("| ERROR |")));
    assert!(lines[0].contains("errorMessage=boom"));
}

/// 收集 tracing 输出
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_console_writer_goes_through_tracing() {
    let captured = Captured::default();
    let output = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || output.clone())
        .with_ansi(false)
        .finish();

    let writer = ActionLogWriter::console();
    let mut log = ActionLog::new("topic:payments");
    log.end();
    tracing::subscriber::with_default(subscriber, || writer.write(&log));

    let text = String::from_utf8(captured.0.lock().clone()).unwrap();
    assert!(text.contains(ACTION_LOG_TARGET));
    assert!(text.contains("action=topic:payments"));
    assert!(text.contains(&format!("id={}", log.id)));
}
