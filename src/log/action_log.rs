//! 一次工作单元（例如处理一批消息）的结构化日志记录

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// 工作单元的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogResult {
    Ok,
    Warn,
    Error,
}

impl LogResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogResult::Ok => "OK",
            LogResult::Warn => "WARN",
            LogResult::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 子操作的累计耗时
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerformanceStat {
    pub count: u32,
    pub total_elapsed: Duration,
}

impl PerformanceStat {
    pub fn track(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total_elapsed += elapsed;
    }
}

/// 结构化工作单元日志
#[derive(Debug, Clone)]
pub struct ActionLog {
    pub id: String,
    pub action: String,
    pub start_time: DateTime<Utc>,
    pub ref_id: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub elapsed: Duration,
    pub context: Vec<(String, String)>,
    pub performance_stats: BTreeMap<String, PerformanceStat>,
    result: LogResult,
    started: Instant,
}

impl ActionLog {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action: action.into(),
            start_time: Utc::now(),
            ref_id: None,
            error_message: None,
            error_type: None,
            elapsed: Duration::ZERO,
            context: Vec::new(),
            performance_stats: BTreeMap::new(),
            result: LogResult::Ok,
            started: Instant::now(),
        }
    }

    pub fn result(&self) -> LogResult {
        self.result
    }

    /// 追加上下文，同名 key 保留先写入的顺序
    pub fn context(&mut self, key: impl Into<String>, value: impl ToString) {
        self.context.push((key.into(), value.to_string()));
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 累计子操作耗时
    pub fn track(&mut self, operation: &str, elapsed: Duration) {
        self.performance_stats
            .entry(operation.to_string())
            .or_default()
            .track(elapsed);
    }

    /// 记录告警，结果只会升级不会降级
    pub fn warn(&mut self, error_type: &str, message: impl Into<String>) {
        self.record(LogResult::Warn, error_type, message.into());
    }

    /// 记录错误
    pub fn error(&mut self, error_type: &str, message: impl Into<String>) {
        self.record(LogResult::Error, error_type, message.into());
    }

    fn record(&mut self, result: LogResult, error_type: &str, message: String) {
        if result >= self.result {
            self.result = result;
            self.error_type = Some(error_type.to_string());
            self.error_message = Some(message);
        }
    }

    /// 结束工作单元，记录总耗时
    pub fn end(&mut self) {
        self.elapsed = self.started.elapsed();
    }
}
