//! action log 输出

use chrono::SecondsFormat;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use super::action_log::ActionLog;
use crate::error::{BrokerError, Result};

const LOG_SPLITTER: &str = " | ";

/// action log 写入端
pub trait ActionLogSink: Send + Sync {
    fn write(&self, log: &ActionLog);
}

/// tracing 输出 action log 时使用的 target
pub const ACTION_LOG_TARGET: &str = "action_log";

enum Target {
    Console,
    File(BufWriter<File>),
    Memory(Arc<Mutex<Vec<String>>>),
}

/// 按行输出 action log
///
/// 格式：`<时间> | <结果> | elapsed=<ns> | id=<id> | action=<action> | k=v ...`
pub struct ActionLogWriter {
    target: Mutex<Target>,
}

impl ActionLogWriter {
    /// 通过 `tracing` 输出，target 为 [`ACTION_LOG_TARGET`]
    pub fn console() -> Self {
        Self {
            target: Mutex::new(Target::Console),
        }
    }

    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                BrokerError::configuration(format!(
                    "action log file is not writable, path={}, error={}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self {
            target: Mutex::new(Target::File(BufWriter::new(file))),
        })
    }

    /// 写入内存，返回共享的行缓冲区（测试和嵌入场景使用）
    pub fn memory() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let writer = Self {
            target: Mutex::new(Target::Memory(lines.clone())),
        };
        (writer, lines)
    }

    pub fn action_log_message(log: &ActionLog) -> String {
        let mut builder = String::with_capacity(256);
        builder.push_str(&log.start_time.to_rfc3339_opts(SecondsFormat::Millis, true));
        builder.push_str(LOG_SPLITTER);
        builder.push_str(log.result().as_str());
        builder.push_str(LOG_SPLITTER);
        builder.push_str(&format!("elapsed={}", log.elapsed.as_nanos()));
        builder.push_str(LOG_SPLITTER);
        builder.push_str(&format!("id={}", log.id));
        builder.push_str(LOG_SPLITTER);
        builder.push_str(&format!("action={}", log.action));

        if let Some(ref_id) = &log.ref_id {
            builder.push_str(LOG_SPLITTER);
            builder.push_str(&format!("refId={}", ref_id));
        }

        if let Some(error_type) = &log.error_type {
            builder.push_str(LOG_SPLITTER);
            builder.push_str(&format!(
                "errorMessage={}",
                filter_line_separator(log.error_message.as_deref())
            ));
            builder.push_str(LOG_SPLITTER);
            builder.push_str(&format!("errorType={}", error_type));
        }

        for (key, value) in &log.context {
            builder.push_str(LOG_SPLITTER);
            builder.push_str(&format!("{}={}", key, filter_line_separator(Some(value))));
        }

        for (operation, stat) in &log.performance_stats {
            builder.push_str(LOG_SPLITTER);
            builder.push_str(&format!("{}Count={}", operation, stat.count));
            builder.push_str(LOG_SPLITTER);
            builder.push_str(&format!("{}ElapsedTime={}", operation, stat.total_elapsed.as_nanos()));
        }

        builder
    }
}

impl ActionLogSink for ActionLogWriter {
    fn write(&self, log: &ActionLog) {
        let message = Self::action_log_message(log);
        let mut target = self.target.lock();
        match &mut *target {
            Target::Console => info!(target: ACTION_LOG_TARGET, "{}", message),
            Target::File(writer) => {
                let result = writeln!(writer, "{}", message).and_then(|_| writer.flush());
                if let Err(e) = result {
                    error!(log = %message, error = %e, "failed to write action log");
                }
            }
            Target::Memory(lines) => lines.lock().push(message),
        }
    }
}

/// 将换行替换为空格，保证一条记录只占一行
pub fn filter_line_separator(value: Option<&str>) -> String {
    match value {
        None => String::new(),
        Some(value) => value
            .chars()
            .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
            .collect(),
    }
}
