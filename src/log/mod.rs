//! action log 模块
//!
//! 每个工作单元（一批消息的处理）生成一条 [`ActionLog`]，
//! 包含上下文和子操作耗时统计，通过 [`ActionLogSink`] 输出。

pub mod action_log;
pub mod writer;

pub use action_log::{ActionLog, LogResult, PerformanceStat};
pub use writer::{ACTION_LOG_TARGET, ActionLogSink, ActionLogWriter, filter_line_separator};
