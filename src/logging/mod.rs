//! 同步日志模块 - 日志条目、日志接口与异步写入管道

pub mod pipeline;

use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

pub use pipeline::LogPipeline;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "Info"),
            LogLevel::Warning => write!(f, "Warning"),
            LogLevel::Error => write!(f, "Error"),
            LogLevel::Debug => write!(f, "Debug"),
        }
    }
}

/// 日志对应的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Update,
    Delete,
    SyncStart,
    SyncEnd,
    Info,
    Warning,
    Error,
    Debug,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Add => "Add",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
            Operation::SyncStart => "SyncStart",
            Operation::SyncEnd => "SyncEnd",
            Operation::Info => "Info",
            Operation::Warning => "Warning",
            Operation::Error => "Error",
            Operation::Debug => "Debug",
        };
        f.write_str(name)
    }
}

/// 一条同步日志，创建后不可变
#[derive(Debug, Clone)]
pub struct LogEntry {
    timestamp: DateTime<Local>,
    level: LogLevel,
    operation: Operation,
    message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, operation: Operation, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            operation,
            message: message.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 写入日志文件的单行格式：`yyyy-MM-dd HH:mm:ss [Level] [Operation] Message`
impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.operation,
            self.message
        )
    }
}

/// 日志管道错误
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("日志管道已停止")]
    Stopped,

    #[error("无法打开日志文件 '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("日志写入任务异常退出: {0}")]
    WriterPanicked(String),
}

/// 同步核心使用的日志接口
///
/// 便捷方法在日志被拒绝时（例如管道已停止）只通过 tracing 报告，不会向调用方传播。
pub trait SyncLogger: Send + Sync {
    fn log(&self, entry: LogEntry) -> Result<(), LogError>;

    fn record(&self, level: LogLevel, operation: Operation, message: String) {
        if let Err(e) = self.log(LogEntry::new(level, operation, message)) {
            tracing::warn!("同步日志被丢弃 ({}): {}", e, operation);
        }
    }

    fn add(&self, message: String) {
        self.record(LogLevel::Info, Operation::Add, message);
    }

    fn update(&self, message: String) {
        self.record(LogLevel::Info, Operation::Update, message);
    }

    fn delete(&self, message: String) {
        self.record(LogLevel::Info, Operation::Delete, message);
    }

    fn sync_start(&self, message: String) {
        self.record(LogLevel::Info, Operation::SyncStart, message);
    }

    fn sync_end(&self, message: String) {
        self.record(LogLevel::Info, Operation::SyncEnd, message);
    }

    fn info(&self, message: String) {
        self.record(LogLevel::Info, Operation::Info, message);
    }

    fn warning(&self, message: String) {
        self.record(LogLevel::Warning, Operation::Warning, message);
    }

    fn error(&self, message: String) {
        self.record(LogLevel::Error, Operation::Error, message);
    }

    fn debug(&self, message: String) {
        self.record(LogLevel::Debug, Operation::Debug, message);
    }
}

/// 内存日志，保存全部条目，供嵌入方与测试检查同步结果
#[derive(Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 指定操作类型的条目数量
    pub fn count(&self, operation: Operation) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.operation == operation)
            .count()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SyncLogger for MemoryLogger {
    fn log(&self, entry: LogEntry) -> Result<(), LogError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}
