pub mod config;
pub mod core;
pub mod logging;

pub use config::{ComparisonMethod, ConfigError, LogConfig, Settings, SyncConfig, SyncOptions};
pub use core::{PassReport, SyncError, SyncLoop, TreeSynchronizer};
pub use logging::{LogEntry, LogError, LogLevel, LogPipeline, MemoryLogger, Operation, SyncLogger};
