//! 应用配置模块
//!
//! 命令行参数与可选的 JSON 配置文件先合并为 [`SyncOptions`]，
//! 再经 [`SyncOptions::validate`] 得到不可变的 [`SyncConfig`]。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 两次同步之间的最小间隔（毫秒）
pub const MIN_INTERVAL_MS: u64 = 1000;

/// 内容比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ComparisonMethod {
    /// 不比较内容，只依赖元数据
    None,
    /// 逐块比较字节
    #[default]
    Binary,
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA256")]
    Sha256,
}

impl fmt::Display for ComparisonMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonMethod::None => write!(f, "None"),
            ComparisonMethod::Binary => write!(f, "Binary"),
            ComparisonMethod::Md5 => write!(f, "MD5"),
            ComparisonMethod::Sha256 => write!(f, "SHA256"),
        }
    }
}

impl FromStr for ComparisonMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ComparisonMethod::None),
            "binary" => Ok(ComparisonMethod::Binary),
            "md5" => Ok(ComparisonMethod::Md5),
            "sha256" | "sha-256" => Ok(ComparisonMethod::Sha256),
            _ => Err(ConfigError::UnknownMethod(s.to_string())),
        }
    }
}

/// 配置错误，出现时同步核心不会被启动
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("缺少必填参数: {0}")]
    Missing(&'static str),

    #[error("同步间隔必须至少为 1000ms，当前为 {0}ms")]
    IntervalTooShort(u64),

    #[error("重试次数必须至少为 1")]
    NoAttempts,

    #[error("并发数必须至少为 1")]
    NoConcurrency,

    #[error("未知的比较方式: {0}（可选 MD5, SHA256, Binary, None）")]
    UnknownMethod(String),

    #[error("源目录与目标目录不能相同或互相包含: '{source_root}' / '{target_root}'")]
    OverlappingRoots {
        source_root: PathBuf,
        target_root: PathBuf,
    },

    #[error("日志文件 '{log_file}' 不能位于同步目录 '{root}' 之内")]
    LogInsideTree { log_file: PathBuf, root: PathBuf },

    #[error("无法解析路径 '{path}': {source}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("无法读取配置文件 '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件 '{path}' 格式错误: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 未经校验的同步选项（来自命令行或配置文件的 `sync` 段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    pub source: Option<PathBuf>,
    pub target: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub method: Option<String>,
    pub delay_ms: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub concurrency: Option<usize>,
}

fn default_delay_ms() -> u64 {
    10_000
}

fn default_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

/// 默认并发数：主机并行度的两倍，限制在 4-64 之间
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
        .clamp(4, 64)
}

impl SyncOptions {
    /// 用 `overrides` 中已设置的字段覆盖当前值
    pub fn merge(self, overrides: SyncOptions) -> SyncOptions {
        SyncOptions {
            source: overrides.source.or(self.source),
            target: overrides.target.or(self.target),
            log_file: overrides.log_file.or(self.log_file),
            method: overrides.method.or(self.method),
            delay_ms: overrides.delay_ms.or(self.delay_ms),
            retries: overrides.retries.or(self.retries),
            retry_delay_ms: overrides.retry_delay_ms.or(self.retry_delay_ms),
            concurrency: overrides.concurrency.or(self.concurrency),
        }
    }

    /// 校验并生成不可变的同步配置
    pub fn validate(self) -> Result<SyncConfig, ConfigError> {
        let source = non_empty(self.source).ok_or(ConfigError::Missing("source"))?;
        let target = non_empty(self.target).ok_or(ConfigError::Missing("target"))?;
        let log_file = non_empty(self.log_file).ok_or(ConfigError::Missing("log"))?;

        let comparison_method = match self.method {
            Some(m) => m.parse()?,
            None => ComparisonMethod::default(),
        };

        let delay_ms = self.delay_ms.unwrap_or_else(default_delay_ms);
        if delay_ms < MIN_INTERVAL_MS {
            return Err(ConfigError::IntervalTooShort(delay_ms));
        }

        let max_retry_attempts = self.retries.unwrap_or_else(default_retries);
        if max_retry_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }

        let max_concurrency = self.concurrency.unwrap_or_else(default_concurrency);
        if max_concurrency == 0 {
            return Err(ConfigError::NoConcurrency);
        }

        let source_root = normalize_root(&source)?;
        let target_root = normalize_root(&target)?;
        if source_root.starts_with(&target_root) || target_root.starts_with(&source_root) {
            return Err(ConfigError::OverlappingRoots {
                source_root,
                target_root,
            });
        }

        // 日志文件在源目录内会每轮被复制，在目标目录内会被清理阶段删除
        let log_file = normalize_root(&log_file)?;
        for root in [&source_root, &target_root] {
            if log_file.starts_with(root) {
                return Err(ConfigError::LogInsideTree {
                    log_file,
                    root: root.clone(),
                });
            }
        }

        Ok(SyncConfig {
            source_root,
            target_root,
            log_file,
            comparison_method,
            interval: Duration::from_millis(delay_ms),
            max_retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms.unwrap_or_else(default_retry_delay_ms)),
            max_concurrency,
        })
    }
}

fn non_empty(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().to_string_lossy().trim().is_empty())
}

/// 将路径转为绝对路径并折叠 `.` 与 `..`，不访问文件系统
pub fn normalize_root(path: &Path) -> Result<PathBuf, ConfigError> {
    let absolute = std::path::absolute(path).map_err(|source| ConfigError::InvalidPath {
        path: path.to_path_buf(),
        source,
    })?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// 已校验的同步配置，进程生命周期内不变
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub log_file: PathBuf,
    pub comparison_method: ComparisonMethod,
    pub interval: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    /// 文件阶段的最大并发任务数
    pub max_concurrency: usize,
}

/// 诊断日志配置（配置文件的 `log` 段）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用诊断输出
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// JSON 配置文件，`sync` 与 `log` 两段均可省略
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub sync: SyncOptions,
    pub log: LogConfig,
}

impl Settings {
    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let config: serde_json::Value = serde_json::from_str(content).map_err(parse_err)?;

        let sync = match config.get("sync") {
            Some(section) => serde_json::from_value(section.clone()).map_err(parse_err)?,
            None => SyncOptions::default(),
        };
        let log = match config.get("log") {
            Some(section) => serde_json::from_value(section.clone()).map_err(parse_err)?,
            None => LogConfig::default(),
        };

        Ok(Self { sync, log })
    }
}
