//! 同步引擎 - 单轮单向镜像
//!
//! 每轮严格按顺序执行：校验源目录 → 准备目标目录 → 目录阶段 → 文件阶段（并发）→ 清理阶段。
//! 清理阶段只在文件阶段全部完成后开始，避免删除正在创建的条目。

use crate::config::SyncConfig;
use crate::core::comparator::{comparator_for, ContentComparator};
use crate::core::path_map::PathMapper;
use crate::core::retry::{RetryExecutor, RetryOutcome};
use crate::core::scanner::{FileScanner, ScanError, TreeEntry};
use crate::logging::SyncLogger;
use futures::future::join_all;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// 一轮同步中无法局限到单个条目的错误
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("无法创建目标目录 '{path}': {source}")]
    ProvisionTarget {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// 单轮同步报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// 源目录不存在，本轮未做任何修改
    pub source_missing: bool,
    pub dirs_created: u64,
    pub files_added: u64,
    pub files_updated: u64,
    pub files_unchanged: u64,
    pub files_deleted: u64,
    pub dirs_deleted: u64,
    pub failures: u64,
}

impl PassReport {
    /// 本轮产生的 Add/Update/Delete 数量
    pub fn changes(&self) -> u64 {
        self.dirs_created + self.files_added + self.files_updated + self.files_deleted + self.dirs_deleted
    }
}

/// 并发文件任务共享的统计
#[derive(Debug, Default)]
struct PassStats {
    dirs_created: AtomicU64,
    files_added: AtomicU64,
    files_updated: AtomicU64,
    files_unchanged: AtomicU64,
    files_deleted: AtomicU64,
    dirs_deleted: AtomicU64,
    failures: AtomicU64,
}

impl PassStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self) -> PassReport {
        PassReport {
            source_missing: false,
            dirs_created: self.dirs_created.load(Ordering::Relaxed),
            files_added: self.files_added.load(Ordering::Relaxed),
            files_updated: self.files_updated.load(Ordering::Relaxed),
            files_unchanged: self.files_unchanged.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            dirs_deleted: self.dirs_deleted.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// 需要复制时目标的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyKind {
    /// 目标文件不存在
    Add,
    /// 目标文件存在但已过期
    Update,
}

/// 同步引擎
#[derive(Clone)]
pub struct TreeSynchronizer {
    mapper: PathMapper,
    comparator: Arc<dyn ContentComparator>,
    retry: RetryExecutor,
    logger: Arc<dyn SyncLogger>,
    max_concurrency: usize,
}

impl TreeSynchronizer {
    pub fn new(config: &SyncConfig, logger: Arc<dyn SyncLogger>) -> Self {
        Self::with_comparator(config, comparator_for(config.comparison_method), logger)
    }

    pub fn with_comparator(
        config: &SyncConfig,
        comparator: Arc<dyn ContentComparator>,
        logger: Arc<dyn SyncLogger>,
    ) -> Self {
        Self {
            mapper: PathMapper::new(&config.source_root, &config.target_root),
            comparator,
            retry: RetryExecutor::new(config.max_retry_attempts, config.retry_delay, logger.clone()),
            logger,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub fn logger(&self) -> &Arc<dyn SyncLogger> {
        &self.logger
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    /// 执行一轮完整同步
    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        let source_root = self.mapper.source_root();
        let target_root = self.mapper.target_root();

        if !is_dir(source_root).await {
            self.logger
                .error(format!("源目录 '{}' 不存在", source_root.display()));
            return Ok(PassReport {
                source_missing: true,
                ..Default::default()
            });
        }

        if !is_dir(target_root).await {
            self.logger.warning(format!(
                "目标目录 '{}' 不存在，正在创建...",
                target_root.display()
            ));
            fs::create_dir_all(target_root)
                .await
                .map_err(|source| SyncError::ProvisionTarget {
                    path: target_root.to_path_buf(),
                    source,
                })?;
        }

        let stats = Arc::new(PassStats::default());

        let source_scan = FileScanner::scan(source_root).await?;
        self.report_scan_errors(&source_scan.errors, &stats);

        self.sync_directories(&source_scan.directories, &stats).await;
        self.sync_files(source_scan.files, &stats).await;

        // 文件阶段完成后重新扫描目标，再清理孤立条目
        let target_scan = FileScanner::scan(target_root).await?;
        self.report_scan_errors(&target_scan.errors, &stats);

        self.prune_files(&target_scan.files, &stats).await;
        self.prune_directories(target_scan.directories, &stats).await;

        let report = stats.report();
        info!(
            "本轮同步完成: 新建目录 {}, 新增 {}, 更新 {}, 未变 {}, 删除文件 {}, 删除目录 {}, 失败 {}",
            report.dirs_created,
            report.files_added,
            report.files_updated,
            report.files_unchanged,
            report.files_deleted,
            report.dirs_deleted,
            report.failures
        );
        Ok(report)
    }

    fn report_scan_errors(&self, errors: &[walkdir::Error], stats: &PassStats) {
        for e in errors {
            let path = e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            self.logger.error(format!("无法读取 '{}': {}", path, e));
            PassStats::bump(&stats.failures);
        }
    }

    /// 目录阶段：为每个源目录创建对应的目标目录（先父后子）
    async fn sync_directories(&self, directories: &[TreeEntry], stats: &PassStats) {
        for dir in directories {
            let target_dir = match self.mapper.to_target(&dir.path) {
                Ok(p) => p,
                Err(e) => {
                    self.logger.error(e.to_string());
                    PassStats::bump(&stats.failures);
                    continue;
                }
            };

            if is_dir(&target_dir).await {
                continue;
            }

            match fs::create_dir_all(&target_dir).await {
                Ok(()) => {
                    self.logger.add(format!(
                        "目录已创建: '{}' (源目录: '{}')",
                        target_dir.display(),
                        dir.path.display()
                    ));
                    PassStats::bump(&stats.dirs_created);
                }
                Err(e) => {
                    self.logger.error(format!(
                        "创建目录 '{}' 失败: {}",
                        target_dir.display(),
                        e
                    ));
                    PassStats::bump(&stats.failures);
                }
            }
        }
    }

    /// 文件阶段：每个文件一个任务，信号量限制并发，全部完成后返回
    async fn sync_files(&self, files: Vec<TreeEntry>, stats: &Arc<PassStats>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(files.len());

        for file in files {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let sync = self.clone();
            let stats = stats.clone();

            let path = file.path.clone();
            let handle = tokio::spawn(async move {
                sync.process_file(&file, &stats).await;
                drop(permit);
            });
            handles.push((path, handle));
        }

        let (paths, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (path, result) in paths.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                self.logger.error(format!(
                    "同步文件 '{}' 的任务异常终止: {}",
                    path.display(),
                    e
                ));
                PassStats::bump(&stats.failures);
            }
        }
    }

    async fn process_file(&self, source: &TreeEntry, stats: &PassStats) {
        let target = match self.mapper.to_target(&source.path) {
            Ok(p) => p,
            Err(e) => {
                self.logger.error(e.to_string());
                PassStats::bump(&stats.failures);
                return;
            }
        };

        let what = format!("比较 '{}'", source.path.display());
        let decision = self
            .retry
            .run(&what, || self.should_copy(source, &target))
            .await;

        let kind = match decision {
            Ok(RetryOutcome::Completed(Some(kind))) => kind,
            Ok(RetryOutcome::Completed(None)) => {
                PassStats::bump(&stats.files_unchanged);
                return;
            }
            Ok(RetryOutcome::Exhausted {
                attempts,
                last_error,
            }) => {
                self.logger.error(format!(
                    "比较文件 '{}' 失败（已尝试 {} 次）: {}",
                    source.path.display(),
                    attempts,
                    last_error
                ));
                PassStats::bump(&stats.failures);
                return;
            }
            Err(e) => {
                self.logger.error(format!(
                    "同步文件 '{}' 出错: {}",
                    source.path.display(),
                    e
                ));
                PassStats::bump(&stats.failures);
                return;
            }
        };

        let what = format!("复制 '{}'", source.path.display());
        let copied = self
            .retry
            .run(&what, || copy_file(&source.path, &target))
            .await;

        match copied {
            Ok(RetryOutcome::Completed(bytes)) => {
                debug!("复制完成: {:?} -> {:?} ({}字节)", source.path, target, bytes);
                match kind {
                    CopyKind::Add => {
                        self.logger.add(format!(
                            "文件已添加: '{}' -> '{}'",
                            source.path.display(),
                            target.display()
                        ));
                        PassStats::bump(&stats.files_added);
                    }
                    CopyKind::Update => {
                        self.logger.update(format!(
                            "文件已更新: '{}' -> '{}'",
                            source.path.display(),
                            target.display()
                        ));
                        PassStats::bump(&stats.files_updated);
                    }
                }
            }
            Ok(RetryOutcome::Exhausted {
                attempts,
                last_error,
            }) => {
                self.logger.error(format!(
                    "复制文件 '{}' 失败（已尝试 {} 次）: {}",
                    source.path.display(),
                    attempts,
                    last_error
                ));
                PassStats::bump(&stats.failures);
            }
            Err(e) => {
                self.logger.error(format!(
                    "复制文件 '{}' 出错: {}",
                    source.path.display(),
                    e
                ));
                PassStats::bump(&stats.failures);
            }
        }
    }

    /// 按开销从低到高判断是否需要复制：目标缺失 → 源更新 → 大小不同 → 内容不同
    async fn should_copy(&self, source: &TreeEntry, target: &Path) -> io::Result<Option<CopyKind>> {
        let target_meta = match fs::metadata(target).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Some(CopyKind::Add)),
            Err(e) => return Err(e),
        };

        let target_modified = target_meta.modified().ok();
        if let (Some(src), Some(dst)) = (source.modified, target_modified) {
            if src > dst {
                return Ok(Some(CopyKind::Update));
            }
        }

        if source.size != target_meta.len() {
            return Ok(Some(CopyKind::Update));
        }

        if !self.comparator.same_content(&source.path, target).await? {
            return Ok(Some(CopyKind::Update));
        }

        Ok(None)
    }

    /// 删除源中已不存在的目标文件
    async fn prune_files(&self, files: &[TreeEntry], stats: &PassStats) {
        for file in files {
            let source = match self.mapper.to_source(&file.path) {
                Ok(p) => p,
                Err(e) => {
                    self.logger.error(e.to_string());
                    PassStats::bump(&stats.failures);
                    continue;
                }
            };

            match fs::metadata(&source).await {
                Ok(m) if m.is_file() => continue,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.logger.error(format!(
                        "无法检查源文件 '{}': {}",
                        source.display(),
                        e
                    ));
                    PassStats::bump(&stats.failures);
                    continue;
                }
            }

            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    self.logger.delete(format!(
                        "文件已删除: '{}' (源文件 '{}' 不存在)",
                        file.path.display(),
                        source.display()
                    ));
                    PassStats::bump(&stats.files_deleted);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.logger.error(format!(
                        "删除文件 '{}' 失败: {}",
                        file.path.display(),
                        e
                    ));
                    PassStats::bump(&stats.failures);
                }
            }
        }
    }

    /// 删除源中已不存在的目标目录，最深的先处理
    async fn prune_directories(&self, mut directories: Vec<TreeEntry>, stats: &PassStats) {
        directories.sort_by_key(|d| std::cmp::Reverse(d.path.components().count()));

        for dir in directories {
            let source = match self.mapper.to_source(&dir.path) {
                Ok(p) => p,
                Err(e) => {
                    self.logger.error(e.to_string());
                    PassStats::bump(&stats.failures);
                    continue;
                }
            };

            match fs::metadata(&source).await {
                Ok(m) if m.is_dir() => continue,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    // 无法确认源目录状态时保留目标目录
                    self.logger.error(format!(
                        "无法检查源目录 '{}': {}",
                        source.display(),
                        e
                    ));
                    PassStats::bump(&stats.failures);
                    continue;
                }
            }

            match fs::remove_dir_all(&dir.path).await {
                Ok(()) => {
                    self.logger.delete(format!(
                        "目录已删除: '{}' (源目录 '{}' 不存在)",
                        dir.path.display(),
                        source.display()
                    ));
                    PassStats::bump(&stats.dirs_deleted);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.logger.error(format!(
                        "删除目录 '{}' 失败: {}",
                        dir.path.display(),
                        e
                    ));
                    PassStats::bump(&stats.failures);
                }
            }
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// 临时文件序号，进程内唯一
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 临时文件名：与目标同目录，保证 rename 在同一文件系统内；
/// 每次调用带不同序号，不会与其他复制任务或同名源文件冲突
fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(
        ".{}.{}-{}.mirrorsync.tmp",
        name,
        std::process::id(),
        seq
    ))
}

/// 覆盖复制：先写入临时文件再原子重命名，失败时目标保持原样
async fn copy_file(source: &Path, target: &Path) -> io::Result<u64> {
    let temp_path = temp_path_for(target);

    let bytes = match fs::copy(source, &temp_path).await {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&temp_path, target).await {
        warn!("重命名临时文件失败: {:?} -> {:?}: {}", temp_path, target, e);
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(bytes)
}
