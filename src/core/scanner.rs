use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// 每轮同步时从文件系统重新读取的条目，不跨轮缓存
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub kind: EntryKind,
}

/// 一次扫描的结果
#[derive(Debug, Default)]
pub struct TreeScan {
    /// 先父后子（先序遍历）
    pub directories: Vec<TreeEntry>,
    pub files: Vec<TreeEntry>,
    /// 无法读取的单个条目，不影响其余条目
    pub errors: Vec<walkdir::Error>,
}

/// 扫描任务异常终止
#[derive(Debug, thiserror::Error)]
#[error("扫描 '{root}' 的任务异常终止: {message}")]
pub struct ScanError {
    pub root: PathBuf,
    pub message: String,
}

/// 文件扫描器
pub struct FileScanner;

impl FileScanner {
    /// 递归扫描根目录（不含根目录本身），在阻塞线程池中执行
    pub async fn scan(root: &Path) -> Result<TreeScan, ScanError> {
        let root = root.to_path_buf();
        let task_root = root.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || Self::scan_blocking(&task_root))
            .await
            .map_err(|e| ScanError {
                root,
                message: e.to_string(),
            })
    }

    pub fn scan_blocking(root: &Path) -> TreeScan {
        let mut scan = TreeScan::default();

        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    scan.errors.push(e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                debug!("跳过非常规文件: {:?}", entry.path());
                continue;
            };

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    scan.errors.push(e);
                    continue;
                }
            };

            let tree_entry = TreeEntry {
                path: entry.into_path(),
                size: if kind == EntryKind::File { metadata.len() } else { 0 },
                modified: metadata.modified().ok(),
                kind,
            };

            match kind {
                EntryKind::Directory => scan.directories.push(tree_entry),
                EntryKind::File => scan.files.push(tree_entry),
            }
        }

        debug!(
            "扫描完成: {:?}, {} 个目录, {} 个文件, {} 个错误",
            root,
            scan.directories.len(),
            scan.files.len(),
            scan.errors.len()
        );

        scan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_scan_separates_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("top.txt"), "12345").unwrap();
        fs::write(root.join("a/b/inner.txt"), "x").unwrap();

        let scan = FileScanner::scan(root).await.unwrap();

        assert_eq!(scan.directories.len(), 3);
        assert_eq!(scan.files.len(), 2);
        assert!(scan.errors.is_empty());

        let top = scan
            .files
            .iter()
            .find(|f| f.path.ends_with("top.txt"))
            .unwrap();
        assert_eq!(top.size, 5);
        assert_eq!(top.kind, EntryKind::File);
        assert!(top.modified.is_some());
    }

    #[test]
    fn test_parents_listed_before_children() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x/y/z")).unwrap();

        let scan = FileScanner::scan_blocking(dir.path());
        let depths: Vec<_> = scan
            .directories
            .iter()
            .map(|d| d.path.components().count())
            .collect();

        let mut sorted = depths.clone();
        sorted.sort();
        assert_eq!(depths, sorted);
    }

    #[test]
    fn test_root_itself_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let scan = FileScanner::scan_blocking(dir.path());
        assert!(scan.directories.is_empty());
        assert!(scan.files.is_empty());
    }
}
