use mirrorsync_lib::config::{ComparisonMethod, SyncOptions};
use mirrorsync_lib::core::TreeSynchronizer;
use mirrorsync_lib::logging::{LogPipeline, MemoryLogger, Operation, SyncLogger};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

struct Trees {
    dir: tempfile::TempDir,
}

impl Trees {
    fn new() -> Self {
        let trees = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(trees.source()).unwrap();
        trees
    }

    fn source(&self) -> PathBuf {
        self.dir.path().join("a")
    }

    fn target(&self) -> PathBuf {
        self.dir.path().join("mirror")
    }

    fn log_file(&self) -> PathBuf {
        self.dir.path().join("logs/sync.log")
    }

    fn config(&self, method: &str) -> mirrorsync_lib::SyncConfig {
        SyncOptions {
            source: Some(self.source()),
            target: Some(self.target()),
            log_file: Some(self.log_file()),
            method: Some(method.to_string()),
            retries: Some(2),
            retry_delay_ms: Some(0),
            concurrency: Some(4),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }
}

fn set_mtime(path: &Path, when: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(when)
        .unwrap();
}

#[tokio::test]
async fn scenario_new_file_and_empty_dir_are_added() {
    let trees = Trees::new();
    fs::write(trees.source().join("x.txt"), "hello").unwrap();
    fs::create_dir_all(trees.source().join("b")).unwrap();

    let logger = Arc::new(MemoryLogger::new());
    let sync = TreeSynchronizer::new(&trees.config("Binary"), logger.clone());
    sync.run_pass().await.unwrap();

    assert_eq!(fs::read_to_string(trees.target().join("x.txt")).unwrap(), "hello");
    assert!(trees.target().join("b").is_dir());
    assert_eq!(logger.count(Operation::Add), 2);
}

#[tokio::test]
async fn scenario_orphan_file_is_deleted() {
    let trees = Trees::new();
    fs::create_dir_all(trees.target()).unwrap();
    fs::write(trees.target().join("c.txt"), "stale").unwrap();

    let logger = Arc::new(MemoryLogger::new());
    let sync = TreeSynchronizer::new(&trees.config("Binary"), logger.clone());
    sync.run_pass().await.unwrap();

    assert!(!trees.target().join("c.txt").exists());
    assert_eq!(logger.count(Operation::Delete), 1);
}

#[tokio::test]
async fn scenario_rewritten_source_updates_target() {
    let trees = Trees::new();
    fs::create_dir_all(trees.target()).unwrap();
    fs::write(trees.source().join("x.txt"), "first").unwrap();
    fs::write(trees.target().join("x.txt"), "first").unwrap();
    let earlier = SystemTime::now() - Duration::from_secs(3600);
    set_mtime(&trees.source().join("x.txt"), earlier);
    set_mtime(&trees.target().join("x.txt"), earlier);

    let logger = Arc::new(MemoryLogger::new());
    let sync = TreeSynchronizer::new(&trees.config("SHA256"), logger.clone());

    let report = sync.run_pass().await.unwrap();
    assert_eq!(report.changes(), 0);

    fs::write(trees.source().join("x.txt"), "second version").unwrap();
    sync.run_pass().await.unwrap();

    assert_eq!(
        fs::read_to_string(trees.target().join("x.txt")).unwrap(),
        "second version"
    );
    assert_eq!(logger.count(Operation::Update), 1);
}

#[tokio::test]
async fn mirror_converges_for_every_method() {
    for method in ["None", "Binary", "md5", "sha256"] {
        let trees = Trees::new();
        let source = trees.source();
        fs::create_dir_all(source.join("docs/deep/er")).unwrap();
        fs::create_dir_all(source.join("empty")).unwrap();
        fs::write(source.join("root.txt"), "root").unwrap();
        fs::write(source.join("docs/a.md"), "alpha").unwrap();
        fs::write(source.join("docs/deep/er/z.bin"), vec![7u8; 4096]).unwrap();

        fs::create_dir_all(trees.target().join("gone/away")).unwrap();
        fs::write(trees.target().join("gone/away/old.txt"), "old").unwrap();

        let logger = Arc::new(MemoryLogger::new());
        let config = trees.config(method);
        assert_eq!(
            config.comparison_method,
            method.parse::<ComparisonMethod>().unwrap()
        );
        let sync = TreeSynchronizer::new(&config, logger.clone());

        let first = sync.run_pass().await.unwrap();
        assert_eq!(first.failures, 0, "method {}", method);
        assert_eq!(first.files_added, 3);
        assert_eq!(first.files_deleted, 1);
        assert_eq!(first.dirs_deleted, 2);

        assert_eq!(fs::read(trees.target().join("docs/deep/er/z.bin")).unwrap(), vec![7u8; 4096]);
        assert!(trees.target().join("empty").is_dir());
        assert!(!trees.target().join("gone").exists());

        let second = sync.run_pass().await.unwrap();
        assert_eq!(second.changes(), 0, "method {}", method);
    }
}

#[tokio::test]
async fn pipeline_log_file_has_one_line_per_event() {
    let trees = Trees::new();
    fs::write(trees.source().join("x.txt"), "hello").unwrap();
    let config = trees.config("Binary");

    let pipeline = Arc::new(LogPipeline::open(&config.log_file).await.unwrap());
    let logger: Arc<dyn SyncLogger> = pipeline.clone();
    let sync = TreeSynchronizer::new(&config, logger);

    sync.run_pass().await.unwrap();
    fs::remove_file(trees.source().join("x.txt")).unwrap();
    sync.run_pass().await.unwrap();
    pipeline.stop().await.unwrap();

    let content = fs::read_to_string(&config.log_file).unwrap();
    let lines: Vec<_> = content.lines().collect();

    // 目标目录创建时的 Warning、新增、删除
    assert_eq!(lines.len(), 3, "{}", content);
    assert!(lines[0].contains("[Warning] [Warning]"));
    assert!(lines[1].contains("[Info] [Add]"));
    assert!(lines[2].contains("[Info] [Delete]"));
    assert!(pipeline.is_stopped());
}
