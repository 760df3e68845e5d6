//! 周期同步循环
//!
//! 每轮结束后等待固定间隔再开始下一轮，同一时间只有一轮在执行。
//! 取消只在两轮之间生效，正在执行的一轮总会完整结束。

use crate::core::engine::{PassReport, TreeSynchronizer};
use crate::logging::SyncLogger;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct SyncLoop {
    synchronizer: TreeSynchronizer,
    interval: Duration,
    cancel: CancellationToken,
}

impl SyncLoop {
    pub fn new(synchronizer: TreeSynchronizer, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            synchronizer,
            interval,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 运行直到取消，返回已完成的轮数
    pub async fn run(&self) -> u64 {
        let logger = self.synchronizer.logger().clone();
        let mapper = self.synchronizer.mapper();
        logger.sync_start(format!(
            "开始同步: '{}' -> '{}'，间隔 {}ms",
            mapper.source_root().display(),
            mapper.target_root().display(),
            self.interval.as_millis()
        ));

        let mut passes = 0u64;
        while !self.cancel.is_cancelled() {
            self.run_guarded(logger.as_ref()).await;
            passes += 1;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        logger.info("同步已取消".to_string());
        logger.sync_end(format!("同步结束，共执行 {} 轮", passes));
        passes
    }

    /// 只执行一轮
    pub async fn run_once(&self) -> Option<PassReport> {
        let logger = self.synchronizer.logger().clone();
        logger.sync_start("开始单次同步".to_string());
        let report = self.run_guarded(logger.as_ref()).await;
        logger.sync_end("单次同步结束".to_string());
        report
    }

    /// 执行一轮，任何失败（包括 panic）都只记录日志，不会终止循环
    async fn run_guarded(&self, logger: &dyn SyncLogger) -> Option<PassReport> {
        match AssertUnwindSafe(self.synchronizer.run_pass())
            .catch_unwind()
            .await
        {
            Ok(Ok(report)) => {
                debug!("本轮变更 {} 项", report.changes());
                Some(report)
            }
            Ok(Err(e)) => {
                logger.error(format!("本轮同步失败: {}", e));
                None
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "未知错误".to_string());
                error!("同步过程中发生 panic: {}", message);
                logger.error(format!("本轮同步异常终止: {}", message));
                None
            }
        }
    }
}
