//! 异步日志管道：多生产者、单写入者
//!
//! 生产者通过 [`LogPipeline::log`] 入队后立即返回，唯一的写入任务按入队顺序逐行写入并在每行后 flush。
//! [`LogPipeline::stop`] 关闭队列、等待已入队的日志全部落盘，然后释放写入端。

use super::{LogEntry, LogError, SyncLogger};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub struct LogPipeline {
    /// 停止后为 None；入队在锁内完成，保证全局 FIFO
    sender: Mutex<Option<mpsc::UnboundedSender<LogEntry>>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LogPipeline {
    /// 以追加模式打开日志文件（自动创建文件及父目录）并启动写入任务
    pub async fn open(path: &Path) -> Result<Self, LogError> {
        let open_err = |source| LogError::Open {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(open_err)?;

        debug!("同步日志文件: {:?}", path);
        Ok(Self::spawn(file))
    }

    /// 使用任意异步写入端启动管道
    pub fn spawn<W>(sink: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_entries(rx, sink));

        Self {
            sender: Mutex::new(Some(tx)),
            writer: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    /// 停止管道并等待所有已入队日志写完
    ///
    /// 重复调用是安全的；并发调用者都会等到写入任务结束。
    pub async fn stop(&self) -> Result<(), LogError> {
        // 丢弃发送端即关闭通道，写入任务读完剩余日志后退出
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let mut writer = self.writer.lock().await;
        if let Some(handle) = writer.take() {
            handle
                .await
                .map_err(|e| LogError::WriterPanicked(e.to_string()))?;
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl SyncLogger for LogPipeline {
    fn log(&self, entry: LogEntry) -> Result<(), LogError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(entry).map_err(|_| LogError::Stopped),
            None => Err(LogError::Stopped),
        }
    }
}

async fn write_entries<W>(mut rx: mpsc::UnboundedReceiver<LogEntry>, mut sink: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(entry) = rx.recv().await {
        let line = format!("{}\n", entry);
        let result = async {
            sink.write_all(line.as_bytes()).await?;
            sink.flush().await
        }
        .await;

        // 写入失败不影响后续日志，也不会阻塞生产者
        if let Err(e) = result {
            error!("写入同步日志失败: {} ({})", e, entry.message());
        }
    }

    if let Err(e) = sink.shutdown().await {
        error!("关闭同步日志文件失败: {}", e);
    }
    debug!("同步日志写入任务已退出");
}
