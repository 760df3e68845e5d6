//! 带上限的重试执行器
//!
//! 只有明确列出的瞬时错误才会重试，其余错误立即返回给调用方。

use crate::logging::SyncLogger;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    /// 文件被占用、锁冲突等，稍后重试可能成功
    Transient,
    /// 权限、路径不存在等，重试无意义
    Fatal,
}

// EBUSY, ETXTBSY
#[cfg(unix)]
const TRANSIENT_OS_CODES: &[i32] = &[16, 26];
// ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
#[cfg(windows)]
const TRANSIENT_OS_CODES: &[i32] = &[32, 33];
#[cfg(not(any(unix, windows)))]
const TRANSIENT_OS_CODES: &[i32] = &[];

/// 判断 I/O 错误是否值得重试
pub fn classify(err: &io::Error) -> Transience {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
            Transience::Transient
        }
        _ => match err.raw_os_error() {
            Some(code) if TRANSIENT_OS_CODES.contains(&code) => Transience::Transient,
            _ => Transience::Fatal,
        },
    }
}

/// 重试结果
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Completed(T),
    /// 所有尝试都因瞬时错误失败
    Exhausted { attempts: u32, last_error: io::Error },
}

/// 固定间隔的重试执行器
///
/// 每次失败且还会再试时记录一条 Warning；用尽次数时返回 [`RetryOutcome::Exhausted`]，
/// 由调用方记录 Error 并跳过该条目。
#[derive(Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    delay: Duration,
    logger: Arc<dyn SyncLogger>,
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, delay: Duration, logger: Arc<dyn SyncLogger>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            logger,
        }
    }

    /// 执行操作；不可重试的错误通过 `Err` 立即返回
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> io::Result<RetryOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match op().await {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(e) => e,
            };

            if classify(&err) == Transience::Fatal {
                return Err(err);
            }

            if attempt >= self.max_attempts {
                debug!("{} 已尝试 {} 次，放弃: {}", what, attempt, err);
                return Ok(RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_error: err,
                });
            }

            self.logger.warning(format!(
                "{} 第 {}/{} 次尝试失败: {}，{}ms 后重试",
                what,
                attempt,
                self.max_attempts,
                err,
                self.delay.as_millis()
            ));
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MemoryLogger, Operation};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max_attempts: u32) -> (RetryExecutor, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::new());
        (
            RetryExecutor::new(max_attempts, Duration::ZERO, logger.clone()),
            logger,
        )
    }

    fn busy() -> io::Error {
        io::Error::new(io::ErrorKind::WouldBlock, "file is locked")
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(&busy()), Transience::Transient);
        assert_eq!(
            classify(&io::Error::from(io::ErrorKind::TimedOut)),
            Transience::Transient
        );
        assert_eq!(
            classify(&io::Error::from(io::ErrorKind::NotFound)),
            Transience::Fatal
        );
        assert_eq!(
            classify(&io::Error::from(io::ErrorKind::PermissionDenied)),
            Transience::Fatal
        );
        for &code in TRANSIENT_OS_CODES {
            assert_eq!(
                classify(&io::Error::from_raw_os_error(code)),
                Transience::Transient
            );
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let (retry, logger) = executor(5);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let outcome = retry
            .run("copy a.txt", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(busy())
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert!(matches!(outcome, RetryOutcome::Completed(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(logger.count(Operation::Warning), 3);
        assert_eq!(logger.count(Operation::Error), 0);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let (retry, logger) = executor(3);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let outcome = retry
            .run("copy a.txt", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(busy())
            })
            .await
            .unwrap();

        match outcome {
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.kind(), io::ErrorKind::WouldBlock);
            }
            RetryOutcome::Completed(_) => panic!("expected exhaustion"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(logger.count(Operation::Warning), 2);
        // Error 由调用方记录
        assert_eq!(logger.count(Operation::Error), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let (retry, logger) = executor(5);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = retry
            .run("copy a.txt", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(io::Error::from(io::ErrorKind::PermissionDenied))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(logger.entries().is_empty());
    }

    #[tokio::test]
    async fn test_single_attempt_never_warns() {
        let (retry, logger) = executor(1);

        let outcome = retry
            .run("compare", || async { Err::<(), _>(busy()) })
            .await
            .unwrap();

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(logger.count(Operation::Warning), 0);
    }
}
