use anyhow::Context;
use clap::Parser;
use mirrorsync_lib::config::{LogConfig, Settings, SyncOptions};
use mirrorsync_lib::core::{SyncLoop, TreeSynchronizer};
use mirrorsync_lib::logging::{LogPipeline, SyncLogger};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// 单向目录镜像：周期性地把源目录同步到目标目录
#[derive(Debug, Parser)]
#[command(name = "mirrorsync", version, about)]
struct Cli {
    /// 源目录
    #[arg(short, long, value_name = "DIR")]
    source: Option<PathBuf>,

    /// 目标目录
    #[arg(short, long, value_name = "DIR")]
    target: Option<PathBuf>,

    /// 同步日志文件
    #[arg(short, long = "log", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// 内容比较方式: MD5, SHA256, Binary, None
    #[arg(short, long, value_name = "METHOD")]
    method: Option<String>,

    /// 两轮同步之间的间隔（毫秒，至少 1000）
    #[arg(short, long, value_name = "MS")]
    delay: Option<u64>,

    /// 每个操作的最大尝试次数
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// 两次尝试之间的等待时间（毫秒）
    #[arg(long, value_name = "MS")]
    retry_delay: Option<u64>,

    /// 文件阶段的最大并发数
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// JSON 配置文件，命令行参数优先
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 只执行一轮同步后退出
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            source: self.source.clone(),
            target: self.target.clone(),
            log_file: self.log_file.clone(),
            method: self.method.clone(),
            delay_ms: self.delay,
            retries: self.retries,
            retry_delay_ms: self.retry_delay,
            concurrency: self.concurrency,
        }
    }
}

/// 初始化诊断日志（输出到 stderr，不影响同步日志文件）
fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        return None;
    }

    let env_filter = EnvFilter::builder()
        .with_default_directive(config.tracing_level().into())
        .from_env_lossy();

    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();

    match result {
        Ok(()) => Some(guard),
        Err(_) => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => match Settings::load(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("配置错误: {}", e);
                return ExitCode::from(2);
            }
        },
        None => Settings::default(),
    };

    let _guard = init_logging(&settings.log);

    let config = match settings.sync.merge(cli.sync_options()).validate() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("配置错误: {}", e);
            return ExitCode::from(2);
        }
    };

    match run(config, cli.once).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: mirrorsync_lib::SyncConfig, once: bool) -> anyhow::Result<()> {
    let pipeline = Arc::new(
        LogPipeline::open(&config.log_file)
            .await
            .with_context(|| format!("无法启动同步日志: {:?}", config.log_file))?,
    );
    let logger: Arc<dyn SyncLogger> = pipeline.clone();

    tracing::info!(
        "源目录: {:?}, 目标目录: {:?}, 比较方式: {}, 间隔: {}ms, 并发: {}",
        config.source_root,
        config.target_root,
        config.comparison_method,
        config.interval.as_millis(),
        config.max_concurrency
    );

    let cancel = CancellationToken::new();
    let sync_loop = SyncLoop::new(
        TreeSynchronizer::new(&config, logger),
        config.interval,
        cancel.clone(),
    );

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到中断信号，当前轮结束后退出");
            signal_cancel.cancel();
        }
    });

    if once {
        sync_loop.run_once().await;
    } else {
        let passes = sync_loop.run().await;
        tracing::info!("同步循环结束，共 {} 轮", passes);
    }

    pipeline.stop().await.context("同步日志未能完整写入")?;
    Ok(())
}
