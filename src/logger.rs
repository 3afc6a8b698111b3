// 日志初始化 - 同时输出到控制台和按天轮转的日志文件

use anyhow::{anyhow, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// 初始化日志系统
///
/// 返回的 guard 需要在整个程序生命周期内保持，drop 后文件日志停止写入
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    // 配置日志输出到文件（每天轮转）
    let file_appender = tracing_appender::rolling::daily(log_dir, "hall-counter.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let writer = std::io::stdout.and(non_blocking);

    // 使用本地时区
    let timer = LocalTime::new(time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(writer)
        .with_timer(timer)
        .with_ansi(cfg!(debug_assertions)) // release 版本不使用颜色代码
        .try_init()
        .map_err(|e| anyhow!("初始化日志失败: {}", e))?;

    eprintln!("日志文件位置: {:?}", log_dir);
    Ok(guard)
}
