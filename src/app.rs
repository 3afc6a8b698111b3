//! 应用程序初始化和启动
//!
//! 负责完整的启动流程：
//! - 配置加载与数据目录解析
//! - 数据库、采集、检测组件初始化
//! - 会话引擎与调度器启动
//! - 调度配置变更的持久化

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::capture::{scheduler::CaptureScheduler, FfmpegCameraSource, LocalFrameStore};
use crate::detection::HttpPersonDetector;
use crate::event_bus::{AppEvent, EventBus};
use crate::session::{
    CaptureRoundExecutor, SessionLifecycleManager, StatsAggregator, TimingController,
};
use crate::settings::SettingsManager;
use crate::storage::{DatabaseConfig, DatabaseRepository, SqliteRepository};
use crate::AppState;

/// 数据目录环境变量
pub const DATA_DIR_ENV: &str = "HALL_COUNTER_DATA_DIR";

/// 解析数据目录：优先使用环境变量，否则按平台使用默认目录
pub fn resolve_data_dir() -> PathBuf {
    match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join("Library/Application Support/hall-counter")
    } else if cfg!(target_os = "windows") {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("hall-counter")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local/share/hall-counter")
    }
}

/// 相对路径按数据目录解析
fn resolve_path(data_dir: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

/// 初始化所有组件并组装应用状态
pub async fn build_state(data_dir: &Path) -> Result<AppState> {
    tokio::fs::create_dir_all(data_dir).await?;

    let settings = Arc::new(SettingsManager::new(data_dir.join("config.json")).await?);
    let config = settings.get().await;

    let repo: Arc<dyn DatabaseRepository> = match &config.database {
        DatabaseConfig::SQLite { .. } => {
            let db_path = config.database.resolve_db_path(data_dir);
            Arc::new(SqliteRepository::new(&db_path).await?)
        }
    };
    info!("数据库已就绪: {}", repo.db_type());

    let frames_dir = resolve_path(data_dir, &config.frames_dir);
    let frame_store = Arc::new(LocalFrameStore::new(frames_dir.clone()).await?);
    info!("图像保存目录: {}", frames_dir.display());

    let camera_source = Arc::new(FfmpegCameraSource::new(
        config.capture.ffmpeg_path.clone(),
        Duration::from_secs(config.capture.camera_timeout_secs),
    ));
    let detector = Arc::new(HttpPersonDetector::new(
        config.detector.endpoint.clone(),
        Duration::from_secs(config.detector.timeout_secs),
        config.detector.confidence_threshold,
    )?);

    let event_bus = Arc::new(EventBus::new(1000));
    let aggregator = Arc::new(StatsAggregator::new(repo.clone(), event_bus.clone()));

    // 单个摄像头的总超时 = 采集超时 + 检测超时
    let camera_timeout =
        Duration::from_secs(config.capture.camera_timeout_secs + config.detector.timeout_secs);
    let executor = Arc::new(CaptureRoundExecutor::new(
        repo.clone(),
        camera_source,
        frame_store,
        detector,
        aggregator.clone(),
        event_bus.clone(),
        camera_timeout,
    ));

    let timing = TimingController::from_settings(&config.scheduler);
    info!(
        "调度配置: 暂停={}, 定时开始={:?}, 间隔={}分钟",
        timing.is_paused(),
        timing.scheduled_start(),
        timing.interval_minutes()
    );

    let engine = Arc::new(SessionLifecycleManager::new(
        repo.clone(),
        executor,
        aggregator,
        event_bus.clone(),
        timing,
    ));

    Ok(AppState {
        engine,
        repo,
        settings,
        event_bus,
    })
}

/// 监听调度配置变更并写回配置文件
pub fn start_settings_persister(state: &AppState) -> tokio::task::JoinHandle<()> {
    let mut receiver = state.event_bus.subscribe();
    let engine = state.engine.clone();
    let settings = state.settings.clone();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(AppEvent::ConfigUpdated { config_type }) if config_type == "scheduler" => {
                    let scheduler = engine.scheduler_settings().await;
                    if let Err(e) = settings.update_scheduler(scheduler).await {
                        error!("保存调度配置失败: {}", e);
                    }
                }
                Ok(AppEvent::SessionFinalized {
                    session_id,
                    total_count,
                    ..
                }) => {
                    info!("会话 {} 统计完成，会场总人数 {:.2}", session_id, total_count);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("事件处理滞后，跳过 {} 条事件", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// 应用程序入口点
///
/// 启动调度器并运行，直到收到 Ctrl+C
pub async fn run(data_dir: &Path) -> Result<()> {
    info!("初始化会场人数统计服务，数据目录: {}", data_dir.display());

    let state = build_state(data_dir).await?;
    let persister = start_settings_persister(&state);

    let scheduler = CaptureScheduler::new(state.engine.clone())?.start();
    info!("所有后台任务已启动");

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，正在停止...");

    scheduler.abort();
    persister.abort();
    Ok(())
}
