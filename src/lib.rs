// 会场人数统计 - 多摄像头定时采集与会话统计

// 声明模块
pub mod app;
pub mod capture;
pub mod detection;
pub mod event_bus;
pub mod logger;
pub mod models;
pub mod session;
pub mod settings;
pub mod storage;

use std::sync::Arc;

use event_bus::EventBus;
use session::SessionLifecycleManager;
use settings::SettingsManager;
use storage::DatabaseRepository;

/// 应用状态
///
/// - 会话引擎：节拍处理、手动开始/结束、调度配置
/// - 存储：摄像头、区域、会话数据
/// - 配置：持久化的应用配置
/// - 事件总线：用于模块间解耦通信
#[derive(Clone)]
pub struct AppState {
    /// 会话引擎
    pub engine: Arc<SessionLifecycleManager>,
    /// 数据库
    pub repo: Arc<dyn DatabaseRepository>,
    /// 配置管理
    pub settings: Arc<SettingsManager>,
    /// 事件总线
    pub event_bus: Arc<EventBus>,
}
