// 事件总线 - 用于模块间解耦通信
//
// 实现发布/订阅模式,调度引擎只负责发布会话事件
// 使用 tokio::sync::broadcast 实现高效的事件分发

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// 应用事件枚举 - 定义所有可能的系统事件
#[derive(Debug, Clone)]
pub enum AppEvent {
    // --- 会话事件 ---

    /// 会话开始事件
    SessionStarted {
        session_id: i64,
        camera_count: usize,
        manual: bool,
    },

    /// 一轮采集完成事件
    RoundCompleted {
        session_id: i64,
        rounds_completed: i64,
        succeeded: usize,
        failed: usize,
    },

    /// 单个摄像头采集失败事件
    CameraCaptureFailed {
        session_id: i64,
        camera_id: i64,
        error: String,
    },

    /// 会话结束事件
    SessionFinalized {
        session_id: i64,
        total_count: f64,
        camera_count: usize,
        end_time: DateTime<Utc>,
    },

    // --- 调度事件 ---

    /// 调度暂停事件
    SchedulerPaused,

    /// 调度恢复事件
    SchedulerResumed {
        /// 是否由定时计划自动恢复
        scheduled: bool,
    },

    /// 配置更新事件
    ConfigUpdated {
        config_type: String,
    },
}

/// 事件总线 - 用于模块间解耦通信
///
/// 使用 broadcast channel 实现发布/订阅模式
/// 支持多个订阅者同时接收事件
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    ///
    /// # 参数
    /// - `capacity`: 事件缓冲区大小,建议 100-1000
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件
    ///
    /// 如果没有订阅者,事件会被丢弃(这是正常的)
    pub fn publish(&self, event: AppEvent) {
        match self.sender.send(event) {
            Ok(receiver_count) => {
                tracing::trace!("事件已发布，订阅者数量: {}", receiver_count);
            }
            Err(_) => {
                tracing::trace!("事件已发布但无订阅者");
            }
        }
    }

    /// 订阅事件
    ///
    /// 返回一个接收器,可以用 `.recv().await` 接收事件
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// 获取当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
