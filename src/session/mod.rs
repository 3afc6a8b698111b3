// 会话调度引擎 - 决定每个节拍开始、继续或结束测量会话

pub mod history;
pub mod lifecycle;
pub mod round;
pub mod stats;
pub mod timing;

#[cfg(test)]
pub(crate) mod testing;

use serde::Serialize;
use thiserror::Error;

pub use history::{CameraLiveCount, LiveCount, SessionSummary};
pub use lifecycle::{SchedulerStatus, SessionLifecycleManager};
pub use round::{CameraFailure, CaptureRoundExecutor, RoundOutcome};
pub use stats::{aggregate, StatsAggregator};
pub use timing::TimingController;

/// 每个会话中每个摄像头需要完成的轮数
pub const ROUNDS_PER_SESSION: i64 = 5;

/// 已完成轮数 = 结果总数 ÷ 摄像头数（整除）
pub fn rounds_completed(total_results: i64, camera_count: usize) -> i64 {
    if camera_count == 0 {
        return 0;
    }
    total_results / camera_count as i64
}

/// 返回给调用方的会话错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("已有进行中的会话")]
    SessionAlreadyActive,

    #[error("没有启用的摄像头")]
    NoCamerasAvailable,

    #[error("无效的定时计划: {0}（格式应为 HH:MM）")]
    InvalidSchedule(String),

    #[error("数据持久化失败: {0}")]
    Persistence(#[from] anyhow::Error),
}

/// 单个节拍的处理结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// 暂停中，未处理
    Gated,
    /// 没有启用的摄像头，未开始会话
    NoCameras,
    /// 开始了新会话并完成第一轮采集
    SessionStarted { session_id: i64, round: RoundOutcome },
    /// 活跃会话完成了一轮采集
    RoundCaptured { session_id: i64, round: RoundOutcome },
    /// 距上次采集未到间隔
    Waiting { session_id: i64 },
    /// 会话达到轮数并已结束
    Finalized { session_id: i64 },
    /// 本次节拍因错误中止
    Aborted { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_completed_integer_division() {
        assert_eq!(rounds_completed(10, 2), 5);
        assert_eq!(rounds_completed(9, 2), 4);
        assert_eq!(rounds_completed(0, 3), 0);
        assert_eq!(rounds_completed(7, 0), 0);
    }

    #[test]
    fn test_session_error_messages() {
        assert_eq!(SessionError::SessionAlreadyActive.to_string(), "已有进行中的会话");
        let err = SessionError::from(anyhow::anyhow!("磁盘已满"));
        assert!(matches!(err, SessionError::Persistence(_)));
        assert!(err.to_string().contains("磁盘已满"));
    }
}
