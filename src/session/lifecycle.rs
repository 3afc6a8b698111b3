// 会话生命周期管理 - 节拍处理、手动开始/结束、调度状态
//
// 所有会话状态变更都在同一把锁内完成，保证任意时刻至多一个未完成会话

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::history::{self, LiveCount, SessionSummary};
use super::{
    rounds_completed, CaptureRoundExecutor, SessionError, StatsAggregator, TickOutcome,
    TimingController, ROUNDS_PER_SESSION,
};
use crate::event_bus::{AppEvent, EventBus};
use crate::models::SchedulerSettings;
use crate::storage::{CaptureSession, DatabaseRepository};

/// 调度状态
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub paused: bool,
    pub scheduled_start: Option<String>,
    pub interval_minutes: u32,
    pub schedule_tolerance_minutes: u32,
    pub session_active: bool,
    pub active_session_id: Option<i64>,
}

/// 会话生命周期管理器
pub struct SessionLifecycleManager {
    repo: Arc<dyn DatabaseRepository>,
    executor: Arc<CaptureRoundExecutor>,
    aggregator: Arc<StatsAggregator>,
    event_bus: Arc<EventBus>,
    /// 定时状态，同时作为会话操作的互斥边界
    timing: Mutex<TimingController>,
}

impl SessionLifecycleManager {
    pub fn new(
        repo: Arc<dyn DatabaseRepository>,
        executor: Arc<CaptureRoundExecutor>,
        aggregator: Arc<StatsAggregator>,
        event_bus: Arc<EventBus>,
        timing: TimingController,
    ) -> Self {
        Self {
            repo,
            executor,
            aggregator,
            event_bus,
            timing: Mutex::new(timing),
        }
    }

    /// 处理一个节拍
    ///
    /// 错误只记录日志，不向调用方抛出
    pub async fn tick(&self, now: DateTime<Utc>, force: bool) -> TickOutcome {
        let mut timing = self.timing.lock().await;

        let was_paused = timing.is_paused();
        if !timing.should_proceed(now, force) {
            trace!("调度已暂停，跳过节拍");
            return TickOutcome::Gated;
        }

        if was_paused && !timing.is_paused() {
            self.event_bus
                .publish(AppEvent::SchedulerResumed { scheduled: true });
            self.publish_config_updated();
        }

        match self.process_tick(&timing, now, force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("节拍处理失败，本次放弃: {}", e);
                TickOutcome::Aborted {
                    error: e.to_string(),
                }
            }
        }
    }

    /// 立即执行一次节拍，忽略暂停和采集间隔
    pub async fn force_tick(&self, now: DateTime<Utc>) -> TickOutcome {
        info!("手动触发节拍");
        self.tick(now, true).await
    }

    async fn process_tick(
        &self,
        timing: &TimingController,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<TickOutcome> {
        let Some(session) = self.repo.get_active_session().await? else {
            let Some(session) = self.open_session(now, false).await? else {
                info!("没有启用的摄像头，暂不开始会话");
                return Ok(TickOutcome::NoCameras);
            };
            let round = self.executor.execute_round(&session, now).await?;
            return Ok(TickOutcome::SessionStarted {
                session_id: session.id,
                round,
            });
        };

        let Some(latest) = self.repo.get_latest_result(session.id).await? else {
            info!("会话 {} 尚无采集结果，立即补采一轮", session.id);
            let round = self.executor.execute_round(&session, now).await?;
            return Ok(TickOutcome::RoundCaptured {
                session_id: session.id,
                round,
            });
        };

        if !force && !timing.interval_elapsed(latest.captured_at, now) {
            trace!(
                "会话 {} 距上次采集 {} 秒，未到间隔 {} 分钟",
                session.id,
                (now - latest.captured_at).num_seconds(),
                timing.interval_minutes()
            );
            return Ok(TickOutcome::Waiting {
                session_id: session.id,
            });
        }

        let total = self.repo.count_results(session.id).await?;
        let camera_count = self.executor.session_camera_count(session.id).await?;
        let rounds = rounds_completed(total, camera_count);
        debug!(
            "会话 {} 已完成 {}/{} 轮（{} 条结果，{} 个摄像头）",
            session.id, rounds, ROUNDS_PER_SESSION, total, camera_count
        );

        if rounds >= ROUNDS_PER_SESSION {
            self.aggregator.finalize(session.id, now).await?;
            return Ok(TickOutcome::Finalized {
                session_id: session.id,
            });
        }

        let round = self.executor.execute_round(&session, now).await?;
        Ok(TickOutcome::RoundCaptured {
            session_id: session.id,
            round,
        })
    }

    /// 按当前启用的摄像头创建会话，没有摄像头时返回 `None`
    async fn open_session(
        &self,
        now: DateTime<Utc>,
        manual: bool,
    ) -> Result<Option<CaptureSession>> {
        let cameras = self.repo.get_enabled_cameras().await?;
        if cameras.is_empty() {
            return Ok(None);
        }

        let camera_ids: Vec<i64> = cameras.iter().map(|c| c.id).collect();
        let session = self.repo.create_session(now, &camera_ids).await?;

        info!(
            "开始新会话 {}（{}个摄像头，{}）",
            session.id,
            camera_ids.len(),
            if manual { "手动" } else { "自动" }
        );
        self.event_bus.publish(AppEvent::SessionStarted {
            session_id: session.id,
            camera_count: camera_ids.len(),
            manual,
        });

        Ok(Some(session))
    }

    /// 手动开始会话，返回新会话ID
    ///
    /// 暂停状态下会自动恢复；首轮采集失败不影响会话创建结果
    pub async fn start_manual(&self, now: DateTime<Utc>) -> Result<i64, SessionError> {
        let mut timing = self.timing.lock().await;

        if let Some(active) = self.repo.get_active_session().await? {
            warn!("已有进行中的会话 {}，拒绝手动开始", active.id);
            return Err(SessionError::SessionAlreadyActive);
        }

        let Some(session) = self.open_session(now, true).await? else {
            warn!("没有启用的摄像头，无法手动开始会话");
            return Err(SessionError::NoCamerasAvailable);
        };

        if timing.is_paused() {
            timing.resume();
            info!("手动开始会话，自动恢复调度");
            self.event_bus
                .publish(AppEvent::SchedulerResumed { scheduled: false });
            self.publish_config_updated();
        }

        if let Err(e) = self.executor.execute_round(&session, now).await {
            error!("会话 {} 首轮采集失败，将在下一个节拍重试: {}", session.id, e);
        }

        Ok(session.id)
    }

    /// 手动结束所有活跃会话，返回实际结束的数量
    pub async fn stop_manual(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let _guard = self.timing.lock().await;

        let sessions = self.repo.get_active_sessions().await?;
        let mut stopped = 0;
        for session in sessions {
            if session.is_completed {
                continue;
            }
            if self.aggregator.finalize(session.id, now).await?.is_some() {
                stopped += 1;
            }
        }

        if stopped > 0 {
            info!("手动结束了 {} 个会话", stopped);
        } else {
            debug!("没有需要结束的会话");
        }
        Ok(stopped)
    }

    /// 获取调度状态
    pub async fn get_status(&self) -> Result<SchedulerStatus, SessionError> {
        let timing = self.timing.lock().await;
        let active = self.repo.get_active_session().await?;

        Ok(SchedulerStatus {
            paused: timing.is_paused(),
            scheduled_start: timing.scheduled_start().map(str::to_string),
            interval_minutes: timing.interval_minutes(),
            schedule_tolerance_minutes: timing.schedule_tolerance_minutes(),
            session_active: active.is_some(),
            active_session_id: active.map(|s| s.id),
        })
    }

    pub async fn pause(&self) {
        self.timing.lock().await.pause();
        info!("调度已暂停");
        self.event_bus.publish(AppEvent::SchedulerPaused);
        self.publish_config_updated();
    }

    pub async fn resume(&self) {
        self.timing.lock().await.resume();
        info!("调度已恢复");
        self.event_bus
            .publish(AppEvent::SchedulerResumed { scheduled: false });
        self.publish_config_updated();
    }

    /// 设置每日自动开始时间（HH:MM），`None` 或空字符串表示取消
    pub async fn set_schedule(&self, time: Option<&str>) -> Result<(), SessionError> {
        let mut timing = self.timing.lock().await;
        timing.set_schedule(time)?;
        info!("定时开始时间更新为: {:?}", timing.scheduled_start());
        drop(timing);

        self.publish_config_updated();
        Ok(())
    }

    /// 设置采集间隔，返回实际生效的分钟数
    pub async fn set_interval(&self, minutes: i64) -> u32 {
        let applied = self.timing.lock().await.set_interval(minutes);
        info!("采集间隔更新为 {} 分钟", applied);
        self.publish_config_updated();
        applied
    }

    /// 设置定时开始的容差（分钟），0 表示必须整分钟命中
    pub async fn set_schedule_tolerance(&self, minutes: u32) {
        self.timing.lock().await.set_schedule_tolerance(minutes);
        info!("定时开始容差更新为 {} 分钟", minutes);
        self.publish_config_updated();
    }

    /// 当前定时配置，用于持久化
    pub async fn scheduler_settings(&self) -> SchedulerSettings {
        self.timing.lock().await.to_settings()
    }

    /// 活跃会话的实时人数
    pub async fn live_count(&self) -> Result<Option<LiveCount>> {
        history::live_count(self.repo.as_ref()).await
    }

    /// 历史会话列表
    pub async fn session_history(&self) -> Result<Vec<SessionSummary>> {
        history::session_history(self.repo.as_ref()).await
    }

    fn publish_config_updated(&self) {
        self.event_bus.publish(AppEvent::ConfigUpdated {
            config_type: "scheduler".to_string(),
        });
    }
}
