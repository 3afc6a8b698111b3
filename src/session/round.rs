// 采集轮执行器 - 对会话中的每个摄像头并发执行一次采集+检测

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{rounds_completed, StatsAggregator, ROUNDS_PER_SESSION};
use crate::capture::{CameraSource, FrameStore};
use crate::detection::PersonDetector;
use crate::event_bus::{AppEvent, EventBus};
use crate::storage::{Camera, CaptureSession, DatabaseRepository, NewCaptureResult, Zone};

/// 单个摄像头本轮失败的原因
#[derive(Debug, Clone, Serialize)]
pub struct CameraFailure {
    pub camera_id: i64,
    pub error: String,
}

/// 一轮采集的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoundOutcome {
    pub session_id: i64,
    /// 成功写入结果的摄像头
    pub succeeded: Vec<i64>,
    /// 采集失败（含超时）的摄像头
    pub failed: Vec<CameraFailure>,
    /// 写入后的已完成轮数
    pub rounds_completed: i64,
    /// 本轮结束后会话是否已结束
    pub finalized: bool,
}

/// 采集轮执行器
pub struct CaptureRoundExecutor {
    repo: Arc<dyn DatabaseRepository>,
    camera_source: Arc<dyn CameraSource>,
    frame_store: Arc<dyn FrameStore>,
    detector: Arc<dyn PersonDetector>,
    aggregator: Arc<StatsAggregator>,
    event_bus: Arc<EventBus>,
    /// 单个摄像头采集+保存+检测的总超时
    camera_timeout: Duration,
}

impl CaptureRoundExecutor {
    pub fn new(
        repo: Arc<dyn DatabaseRepository>,
        camera_source: Arc<dyn CameraSource>,
        frame_store: Arc<dyn FrameStore>,
        detector: Arc<dyn PersonDetector>,
        aggregator: Arc<StatsAggregator>,
        event_bus: Arc<EventBus>,
        camera_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            camera_source,
            frame_store,
            detector,
            aggregator,
            event_bus,
            camera_timeout,
        }
    }

    /// 会话的摄像头数量（用于计算轮数）
    ///
    /// 使用会话开始时记录的快照；没有快照时退回到当前启用的摄像头数
    pub async fn session_camera_count(&self, session_id: i64) -> Result<usize> {
        let snapshot = self.repo.get_session_camera_ids(session_id).await?;
        if !snapshot.is_empty() {
            return Ok(snapshot.len());
        }
        Ok(self.repo.get_enabled_cameras().await?.len())
    }

    /// 本轮需要采集的摄像头：快照中且仍启用的摄像头
    async fn round_cameras(&self, session_id: i64) -> Result<Vec<Camera>> {
        let enabled = self.repo.get_enabled_cameras().await?;
        let snapshot: HashSet<i64> = self
            .repo
            .get_session_camera_ids(session_id)
            .await?
            .into_iter()
            .collect();

        if snapshot.is_empty() {
            return Ok(enabled);
        }

        Ok(enabled
            .into_iter()
            .filter(|camera| snapshot.contains(&camera.id))
            .collect())
    }

    /// 执行一轮采集
    ///
    /// 单个摄像头失败不影响其他摄像头；所有摄像头处理完后统一写入结果，
    /// 再检查是否达到轮数阈值，达到则立即结束会话
    pub async fn execute_round(
        &self,
        session: &CaptureSession,
        now: DateTime<Utc>,
    ) -> Result<RoundOutcome> {
        let session_id = session.id;
        let cameras = self.round_cameras(session_id).await?;

        if cameras.is_empty() {
            warn!("会话 {} 的摄像头均已停用，直接结束会话", session_id);
            let finalized = self.aggregator.finalize(session_id, now).await?.is_some();
            return Ok(RoundOutcome {
                session_id,
                finalized,
                ..Default::default()
            });
        }

        let mut pending: HashSet<i64> = cameras.iter().map(|camera| camera.id).collect();
        let mut join_set = JoinSet::new();
        for camera in cameras {
            let zones = self.repo.get_zones_by_camera(camera.id).await?;
            let camera_source = self.camera_source.clone();
            let frame_store = self.frame_store.clone();
            let detector = self.detector.clone();
            let timeout = self.camera_timeout;

            join_set.spawn(async move {
                let camera_id = camera.id;
                let attempt = capture_camera(
                    camera_source.as_ref(),
                    frame_store.as_ref(),
                    detector.as_ref(),
                    &camera,
                    &zones,
                    session_id,
                    now,
                );
                let result = match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("采集超时（{}秒）", timeout.as_secs())),
                };
                (camera_id, result)
            });
        }

        let mut rows = Vec::new();
        let mut failed = Vec::new();
        let mut task_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((camera_id, Ok(row))) => {
                    pending.remove(&camera_id);
                    rows.push(row);
                }
                Ok((camera_id, Err(e))) => {
                    pending.remove(&camera_id);
                    warn!("会话 {} 摄像头 {} 采集失败，本轮跳过: {}", session_id, camera_id, e);
                    failed.push(CameraFailure {
                        camera_id,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("会话 {} 采集任务异常退出: {}", session_id, e);
                    task_error = Some(e.to_string());
                }
            }
        }

        // 任务异常退出时拿不到返回值，未返回的摄像头都记为失败
        for camera_id in pending {
            failed.push(CameraFailure {
                camera_id,
                error: format!(
                    "采集任务异常退出: {}",
                    task_error.as_deref().unwrap_or("未知原因")
                ),
            });
        }

        rows.sort_by_key(|row| row.camera_id);
        failed.sort_by_key(|f| f.camera_id);

        if !rows.is_empty() {
            self.repo.insert_capture_results(&rows).await?;
        }

        for failure in &failed {
            self.event_bus.publish(AppEvent::CameraCaptureFailed {
                session_id,
                camera_id: failure.camera_id,
                error: failure.error.clone(),
            });
        }

        let total = self.repo.count_results(session_id).await?;
        let camera_count = self.session_camera_count(session_id).await?;
        let rounds = rounds_completed(total, camera_count);

        info!(
            "会话 {} 完成一轮采集: 成功 {}, 失败 {}, 已完成 {}/{} 轮",
            session_id,
            rows.len(),
            failed.len(),
            rounds,
            ROUNDS_PER_SESSION
        );

        self.event_bus.publish(AppEvent::RoundCompleted {
            session_id,
            rounds_completed: rounds,
            succeeded: rows.len(),
            failed: failed.len(),
        });

        let finalized = if rounds >= ROUNDS_PER_SESSION {
            self.aggregator.finalize(session_id, now).await?.is_some()
        } else {
            false
        };

        Ok(RoundOutcome {
            session_id,
            succeeded: rows.iter().map(|row| row.camera_id).collect(),
            failed,
            rounds_completed: rounds,
            finalized,
        })
    }
}

/// 单个摄像头：采集 -> 保存 -> 检测
///
/// 检测失败按0人记录
async fn capture_camera(
    camera_source: &dyn CameraSource,
    frame_store: &dyn FrameStore,
    detector: &dyn PersonDetector,
    camera: &Camera,
    zones: &[Zone],
    session_id: i64,
    now: DateTime<Utc>,
) -> Result<NewCaptureResult> {
    let image = camera_source.capture(camera).await?;
    let image_path = frame_store.save(session_id, camera.id, now, &image).await?;

    let people_count = match detector.detect(&image, zones).await {
        Ok(count) => count as i64,
        Err(e) => {
            warn!("摄像头 {} 人数检测失败，按0人记录: {}", camera.id, e);
            0
        }
    };

    debug!("摄像头 {} 检测到 {} 人", camera.id, people_count);

    Ok(NewCaptureResult {
        session_id,
        camera_id: camera.id,
        image_path,
        people_count,
        captured_at: now,
    })
}
