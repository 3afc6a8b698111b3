// 会话统计 - 会话结束时计算各摄像头平均人数和会场总人数

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::event_bus::{AppEvent, EventBus};
use crate::storage::{CameraAverage, CaptureResult, DatabaseRepository, SessionStats};

/// 按摄像头计算平均人数，会场总数为各平均值之和
///
/// 包含会话中出现过的所有摄像头，无论当前是否启用
pub fn aggregate(results: &[CaptureResult]) -> SessionStats {
    let mut per_camera: BTreeMap<i64, (i64, usize)> = BTreeMap::new();
    for result in results {
        let entry = per_camera.entry(result.camera_id).or_insert((0, 0));
        entry.0 += result.people_count;
        entry.1 += 1;
    }

    let camera_averages: Vec<CameraAverage> = per_camera
        .into_iter()
        .map(|(camera_id, (sum, samples))| CameraAverage {
            camera_id,
            average_count: sum as f64 / samples as f64,
            sample_count: samples,
        })
        .collect();

    let total_count = camera_averages.iter().map(|a| a.average_count).sum();

    SessionStats {
        camera_averages,
        total_count,
    }
}

/// 会话统计器
pub struct StatsAggregator {
    repo: Arc<dyn DatabaseRepository>,
    event_bus: Arc<EventBus>,
}

impl StatsAggregator {
    pub fn new(repo: Arc<dyn DatabaseRepository>, event_bus: Arc<EventBus>) -> Self {
        Self { repo, event_bus }
    }

    /// 结束会话并写入统计
    ///
    /// 已完成的会话直接跳过，返回 `None`；统计行不会重复写入
    pub async fn finalize(
        &self,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionStats>> {
        let Some(session) = self.repo.get_session(session_id).await? else {
            warn!("会话 {} 不存在，跳过结束", session_id);
            return Ok(None);
        };

        if session.is_completed {
            debug!("会话 {} 已结束，跳过重复结束", session_id);
            return Ok(None);
        }

        let results = self.repo.get_results_by_session(session_id).await?;
        let stats = aggregate(&results);

        if !self.repo.finalize_session(session_id, now, &stats).await? {
            debug!("会话 {} 已被其他操作结束", session_id);
            return Ok(None);
        }

        info!(
            "会话 {} 已结束: {} 个摄像头, {} 条结果, 会场总人数 {:.2}",
            session_id,
            stats.camera_averages.len(),
            results.len(),
            stats.total_count
        );

        self.event_bus.publish(AppEvent::SessionFinalized {
            session_id,
            total_count: stats.total_count,
            camera_count: stats.camera_averages.len(),
            end_time: now,
        });

        Ok(Some(stats))
    }
}
