// 会话查询 - 实时人数和历史会话列表

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::models::{serialize_datetime_as_local, serialize_datetime_as_local_option};
use crate::storage::DatabaseRepository;

/// 单个摄像头的最新人数
#[derive(Debug, Clone, Serialize)]
pub struct CameraLiveCount {
    pub camera_id: i64,
    pub people_count: i64,
    #[serde(serialize_with = "serialize_datetime_as_local")]
    pub captured_at: DateTime<Utc>,
}

/// 活跃会话的实时人数
#[derive(Debug, Clone, Serialize)]
pub struct LiveCount {
    pub session_id: i64,
    /// 各摄像头最新人数之和
    pub total_count: i64,
    pub cameras: Vec<CameraLiveCount>,
    /// 最近一次采集时间
    #[serde(serialize_with = "serialize_datetime_as_local_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 历史会话摘要
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: i64,
    #[serde(serialize_with = "serialize_datetime_as_local")]
    pub start_time: DateTime<Utc>,
    #[serde(serialize_with = "serialize_datetime_as_local_option")]
    pub end_time: Option<DateTime<Utc>>,
    pub is_completed: bool,
    /// 已结束会话为会场统计总数，进行中的会话为各摄像头最新人数之和
    pub total_count: f64,
}

/// 当前活跃会话的实时人数，没有活跃会话时返回 `None`
pub async fn live_count(repo: &dyn DatabaseRepository) -> Result<Option<LiveCount>> {
    let Some(session) = repo.get_active_session().await? else {
        return Ok(None);
    };

    let latest = repo.get_latest_results_per_camera(session.id).await?;
    let cameras: Vec<CameraLiveCount> = latest
        .into_iter()
        .map(|r| CameraLiveCount {
            camera_id: r.camera_id,
            people_count: r.people_count,
            captured_at: r.captured_at,
        })
        .collect();

    Ok(Some(LiveCount {
        session_id: session.id,
        total_count: cameras.iter().map(|c| c.people_count).sum(),
        updated_at: cameras.iter().map(|c| c.captured_at).max(),
        cameras,
    }))
}

/// 所有会话，按开始时间倒序
pub async fn session_history(repo: &dyn DatabaseRepository) -> Result<Vec<SessionSummary>> {
    let sessions = repo.get_sessions().await?;
    let mut summaries = Vec::with_capacity(sessions.len());

    for session in sessions {
        let total_count = if session.is_completed {
            repo.get_hall_stat(session.id)
                .await?
                .map(|stat| stat.total_count)
                .unwrap_or(0.0)
        } else {
            repo.get_latest_results_per_camera(session.id)
                .await?
                .iter()
                .map(|r| r.people_count as f64)
                .sum()
        };

        summaries.push(SessionSummary {
            session_id: session.id,
            start_time: session.start_time,
            end_time: session.end_time,
            is_completed: session.is_completed,
            total_count,
        });
    }

    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{at, Harness};

    #[tokio::test]
    async fn test_live_count_without_session() {
        let harness = Harness::with_cameras(1).await;
        assert!(live_count(harness.repo.as_ref()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_count_uses_latest_per_camera() {
        let harness = Harness::with_cameras(2).await;
        let (first, second) = (harness.camera_ids[0], harness.camera_ids[1]);
        let session = harness.open_session(at(9, 0)).await;

        harness.detector.set_count(first, 4);
        harness.detector.set_count(second, 2);
        harness.executor.execute_round(&session, at(9, 0)).await.unwrap();

        harness.detector.set_count(first, 6);
        harness.camera.fail(second);
        harness.executor.execute_round(&session, at(9, 5)).await.unwrap();

        let live = live_count(harness.repo.as_ref()).await.unwrap().unwrap();
        assert_eq!(live.session_id, session.id);
        assert_eq!(live.total_count, 8);
        assert_eq!(live.updated_at, Some(at(9, 5)));
        assert_eq!(live.cameras.len(), 2);
    }

    #[tokio::test]
    async fn test_history_reports_hall_total_and_live_total() {
        let harness = Harness::with_cameras(1).await;
        let camera_id = harness.camera_ids[0];

        let finished = harness.open_session(at(8, 0)).await;
        harness.detector.set_count(camera_id, 3);
        harness.executor.execute_round(&finished, at(8, 0)).await.unwrap();
        harness.aggregator.finalize(finished.id, at(8, 30)).await.unwrap();

        let active = harness.open_session(at(9, 0)).await;
        harness.detector.set_count(camera_id, 5);
        harness.executor.execute_round(&active, at(9, 0)).await.unwrap();

        let history = session_history(harness.repo.as_ref()).await.unwrap();
        assert_eq!(history.len(), 2);

        assert_eq!(history[0].session_id, active.id);
        assert!(!history[0].is_completed);
        assert_eq!(history[0].total_count, 5.0);

        assert_eq!(history[1].session_id, finished.id);
        assert!(history[1].is_completed);
        assert_eq!(history[1].total_count, 3.0);
        assert_eq!(history[1].end_time, Some(at(8, 30)));

        let json = serde_json::to_value(&history[1]).unwrap();
        assert_eq!(json["end_time"], "2026-03-02T08:30:00");
    }
}
