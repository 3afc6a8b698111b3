// 测试辅助 - 可编排的摄像头、检测器和帧存储

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CaptureRoundExecutor, SessionLifecycleManager, StatsAggregator, TimingController};
use crate::capture::{CameraSource, FrameStore};
use crate::detection::PersonDetector;
use crate::event_bus::EventBus;
use crate::storage::{
    Camera, CameraSessionStat, CaptureResult, CaptureSession, DatabaseRepository,
    HallSessionStat, NewCamera, NewCaptureResult, SessionStats, SqliteRepository, Zone, ZonePoint,
};

pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

pub(crate) fn result_row(session_id: i64, camera_id: i64, count: i64, seq: i64) -> CaptureResult {
    CaptureResult {
        id: seq,
        session_id,
        camera_id,
        image_path: format!("sess_{}_cam_{}_{}.jpg", session_id, camera_id, seq),
        people_count: count,
        captured_at: at(9, 0) + chrono::Duration::minutes(seq * 5),
    }
}

/// 假摄像头：返回 `cam-<id>` 字节，可指定失败、挂起或 panic
#[derive(Default)]
pub(crate) struct FakeCamera {
    failing: Mutex<HashSet<i64>>,
    hanging: Mutex<HashSet<i64>>,
    panicking: Mutex<HashSet<i64>>,
}

impl FakeCamera {
    pub fn fail(&self, camera_id: i64) {
        self.failing.lock().unwrap().insert(camera_id);
    }

    pub fn hang(&self, camera_id: i64) {
        self.hanging.lock().unwrap().insert(camera_id);
    }

    pub fn panic_on(&self, camera_id: i64) {
        self.panicking.lock().unwrap().insert(camera_id);
    }
}

#[async_trait]
impl CameraSource for FakeCamera {
    async fn capture(&self, camera: &Camera) -> Result<Vec<u8>> {
        let hanging = self.hanging.lock().unwrap().contains(&camera.id);
        if hanging {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.panicking.lock().unwrap().contains(&camera.id) {
            panic!("摄像头 {} 驱动崩溃", camera.id);
        }
        if self.failing.lock().unwrap().contains(&camera.id) {
            return Err(anyhow!("连接被拒绝"));
        }
        Ok(format!("cam-{}", camera.id).into_bytes())
    }
}

/// 假检测器：按摄像头返回预设人数，默认1人
#[derive(Default)]
pub(crate) struct FakeDetector {
    counts: Mutex<HashMap<i64, u32>>,
    failing: Mutex<HashSet<i64>>,
    zones_seen: Mutex<HashMap<i64, usize>>,
}

impl FakeDetector {
    pub fn set_count(&self, camera_id: i64, count: u32) {
        self.counts.lock().unwrap().insert(camera_id, count);
    }

    pub fn fail(&self, camera_id: i64) {
        self.failing.lock().unwrap().insert(camera_id);
    }

    pub fn zones_seen(&self, camera_id: i64) -> Option<usize> {
        self.zones_seen.lock().unwrap().get(&camera_id).copied()
    }

    fn camera_id(image: &[u8]) -> Result<i64> {
        let text = std::str::from_utf8(image)?;
        let id = text
            .strip_prefix("cam-")
            .ok_or_else(|| anyhow!("未知图像"))?
            .parse()?;
        Ok(id)
    }
}

#[async_trait]
impl PersonDetector for FakeDetector {
    async fn detect(&self, image: &[u8], zones: &[Zone]) -> Result<u32> {
        let camera_id = Self::camera_id(image)?;
        self.zones_seen.lock().unwrap().insert(camera_id, zones.len());
        if self.failing.lock().unwrap().contains(&camera_id) {
            return Err(anyhow!("模型推理失败"));
        }
        Ok(self.counts.lock().unwrap().get(&camera_id).copied().unwrap_or(1))
    }
}

/// 内存帧存储
#[derive(Default)]
pub(crate) struct MemoryFrameStore {
    saved: Mutex<Vec<String>>,
}

impl MemoryFrameStore {
    pub fn saved_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

#[async_trait]
impl FrameStore for MemoryFrameStore {
    async fn save(
        &self,
        session_id: i64,
        camera_id: i64,
        captured_at: DateTime<Utc>,
        _data: &[u8],
    ) -> Result<String> {
        let path = format!(
            "mem://sess_{}_cam_{}_{}.jpg",
            session_id,
            camera_id,
            captured_at.format("%Y%m%d_%H%M%S")
        );
        self.saved.lock().unwrap().push(path.clone());
        Ok(path)
    }
}

/// 可注入一次性故障的仓库调用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RepoCall {
    CreateSession,
    InsertCaptureResults,
}

/// 包装 SQLite 仓库，指定的调用下一次返回错误
pub(crate) struct FlakyRepository {
    inner: SqliteRepository,
    fail_next: Mutex<HashSet<RepoCall>>,
}

impl FlakyRepository {
    pub fn new(inner: SqliteRepository) -> Self {
        Self {
            inner,
            fail_next: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_next(&self, call: RepoCall) {
        self.fail_next.lock().unwrap().insert(call);
    }

    fn check(&self, call: RepoCall) -> Result<()> {
        if self.fail_next.lock().unwrap().remove(&call) {
            return Err(anyhow!("数据库写入失败: {:?}", call));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseRepository for FlakyRepository {
    async fn insert_camera(&self, camera: &NewCamera) -> Result<i64> {
        self.inner.insert_camera(camera).await
    }

    async fn get_camera(&self, camera_id: i64) -> Result<Option<Camera>> {
        self.inner.get_camera(camera_id).await
    }

    async fn list_cameras(&self) -> Result<Vec<Camera>> {
        self.inner.list_cameras().await
    }

    async fn get_enabled_cameras(&self) -> Result<Vec<Camera>> {
        self.inner.get_enabled_cameras().await
    }

    async fn set_camera_enabled(&self, camera_id: i64, enabled: bool) -> Result<()> {
        self.inner.set_camera_enabled(camera_id, enabled).await
    }

    async fn delete_camera(&self, camera_id: i64) -> Result<()> {
        self.inner.delete_camera(camera_id).await
    }

    async fn insert_zone(&self, camera_id: i64, name: &str, points: &[ZonePoint]) -> Result<i64> {
        self.inner.insert_zone(camera_id, name, points).await
    }

    async fn get_zones_by_camera(&self, camera_id: i64) -> Result<Vec<Zone>> {
        self.inner.get_zones_by_camera(camera_id).await
    }

    async fn create_session(
        &self,
        start_time: DateTime<Utc>,
        camera_ids: &[i64],
    ) -> Result<CaptureSession> {
        self.check(RepoCall::CreateSession)?;
        self.inner.create_session(start_time, camera_ids).await
    }

    async fn get_session(&self, session_id: i64) -> Result<Option<CaptureSession>> {
        self.inner.get_session(session_id).await
    }

    async fn get_active_session(&self) -> Result<Option<CaptureSession>> {
        self.inner.get_active_session().await
    }

    async fn get_active_sessions(&self) -> Result<Vec<CaptureSession>> {
        self.inner.get_active_sessions().await
    }

    async fn get_sessions(&self) -> Result<Vec<CaptureSession>> {
        self.inner.get_sessions().await
    }

    async fn get_session_camera_ids(&self, session_id: i64) -> Result<Vec<i64>> {
        self.inner.get_session_camera_ids(session_id).await
    }

    async fn insert_capture_results(&self, results: &[NewCaptureResult]) -> Result<()> {
        self.check(RepoCall::InsertCaptureResults)?;
        self.inner.insert_capture_results(results).await
    }

    async fn get_latest_result(&self, session_id: i64) -> Result<Option<CaptureResult>> {
        self.inner.get_latest_result(session_id).await
    }

    async fn count_results(&self, session_id: i64) -> Result<i64> {
        self.inner.count_results(session_id).await
    }

    async fn get_results_by_session(&self, session_id: i64) -> Result<Vec<CaptureResult>> {
        self.inner.get_results_by_session(session_id).await
    }

    async fn get_latest_results_per_camera(&self, session_id: i64) -> Result<Vec<CaptureResult>> {
        self.inner.get_latest_results_per_camera(session_id).await
    }

    async fn finalize_session(
        &self,
        session_id: i64,
        end_time: DateTime<Utc>,
        stats: &SessionStats,
    ) -> Result<bool> {
        self.inner.finalize_session(session_id, end_time, stats).await
    }

    async fn get_camera_stats(&self, session_id: i64) -> Result<Vec<CameraSessionStat>> {
        self.inner.get_camera_stats(session_id).await
    }

    async fn get_hall_stat(&self, session_id: i64) -> Result<Option<HallSessionStat>> {
        self.inner.get_hall_stat(session_id).await
    }

    async fn initialize_tables(&self) -> Result<()> {
        self.inner.initialize_tables().await
    }

    fn db_type(&self) -> &str {
        self.inner.db_type()
    }
}

/// 组装好的引擎测试环境（内存数据库）
pub(crate) struct Harness {
    pub repo: Arc<dyn DatabaseRepository>,
    pub flaky: Arc<FlakyRepository>,
    pub camera: Arc<FakeCamera>,
    pub detector: Arc<FakeDetector>,
    pub frames: Arc<MemoryFrameStore>,
    pub event_bus: Arc<EventBus>,
    pub aggregator: Arc<StatsAggregator>,
    pub executor: Arc<CaptureRoundExecutor>,
    pub camera_ids: Vec<i64>,
}

impl Harness {
    pub async fn with_cameras(count: usize) -> Self {
        let flaky = Arc::new(FlakyRepository::new(SqliteRepository::in_memory().await.unwrap()));
        let repo: Arc<dyn DatabaseRepository> = flaky.clone();
        let camera = Arc::new(FakeCamera::default());
        let detector = Arc::new(FakeDetector::default());
        let frames = Arc::new(MemoryFrameStore::default());
        let event_bus = Arc::new(EventBus::new(256));
        let aggregator = Arc::new(StatsAggregator::new(repo.clone(), event_bus.clone()));
        let executor = Arc::new(CaptureRoundExecutor::new(
            repo.clone(),
            camera.clone(),
            frames.clone(),
            detector.clone(),
            aggregator.clone(),
            event_bus.clone(),
            Duration::from_millis(200),
        ));

        let mut camera_ids = Vec::new();
        for index in 0..count {
            let name = format!("摄像头{}", index + 1);
            let url = format!("rtsp://10.0.0.{}/live", index + 10);
            camera_ids.push(repo.insert_camera(&NewCamera::enabled(&name, &url)).await.unwrap());
        }

        Self {
            repo,
            flaky,
            camera,
            detector,
            frames,
            event_bus,
            aggregator,
            executor,
            camera_ids,
        }
    }

    pub async fn add_camera(&self, name: &str) -> i64 {
        self.repo
            .insert_camera(&NewCamera::enabled(name, "rtsp://10.0.0.99/live"))
            .await
            .unwrap()
    }

    /// 按当前启用的摄像头直接创建会话
    pub async fn open_session(&self, now: DateTime<Utc>) -> CaptureSession {
        let ids: Vec<i64> = self
            .repo
            .get_enabled_cameras()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        self.repo.create_session(now, &ids).await.unwrap()
    }

    pub fn manager(&self, timing: TimingController) -> SessionLifecycleManager {
        SessionLifecycleManager::new(
            self.repo.clone(),
            self.executor.clone(),
            self.aggregator.clone(),
            self.event_bus.clone(),
            timing,
        )
    }
}
