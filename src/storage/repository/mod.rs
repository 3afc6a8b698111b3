// Repository 抽象层 - 定义数据库操作接口

pub mod sqlite;

use super::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 数据库操作接口 - 所有数据库实现必须实现此 trait
#[async_trait]
pub trait DatabaseRepository: Send + Sync {
    // ========== 摄像头操作 ==========

    /// 插入新摄像头
    async fn insert_camera(&self, camera: &NewCamera) -> Result<i64>;

    /// 获取摄像头
    async fn get_camera(&self, camera_id: i64) -> Result<Option<Camera>>;

    /// 获取所有摄像头
    async fn list_cameras(&self) -> Result<Vec<Camera>>;

    /// 获取所有启用的摄像头
    async fn get_enabled_cameras(&self) -> Result<Vec<Camera>>;

    /// 启用/停用摄像头
    async fn set_camera_enabled(&self, camera_id: i64, enabled: bool) -> Result<()>;

    /// 删除摄像头（级联删除其区域，历史结果保留）
    async fn delete_camera(&self, camera_id: i64) -> Result<()>;

    // ========== 区域操作 ==========

    /// 插入统计区域
    async fn insert_zone(&self, camera_id: i64, name: &str, points: &[ZonePoint]) -> Result<i64>;

    /// 获取摄像头的所有区域
    async fn get_zones_by_camera(&self, camera_id: i64) -> Result<Vec<Zone>>;

    // ========== 会话操作 ==========

    /// 创建会话并记录本次会话的摄像头快照（同一事务）
    async fn create_session(
        &self,
        start_time: DateTime<Utc>,
        camera_ids: &[i64],
    ) -> Result<CaptureSession>;

    /// 获取会话
    async fn get_session(&self, session_id: i64) -> Result<Option<CaptureSession>>;

    /// 获取当前活跃（未完成）的会话
    async fn get_active_session(&self) -> Result<Option<CaptureSession>>;

    /// 获取所有活跃会话（正常情况下至多一个）
    async fn get_active_sessions(&self) -> Result<Vec<CaptureSession>>;

    /// 获取所有会话，按开始时间倒序
    async fn get_sessions(&self) -> Result<Vec<CaptureSession>>;

    /// 获取会话开始时记录的摄像头列表
    async fn get_session_camera_ids(&self, session_id: i64) -> Result<Vec<i64>>;

    // ========== 采集结果 ==========

    /// 批量写入一轮的采集结果
    async fn insert_capture_results(&self, results: &[NewCaptureResult]) -> Result<()>;

    /// 获取会话最近一条采集结果
    async fn get_latest_result(&self, session_id: i64) -> Result<Option<CaptureResult>>;

    /// 统计会话的采集结果条数
    async fn count_results(&self, session_id: i64) -> Result<i64>;

    /// 获取会话的所有采集结果
    async fn get_results_by_session(&self, session_id: i64) -> Result<Vec<CaptureResult>>;

    /// 获取会话中每个摄像头最近的一条结果
    async fn get_latest_results_per_camera(&self, session_id: i64) -> Result<Vec<CaptureResult>>;

    // ========== 会话统计 ==========

    /// 结束会话并写入统计
    ///
    /// 仅当会话仍未完成时生效，返回是否实际写入
    async fn finalize_session(
        &self,
        session_id: i64,
        end_time: DateTime<Utc>,
        stats: &SessionStats,
    ) -> Result<bool>;

    /// 获取会话的摄像头统计
    async fn get_camera_stats(&self, session_id: i64) -> Result<Vec<CameraSessionStat>>;

    /// 获取会话的会场统计
    async fn get_hall_stat(&self, session_id: i64) -> Result<Option<HallSessionStat>>;

    // ========== 数据库初始化和元数据 ==========

    /// 初始化数据库表结构
    async fn initialize_tables(&self) -> Result<()>;

    /// 获取数据库类型标识
    fn db_type(&self) -> &str;
}
