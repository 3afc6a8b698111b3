// 数据模型定义 - 数据库实体结构

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// 获取当前本地时间（以 DateTime<Utc> 类型表示，但值为本地时间）
/// 用于将本地时间存储到数据库中，同时作为定时计划（HH:MM）的比较基准
pub fn local_now() -> DateTime<Utc> {
    Local::now().naive_local().and_utc()
}

/// 摄像头
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Camera {
    pub id: i64,
    pub name: String,
    /// 连接地址：网络流地址（rtsp/http）或本地设备序号（如 "0"）
    pub stream_url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub is_enabled: bool,
}

/// 新建摄像头参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCamera {
    pub name: String,
    pub stream_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub is_enabled: bool,
}

impl NewCamera {
    /// 创建一个启用状态、无认证信息的摄像头
    pub fn enabled(name: &str, stream_url: &str) -> Self {
        Self {
            name: name.to_string(),
            stream_url: stream_url.to_string(),
            username: None,
            password: None,
            is_enabled: true,
        }
    }
}

/// 区域顶点（归一化坐标，0.0-1.0），序列化为 `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZonePoint(pub f64, pub f64);

/// 统计区域 - 属于某个摄像头的多边形
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub camera_id: i64,
    pub name: String,
    pub points: Vec<ZonePoint>,
}

impl Zone {
    /// 至少3个顶点才能构成有效多边形
    pub fn is_polygon(&self) -> bool {
        self.points.len() >= 3
    }
}

/// 采集会话
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CaptureSession {
    pub id: i64,
    #[serde(serialize_with = "serialize_datetime_as_local")]
    pub start_time: DateTime<Utc>,
    #[serde(serialize_with = "serialize_datetime_as_local_option")]
    pub end_time: Option<DateTime<Utc>>,
    pub is_completed: bool,
}

/// 单个摄像头在单轮中的采集结果，写入后不再修改
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CaptureResult {
    pub id: i64,
    pub session_id: i64,
    pub camera_id: i64,
    pub image_path: String,
    pub people_count: i64,
    #[serde(serialize_with = "serialize_datetime_as_local")]
    pub captured_at: DateTime<Utc>,
}

/// 待写入的采集结果
#[derive(Debug, Clone)]
pub struct NewCaptureResult {
    pub session_id: i64,
    pub camera_id: i64,
    pub image_path: String,
    pub people_count: i64,
    pub captured_at: DateTime<Utc>,
}

/// 摄像头会话统计（会话结束时生成）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CameraSessionStat {
    pub id: i64,
    pub session_id: i64,
    pub camera_id: i64,
    pub average_count: f64,
}

/// 会场会话统计：各摄像头平均值之和
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HallSessionStat {
    pub id: i64,
    pub session_id: i64,
    pub total_count: f64,
    #[serde(serialize_with = "serialize_datetime_as_local")]
    pub recorded_at: DateTime<Utc>,
}

/// 单个摄像头的平均人数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraAverage {
    pub camera_id: i64,
    pub average_count: f64,
    /// 参与平均的结果条数
    pub sample_count: usize,
}

/// 会话聚合结果，由 finalize 一次性写入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub camera_averages: Vec<CameraAverage>,
    pub total_count: f64,
}

/// 自定义序列化：DateTime<Utc> -> 不带时区标记的字符串
/// 数据库中存储的是本地时间（虽然类型是DateTime<Utc>）
pub(crate) fn serialize_datetime_as_local<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// 自定义序列化：Option<DateTime<Utc>> -> Option<不带时区标记的字符串>
pub(crate) fn serialize_datetime_as_local_option<S>(
    dt: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match dt {
        Some(dt) => serializer.serialize_some(&dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        None => serializer.serialize_none(),
    }
}
