// 配置模型 - 定义持久化配置及部分更新结构

use serde::{Deserialize, Serialize};

use crate::storage::DatabaseConfig;

/// 应用配置（部分更新，未提供的字段保持原值）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 数据库配置
    pub database: Option<DatabaseConfig>,
    /// 图像保存目录
    pub frames_dir: Option<String>,
    /// 采集配置
    pub capture: Option<CaptureSettings>,
    /// 检测服务配置
    pub detector: Option<DetectorSettings>,
    /// 调度配置
    pub scheduler: Option<SchedulerSettings>,
}

/// 采集设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// ffmpeg 可执行文件路径
    pub ffmpeg_path: String,
    /// 单个摄像头采集+检测的超时（秒）
    pub camera_timeout_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            camera_timeout_secs: 20,
        }
    }
}

/// 检测服务设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// 检测接口地址
    pub endpoint: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 置信度阈值(0-1)
    pub confidence_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/v1/detect".to_string(),
            timeout_secs: 15,
            confidence_threshold: 0.5,
        }
    }
}

/// 调度设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// 是否暂停自动采集
    pub paused: bool,
    /// 每日自动开始时间（HH:MM），为空表示不启用
    pub scheduled_start: Option<String>,
    /// 两轮采集的最小间隔（分钟）
    pub interval_minutes: u32,
    /// 自动开始的容差（分钟），0 表示必须整分钟匹配
    pub schedule_tolerance_minutes: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            paused: false,
            scheduled_start: None,
            interval_minutes: 5,
            schedule_tolerance_minutes: 0,
        }
    }
}

/// 持久化的应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAppConfig {
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 图像保存目录（相对路径按数据目录解析）
    #[serde(default = "default_frames_dir")]
    pub frames_dir: String,
    /// 采集配置
    #[serde(default)]
    pub capture: CaptureSettings,
    /// 检测服务配置
    #[serde(default)]
    pub detector: DetectorSettings,
    /// 调度配置
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

fn default_frames_dir() -> String {
    "frames".to_string()
}

impl Default for PersistedAppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            frames_dir: default_frames_dir(),
            capture: CaptureSettings::default(),
            detector: DetectorSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: PersistedAppConfig =
            serde_json::from_str(r#"{"scheduler":{"paused":true}}"#).unwrap();
        assert!(config.scheduler.paused);
        assert_eq!(config.scheduler.interval_minutes, 5);
        assert_eq!(config.scheduler.schedule_tolerance_minutes, 0);
        assert_eq!(config.capture.camera_timeout_secs, 20);
        assert_eq!(config.frames_dir, "frames");
    }
}
