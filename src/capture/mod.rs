// 采集模块 - 负责从摄像头抓取单帧画面并保存
//
// 摄像头来源和帧存储都以 trait 形式提供，调度引擎只依赖接口

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::storage::Camera;

pub mod scheduler;

/// 摄像头连接方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEndpoint {
    /// 本地设备序号（如 USB 摄像头 "0"）
    Device(u32),
    /// 网络流地址（rtsp/http），已注入认证信息
    Stream(String),
}

impl CameraEndpoint {
    /// 根据摄像头配置解析连接方式
    ///
    /// 纯数字视为本地设备序号；配置了用户名且地址中没有认证信息时注入到地址里
    pub fn from_camera(camera: &Camera) -> Result<Self> {
        let raw = camera.stream_url.trim();
        if raw.is_empty() {
            return Err(anyhow!("摄像头 {} 未配置连接地址", camera.id));
        }

        if raw.chars().all(|c| c.is_ascii_digit()) {
            let index = raw
                .parse::<u32>()
                .map_err(|e| anyhow!("无效的设备序号 {}: {}", raw, e))?;
            return Ok(Self::Device(index));
        }

        let Some(username) = camera.username.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(Self::Stream(raw.to_string()));
        };

        let mut url = reqwest::Url::parse(raw).map_err(|e| anyhow!("无效的流地址 {}: {}", raw, e))?;
        if url.username().is_empty() {
            url.set_username(username)
                .map_err(|_| anyhow!("流地址不支持认证信息: {}", raw))?;
            url.set_password(camera.password.as_deref())
                .map_err(|_| anyhow!("流地址不支持认证信息: {}", raw))?;
        }

        Ok(Self::Stream(url.to_string()))
    }

    /// 构造 ffmpeg 输入参数
    fn input_args(&self) -> Result<Vec<String>> {
        match self {
            Self::Stream(url) => {
                let mut args = Vec::new();
                if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
                    args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
                }
                args.extend(["-i".to_string(), url.clone()]);
                Ok(args)
            }
            #[cfg(target_os = "linux")]
            Self::Device(index) => Ok(vec![
                "-f".to_string(),
                "v4l2".to_string(),
                "-i".to_string(),
                format!("/dev/video{}", index),
            ]),
            #[cfg(target_os = "macos")]
            Self::Device(index) => Ok(vec![
                "-f".to_string(),
                "avfoundation".to_string(),
                "-i".to_string(),
                index.to_string(),
            ]),
            #[cfg(not(any(target_os = "linux", target_os = "macos")))]
            Self::Device(index) => Err(anyhow!("当前平台不支持本地设备采集: {}", index)),
        }
    }
}

/// 摄像头画面来源
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// 抓取一帧 JPEG 图像
    async fn capture(&self, camera: &Camera) -> Result<Vec<u8>>;
}

/// 基于 ffmpeg 的摄像头采集
pub struct FfmpegCameraSource {
    /// ffmpeg 可执行文件路径
    ffmpeg_path: String,
    /// 单次采集超时
    timeout: Duration,
}

impl FfmpegCameraSource {
    pub fn new(ffmpeg_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CameraSource for FfmpegCameraSource {
    async fn capture(&self, camera: &Camera) -> Result<Vec<u8>> {
        let endpoint = CameraEndpoint::from_camera(camera)?;
        let mut args = endpoint.input_args()?;
        args.extend(
            ["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-loglevel", "error", "-y", "-"]
                .iter()
                .map(|s| s.to_string()),
        );

        // 超时后 Child 被 drop，kill_on_drop 负责结束 ffmpeg 进程
        let child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("启动 ffmpeg 失败: {}", e))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(anyhow!("ffmpeg 执行失败: {}", e)),
            Err(_) => {
                warn!("摄像头 {} 采集超时（{}秒），已终止 ffmpeg", camera.id, self.timeout.as_secs());
                return Err(anyhow!("ffmpeg 采集超时（{}秒）", self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("ffmpeg 采集失败: {}", stderr.trim()));
        }

        if output.stdout.is_empty() {
            return Err(anyhow!("ffmpeg 未返回图像数据"));
        }

        trace!("摄像头 {} 采集成功，{} 字节", camera.id, output.stdout.len());
        Ok(output.stdout)
    }
}

/// 帧存储 - 保存采集到的图像并返回引用
#[async_trait]
pub trait FrameStore: Send + Sync {
    async fn save(
        &self,
        session_id: i64,
        camera_id: i64,
        captured_at: DateTime<Utc>,
        data: &[u8],
    ) -> Result<String>;
}

/// 本地目录帧存储
pub struct LocalFrameStore {
    /// 输出目录
    output_dir: PathBuf,
}

impl LocalFrameStore {
    /// 创建帧存储，确保输出目录存在
    pub async fn new(output_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&output_dir).await?;
        Ok(Self { output_dir })
    }

    /// 获取帧保存目录
    pub fn frames_dir(&self) -> PathBuf {
        self.output_dir.clone()
    }
}

#[async_trait]
impl FrameStore for LocalFrameStore {
    async fn save(
        &self,
        session_id: i64,
        camera_id: i64,
        captured_at: DateTime<Utc>,
        data: &[u8],
    ) -> Result<String> {
        let file_name = format!(
            "sess_{}_cam_{}_{}.jpg",
            session_id,
            camera_id,
            captured_at.format("%Y%m%d_%H%M%S")
        );
        let file_path = self.output_dir.join(file_name);

        tokio::fs::write(&file_path, data)
            .await
            .map_err(|e| anyhow!("保存图像失败 {}: {}", file_path.display(), e))?;

        debug!("图像已保存: {}", file_path.display());
        Ok(file_path.to_string_lossy().to_string())
    }
}
