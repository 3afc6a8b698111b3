// 人数检测模块 - 调用检测服务统计图像中的人数

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, trace};

use crate::storage::Zone;

pub mod zone;

/// 人数检测器
#[async_trait]
pub trait PersonDetector: Send + Sync {
    /// 检测图像中的人数，配置了区域时只统计区域内的人
    async fn detect(&self, image: &[u8], zones: &[Zone]) -> Result<u32>;
}

/// 检测服务返回的目标框（像素坐标）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: String,
    pub conf: f32,
}

impl BBox {
    /// 归一化后的中心点
    fn normalized_center(&self, width: u32, height: u32) -> (f64, f64) {
        let cx = (self.x1 as f64 + self.x2 as f64) / 2.0 / width as f64;
        let cy = (self.y1 as f64 + self.y2 as f64) / 2.0 / height as f64;
        (cx, cy)
    }
}

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    image: String,
    classes: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    bboxes: Vec<BBox>,
}

/// 统计满足条件的人数
///
/// 只统计 `person` 类别且置信度不低于阈值的目标，再按区域过滤
pub fn count_people(
    boxes: &[BBox],
    width: u32,
    height: u32,
    confidence_threshold: f32,
    zones: &[Zone],
) -> u32 {
    if width == 0 || height == 0 {
        return 0;
    }

    boxes
        .iter()
        .filter(|b| b.label == "person" && b.conf >= confidence_threshold)
        .filter(|b| {
            let (cx, cy) = b.normalized_center(width, height);
            zone::is_counted(cx, cy, zones)
        })
        .count() as u32
}

/// 基于 HTTP 检测服务的人数检测器
pub struct HttpPersonDetector {
    client: reqwest::Client,
    endpoint: String,
    confidence_threshold: f32,
}

impl HttpPersonDetector {
    pub fn new(endpoint: String, timeout: Duration, confidence_threshold: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("创建检测服务客户端失败: {}", e))?;

        Ok(Self {
            client,
            endpoint,
            confidence_threshold,
        })
    }

    /// 读取图像尺寸（只解析头部）
    fn image_dimensions(image: &[u8]) -> Result<(u32, u32)> {
        let reader = image::io::Reader::new(Cursor::new(image)).with_guessed_format()?;
        Ok(reader.into_dimensions()?)
    }
}

#[async_trait]
impl PersonDetector for HttpPersonDetector {
    async fn detect(&self, image: &[u8], zones: &[Zone]) -> Result<u32> {
        let (width, height) = Self::image_dimensions(image)?;

        let request = DetectRequest {
            image: general_purpose::STANDARD.encode(image),
            classes: &["person"],
        };

        debug!("调用检测服务: endpoint={}, 图像 {}x{}", self.endpoint, width, height);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("检测服务调用失败 ({}): {}", status, error_text));
        }

        let body: DetectResponse = response.json().await?;
        let count = count_people(
            &body.bboxes,
            width,
            height,
            self.confidence_threshold,
            zones,
        );

        trace!("检测到 {} 个目标，计数 {} 人", body.bboxes.len(), count);
        Ok(count)
    }
}
