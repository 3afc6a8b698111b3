use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::{AppConfig, PersistedAppConfig, SchedulerSettings};

pub struct SettingsManager {
    path: PathBuf,
    data: RwLock<PersistedAppConfig>,
}

impl SettingsManager {
    pub async fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let initial = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                serde_json::from_slice::<PersistedAppConfig>(&bytes).unwrap_or_else(|e| {
                    warn!("配置文件解析失败，使用默认配置: {}", e);
                    PersistedAppConfig::default()
                })
            }
            _ => {
                let default = PersistedAppConfig::default();
                let json = serde_json::to_string_pretty(&default)?;
                tokio::fs::write(&path, json).await?;
                default
            }
        };

        Ok(Self {
            path,
            data: RwLock::new(initial),
        })
    }

    pub async fn get(&self) -> PersistedAppConfig {
        self.data.read().await.clone()
    }

    pub async fn update(&self, update: AppConfig) -> Result<PersistedAppConfig> {
        let mut config = self.data.write().await;

        if let Some(database) = update.database {
            config.database = database;
        }
        if let Some(dir) = update.frames_dir {
            config.frames_dir = dir;
        }
        if let Some(capture) = update.capture {
            config.capture = capture;
        }
        if let Some(detector) = update.detector {
            config.detector = detector;
        }
        if let Some(scheduler) = update.scheduler {
            config.scheduler = scheduler;
        }

        self.save(&config).await?;
        Ok(config.clone())
    }

    /// 只更新调度配置
    pub async fn update_scheduler(&self, scheduler: SchedulerSettings) -> Result<()> {
        self.update(AppConfig {
            scheduler: Some(scheduler),
            ..Default::default()
        })
        .await?;
        Ok(())
    }

    async fn save(&self, config: &PersistedAppConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_creates_default_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");

        let manager = SettingsManager::new(path.clone()).await.unwrap();
        assert!(path.exists());
        assert_eq!(manager.get().await.scheduler.interval_minutes, 5);
    }

    #[tokio::test]
    async fn test_scheduler_update_survives_reload() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");

        let manager = SettingsManager::new(path.clone()).await.unwrap();
        manager
            .update_scheduler(SchedulerSettings {
                paused: true,
                scheduled_start: Some("09:00".to_string()),
                interval_minutes: 3,
                schedule_tolerance_minutes: 0,
            })
            .await
            .unwrap();

        let reloaded = SettingsManager::new(path).await.unwrap().get().await;
        assert!(reloaded.scheduler.paused);
        assert_eq!(reloaded.scheduler.scheduled_start.as_deref(), Some("09:00"));
        assert_eq!(reloaded.scheduler.interval_minutes, 3);
        assert_eq!(reloaded.capture.ffmpeg_path, "ffmpeg");
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let manager = SettingsManager::new(path).await.unwrap();
        assert!(!manager.get().await.scheduler.paused);
    }
}
