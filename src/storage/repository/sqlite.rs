// SQLite 数据库实现

use super::DatabaseRepository;
use crate::storage::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

/// SQLite 数据库实现
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// 创建新的 SQLite 数据库连接
    pub async fn new(db_path: &str) -> Result<Self> {
        info!("初始化 SQLite 数据库: {}", db_path);

        // 确保数据库文件的目录存在
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        // 创建连接池
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .idle_timeout(std::time::Duration::from_secs(180))
            .max_lifetime(std::time::Duration::from_secs(1800))
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await?;

        let repo = Self { pool };

        // 初始化表结构
        repo.initialize_tables().await?;

        Ok(repo)
    }

    /// 创建内存数据库（单连接，连接关闭即销毁）
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize_tables().await?;
        Ok(repo)
    }
}

const RESULT_COLUMNS: &str = "id, session_id, camera_id, image_path, people_count, captured_at";
const SESSION_COLUMNS: &str = "id, start_time, end_time, is_completed";
const CAMERA_COLUMNS: &str = "id, name, stream_url, username, password, is_enabled";

fn zone_from_row(row: &SqliteRow) -> Result<Zone> {
    let points: String = row.try_get("points")?;
    Ok(Zone {
        id: row.try_get("id")?,
        camera_id: row.try_get("camera_id")?,
        name: row.try_get("name")?,
        points: serde_json::from_str(&points)?,
    })
}

#[async_trait]
impl DatabaseRepository for SqliteRepository {
    // ========== 摄像头操作 ==========

    async fn insert_camera(&self, camera: &NewCamera) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO cameras (name, stream_url, username, password, is_enabled)
            VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        )
        .bind(&camera.name)
        .bind(&camera.stream_url)
        .bind(&camera.username)
        .bind(&camera.password)
        .bind(camera.is_enabled)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_camera(&self, camera_id: i64) -> Result<Option<Camera>> {
        let camera = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras WHERE id = ?",
            CAMERA_COLUMNS
        ))
        .bind(camera_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(camera)
    }

    async fn list_cameras(&self) -> Result<Vec<Camera>> {
        let cameras =
            sqlx::query_as::<_, Camera>(&format!("SELECT {} FROM cameras ORDER BY id", CAMERA_COLUMNS))
                .fetch_all(&self.pool)
                .await?;

        Ok(cameras)
    }

    async fn get_enabled_cameras(&self) -> Result<Vec<Camera>> {
        let cameras = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras WHERE is_enabled = 1 ORDER BY id",
            CAMERA_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(cameras)
    }

    async fn set_camera_enabled(&self, camera_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE cameras SET is_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(camera_id)
            .execute(&self.pool)
            .await?;

        info!("摄像头 {} 已{}", camera_id, if enabled { "启用" } else { "停用" });
        Ok(())
    }

    async fn delete_camera(&self, camera_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM zones WHERE camera_id = ?")
            .bind(camera_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM cameras WHERE id = ?")
            .bind(camera_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("删除摄像头: {}", camera_id);
        Ok(())
    }

    // ========== 区域操作 ==========

    async fn insert_zone(&self, camera_id: i64, name: &str, points: &[ZonePoint]) -> Result<i64> {
        let points_json = serde_json::to_string(points)?;
        let result = sqlx::query("INSERT INTO zones (camera_id, name, points) VALUES (?1, ?2, ?3)")
            .bind(camera_id)
            .bind(name)
            .bind(points_json)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_zones_by_camera(&self, camera_id: i64) -> Result<Vec<Zone>> {
        let rows = sqlx::query("SELECT id, camera_id, name, points FROM zones WHERE camera_id = ? ORDER BY id")
            .bind(camera_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(zone_from_row).collect()
    }

    // ========== 会话操作 ==========

    async fn create_session(
        &self,
        start_time: DateTime<Utc>,
        camera_ids: &[i64],
    ) -> Result<CaptureSession> {
        let mut tx = self.pool.begin().await?;

        let session_id = sqlx::query(
            "INSERT INTO capture_sessions (start_time, end_time, is_completed) VALUES (?1, NULL, 0)",
        )
        .bind(start_time)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for camera_id in camera_ids {
            sqlx::query("INSERT INTO session_cameras (session_id, camera_id) VALUES (?1, ?2)")
                .bind(session_id)
                .bind(*camera_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(CaptureSession {
            id: session_id,
            start_time,
            end_time: None,
            is_completed: false,
        })
    }

    async fn get_session(&self, session_id: i64) -> Result<Option<CaptureSession>> {
        let session = sqlx::query_as::<_, CaptureSession>(&format!(
            "SELECT {} FROM capture_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn get_active_session(&self) -> Result<Option<CaptureSession>> {
        let session = sqlx::query_as::<_, CaptureSession>(&format!(
            "SELECT {} FROM capture_sessions WHERE is_completed = 0 ORDER BY id LIMIT 1",
            SESSION_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn get_active_sessions(&self) -> Result<Vec<CaptureSession>> {
        let sessions = sqlx::query_as::<_, CaptureSession>(&format!(
            "SELECT {} FROM capture_sessions WHERE is_completed = 0 ORDER BY id",
            SESSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn get_sessions(&self) -> Result<Vec<CaptureSession>> {
        let sessions = sqlx::query_as::<_, CaptureSession>(&format!(
            "SELECT {} FROM capture_sessions ORDER BY start_time DESC, id DESC",
            SESSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn get_session_camera_ids(&self, session_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT camera_id FROM session_cameras WHERE session_id = ? ORDER BY camera_id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    // ========== 采集结果 ==========

    async fn insert_capture_results(&self, results: &[NewCaptureResult]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO capture_results (session_id, camera_id, image_path, people_count, captured_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            )
            .bind(result.session_id)
            .bind(result.camera_id)
            .bind(&result.image_path)
            .bind(result.people_count)
            .bind(result.captured_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_latest_result(&self, session_id: i64) -> Result<Option<CaptureResult>> {
        let result = sqlx::query_as::<_, CaptureResult>(&format!(
            r#"
            SELECT {}
            FROM capture_results
            WHERE session_id = ?
            ORDER BY captured_at DESC, id DESC
            LIMIT 1
            "#,
            RESULT_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn count_results(&self, session_id: i64) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM capture_results WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn get_results_by_session(&self, session_id: i64) -> Result<Vec<CaptureResult>> {
        let results = sqlx::query_as::<_, CaptureResult>(&format!(
            "SELECT {} FROM capture_results WHERE session_id = ? ORDER BY captured_at, id",
            RESULT_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn get_latest_results_per_camera(&self, session_id: i64) -> Result<Vec<CaptureResult>> {
        let results = sqlx::query_as::<_, CaptureResult>(
            r#"
            SELECT r.id, r.session_id, r.camera_id, r.image_path, r.people_count, r.captured_at
            FROM capture_results r
            WHERE r.session_id = ?1
              AND r.id = (
                  SELECT r2.id FROM capture_results r2
                  WHERE r2.session_id = r.session_id AND r2.camera_id = r.camera_id
                  ORDER BY r2.captured_at DESC, r2.id DESC
                  LIMIT 1
              )
            ORDER BY r.camera_id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    // ========== 会话统计 ==========

    async fn finalize_session(
        &self,
        session_id: i64,
        end_time: DateTime<Utc>,
        stats: &SessionStats,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE capture_sessions SET end_time = ?1, is_completed = 1 WHERE id = ?2 AND is_completed = 0",
        )
        .bind(end_time)
        .bind(session_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for average in &stats.camera_averages {
            sqlx::query(
                "INSERT INTO camera_session_stats (session_id, camera_id, average_count) VALUES (?1, ?2, ?3)",
            )
            .bind(session_id)
            .bind(average.camera_id)
            .bind(average.average_count)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO hall_session_stats (session_id, total_count, recorded_at) VALUES (?1, ?2, ?3)",
        )
        .bind(session_id)
        .bind(stats.total_count)
        .bind(end_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_camera_stats(&self, session_id: i64) -> Result<Vec<CameraSessionStat>> {
        let stats = sqlx::query_as::<_, CameraSessionStat>(
            r#"
            SELECT id, session_id, camera_id, average_count
            FROM camera_session_stats
            WHERE session_id = ?
            ORDER BY camera_id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn get_hall_stat(&self, session_id: i64) -> Result<Option<HallSessionStat>> {
        let stat = sqlx::query_as::<_, HallSessionStat>(
            "SELECT id, session_id, total_count, recorded_at FROM hall_session_stats WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stat)
    }

    // ========== 数据库初始化和元数据 ==========

    async fn initialize_tables(&self) -> Result<()> {
        // 创建摄像头表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cameras (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                stream_url TEXT NOT NULL,
                username TEXT,
                password TEXT,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // 创建区域表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS zones (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                camera_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                points TEXT NOT NULL,
                FOREIGN KEY (camera_id) REFERENCES cameras(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // 创建会话表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS capture_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time DATETIME NOT NULL,
                end_time DATETIME,
                is_completed INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // 会话开始时的摄像头快照
        // camera_id 不设外键：摄像头删除后历史会话仍需保留
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_cameras (
                session_id INTEGER NOT NULL,
                camera_id INTEGER NOT NULL,
                PRIMARY KEY (session_id, camera_id),
                FOREIGN KEY (session_id) REFERENCES capture_sessions(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // 创建采集结果表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS capture_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                camera_id INTEGER NOT NULL,
                image_path TEXT NOT NULL,
                people_count INTEGER NOT NULL,
                captured_at DATETIME NOT NULL,
                FOREIGN KEY (session_id) REFERENCES capture_sessions(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // 创建摄像头会话统计表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS camera_session_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                camera_id INTEGER NOT NULL,
                average_count REAL NOT NULL,
                UNIQUE (session_id, camera_id),
                FOREIGN KEY (session_id) REFERENCES capture_sessions(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // 创建会场会话统计表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hall_session_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL UNIQUE,
                total_count REAL NOT NULL,
                recorded_at DATETIME NOT NULL,
                FOREIGN KEY (session_id) REFERENCES capture_sessions(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // 同一时刻最多一个未完成会话
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_capture_sessions_single_active ON capture_sessions(is_completed) WHERE is_completed = 0",
        )
        .execute(&self.pool)
        .await?;

        // 创建索引
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_zones_camera_id ON zones(camera_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_capture_sessions_start_time ON capture_sessions(start_time)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_capture_results_session_captured ON capture_results(session_id, captured_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_capture_results_session_camera ON capture_results(session_id, camera_id)")
            .execute(&self.pool)
            .await?;

        info!("数据库表初始化完成");
        Ok(())
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }
}
