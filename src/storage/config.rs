// 存储配置定义

use serde::{Deserialize, Serialize};

/// 数据库配置类型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DatabaseConfig {
    /// SQLite 配置
    #[serde(rename = "sqlite")]
    SQLite {
        /// 数据库文件路径
        db_path: String,
    },
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::SQLite {
            db_path: "data/hall-counter.db".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// 相对路径按数据目录解析
    pub fn resolve_db_path(&self, data_dir: &std::path::Path) -> String {
        match self {
            DatabaseConfig::SQLite { db_path } => {
                let path = std::path::Path::new(db_path);
                if path.is_absolute() {
                    db_path.clone()
                } else {
                    data_dir.join(path).to_string_lossy().to_string()
                }
            }
        }
    }
}
