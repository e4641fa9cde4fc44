use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub summary: SummaryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `memory://` 使用内存存储 (本地调试)
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub statement_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 清单 / 报表缓存 TTL
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// 全局汇总最近一次成功值的落盘位置, 为空则只保留在内存
    pub snapshot_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/rts_reconcile".to_string(),
                max_connections: 20,
                acquire_timeout_secs: 10,
                statement_timeout_secs: 30,
            },
            cache: CacheConfig { ttl_secs: 300 },
            summary: SummaryConfig {
                snapshot_path: Some(PathBuf::from("data/summary_snapshot.json")),
            },
        }
    }
}

impl AppConfig {
    /// 默认值 < APP__* 环境变量 < 兼容旧变量 (DATABASE_URL / SERVER_HOST / SERVER_PORT)
    ///
    /// 例: `APP__CACHE__TTL_SECS=60`
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .build()?
            .try_deserialize()
    }

    /// 从环境变量加载配置, 失败时回退到默认值
    pub fn from_env() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Invalid configuration ({}), falling back to defaults", e);
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert!(!config.database.is_memory());
    }

    #[test]
    fn test_defaults_round_trip_through_config_builder() {
        let loaded: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).unwrap())
            .set_override("cache.ttl_secs", 60)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(loaded.cache.ttl_secs, 60);
        assert_eq!(loaded.database.max_connections, 20);
        assert_eq!(
            loaded.summary.snapshot_path,
            Some(PathBuf::from("data/summary_snapshot.json"))
        );
    }

    #[test]
    fn test_memory_url() {
        let mut config = AppConfig::default();
        config.database.url = "memory://".to_string();
        assert!(config.database.is_memory());
    }
}
