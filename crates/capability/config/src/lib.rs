//! 网关运行配置加载。
//!
//! 配置文件解析属于外部协作者；核心只消费环境变量。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 单队列容量上限。
    pub max_queue_size: usize,
    /// 内部通知库路径。
    pub notify_db_path: String,
    /// 离线缓存库路径。
    pub lostcache_db_path: String,
    /// 数据中心库路径。
    pub datacenter_db_path: String,
    /// KV 存储容量上限。
    pub kv_max_size: usize,
    /// 调试模式：通知清理周期缩短为 60 秒。
    pub debug_mode: bool,
    /// 传输读超时（毫秒）。
    pub read_timeout_ms: u64,
    /// 传输写超时（毫秒）。
    pub write_timeout_ms: u64,
    /// 离线缓存回放批大小。
    pub replay_batch_size: usize,
    /// 离线缓存条目存活时长（秒），超龄条目按永久丢失计数。
    pub cache_ttl_seconds: u64,
}

impl AppConfig {
    /// 从环境变量读取配置，全部有缺省值。
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            max_queue_size: read_usize_with_default("OXGATE_MAX_QUEUE_SIZE", 10_240)?,
            notify_db_path: env::var("OXGATE_NOTIFY_DB")
                .unwrap_or_else(|_| "./oxgate_internotify.db".to_string()),
            lostcache_db_path: env::var("OXGATE_LOSTCACHE_DB")
                .unwrap_or_else(|_| "./oxgate_lostcache.db".to_string()),
            datacenter_db_path: env::var("OXGATE_DATACENTER_DB")
                .unwrap_or_else(|_| "./oxgate_datacenter.db".to_string()),
            kv_max_size: read_usize_with_default("OXGATE_KV_MAX_SIZE", 4096)?,
            debug_mode: read_bool_with_default("OXGATE_DEBUG", false),
            read_timeout_ms: read_u64_with_default("OXGATE_READ_TIMEOUT_MS", 3000)?,
            write_timeout_ms: read_u64_with_default("OXGATE_WRITE_TIMEOUT_MS", 3000)?,
            replay_batch_size: read_usize_with_default("OXGATE_REPLAY_BATCH", 64)?,
            cache_ttl_seconds: read_u64_with_default("OXGATE_CACHE_TTL_SECONDS", 86_400)?,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // 环境变量未设置时全部取缺省值
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.max_queue_size, 10_240);
        assert_eq!(config.replay_batch_size, 64);
        assert!(!config.debug_mode);
    }
}
