//! 存储层错误类型
//!
//! 定义统一的存储错误类型，用于封装底层错误：
//! - SQL 执行错误
//! - KV 容量超限
//! - 表达式编译与求值错误

#[derive(Debug)]
pub struct StorageError {
    message: String,
    max_size_reached: bool,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            max_size_reached: false,
        }
    }

    /// KV 容量超限错误。
    pub fn max_size_reached(count: usize) -> Self {
        Self {
            message: format!("max store size reached: {count}"),
            max_size_reached: true,
        }
    }

    pub fn is_max_size_reached(&self) -> bool {
        self.max_size_reached
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}
