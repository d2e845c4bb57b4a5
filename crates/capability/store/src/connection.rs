//! 数据库连接管理
//!
//! 提供 SQLite 连接池初始化功能：
//! - connect_pool：按文件路径建立连接池，文件不存在时自动创建
//! - connect_memory：内存库，测试用
//!
//! 设计原则：
//! - 最大连接数限制为 8
//! - 使用 sqlx 提供的类型安全查询

use crate::error::StorageError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// 建立 SQLite 连接池
///
/// # 参数
/// - `db_path`：数据库文件路径
///
/// # 返回
/// - `Result<SqlitePool, StorageError>`：连接池或错误
pub async fn connect_pool(db_path: &str) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// 建立内存库连接池。单连接，保证所有操作看到同一份数据。
pub async fn connect_memory() -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::new().in_memory(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}
