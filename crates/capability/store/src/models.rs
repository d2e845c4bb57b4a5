//! 存储层数据模型。

use serde::{Deserialize, Serialize};

/// 通知日志记录。status：1 未读，2 已读。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotifyRecord {
    pub id: i64,
    pub uuid: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub notify_type: String,
    pub status: i64,
    pub event: String,
    pub ts: i64,
    pub summary: String,
    pub info: String,
    pub created_at: String,
}

/// 离线缓存记录，按 id 升序回放。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CacheRecord {
    pub id: i64,
    pub target_uuid: String,
    pub payload: String,
    pub ts: i64,
}

/// 数据中心列类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Bool,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Bool => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

/// 数据中心列定义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub description: String,
}

/// 数据中心表模式：uuid + 有序列清单。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSchema {
    pub uuid: String,
    pub columns: Vec<SchemaColumn>,
}
