//! 内部通知日志
//!
//! 运行事件落入 SQLite 表 m_internal_notifies，两级兜底防止
//! 无限增长：
//! - 插入触发器：总数超过 1000 且为 100 的整数倍时删除最旧 100 条
//! - 定时清理：删除一天前的记录，生产环境每 24 小时一轮，
//!   调试模式每 60 秒一轮

use crate::error::StorageError;
use crate::models::NotifyRecord;
use chrono::Utc;
use domain::NotifyType;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS m_internal_notifies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL,
    type TEXT NOT NULL,
    status INTEGER NOT NULL,
    event TEXT NOT NULL,
    ts INTEGER NOT NULL,
    summary TEXT NOT NULL,
    info TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

const CREATE_TRIGGER: &str = "
CREATE TRIGGER IF NOT EXISTS limit_m_internal_notifies
AFTER INSERT ON m_internal_notifies
WHEN ((SELECT COUNT(*) FROM m_internal_notifies) / 100) * 100 = (SELECT COUNT(*) FROM m_internal_notifies)
AND (SELECT COUNT(*) FROM m_internal_notifies) > 1000
BEGIN
    DELETE FROM m_internal_notifies
    WHERE id IN (
        SELECT id FROM m_internal_notifies
        ORDER BY id ASC
        LIMIT 100
    );
END";

/// 通知日志存储。
#[derive(Clone)]
pub struct NotifyStore {
    pool: SqlitePool,
}

impl NotifyStore {
    /// 建表并安装限额触发器。
    pub async fn init(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_TRIGGER).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// 追加一条通知，默认未读。
    pub async fn push(
        &self,
        notify_type: NotifyType,
        event: &str,
        summary: &str,
        info: &str,
    ) -> Result<(), StorageError> {
        let uuid = format!(
            "NOTIFY{}",
            &Uuid::new_v4().simple().to_string().to_uppercase()[..12]
        );
        sqlx::query(
            "INSERT INTO m_internal_notifies (uuid, type, status, event, ts, summary, info) \
             VALUES (?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(&uuid)
        .bind(notify_type.as_str())
        .bind(event)
        .bind(Utc::now().timestamp_millis())
        .bind(summary)
        .bind(info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 分页拉取，最新在前。
    pub async fn list(&self, page: i64, size: i64) -> Result<Vec<NotifyRecord>, StorageError> {
        let offset = (page.max(1) - 1) * size;
        let rows = sqlx::query_as::<_, NotifyRecord>(
            "SELECT id, uuid, type, status, event, ts, summary, info, created_at \
             FROM m_internal_notifies ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// 标记一条为已读。
    pub async fn mark_read(&self, uuid: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE m_internal_notifies SET status = 2 WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// 清空全部通知。
    pub async fn clear(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM m_internal_notifies")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        let n: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM m_internal_notifies")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.0)
    }

    /// 删除一天前的记录。
    pub async fn reap_expired(&self) -> Result<u64, StorageError> {
        let done = sqlx::query(
            "DELETE FROM m_internal_notifies WHERE created_at < datetime('now', '-1 day')",
        )
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }

    /// 定时清理循环，令牌取消后退出。
    pub async fn run_reaper(&self, token: CancellationToken, debug_mode: bool) {
        let period = if debug_mode {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(24 * 60 * 60)
        };
        loop {
            match self.reap_expired().await {
                Ok(n) if n > 0 => info!(removed = n, "notify log reaped"),
                Ok(_) => {}
                Err(err) => error!(%err, "notify log reap failed"),
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }
    }
}
