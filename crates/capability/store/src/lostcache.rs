//! 离线缓存
//!
//! 北向目标不可达时把待发记录落盘，目标恢复后按 id 升序分批
//! 回放。容量有界，超限时淘汰最旧记录；超过 TTL 的记录按永久
//! 丢失清除并计数。

use crate::error::StorageError;
use crate::models::CacheRecord;
use chrono::Utc;
use ox_telemetry::{record_cache_expired, record_cache_spilled};
use sqlx::SqlitePool;
use tracing::warn;

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS m_lost_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_uuid TEXT NOT NULL,
    payload TEXT NOT NULL,
    ts INTEGER NOT NULL
)";

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_m_lost_cache_target ON m_lost_cache (target_uuid, id)";

/// 离线缓存存储。
#[derive(Clone)]
pub struct LostCache {
    pool: SqlitePool,
    max_rows: i64,
    ttl_seconds: i64,
}

impl LostCache {
    pub async fn init(
        pool: SqlitePool,
        max_rows: i64,
        ttl_seconds: i64,
    ) -> Result<Self, StorageError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;
        Ok(Self {
            pool,
            max_rows,
            ttl_seconds,
        })
    }

    /// 落盘一条待发记录；超出容量时淘汰同目标最旧的一条。
    pub async fn save(&self, target_uuid: &str, payload: &str) -> Result<(), StorageError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM m_lost_cache WHERE target_uuid = ?")
                .bind(target_uuid)
                .fetch_one(&self.pool)
                .await?;
        if count.0 + 1 > self.max_rows {
            warn!(target = target_uuid, "lost cache full, oldest entry evicted");
            sqlx::query(
                "DELETE FROM m_lost_cache WHERE id = \
                 (SELECT id FROM m_lost_cache WHERE target_uuid = ? ORDER BY id ASC LIMIT 1)",
            )
            .bind(target_uuid)
            .execute(&self.pool)
            .await?;
        }
        sqlx::query("INSERT INTO m_lost_cache (target_uuid, payload, ts) VALUES (?, ?, ?)")
            .bind(target_uuid)
            .bind(payload)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        record_cache_spilled();
        Ok(())
    }

    /// 按 id 升序取一批待回放记录。
    pub async fn load_batch(
        &self,
        target_uuid: &str,
        limit: i64,
    ) -> Result<Vec<CacheRecord>, StorageError> {
        let rows = sqlx::query_as::<_, CacheRecord>(
            "SELECT id, target_uuid, payload, ts FROM m_lost_cache \
             WHERE target_uuid = ? ORDER BY id ASC LIMIT ?",
        )
        .bind(target_uuid)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// 回放成功后删除对应记录。
    pub async fn delete(&self, id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM m_lost_cache WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// 清除超过 TTL 的记录，返回清除条数。
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        let deadline = Utc::now().timestamp_millis() - self.ttl_seconds * 1000;
        let done = sqlx::query("DELETE FROM m_lost_cache WHERE ts < ?")
            .bind(deadline)
            .execute(&self.pool)
            .await?;
        let removed = done.rows_affected();
        for _ in 0..removed {
            record_cache_expired();
        }
        Ok(removed)
    }

    pub async fn count(&self, target_uuid: &str) -> Result<i64, StorageError> {
        let n: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM m_lost_cache WHERE target_uuid = ?")
            .bind(target_uuid)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.0)
    }
}
