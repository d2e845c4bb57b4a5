//! 离线缓存回放。
//!
//! 目标处于 Up 时按 id 升序分批取出落盘记录重新投递，至少一次
//! 语义，投递失败即停住本轮，等目标恢复后继续。过期记录由落盘
//! 层清理并计数。

use crate::{Target, TargetError};
use domain::EntityStatus;
use ox_store::LostCache;
use ox_telemetry::record_cache_replayed;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 回放参数。
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub batch_size: i64,
    pub interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            interval: Duration::from_secs(5),
        }
    }
}

/// 单目标回放循环。令牌取消后返回。
pub async fn run_replay(
    target: Arc<dyn Target>,
    cache: LostCache,
    target_uuid: String,
    config: ReplayConfig,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(config.interval) => {}
        }

        if let Err(err) = cache.purge_expired().await {
            warn!(target_id = %target_uuid, error = %err, "cache purge failed");
        }
        if target.status() != EntityStatus::Up {
            continue;
        }

        match replay_batch(target.as_ref(), &cache, &target_uuid, config.batch_size).await {
            Ok(0) => {}
            Ok(n) => info!(target_id = %target_uuid, replayed = n, "offline cache replayed"),
            Err(err) => {
                warn!(target_id = %target_uuid, error = %err, "cache replay interrupted");
            }
        }
    }
}

/// 回放一批，返回成功条数。失败处停住，保持剩余记录原序。
async fn replay_batch(
    target: &dyn Target,
    cache: &LostCache,
    target_uuid: &str,
    batch_size: i64,
) -> Result<usize, TargetError> {
    let records = cache
        .load_batch(target_uuid, batch_size)
        .await
        .map_err(|e| TargetError::Transient(e.to_string()))?;
    let mut replayed = 0usize;
    for record in records {
        target.to(&record.payload).await?;
        cache
            .delete(record.id)
            .await
            .map_err(|e| TargetError::Transient(e.to_string()))?;
        record_cache_replayed();
        replayed += 1;
    }
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCell;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingTarget {
        delivered: Mutex<Vec<String>>,
        fail_after: usize,
        status: StatusCell,
    }

    impl RecordingTarget {
        fn new(fail_after: usize) -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                fail_after,
                status: StatusCell::new(EntityStatus::Up),
            }
        }
    }

    #[async_trait]
    impl Target for RecordingTarget {
        async fn start(&self, _token: CancellationToken) -> Result<(), TargetError> {
            Ok(())
        }

        async fn to(&self, data: &str) -> Result<usize, TargetError> {
            let mut delivered = self.delivered.lock().unwrap();
            if delivered.len() >= self.fail_after {
                return Err(TargetError::Transient("link down".into()));
            }
            delivered.push(data.to_string());
            Ok(data.len())
        }

        fn status(&self) -> EntityStatus {
            self.status.get()
        }

        async fn ping(&self) -> Result<(), TargetError> {
            Ok(())
        }

        async fn stop(&self) {}
    }

    async fn cache_with(records: &[&str]) -> LostCache {
        let pool = ox_store::connect_memory().await.unwrap();
        let cache = LostCache::init(pool, 100, 3600).await.unwrap();
        for payload in records {
            cache.save("OUT1", payload).await.unwrap();
        }
        cache
    }

    #[tokio::test]
    async fn replays_in_enqueue_order() {
        let cache = cache_with(&["a", "b", "c"]).await;
        let target = RecordingTarget::new(10);
        let n = replay_batch(&target, &cache, "OUT1", 64).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(
            *target.delivered.lock().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(cache.count("OUT1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_keeps_remaining_records() {
        let cache = cache_with(&["a", "b", "c"]).await;
        let target = RecordingTarget::new(1);
        let err = replay_batch(&target, &cache, "OUT1", 64).await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(cache.count("OUT1").await.unwrap(), 2);

        // 恢复后从断点继续
        let target = RecordingTarget::new(10);
        let n = replay_batch(&target, &cache, "OUT1", 64).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            *target.delivered.lock().unwrap(),
            vec!["b".to_string(), "c".to_string()]
        );
    }
}
